//! Partition-bound view over the shared catalog.

use super::models::*;
use super::trait_def::{Catalog, PlaceContent};
use crate::partition::Partition;
use anyhow::Result;
use std::sync::Arc;

/// Every component of a partition holds one of these instead of the raw
/// catalog, so no call can be issued against the other partition.
#[derive(Clone)]
pub struct PartitionCatalog {
    inner: Arc<dyn Catalog>,
    partition: Partition,
}

impl PartitionCatalog {
    pub fn new(inner: Arc<dyn Catalog>, partition: Partition) -> Self {
        Self { inner, partition }
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn add_file(
        &self,
        file: &NewLibraryFile,
        place: PlaceContent<'_>,
    ) -> Result<(ContentId, AliasId)> {
        self.inner.add_file(self.partition, file, place)
    }

    pub fn get_alias(&self, alias_id: AliasId) -> Result<Option<ResolvedAlias>> {
        self.inner.get_alias(self.partition, alias_id)
    }

    pub fn get_content(&self, content_id: ContentId) -> Result<Option<LibraryFileContent>> {
        self.inner.get_content(self.partition, content_id)
    }

    pub fn find_by_digest(&self, digest: &str, now: i64) -> Result<Vec<ResolvedAlias>> {
        self.inner.find_by_digest(self.partition, digest, now)
    }

    pub fn delete_alias(&self, alias_id: AliasId) -> Result<bool> {
        self.inner.delete_alias(self.partition, alias_id)
    }

    pub fn unmigrated_content(
        &self,
        after: ContentId,
        limit: usize,
    ) -> Result<Vec<LibraryFileContent>> {
        self.inner.unmigrated_content(self.partition, after, limit)
    }

    pub fn mark_migrated(&self, content_id: ContentId, at: i64) -> Result<()> {
        self.inner.mark_migrated(self.partition, content_id, at)
    }

    pub fn expire_aliases(&self, cutoff: i64) -> Result<usize> {
        self.inner.expire_aliases(self.partition, cutoff)
    }

    pub fn duplicate_groups(&self) -> Result<Vec<DuplicateGroup>> {
        self.inner.duplicate_groups(self.partition)
    }

    pub fn repoint_aliases(&self, from: &[ContentId], to: ContentId) -> Result<usize> {
        self.inner.repoint_aliases(self.partition, from, to)
    }

    pub fn unreferenced_content(&self, created_before: i64) -> Result<Vec<LibraryFileContent>> {
        self.inner.unreferenced_content(self.partition, created_before)
    }

    pub fn purge_content(&self, content_id: ContentId) -> Result<bool> {
        self.inner.purge_content(self.partition, content_id)
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        self.inner.stats(self.partition)
    }
}
