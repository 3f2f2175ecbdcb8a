//! Catalog trait definition.

use super::models::*;
use crate::partition::Partition;
use anyhow::Result;

/// Callback that moves committed bytes into place while the catalog
/// transaction for `ContentId` is still open.
pub type PlaceContent<'a> = &'a mut dyn FnMut(ContentId) -> Result<()>;

/// Relational metadata for stored files.
///
/// Every method takes the partition it acts on; rows of the other partition
/// are invisible to it.
pub trait Catalog: Send + Sync {
    // =========================================================================
    // Upload
    // =========================================================================

    /// Insert a content row and its first alias, then run `place` with the new
    /// content id before committing. If `place` fails nothing is recorded.
    fn add_file(
        &self,
        partition: Partition,
        file: &NewLibraryFile,
        place: PlaceContent<'_>,
    ) -> Result<(ContentId, AliasId)>;

    // =========================================================================
    // Lookup
    // =========================================================================

    fn get_alias(&self, partition: Partition, alias_id: AliasId) -> Result<Option<ResolvedAlias>>;

    fn get_content(
        &self,
        partition: Partition,
        content_id: ContentId,
    ) -> Result<Option<LibraryFileContent>>;

    /// Servable aliases whose content has `digest`, oldest first.
    fn find_by_digest(
        &self,
        partition: Partition,
        digest: &str,
        now: i64,
    ) -> Result<Vec<ResolvedAlias>>;

    /// Soft-delete an alias. Returns false if it did not exist.
    fn delete_alias(&self, partition: Partition, alias_id: AliasId) -> Result<bool>;

    // =========================================================================
    // Migration bookkeeping
    // =========================================================================

    /// Unmigrated content with ids above `after`, in id order.
    fn unmigrated_content(
        &self,
        partition: Partition,
        after: ContentId,
        limit: usize,
    ) -> Result<Vec<LibraryFileContent>>;

    fn mark_migrated(&self, partition: Partition, content_id: ContentId, at: i64) -> Result<()>;

    // =========================================================================
    // Garbage collection
    // =========================================================================

    /// Mark aliases whose expiry is at or before `cutoff` as deleted.
    fn expire_aliases(&self, partition: Partition, cutoff: i64) -> Result<usize>;

    fn duplicate_groups(&self, partition: Partition) -> Result<Vec<DuplicateGroup>>;

    /// Point every alias of `from` at `to`. Returns the number of aliases moved.
    fn repoint_aliases(&self, partition: Partition, from: &[ContentId], to: ContentId)
        -> Result<usize>;

    /// Content created at or before `created_before` with no live alias.
    fn unreferenced_content(
        &self,
        partition: Partition,
        created_before: i64,
    ) -> Result<Vec<LibraryFileContent>>;

    /// Remove a content row and its (deleted) aliases, provided it is still
    /// unreferenced. Returns false if it was gone or has gained a live alias.
    fn purge_content(&self, partition: Partition, content_id: ContentId) -> Result<bool>;

    fn stats(&self, partition: Partition) -> Result<CatalogStats>;
}
