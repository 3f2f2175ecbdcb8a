//! Catalog rows for stored content and the aliases that expose it.

use crate::partition::Partition;
use serde::{Deserialize, Serialize};

pub type ContentId = i64;
pub type AliasId = i64;

/// The bytes of one upload event. Never mutated after commit; only the
/// `deleted` and `migrated_at` columns change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryFileContent {
    pub id: ContentId,
    pub size: u64,
    /// Lowercase hex digest of the full byte stream.
    pub digest: String,
    /// Partition whose spool received the bytes.
    pub restricted: bool,
    pub deleted: bool,
    /// Unix seconds of the successful copy into object storage.
    pub migrated_at: Option<i64>,
    pub created_at: i64,
}

impl LibraryFileContent {
    pub fn is_migrated(&self) -> bool {
        self.migrated_at.is_some()
    }

    pub fn partition(&self) -> Partition {
        Partition::from_restricted(self.restricted)
    }
}

/// A named, typed reference to a content row. This is what callers see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryFileAlias {
    pub id: AliasId,
    pub content_id: ContentId,
    pub filename: String,
    pub mime_type: String,
    pub expires: Option<i64>,
    pub restricted: bool,
    pub deleted: bool,
    pub created_at: i64,
}

impl LibraryFileAlias {
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires, Some(expires) if expires <= now)
    }
}

/// An alias joined with the content it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAlias {
    pub alias: LibraryFileAlias,
    pub content: LibraryFileContent,
}

impl ResolvedAlias {
    /// Whether the alias may be served at `now`.
    pub fn is_servable(&self, now: i64) -> bool {
        !self.alias.deleted && !self.content.deleted && !self.alias.is_expired(now)
    }
}

/// Metadata recorded when an upload commits.
#[derive(Debug, Clone)]
pub struct NewLibraryFile {
    pub filename: String,
    pub mime_type: String,
    pub expires: Option<i64>,
    pub size: u64,
    pub digest: String,
}

/// Content rows in one partition sharing a digest and size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub keep: ContentId,
    pub duplicates: Vec<ContentId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub content_count: u64,
    pub total_bytes: u64,
}
