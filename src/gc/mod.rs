//! Reclaims content no alias refers to and keeps the size gauges current.

use crate::catalog_store::{ContentId, PartitionCatalog};
use crate::config::GcSettings;
use crate::error::{LibrarianError, LibrarianResult};
use crate::server::metrics;
use crate::storage::{layout, LibrarianStorage};
use anyhow::anyhow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcReport {
    pub expired_aliases: usize,
    pub repointed_aliases: usize,
    pub deleted_content: usize,
    pub deleted_files: usize,
    pub content_count: u64,
    pub total_bytes: u64,
}

pub struct GarbageCollector {
    storage: Arc<LibrarianStorage>,
    settings: GcSettings,
}

impl GarbageCollector {
    pub fn new(storage: Arc<LibrarianStorage>, settings: GcSettings) -> Self {
        Self { storage, settings }
    }

    /// One full sweep. Running it twice with no writes in between removes
    /// nothing the second time.
    pub async fn sweep(&self, cancel: &CancellationToken) -> LibrarianResult<GcReport> {
        let partition = self.storage.partition();
        let now = chrono::Utc::now().timestamp();
        let cutoff = now - self.settings.grace_period_secs();
        let mut report = GcReport::default();

        report.expired_aliases = self.expire_aliases(cutoff)?;

        if self.settings.merge_duplicates {
            report.repointed_aliases = self.merge_duplicates().await?;
        }
        if cancel.is_cancelled() {
            return Ok(report);
        }

        report.deleted_content = self.delete_unreferenced_content(cutoff, cancel).await?;
        if cancel.is_cancelled() {
            return Ok(report);
        }

        report.deleted_files = self.delete_unwanted_files().await?;

        let stats = self.storage.catalog().stats()?;
        report.content_count = stats.content_count;
        report.total_bytes = stats.total_bytes;
        metrics::set_content_gauges(partition.as_str(), stats.content_count, stats.total_bytes);

        info!(
            "GC of {}: {} aliases expired, {} repointed, {} content rows and {} stray files removed",
            partition,
            report.expired_aliases,
            report.repointed_aliases,
            report.deleted_content,
            report.deleted_files
        );
        Ok(report)
    }

    fn expire_aliases(&self, cutoff: i64) -> LibrarianResult<usize> {
        let expired = self.storage.catalog().expire_aliases(cutoff)?;
        metrics::record_gc_removals(self.storage.partition().as_str(), "alias", expired);
        Ok(expired)
    }

    async fn has_bytes(&self, content_id: ContentId) -> bool {
        if self.storage.exists_locally(content_id) {
            return true;
        }
        match self.storage.object_store().exists(content_id).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!("Could not check object store for {}: {}", content_id, e);
                false
            }
        }
    }

    /// Point aliases of identical content at the lowest id whose bytes are
    /// still present.
    async fn merge_duplicates(&self) -> LibrarianResult<usize> {
        let mut repointed = 0;
        for group in self.storage.catalog().duplicate_groups()? {
            if !self.has_bytes(group.keep).await {
                warn!(
                    "Not merging duplicates into content {}: its bytes are missing",
                    group.keep
                );
                continue;
            }
            let moved = self
                .storage
                .catalog()
                .repoint_aliases(&group.duplicates, group.keep)?;
            if moved > 0 {
                debug!(
                    "Repointed {} aliases from {:?} to {}",
                    moved, group.duplicates, group.keep
                );
            }
            repointed += moved;
        }
        Ok(repointed)
    }

    async fn delete_unreferenced_content(
        &self,
        cutoff: i64,
        cancel: &CancellationToken,
    ) -> LibrarianResult<usize> {
        let mut deleted = 0;
        for content in self.storage.catalog().unreferenced_content(cutoff)? {
            if cancel.is_cancelled() {
                break;
            }
            // Bytes first: a crash in between leaves a row GC will retry,
            // never a row pointing at nothing.
            if let Err(e) = self.storage.delete(content.id).await {
                warn!("Failed to delete bytes of content {}: {}", content.id, e);
                continue;
            }
            if self.storage.catalog().purge_content(content.id)? {
                deleted += 1;
            }
        }
        metrics::record_gc_removals(self.storage.partition().as_str(), "content", deleted);
        Ok(deleted)
    }

    async fn delete_unwanted_files(&self) -> LibrarianResult<usize> {
        let root = self.storage.root().to_path_buf();
        let catalog = self.storage.catalog().clone();
        let grace = Duration::from_secs(self.settings.grace_period_secs().max(0) as u64);
        let removed = tokio::task::spawn_blocking(move || remove_unwanted(&root, &catalog, grace))
            .await
            .map_err(|e| LibrarianError::Catalog(anyhow!("file sweep task failed: {}", e)))??;
        metrics::record_gc_removals(self.storage.partition().as_str(), "file", removed);
        Ok(removed)
    }
}

/// Shard leaves older than `grace` whose id has no content row.
fn unwanted_files(
    root: &Path,
    catalog: &PartitionCatalog,
    grace: Duration,
) -> LibrarianResult<Vec<PathBuf>> {
    let now = SystemTime::now();
    let mut unwanted = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(4)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            match entry.depth() {
                1..=3 => entry.file_type().is_dir() && layout::is_shard_name(&name),
                _ => entry.file_type().is_file() && layout::is_leaf_name(&name),
            }
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable spool entry: {}", e);
                continue;
            }
        };
        if entry.depth() != 4 {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let Some(content_id) = layout::content_id_from_relative(relative) else {
            continue;
        };
        let age = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < grace {
            continue;
        }
        if catalog.get_content(content_id)?.is_none() {
            unwanted.push(entry.into_path());
        }
    }
    Ok(unwanted)
}

fn remove_unwanted(root: &Path, catalog: &PartitionCatalog, grace: Duration) -> LibrarianResult<usize> {
    let mut removed = 0;
    for path in unwanted_files(root, catalog, grace)? {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed unwanted file {:?}", path);
                removed += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove unwanted file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}
