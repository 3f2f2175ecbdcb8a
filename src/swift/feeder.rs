//! Copies committed spool files into object storage.

use super::retry_policy::RetryPolicy;
use crate::catalog_store::{ContentId, LibraryFileContent};
use crate::config::SwiftSettings;
use crate::error::LibrarianResult;
use crate::server::metrics;
use crate::storage::LibrarianStorage;
use futures::StreamExt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedOutcome {
    Migrated,
    MissingLocally,
    Failed,
    Cancelled,
}

impl FeedOutcome {
    fn label(&self) -> &'static str {
        match self {
            FeedOutcome::Migrated => "migrated",
            FeedOutcome::MissingLocally => "missing",
            FeedOutcome::Failed => "failed",
            FeedOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FeedReport {
    pub migrated: usize,
    pub missing_locally: usize,
    pub failed: usize,
}

pub struct SwiftFeeder {
    storage: Arc<LibrarianStorage>,
    retry_policy: RetryPolicy,
    workers: usize,
    batch_size: usize,
    remove_local_after_migration: bool,
    /// Highest content id handed out in the previous batch.
    cursor: AtomicI64,
}

impl SwiftFeeder {
    pub fn new(storage: Arc<LibrarianStorage>, settings: &SwiftSettings) -> Self {
        Self {
            storage,
            retry_policy: RetryPolicy::new(settings),
            workers: settings.feed_workers.max(1),
            batch_size: settings.feed_batch_size,
            remove_local_after_migration: settings.remove_local_after_migration,
            cursor: AtomicI64::new(0),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Migrate the next batch of unmigrated content in id order.
    ///
    /// Each batch resumes after the last id of the previous one, so rows that
    /// keep failing or have no spool file cannot starve newer content. The
    /// cursor wraps to the start once it runs past the newest row.
    pub async fn feed_once(&self, cancel: &CancellationToken) -> LibrarianResult<FeedReport> {
        let mut report = FeedReport::default();
        if !self.storage.object_store().is_enabled() {
            return Ok(report);
        }

        let pending = self.next_batch()?;
        if pending.is_empty() {
            debug!("No {} content awaiting migration", self.storage.partition());
            return Ok(report);
        }
        info!(
            "Migrating {} {} files with {} workers",
            pending.len(),
            self.storage.partition(),
            self.workers
        );

        let outcomes: Vec<FeedOutcome> = futures::stream::iter(pending)
            .map(|content| async move { self.migrate(&content, cancel).await })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let partition = self.storage.partition().as_str();
        for outcome in outcomes {
            metrics::record_swift_feed(partition, outcome.label());
            match outcome {
                FeedOutcome::Migrated => report.migrated += 1,
                FeedOutcome::MissingLocally => report.missing_locally += 1,
                FeedOutcome::Failed => report.failed += 1,
                FeedOutcome::Cancelled => {}
            }
        }
        info!(
            "Swift feed for {}: {} migrated, {} missing, {} failed",
            partition, report.migrated, report.missing_locally, report.failed
        );
        Ok(report)
    }

    fn next_batch(&self) -> LibrarianResult<Vec<LibraryFileContent>> {
        let catalog = self.storage.catalog();
        let after: ContentId = self.cursor.load(Ordering::SeqCst);
        let mut pending = catalog.unmigrated_content(after, self.batch_size)?;
        if pending.is_empty() && after > 0 {
            pending = catalog.unmigrated_content(0, self.batch_size)?;
        }
        let next = pending.last().map(|c| c.id).unwrap_or(0);
        self.cursor.store(next, Ordering::SeqCst);
        Ok(pending)
    }

    async fn migrate(&self, content: &LibraryFileContent, cancel: &CancellationToken) -> FeedOutcome {
        let path = self.storage.local_path(content.id);
        if !path.is_file() {
            warn!(
                "Content {} has no spool file at {:?}, skipping migration",
                content.id, path
            );
            return FeedOutcome::MissingLocally;
        }

        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return FeedOutcome::Cancelled;
            }
            match self
                .storage
                .object_store()
                .put_file(content.id, &path, content.size)
                .await
            {
                Ok(()) => break,
                Err(e) if self.retry_policy.should_retry(&e, attempt) => {
                    let delay = self.retry_policy.delay(attempt);
                    warn!(
                        "Copy of content {} failed (attempt {}): {}, retrying in {:?}",
                        content.id,
                        attempt + 1,
                        e,
                        delay
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return FeedOutcome::Cancelled,
                    }
                }
                Err(e) => {
                    error!("Giving up on content {}: {}", content.id, e);
                    return FeedOutcome::Failed;
                }
            }
        }

        let now = chrono::Utc::now().timestamp();
        if let Err(e) = self.storage.catalog().mark_migrated(content.id, now) {
            error!("Copied content {} but could not mark it: {}", content.id, e);
            return FeedOutcome::Failed;
        }

        if self.remove_local_after_migration {
            if let Err(e) = self.storage.remove_local(content.id).await {
                warn!("Failed to remove spool copy of {}: {}", content.id, e);
            }
        }
        debug!("Content {} migrated", content.id);
        FeedOutcome::Migrated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::ContentId;
    use crate::error::LibrarianError;
    use crate::partition::Partition;
    use crate::storage::tests::{make_storage_with, store_bytes};
    use crate::swift::{
        MemoryObjectStore, ObjectBody, ObjectStore, ObjectStoreStrategy, TieredObjectStore,
    };
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn settings(remove_local: bool) -> SwiftSettings {
        SwiftSettings {
            enabled: true,
            feed_workers: 2,
            remove_local_after_migration: remove_local,
            ..Default::default()
        }
    }

    fn no_backoff() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_backoff_secs: 0,
            max_backoff_secs: 0,
            backoff_multiplier: 1.0,
        }
    }

    fn single(store: Arc<dyn ObjectStore>) -> TieredObjectStore {
        TieredObjectStore::new(ObjectStoreStrategy::Single(store), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn migrates_and_marks_content() {
        let remote = Arc::new(MemoryObjectStore::new("memory"));
        let t = make_storage_with(Partition::Public, single(remote.clone()));
        let a = store_bytes(&t.storage, "a", b"alpha").await;
        let b = store_bytes(&t.storage, "b", b"beta").await;
        let storage = t.storage.clone();

        let feeder = SwiftFeeder::new(storage.clone(), &settings(false));
        let report = feeder.feed_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.migrated, 2);
        assert!(remote.contains(a.content_id));
        assert!(remote.contains(b.content_id));
        assert!(storage.exists_locally(a.content_id));
        assert!(storage.catalog().unmigrated_content(0, 10).unwrap().is_empty());

        // A second pass finds nothing to do.
        let report = feeder.feed_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report, FeedReport::default());
    }

    #[tokio::test]
    async fn removes_spool_copy_when_configured() {
        let remote = Arc::new(MemoryObjectStore::new("memory"));
        let t = make_storage_with(Partition::Restricted, single(remote.clone()));
        let stored = store_bytes(&t.storage, "a", b"secret").await;
        let storage = t.storage.clone();

        SwiftFeeder::new(storage.clone(), &settings(true))
            .feed_once(&CancellationToken::new())
            .await
            .unwrap();

        assert!(!storage.exists_locally(stored.content_id));
        let opened = storage.open(stored.content_id).await.unwrap();
        assert_eq!(opened.read_all().await.unwrap(), b"secret");
    }

    #[tokio::test]
    async fn missing_spool_file_is_skipped() {
        let remote = Arc::new(MemoryObjectStore::new("memory"));
        let t = make_storage_with(Partition::Public, single(remote.clone()));
        let stored = store_bytes(&t.storage, "a", b"gone").await;
        std::fs::remove_file(t.storage.local_path(stored.content_id)).unwrap();
        let storage = t.storage.clone();

        let report = SwiftFeeder::new(storage.clone(), &settings(false))
            .feed_once(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.missing_locally, 1);
        assert!(remote.is_empty());
        assert_eq!(storage.catalog().unmigrated_content(0, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stuck_rows_do_not_starve_newer_content() {
        let remote = Arc::new(MemoryObjectStore::new("memory"));
        let t = make_storage_with(Partition::Public, single(remote.clone()));
        let gone = store_bytes(&t.storage, "a", b"gone").await;
        let fresh = store_bytes(&t.storage, "b", b"fresh").await;
        std::fs::remove_file(t.storage.local_path(gone.content_id)).unwrap();

        let feeder = SwiftFeeder::new(
            t.storage.clone(),
            &SwiftSettings {
                feed_batch_size: 1,
                ..settings(false)
            },
        );
        let cancel = CancellationToken::new();

        let first = feeder.feed_once(&cancel).await.unwrap();
        assert_eq!(first.missing_locally, 1);
        let second = feeder.feed_once(&cancel).await.unwrap();
        assert_eq!(second.migrated, 1);
        assert!(remote.contains(fresh.content_id));

        // The cursor wraps back to the stuck row.
        let third = feeder.feed_once(&cancel).await.unwrap();
        assert_eq!(third.missing_locally, 1);
        assert!(!remote.contains(gone.content_id));
    }

    struct FlakyStore {
        inner: MemoryObjectStore,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn put_file(&self, id: ContentId, path: &Path, size: u64) -> LibrarianResult<()> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(LibrarianError::ObjectStore("503".to_string()));
            }
            self.inner.put_file(id, path, size).await
        }
        async fn get(&self, id: ContentId) -> LibrarianResult<Option<ObjectBody>> {
            self.inner.get(id).await
        }
        async fn exists(&self, id: ContentId) -> LibrarianResult<bool> {
            self.inner.exists(id).await
        }
        async fn delete(&self, id: ContentId) -> LibrarianResult<()> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let flaky = Arc::new(FlakyStore {
            inner: MemoryObjectStore::new("memory"),
            failures_left: AtomicUsize::new(2),
        });
        let t = make_storage_with(Partition::Public, single(flaky.clone()));
        let stored = store_bytes(&t.storage, "a", b"retry me").await;
        let storage = t.storage.clone();

        let report = SwiftFeeder::new(storage, &settings(false))
            .with_retry_policy(no_backoff())
            .feed_once(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.migrated, 1);
        assert!(flaky.inner.contains(stored.content_id));
    }

    #[tokio::test]
    async fn persistent_failure_leaves_content_unmigrated() {
        let flaky = Arc::new(FlakyStore {
            inner: MemoryObjectStore::new("memory"),
            failures_left: AtomicUsize::new(100),
        });
        let t = make_storage_with(Partition::Public, single(flaky));
        let stored = store_bytes(&t.storage, "a", b"stuck").await;
        let storage = t.storage.clone();

        let report = SwiftFeeder::new(storage.clone(), &settings(true))
            .with_retry_policy(no_backoff())
            .feed_once(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert!(storage.exists_locally(stored.content_id));
        assert_eq!(storage.catalog().unmigrated_content(0, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disabled_object_store_is_a_no_op() {
        let t = crate::storage::tests::make_storage(Partition::Public);
        store_bytes(&t.storage, "a", b"local only").await;
        let report = SwiftFeeder::new(t.storage.clone(), &settings(false))
            .feed_once(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report, FeedReport::default());
    }
}
