//! Copies committed content of one partition into the object store.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior},
};
use crate::partition::Partition;
use crate::swift::SwiftFeeder;
use std::time::Duration;

pub struct SwiftFeedJob {
    feeder: SwiftFeeder,
    partition: Partition,
    interval: Duration,
}

impl SwiftFeedJob {
    pub fn new(feeder: SwiftFeeder, partition: Partition, interval: Duration) -> Self {
        Self {
            feeder,
            partition,
            interval,
        }
    }
}

impl BackgroundJob for SwiftFeedJob {
    fn id(&self) -> &'static str {
        match self.partition {
            Partition::Public => "swift_feed_public",
            Partition::Restricted => "swift_feed_restricted",
        }
    }

    fn name(&self) -> &'static str {
        "Swift Feed"
    }

    fn description(&self) -> &'static str {
        "Copy unmigrated spool files into the object store"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Combined {
            interval: Some(self.interval),
            hooks: vec![HookEvent::OnStartup],
        }
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        // Unfinished copies are retried on the next run
        ShutdownBehavior::Cancellable
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let report = ctx
            .runtime
            .block_on(self.feeder.feed_once(&ctx.cancellation_token))?;

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        if report.failed > 0 {
            return Err(JobError::ExecutionFailed(format!(
                "{} of {} files failed to migrate",
                report.failed,
                report.failed + report.migrated + report.missing_locally
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::Catalog;
    use crate::config::SwiftSettings;
    use crate::storage::tests::{make_storage_with, store_bytes};
    use crate::swift::{MemoryObjectStore, ObjectStoreStrategy, TieredObjectStore};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn feeds_pending_content() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let memory = Arc::new(MemoryObjectStore::new("memory"));
        let tiered = TieredObjectStore::new(
            ObjectStoreStrategy::Single(memory.clone()),
            Duration::from_secs(5),
        );
        let t = make_storage_with(Partition::Public, tiered);
        let stored = runtime.block_on(store_bytes(&t.storage, "a.bin", b"payload"));

        let job = SwiftFeedJob::new(
            SwiftFeeder::new(t.storage.clone(), &SwiftSettings::default()),
            Partition::Public,
            Duration::from_secs(60),
        );
        assert_eq!(job.id(), "swift_feed_public");

        let ctx = JobContext::new(CancellationToken::new(), runtime.handle().clone());
        job.execute(&ctx).unwrap();

        assert!(memory.contains(stored.content_id));
        let content = t
            .catalog
            .get_content(Partition::Public, stored.content_id)
            .unwrap()
            .unwrap();
        assert!(content.migrated_at.is_some());
    }

    #[test]
    fn cancelled_context_does_nothing() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let t = make_storage_with(Partition::Restricted, TieredObjectStore::disabled());
        let job = SwiftFeedJob::new(
            SwiftFeeder::new(t.storage.clone(), &SwiftSettings::default()),
            Partition::Restricted,
            Duration::from_secs(60),
        );
        let token = CancellationToken::new();
        token.cancel();
        let ctx = JobContext::new(token, runtime.handle().clone());
        assert!(matches!(job.execute(&ctx), Err(JobError::Cancelled)));
    }
}
