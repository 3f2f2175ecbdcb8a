//! Periodic garbage collection of one partition.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior},
};
use crate::gc::GarbageCollector;
use crate::partition::Partition;
use std::time::Duration;
use tracing::info;

pub struct GarbageCollectionJob {
    collector: GarbageCollector,
    partition: Partition,
    interval: Duration,
}

impl GarbageCollectionJob {
    pub fn new(collector: GarbageCollector, partition: Partition, interval: Duration) -> Self {
        Self {
            collector,
            partition,
            interval,
        }
    }
}

impl BackgroundJob for GarbageCollectionJob {
    fn id(&self) -> &'static str {
        match self.partition {
            Partition::Public => "garbage_collection_public",
            Partition::Restricted => "garbage_collection_restricted",
        }
    }

    fn name(&self) -> &'static str {
        "Garbage Collection"
    }

    fn description(&self) -> &'static str {
        "Expire aliases, merge duplicates and remove unreferenced content"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(self.interval)
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let report = ctx
            .runtime
            .block_on(self.collector.sweep(&ctx.cancellation_token))?;

        if ctx.is_cancelled() {
            info!("GC of {} stopped early: {:?}", self.partition, report);
            return Err(JobError::Cancelled);
        }
        Ok(())
    }
}
