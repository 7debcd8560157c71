//! The reconciliation engine loop.
//!
//! Claims batches, runs at most `workers` items at a time, and hands each
//! outcome to the status tracker. On shutdown no new item is started;
//! in-flight items run to completion and unstarted claims are released.
//!
//! Each item runs in its own task, supervised by a heartbeat that renews
//! the claim every third of the lease. A panicking item is recorded as
//! `error`; an item whose claim was taken over is abandoned.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use veille_consensus::{ConsensusResolver, PromptTemplates};
use veille_core::{EngineConfig, ItemId, Result, Taxonomy};
use veille_oracle::Oracle;
use veille_store::Store;

use crate::pipeline::{ItemPipeline, PipelineSettings};
use crate::tracker::{JobSelector, StatusTracker};
use crate::types::{ItemReport, ProcessError, RunReport};

/// Floor of the renewal period.
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

pub struct Engine<S, O> {
    selector: Arc<JobSelector<S>>,
    tracker: Arc<StatusTracker<S>>,
    pipeline: Arc<ItemPipeline<S, O>>,
    workers: usize,
    poll_interval: Duration,
}

impl<S: Store, O: Oracle> Engine<S, O> {
    pub fn new(
        selector: JobSelector<S>,
        tracker: StatusTracker<S>,
        pipeline: ItemPipeline<S, O>,
        workers: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            selector: Arc::new(selector),
            tracker: Arc::new(tracker),
            pipeline: Arc::new(pipeline),
            workers: workers.max(1),
            poll_interval,
        }
    }

    /// Wire the engine from its configuration.
    pub fn from_config(
        store: Arc<S>,
        taxonomy: Arc<Taxonomy>,
        templates: Arc<PromptTemplates>,
        resolver: Arc<ConsensusResolver<O>>,
        config: &EngineConfig,
    ) -> Self {
        let selector = JobSelector::new(store.clone(), config.batch_size, config.lease_timeout());
        let tracker = StatusTracker::new(store.clone(), selector.claimant());
        let pipeline = ItemPipeline::new(
            store,
            taxonomy,
            templates,
            resolver,
            PipelineSettings::from(config),
        )
        .with_claimant(selector.claimant());
        Self::new(
            selector,
            tracker,
            pipeline,
            config.workers,
            config.poll_interval(),
        )
    }

    /// Claim one batch and process it.
    pub async fn run_batch(&self, shutdown: &watch::Receiver<bool>) -> Result<RunReport> {
        let ids = self.selector.claim().await?;
        let mut report = RunReport {
            claimed: ids.len(),
            ..Default::default()
        };
        if ids.is_empty() {
            return Ok(report);
        }

        let mut queue = ids.into_iter();
        let mut in_flight = JoinSet::new();
        loop {
            while in_flight.len() < self.workers {
                if *shutdown.borrow() {
                    break;
                }
                let Some(id) = queue.next() else {
                    break;
                };
                self.spawn_item(&mut in_flight, id);
            }

            match in_flight.join_next().await {
                Some(Ok(outcome)) => report.record(&outcome),
                Some(Err(e)) => {
                    // Only the status write itself can get here.
                    error!("Item supervisor aborted: {}", e);
                    report.failed += 1;
                }
                None => break,
            }
        }

        let unstarted: Vec<ItemId> = queue.collect();
        if !unstarted.is_empty() {
            report.released = self.selector.release(unstarted).await?;
        }
        info!(
            "Batch finished: {} done, {} failed, {} arbitrated, {} released",
            report.done, report.failed, report.arbitrated, report.released
        );
        Ok(report)
    }

    fn spawn_item(
        &self,
        in_flight: &mut JoinSet<std::result::Result<ItemReport, ProcessError>>,
        id: ItemId,
    ) {
        let pipeline = self.pipeline.clone();
        let tracker = self.tracker.clone();
        let selector = self.selector.clone();
        in_flight.spawn(async move {
            let outcome = supervise(id, pipeline, &selector).await;
            if let Err(e) = tracker.finish(id, &outcome).await {
                error!("Item {}: failed to record status: {}", id, e);
            }
            outcome
        });
    }

    /// Process batches until `shutdown` turns true (or its sender is dropped),
    /// polling every `poll_interval` while nothing is claimable.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<RunReport> {
        info!(
            "Engine started (run {}, {} workers)",
            self.selector.claimant(),
            self.workers
        );
        let mut total = RunReport::default();
        loop {
            if *shutdown.borrow() {
                break;
            }
            let idle = match self.run_batch(&shutdown).await {
                Ok(report) => {
                    total.merge(&report);
                    report.claimed == 0
                }
                Err(e) => {
                    error!("Batch failed: {}", e);
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        info!(
            "Engine stopped: {} claimed, {} done, {} failed, {} arbitrated",
            total.claimed, total.done, total.failed, total.arbitrated
        );
        Ok(total)
    }

    /// Process batches until no claimable item is left.
    pub async fn drain(&self) -> Result<RunReport> {
        let (_tx, rx) = watch::channel(false);
        let mut total = RunReport::default();
        loop {
            let report = self.run_batch(&rx).await?;
            if report.claimed == 0 {
                break;
            }
            total.merge(&report);
        }
        Ok(total)
    }
}

fn heartbeat_period(lease: Duration) -> Duration {
    (lease / 3).max(MIN_HEARTBEAT)
}

/// Run one item in its own task and keep its claim alive until it ends.
async fn supervise<S: Store, O: Oracle>(
    id: ItemId,
    pipeline: Arc<ItemPipeline<S, O>>,
    selector: &JobSelector<S>,
) -> std::result::Result<ItemReport, ProcessError> {
    let mut work = tokio::spawn(async move { pipeline.process(id).await });
    let period = heartbeat_period(selector.lease_timeout());
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            joined = &mut work => {
                return joined.unwrap_or_else(|e| Err(ProcessError::Aborted(e.to_string())));
            }
            _ = heartbeat.tick() => match selector.renew(id).await {
                Ok(true) => debug!("Item {}: lease renewed", id),
                Ok(false) => {
                    warn!("Item {}: claim taken over, abandoning", id);
                    work.abort();
                    return Err(ProcessError::ClaimLost(id));
                }
                Err(e) => warn!("Item {}: lease renewal failed: {}", id, e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_period() {
        assert_eq!(heartbeat_period(Duration::from_secs(1800)), Duration::from_secs(600));
        assert_eq!(heartbeat_period(Duration::ZERO), MIN_HEARTBEAT);
    }
}
