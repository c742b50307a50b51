//! Periodic cycles for a set of pipelines.
//!
//! Each pipeline runs on its own tokio task so a slow scope never delays
//! another. Shutdown is a `watch` flag: tasks finish the cycle in flight and
//! then exit.

use std::sync::Arc;
use std::time::Duration;

use cloudsync_core::{SyncError, SyncResult};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::pipeline::Pipeline;

/// Runs pipelines at a fixed interval until shut down.
#[derive(Debug)]
pub struct Scheduler {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    /// Spawn one task per pipeline, each running a cycle every `every`.
    ///
    /// The first cycle starts immediately. Must be called inside a tokio
    /// runtime. A zero interval is rejected.
    pub fn spawn(every: Duration, pipelines: Vec<Arc<Pipeline>>) -> SyncResult<Self> {
        if every.is_zero() {
            return Err(SyncError::Configuration(
                "scheduler interval must be greater than zero".to_string(),
            ));
        }
        let (shutdown, rx) = watch::channel(false);
        let handles = pipelines
            .into_iter()
            .map(|pipeline| tokio::spawn(run(pipeline, every, rx.clone())))
            .collect();
        Ok(Self { handles, shutdown })
    }

    /// Validate `config` and spawn at its scan interval.
    pub fn from_config(config: &SyncConfig, pipelines: Vec<Arc<Pipeline>>) -> SyncResult<Self> {
        config.validate()?;
        Self::spawn(config.scan_interval_duration(), pipelines)
    }

    /// Number of running pipeline tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no pipelines are scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal shutdown and wait for every task to finish its current cycle.
    pub async fn shutdown(self) {
        info!(pipelines = self.handles.len(), "stopping scheduler");
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(error) = handle.await {
                warn!(%error, "pipeline task ended abnormally");
            }
        }
    }
}

async fn run(pipeline: Arc<Pipeline>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(scope = %pipeline.scope(), interval = ?every, "pipeline started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = pipeline.run_cycle().await;
                debug!(scope = %report.scope, failures = report.failures(), "scheduled cycle done");
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(scope = %pipeline.scope(), "pipeline stopped");
}
