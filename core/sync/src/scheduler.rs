//! Sync scheduling - manual and periodic modes.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use tilesync_common::{Error, Result};

use crate::state::CycleOutcome;

/// Sync mode configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Cycles run only when requested.
    Manual,
    /// Cycles run at regular intervals, and on request.
    Periodic { interval: Duration },
}

impl SyncMode {
    fn interval(&self) -> Option<Duration> {
        match self {
            SyncMode::Periodic { interval } => Some(*interval),
            SyncMode::Manual => None,
        }
    }
}

/// Sync request types.
#[derive(Debug)]
pub enum SyncRequest {
    /// Run one sync cycle.
    Cycle,
    /// Shutdown the scheduler.
    Shutdown,
}

type Responder = oneshot::Sender<Result<CycleOutcome>>;

/// Scheduler for managing sync timing and requests.
pub struct SyncScheduler {
    /// Current sync mode.
    mode: Arc<RwLock<SyncMode>>,
    /// Channel to send sync requests.
    request_tx: mpsc::Sender<(SyncRequest, Responder)>,
    /// Shutdown signal.
    shutdown: Arc<RwLock<bool>>,
}

impl SyncScheduler {
    /// Create a new scheduler with the given mode.
    pub fn new(mode: SyncMode) -> (Self, SyncSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(100);
        let mode = Arc::new(RwLock::new(mode));
        let shutdown = Arc::new(RwLock::new(false));

        let scheduler = Self {
            mode: mode.clone(),
            request_tx,
            shutdown: shutdown.clone(),
        };

        let handle = SyncSchedulerHandle {
            mode,
            request_rx: Some(request_rx),
            shutdown,
        };

        (scheduler, handle)
    }

    /// Request a sync cycle and wait for its outcome.
    ///
    /// Requests arriving while a cycle runs are answered with
    /// [`CycleOutcome::Coalesced`] once it finishes.
    pub async fn request_sync(&self) -> Result<CycleOutcome> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send((SyncRequest::Cycle, response_tx))
            .await
            .map_err(|_| Error::Scheduler("Scheduler not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Scheduler("Failed to receive sync result".to_string()))?
    }

    /// Change the sync mode.
    pub async fn set_mode(&self, mode: SyncMode) {
        let mut current_mode = self.mode.write().await;
        *current_mode = mode;
    }

    /// Get current sync mode.
    pub async fn get_mode(&self) -> SyncMode {
        self.mode.read().await.clone()
    }

    /// Shutdown the scheduler.
    pub async fn shutdown(&self) {
        let mut is_shutdown = self.shutdown.write().await;
        *is_shutdown = true;

        // Wake the loop if it is waiting.
        let (response_tx, _) = oneshot::channel();
        let _ = self
            .request_tx
            .send((SyncRequest::Shutdown, response_tx))
            .await;
    }
}

/// Handle for the scheduler background task.
pub struct SyncSchedulerHandle {
    mode: Arc<RwLock<SyncMode>>,
    request_rx: Option<mpsc::Receiver<(SyncRequest, Responder)>>,
    shutdown: Arc<RwLock<bool>>,
}

impl SyncSchedulerHandle {
    /// Run the scheduler background task.
    ///
    /// This should be spawned in a tokio task. The `sync_fn` is called
    /// whenever a cycle is due.
    pub async fn run<F, Fut>(mut self, sync_fn: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<CycleOutcome>> + Send,
    {
        let Some(mut request_rx) = self.request_rx.take() else {
            error!("Sync scheduler handle already consumed");
            return;
        };
        let mut current_interval = self.mode.read().await.interval();
        let mut periodic_interval = current_interval.map(Self::create_periodic_interval);

        info!("Sync scheduler started");

        loop {
            // Check for shutdown
            if *self.shutdown.read().await {
                info!("Sync scheduler shutting down");
                break;
            }

            tokio::select! {
                // Handle incoming sync requests
                Some((request, response_tx)) = request_rx.recv() => {
                    match request {
                        SyncRequest::Shutdown => {
                            info!("Received shutdown request");
                            break;
                        }
                        SyncRequest::Cycle => {
                            debug!("Processing requested sync cycle");
                            let result = sync_fn().await;
                            let _ = response_tx.send(result);
                        }
                    }
                }

                // Handle periodic sync
                _ = Self::wait_for_periodic(&mut periodic_interval) => {
                    debug!("Triggering periodic sync");
                    match sync_fn().await {
                        Ok(CycleOutcome::Completed(report)) => {
                            info!(
                                "Periodic sync completed: {} synced, {} failed, {} exports installed",
                                report.classes_synced,
                                report.classes_failed,
                                report.exports_installed
                            );
                        }
                        Ok(outcome) => debug!("Periodic sync skipped: {:?}", outcome),
                        Err(e) => error!("Periodic sync failed: {}", e),
                    }
                }
            }

            // Triggers that queued up while the cycle ran are dropped.
            while let Ok((request, response_tx)) = request_rx.try_recv() {
                match request {
                    SyncRequest::Shutdown => {
                        info!("Received shutdown request");
                        return;
                    }
                    SyncRequest::Cycle => {
                        debug!("Coalescing sync request queued during cycle");
                        let _ = response_tx.send(Ok(CycleOutcome::Coalesced));
                    }
                }
            }

            // Recreate interval if mode changed
            let expected_interval = self.mode.read().await.interval();
            if current_interval != expected_interval {
                debug!("Sync interval changed to {:?}", expected_interval);
                current_interval = expected_interval;
                periodic_interval = current_interval.map(Self::create_periodic_interval);
            }
        }
    }

    fn create_periodic_interval(period: Duration) -> Interval {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    async fn wait_for_periodic(interval: &mut Option<Interval>) {
        if let Some(ref mut interval) = interval {
            interval.tick().await;
        } else {
            // Re-checks the mode every hour while manual
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}
