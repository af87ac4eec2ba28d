//! Background worker that runs the sync coordinator.
//!
//! A run starts when:
//! - connectivity goes from offline to online,
//! - a caller requests one (requests made while a run is in flight coalesce
//!   into a single follow-up run),
//! - the backstop interval ticks and a remote ping succeeds.
//!
//! Consecutive failed runs back off exponentially (capped at 5 minutes) for
//! interval-driven runs. Every run outcome is published as a [`SyncEvent`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::offline::{Connectivity, ConnectivityState};
use crate::sync::{SyncCoordinator, SyncSummary};

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Outcome of one worker-driven run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncEvent {
    Completed { trigger: SyncTrigger, summary: SyncSummary },
    Failed { trigger: SyncTrigger, error: String },
}

/// Why a run started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Startup,
    Reconnected,
    Requested,
    Interval,
}

/// Delay before the next interval-driven run after `failures` consecutive
/// failed runs: `base * 2^failures`, capped at [`MAX_BACKOFF`]. One failure
/// already skips the next tick.
pub fn backoff_delay(base: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let factor = 1u32 << failures.min(8);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

/// Background sync worker.
pub struct SyncWorker {
    coordinator: Arc<SyncCoordinator>,
    connectivity: Connectivity,
    interval: Duration,
    events: broadcast::Sender<SyncEvent>,
}

/// Handle for the running worker (trigger, events, shutdown).
#[derive(Debug)]
pub struct SyncWorkerHandle {
    shutdown: Arc<Notify>,
    trigger: Arc<Notify>,
    events: broadcast::Sender<SyncEvent>,
    join: JoinHandle<()>,
}

impl SyncWorkerHandle {
    /// Request a run as soon as possible. Coalesces with pending requests.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Stop the worker and wait for the current run, if any, to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "sync worker task ended abnormally");
        }
    }
}

impl SyncWorker {
    pub fn new(coordinator: Arc<SyncCoordinator>, connectivity: Connectivity) -> Self {
        let (events, _rx) = broadcast::channel(64);
        Self {
            coordinator,
            connectivity,
            interval: DEFAULT_SYNC_INTERVAL,
            events,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Subscribe before [`SyncWorker::start`] to also see the start-up run.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Spawn the worker on the current tokio runtime.
    pub fn start(self) -> SyncWorkerHandle {
        let shutdown = Arc::new(Notify::new());
        let trigger = Arc::new(Notify::new());
        let events = self.events.clone();

        // Subscribe before spawning so a change made right after `start`
        // is seen as a transition.
        let mut connectivity_rx = self.connectivity.subscribe();
        let initial = *connectivity_rx.borrow_and_update();

        let join = tokio::spawn(self.run(initial, connectivity_rx, shutdown.clone(), trigger.clone()));

        SyncWorkerHandle {
            shutdown,
            trigger,
            events,
            join,
        }
    }

    async fn run(
        self,
        initial: ConnectivityState,
        mut connectivity_rx: watch::Receiver<ConnectivityState>,
        shutdown: Arc<Notify>,
        trigger: Arc<Notify>,
    ) {
        tracing::info!(interval = ?self.interval, "background sync worker started");

        if let Err(e) = self.coordinator.release_stale_claims().await {
            tracing::error!(error = %e, "failed to release stale sync claims");
        }

        let mut consecutive_failures = 0u32;
        let mut backoff_until: Option<Instant> = None;

        if initial == ConnectivityState::Online {
            self.run_once(SyncTrigger::Startup, &mut consecutive_failures, &mut backoff_until)
                .await;
        }

        let mut interval = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let cause = tokio::select! {
                _ = shutdown.notified() => {
                    tracing::info!("background sync worker received shutdown signal");
                    break;
                }
                _ = trigger.notified() => SyncTrigger::Requested,
                Ok(()) = connectivity_rx.changed() => {
                    match *connectivity_rx.borrow_and_update() {
                        ConnectivityState::Online => SyncTrigger::Reconnected,
                        ConnectivityState::Offline => continue,
                    }
                }
                _ = interval.tick() => SyncTrigger::Interval,
            };

            match cause {
                SyncTrigger::Interval => {
                    if backoff_until.is_some_and(|until| Instant::now() < until) {
                        tracing::debug!("skipping scheduled sync - backing off");
                        continue;
                    }
                    if !self.probe(&mut connectivity_rx).await {
                        continue;
                    }
                }
                _ => {
                    if self.connectivity.is_offline() {
                        tracing::debug!(?cause, "skipping sync - offline");
                        continue;
                    }
                }
            }

            self.run_once(cause, &mut consecutive_failures, &mut backoff_until)
                .await;
        }

        tracing::info!("background sync worker stopped");
    }

    /// Ping the remote and record the result as the connectivity state.
    async fn probe(
        &self,
        connectivity_rx: &mut watch::Receiver<ConnectivityState>,
    ) -> bool {
        let reachable = match self.coordinator.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "remote unreachable");
                false
            }
        };
        if reachable {
            self.connectivity.set_online();
        } else {
            self.connectivity.set_offline();
        }
        // This change was ours; do not treat it as a reconnect.
        connectivity_rx.borrow_and_update();
        reachable
    }

    async fn run_once(
        &self,
        trigger: SyncTrigger,
        consecutive_failures: &mut u32,
        backoff_until: &mut Option<Instant>,
    ) {
        tracing::debug!(?trigger, "sync run starting");
        let event = match self.coordinator.sync_pending().await {
            Ok(summary) => {
                if run_failed(&summary) {
                    self.record_failure(consecutive_failures, backoff_until);
                } else {
                    *consecutive_failures = 0;
                    *backoff_until = None;
                    if let Err(e) = self.coordinator.prune_synced().await {
                        tracing::warn!(error = %e, "failed to prune synced reports");
                    }
                }
                SyncEvent::Completed { trigger, summary }
            }
            Err(e) => {
                tracing::error!(error = %e, "sync run failed");
                self.record_failure(consecutive_failures, backoff_until);
                SyncEvent::Failed {
                    trigger,
                    error: e.to_string(),
                }
            }
        };
        // Lossy: nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn record_failure(&self, consecutive_failures: &mut u32, backoff_until: &mut Option<Instant>) {
        *consecutive_failures += 1;
        let delay = backoff_delay(self.interval, *consecutive_failures);
        tracing::warn!(
            failures = *consecutive_failures,
            backoff = ?delay,
            "sync run failed; backing off"
        );
        *backoff_until = Some(Instant::now() + delay);
    }
}

/// A run fails when records were attempted and none got through.
fn run_failed(summary: &SyncSummary) -> bool {
    summary.failed > 0 && summary.synced == 0
}
