//! Run coordination and the interval schedule.
//!
//! [`RunCoordinator`] is the single-flight guard: a trigger that arrives
//! while a run is in flight is dropped, not queued. Every trigger source
//! (startup, interval tick, manual refresh) goes through
//! [`RunCoordinator::trigger`], so there is exactly one place where the
//! `IDLE -> RUNNING` transition happens.
//!
//! Failed runs get no special backoff; the next interval tick simply tries
//! again.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use snapshot_relay_core::models::{RunRecord, Trigger};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::info;

use crate::config::ScheduleConfig;

/// Something that performs one complete run.
#[async_trait]
pub trait RunExecutor: Send + Sync + 'static {
    async fn execute(&self, trigger: Trigger) -> RunRecord;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinatorState {
    Idle,
    Running,
}

#[derive(Debug)]
pub enum TriggerOutcome {
    Started(JoinHandle<RunRecord>),
    /// A run was already in flight.
    Dropped,
}

impl TriggerOutcome {
    pub fn was_started(&self) -> bool {
        matches!(self, TriggerOutcome::Started(_))
    }
}

pub struct RunCoordinator {
    executor: Arc<dyn RunExecutor>,
    running: Arc<AtomicBool>,
    dropped: AtomicU64,
}

/// Returns the coordinator to `IDLE` when the run task ends, however it ends.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RunCoordinator {
    pub fn new(executor: Arc<dyn RunExecutor>) -> Self {
        Self {
            executor,
            running: Arc::new(AtomicBool::new(false)),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        if self.running.load(Ordering::Acquire) {
            CoordinatorState::Running
        } else {
            CoordinatorState::Idle
        }
    }

    /// Start a run unless one is already in flight.
    pub fn trigger(&self, trigger: Trigger) -> TriggerOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            info!(%trigger, "run already in flight, trigger dropped");
            return TriggerOutcome::Dropped;
        }

        let guard = RunGuard(self.running.clone());
        let executor = self.executor.clone();
        TriggerOutcome::Started(tokio::spawn(async move {
            let _guard = guard;
            executor.execute(trigger).await
        }))
    }

    /// Trigger and wait. `None` if the trigger was dropped.
    pub async fn run_now(&self, trigger: Trigger) -> Option<RunRecord> {
        match self.trigger(trigger) {
            TriggerOutcome::Started(handle) => match handle.await {
                Ok(run) => Some(run),
                Err(e) => {
                    tracing::error!(error = %e, "run task panicked");
                    None
                }
            },
            TriggerOutcome::Dropped => None,
        }
    }

    /// Triggers dropped because a run was in flight.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Drive the coordinator: one startup run, then one trigger per interval.
///
/// The first interval tick fires one full period after start. Ticks missed
/// while a run was in flight are skipped rather than bunched up.
pub async fn run_schedule(
    coordinator: Arc<RunCoordinator>,
    schedule: ScheduleConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(interval_secs = schedule.interval_secs, "scheduler starting");

    if schedule.run_on_start {
        coordinator.trigger(Trigger::Startup);
    }

    let period = schedule.interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {
                coordinator.trigger(Trigger::Interval);
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!("scheduler shut down");
}
