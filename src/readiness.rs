//! Process-wide readiness plus a bounded history of run records.
//!
//! Readiness is a one-way latch: it starts `NOT_READY` and moves to `READY`
//! on the first successful publish. Later failures never move it back.
//! Transitions are broadcast on a `watch` channel for anyone who wants to
//! wait for the first store.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;
use snapshot_relay_core::models::RunRecord;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Readiness {
    NotReady,
    Ready,
}

impl std::fmt::Display for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Readiness::NotReady => "NOT_READY",
            Readiness::Ready => "READY",
        })
    }
}

pub struct ReadinessState {
    state: watch::Sender<Readiness>,
    active: Mutex<Option<RunRecord>>,
    history: Mutex<VecDeque<RunRecord>>,
    capacity: usize,
}

impl ReadinessState {
    /// `capacity` is how many finished run records are kept.
    pub fn new(capacity: usize) -> Self {
        let (state, _) = watch::channel(Readiness::NotReady);
        Self {
            state,
            active: Mutex::new(None),
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn readiness(&self) -> Readiness {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.readiness() == Readiness::Ready
    }

    /// Latch `READY`. Returns true on the transition itself.
    pub fn mark_ready(&self) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == Readiness::Ready {
                false
            } else {
                *state = Readiness::Ready;
                true
            }
        });
        if changed {
            tracing::info!("readiness NOT_READY -> READY");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<Readiness> {
        self.state.subscribe()
    }

    pub fn run_started(&self, run: &RunRecord) {
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(run.clone());
    }

    /// Attach the artifact fingerprint to the in-flight run once it is known.
    pub fn update_active(&self, run: &RunRecord) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.as_ref().is_some_and(|a| a.id == run.id) {
            *active = Some(run.clone());
        }
    }

    pub fn run_finished(&self, run: RunRecord) {
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if active.as_ref().is_some_and(|a| a.id == run.id) {
                *active = None;
            }
        }
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(run);
    }

    pub fn active_run(&self) -> Option<RunRecord> {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Finished runs, newest first.
    pub fn history(&self) -> Vec<RunRecord> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.iter().rev().cloned().collect()
    }

    pub fn last_run(&self) -> Option<RunRecord> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.back().cloned()
    }
}
