//! Per-check UP/DOWN state machine.
//!
//! Each check publishes an immutable [`HealthState`] through an `ArcSwap`. Readers
//! (the aggregate, the HTTP handlers) load the current snapshot without locking; the
//! scheduler replaces it with a compare-and-swap so a result recorded against an
//! older generation can never overwrite newer state.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::time::Instant;

use crate::check::CheckResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
}

impl HealthStatus {
    pub fn from_healthy(healthy: bool) -> Self {
        if healthy {
            HealthStatus::Up
        } else {
            HealthStatus::Down
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, HealthStatus::Up)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Up => "up",
            HealthStatus::Down => "down",
        }
    }
}

/// Snapshot of one check's state. Never mutated once published.
#[derive(Debug, Clone)]
pub struct HealthState {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_transition: Instant,
    pub last_checked: Option<Instant>,
    /// Reason given by the most recent unhealthy result, cleared on success.
    pub last_message: Option<String>,
    pub generation: u64,
}

impl HealthState {
    fn initial(healthy: bool) -> Self {
        Self {
            status: HealthStatus::from_healthy(healthy),
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_transition: Instant::now(),
            last_checked: None,
            last_message: None,
            generation: 0,
        }
    }
}

/// What [`CheckState::record`] did with a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Counters moved but the status held.
    Unchanged,
    /// The status flipped to the contained value.
    Transitioned(HealthStatus),
    /// The result belonged to an earlier generation and was dropped.
    Stale,
}

pub struct CheckState {
    failure_attempts: u32,
    success_attempts: u32,
    current: ArcSwap<HealthState>,
}

impl CheckState {
    pub fn new(initial_healthy: bool, failure_attempts: u32, success_attempts: u32) -> Self {
        Self {
            failure_attempts: failure_attempts.max(1),
            success_attempts: success_attempts.max(1),
            current: ArcSwap::from_pointee(HealthState::initial(initial_healthy)),
        }
    }

    pub fn snapshot(&self) -> Arc<HealthState> {
        self.current.load_full()
    }

    pub fn is_healthy(&self) -> bool {
        self.current.load().status.is_up()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }

    /// Apply a probe result taken under `generation`.
    pub fn record(&self, generation: u64, result: &CheckResult) -> RecordOutcome {
        let mut current = self.current.load();
        loop {
            if current.generation != generation {
                return RecordOutcome::Stale;
            }
            let (next, outcome) = self.apply(&current, result);
            let previous = self.current.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&previous, &current) {
                return outcome;
            }
            current = previous;
        }
    }

    /// Make every in-flight result stale. Status and counters are kept.
    pub fn invalidate(&self) -> u64 {
        let previous = self.current.rcu(|state| {
            let mut next = HealthState::clone(state);
            next.generation += 1;
            next
        });
        previous.generation + 1
    }

    fn apply(&self, state: &HealthState, result: &CheckResult) -> (HealthState, RecordOutcome) {
        let mut next = state.clone();
        next.last_checked = Some(Instant::now());
        next.last_message = result.message().map(str::to_owned);

        let flip_to = if result.is_healthy() {
            next.consecutive_failures = 0;
            next.consecutive_successes += 1;
            (state.status == HealthStatus::Down
                && next.consecutive_successes >= self.success_attempts)
                .then_some(HealthStatus::Up)
        } else {
            next.consecutive_successes = 0;
            next.consecutive_failures += 1;
            (state.status == HealthStatus::Up
                && next.consecutive_failures >= self.failure_attempts)
                .then_some(HealthStatus::Down)
        };

        match flip_to {
            Some(status) => {
                next.status = status;
                next.consecutive_failures = 0;
                next.consecutive_successes = 0;
                next.last_transition = Instant::now();
                (next, RecordOutcome::Transitioned(status))
            }
            None => (next, RecordOutcome::Unchanged),
        }
    }
}
