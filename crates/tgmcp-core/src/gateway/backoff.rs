use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use tokio::time::{sleep_until, Instant};

use crate::domain::OperationClass;

use super::classify::{ErrorKind, Failure};

/// How a caller reacts when its operation class is under flood control.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CallMode {
    /// Fail fast with `RateLimited` (interactive tool calls).
    #[default]
    Interactive,
    /// Sleep through the block if it ends within `max_wait`.
    Batch { max_wait: Duration },
}

/// Answer of [`BackoffController::gate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    Ready,
    Blocked { until: Instant },
}

#[derive(Clone, Debug)]
pub struct RateState {
    pub blocked_until: Instant,
    pub reason: String,
}

/// Remote-imposed wait periods, tracked per operation class.
///
/// One block recorded by any caller is seen by every later caller of the same
/// class. `blocked_until` only moves forward until the entry expires and is
/// dropped by the next `gate` call.
#[derive(Debug, Default)]
pub struct BackoffController {
    states: Mutex<HashMap<OperationClass, RateState>>,
}

impl BackoffController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gate(&self, class: OperationClass) -> Gate {
        self.gate_at(class, Instant::now())
    }

    pub fn gate_at(&self, class: OperationClass, now: Instant) -> Gate {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        match states.get(&class) {
            Some(state) if state.blocked_until > now => Gate::Blocked {
                until: state.blocked_until,
            },
            Some(_) => {
                states.remove(&class);
                Gate::Ready
            }
            None => Gate::Ready,
        }
    }

    pub fn record_block(&self, class: OperationClass, until: Instant, reason: impl Into<String>) {
        let reason = reason.into();
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        match states.get_mut(&class) {
            Some(state) if state.blocked_until >= until => {}
            Some(state) => {
                state.blocked_until = until;
                state.reason = reason;
            }
            None => {
                states.insert(
                    class,
                    RateState {
                        blocked_until: until,
                        reason,
                    },
                );
            }
        }
        tracing::warn!(
            class = %class,
            wait_ms = until.saturating_duration_since(Instant::now()).as_millis() as u64,
            "flood control recorded"
        );
    }

    /// Record the block carried by a `RateLimited` failure, if it has a wait.
    pub fn record_failure(&self, class: OperationClass, failure: &Failure) {
        if failure.kind != ErrorKind::RateLimited {
            return;
        }
        if let Some(wait) = failure.retry_after {
            self.record_block(class, Instant::now() + wait, failure.detail.clone());
        }
    }

    pub fn state(&self, class: OperationClass) -> Option<RateState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&class)
            .cloned()
    }

    /// Wait for (or reject) a call in `class` according to `mode`.
    ///
    /// Batch callers sleep at most `max_wait` in total; a block that ends later
    /// is reported as `RateLimited` right away without sleeping.
    pub async fn admit(&self, class: OperationClass, mode: CallMode) -> Result<(), Failure> {
        let mut waited = Duration::ZERO;
        loop {
            let now = Instant::now();
            let until = match self.gate_at(class, now) {
                Gate::Ready => return Ok(()),
                Gate::Blocked { until } => until,
            };
            let remaining = until.saturating_duration_since(now);

            let max_wait = match mode {
                CallMode::Interactive => Duration::ZERO,
                CallMode::Batch { max_wait } => max_wait,
            };
            if waited + remaining > max_wait {
                return Err(Failure::rate_limited(Some(remaining))
                    .with_detail(format!("class {class} blocked for {remaining:?}")));
            }

            tracing::debug!(
                class = %class,
                wait_ms = remaining.as_millis() as u64,
                "waiting out flood control"
            );
            sleep_until(until).await;
            waited += remaining;
        }
    }
}
