//! # Circuit Breaker
//!
//! Guards a single upstream dependency. The breaker moves between three
//! states:
//!
//! - **Closed**: calls pass through and their outcomes are recorded in a
//!   rolling time window. Once the window holds at least `volume_threshold`
//!   outcomes and the failure percentage exceeds the threshold, it opens.
//! - **Open**: calls are rejected without running for `reset_timeout`.
//! - **HalfOpen**: after the cooldown exactly one trial call runs. Concurrent
//!   callers are rejected. Success closes the breaker with an empty window,
//!   failure opens it again with a fresh cooldown.
//!
//! A call that outlives `call_timeout` is cancelled and counts as a failure.
//! State sits behind a `std::sync::Mutex` that is never held across an await.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::configs::CircuitBreakerConfig;

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through.
    Closed,
    /// Calls are short-circuited.
    Open,
    /// The cooldown has elapsed and a trial call may run.
    HalfOpen,
}

/// Why a guarded call produced no value.
#[derive(Debug, Error)]
pub enum Rejection<E> {
    /// The breaker did not let the call run.
    #[error("circuit open, call short-circuited")]
    ShortCircuited,
    /// The call ran past the breaker's call timeout.
    #[error("call timed out")]
    TimedOut,
    /// The call ran and failed.
    #[error("{0}")]
    Failed(E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

#[derive(Debug)]
struct Core {
    phase: Phase,
    /// `(recorded_at, succeeded)`, oldest first.
    outcomes: VecDeque<(Instant, bool)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permit {
    Normal,
    Trial,
}

/// A breaker around one upstream dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    core: Mutex<Core>,
}

/// An admitted call. A trial dropped before settling hands the trial slot back.
struct Attempt<'a> {
    breaker: &'a CircuitBreaker,
    permit: Permit,
    settled: bool,
}

impl Attempt<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        self.breaker.record(self.permit, success);
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.settled && self.permit == Permit::Trial {
            let mut core = self.breaker.core.lock().expect("Breaker lock poisoned");
            core.phase = Phase::Open {
                until: Instant::now(),
            };
        }
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker. `name` only appears in logs.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            core: Mutex::new(Core {
                phase: Phase::Closed,
                outcomes: VecDeque::new(),
            }),
        }
    }

    /// Current state. Reports `HalfOpen` as soon as the cooldown has elapsed.
    pub fn state(&self) -> BreakerState {
        let core = self.core.lock().expect("Breaker lock poisoned");
        match core.phase {
            Phase::Closed => BreakerState::Closed,
            Phase::Open { until } if Instant::now() >= until => BreakerState::HalfOpen,
            Phase::Open { .. } => BreakerState::Open,
            Phase::HalfOpen => BreakerState::HalfOpen,
        }
    }

    /// Runs `f` through the breaker.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, Rejection<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempt = self.try_acquire().ok_or(Rejection::ShortCircuited)?;

        match tokio::time::timeout(self.config.call_timeout, f()).await {
            Ok(Ok(value)) => {
                attempt.settle(true);
                Ok(value)
            }
            Ok(Err(e)) => {
                attempt.settle(false);
                Err(Rejection::Failed(e))
            }
            Err(_) => {
                attempt.settle(false);
                Err(Rejection::TimedOut)
            }
        }
    }

    fn try_acquire(&self) -> Option<Attempt<'_>> {
        let mut core = self.core.lock().expect("Breaker lock poisoned");
        let permit = match core.phase {
            Phase::Closed => Permit::Normal,
            Phase::Open { until } if Instant::now() >= until => {
                info!("Breaker '{}' half-open, allowing one trial call", self.name);
                core.phase = Phase::HalfOpen;
                Permit::Trial
            }
            Phase::Open { .. } | Phase::HalfOpen => return None,
        };
        Some(Attempt {
            breaker: self,
            permit,
            settled: false,
        })
    }

    fn record(&self, permit: Permit, success: bool) {
        let mut core = self.core.lock().expect("Breaker lock poisoned");
        let now = Instant::now();

        if permit == Permit::Trial {
            if success {
                info!("Breaker '{}' closed after successful trial", self.name);
                core.phase = Phase::Closed;
                core.outcomes.clear();
            } else {
                warn!("Breaker '{}' trial failed, reopening", self.name);
                core.phase = Phase::Open {
                    until: now + self.config.reset_timeout,
                };
            }
            return;
        }

        // A concurrent call may already have opened the breaker.
        if core.phase != Phase::Closed {
            return;
        }

        core.outcomes.push_back((now, success));
        while let Some(&(at, _)) = core.outcomes.front() {
            if at + self.config.rolling_window <= now {
                core.outcomes.pop_front();
            } else {
                break;
            }
        }

        let total = core.outcomes.len() as u64;
        let failures = core.outcomes.iter().filter(|(_, ok)| !ok).count() as u64;
        let threshold = u64::from(self.config.error_threshold_percentage);
        if total >= u64::from(self.config.volume_threshold) && failures * 100 > threshold * total {
            warn!(
                "Breaker '{}' opened: {}/{} failures in the rolling window",
                self.name, failures, total
            );
            core.phase = Phase::Open {
                until: now + self.config.reset_timeout,
            };
            core.outcomes.clear();
        }
    }
}
