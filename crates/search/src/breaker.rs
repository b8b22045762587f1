//! Two-state circuit breaker guarding one backend dependency.
//!
//! ```text
//! Closed --(consecutive failures >= threshold)--> Open
//! Open --(cooldown elapsed, next caller is the trial)--> Closed on success
//!                                                    --> Open on failure
//! ```
//!
//! There is no half-open queue. While a trial is in flight every other
//! caller is rejected and takes the fallback path.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
        }
    }
}

/// What a caller may do right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The cooldown has elapsed and this caller owns the single trial call.
    Trial,
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerTransition {
    Opened,
    Reopened,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub open_for_ms: Option<u64>,
    pub trial_in_flight: bool,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn admit(&self, now: Instant) -> Admission {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Admission::Allowed,
            BreakerState::Open if inner.trial_in_flight => Admission::Rejected,
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|opened_at| now.saturating_duration_since(opened_at) >= self.cooldown)
                    .unwrap_or(true);
                if cooled {
                    inner.trial_in_flight = true;
                    Admission::Trial
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    /// Any success resets the failure count and closes the breaker.
    pub fn record_success(&self) -> Option<BreakerTransition> {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.trial_in_flight = false;
        if inner.state == BreakerState::Open {
            inner.state = BreakerState::Closed;
            inner.opened_at = None;
            return Some(BreakerTransition::Closed);
        }
        None
    }

    /// A failed call made while closed. Failures that land after another
    /// caller already opened the breaker leave the open timestamp alone.
    pub fn record_failure(&self, now: Instant) -> Option<BreakerTransition> {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        if inner.state == BreakerState::Closed
            && inner.consecutive_failures >= self.failure_threshold
        {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(now);
            return Some(BreakerTransition::Opened);
        }
        None
    }

    /// The trial call failed; restart the cooldown.
    pub fn record_trial_failure(&self, now: Instant) -> Option<BreakerTransition> {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.trial_in_flight = false;
        inner.state = BreakerState::Open;
        inner.opened_at = Some(now);
        Some(BreakerTransition::Reopened)
    }

    /// Gives the trial slot back without a verdict, e.g. when the trial
    /// future was dropped at a deadline.
    pub fn release_trial(&self) {
        self.lock().trial_in_flight = false;
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn snapshot(&self, now: Instant) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.failure_threshold,
            open_for_ms: inner
                .opened_at
                .map(|opened_at| now.saturating_duration_since(opened_at).as_millis() as u64),
            trial_in_flight: inner.trial_in_flight,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
