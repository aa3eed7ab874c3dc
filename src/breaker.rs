// One breaker per poll stream -- a failing compression poll must not stop
// system metrics from being served.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Set once per Open window so an `rpc_error` is emitted at most once
    /// per window without the caller tracking its own flag.
    error_emitted_this_window: bool,
}

/// Decides whether the Poller should call the backend or serve cached data.
/// State and counters are mutated under a single lock so observers always
/// see a consistent pair.
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

/// What the caller should do after consulting the breaker, and whether this
/// call is the trial call that just flipped Open -> HalfOpen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallDecision {
    pub should_call: bool,
    pub just_transitioned_to_half_open: bool,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                error_emitted_this_window: false,
            }),
        }
    }

    pub async fn state(&self) -> BreakerState {
        self.inner.lock().await.state
    }

    /// Performs the Open -> HalfOpen transition itself once the reset
    /// window has elapsed.
    pub async fn should_call(&self) -> CallDecision {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => CallDecision {
                should_call: true,
                just_transitioned_to_half_open: false,
            },
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|opened_at| opened_at.elapsed() >= self.reset_timeout)
                    .unwrap_or(false);
                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    CallDecision {
                        should_call: true,
                        just_transitioned_to_half_open: true,
                    }
                } else {
                    CallDecision {
                        should_call: false,
                        just_transitioned_to_half_open: false,
                    }
                }
            }
        }
    }

    /// Record a successful call. Returns `true` iff this success is the one
    /// that just closed the breaker (i.e. an `RPC_RECOVERED` event is due).
    pub async fn record_success(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let was_open_or_half_open = !matches!(inner.state, BreakerState::Closed);
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.error_emitted_this_window = false;
        was_open_or_half_open
    }

    /// Reports whether an `rpc_error` is due for this failure, honouring the
    /// once-per-window dedup rule.
    pub async fn record_failure(&self) -> FailureOutcome {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.error_emitted_this_window = true;
                    FailureOutcome::JustOpened
                } else {
                    FailureOutcome::StillClosed
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                if inner.error_emitted_this_window {
                    FailureOutcome::StillOpenSilent
                } else {
                    inner.error_emitted_this_window = true;
                    FailureOutcome::JustOpened
                }
            }
            BreakerState::Open => FailureOutcome::StillOpenSilent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Breaker is Closed and under threshold; no event due.
    StillClosed,
    /// Breaker just transitioned to Open; emit one `rpc_error`.
    JustOpened,
    /// Breaker already Open (or re-opened from HalfOpen after the window's
    /// error was already emitted); stay silent.
    StillOpenSilent,
}
