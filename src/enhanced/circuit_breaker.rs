//! Circuit Breaker
//!
//! Prevents repeated attempts against a resource that is currently failing.
//!
//! ## States
//! - **Closed**: normal operation, calls flow through. Consecutive failures
//!   are counted; reaching the threshold opens the circuit.
//! - **Open**: calls are rejected until the recovery timeout elapses.
//! - **Half-Open**: exactly one trial call is in flight. Its success closes
//!   the circuit, its failure re-opens it with a fresh timer.
//!
//! Transitions only ever go Closed → Open → HalfOpen → {Closed, Open}.
//! Every transition happens under one mutex, so two concurrent failures
//! cannot both trip the breaker and two callers cannot both win the
//! half-open trial.
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use tokio_hybrid_router::enhanced::CircuitBreaker;
//! use tokio_hybrid_router::enhanced::circuit_breaker::CircuitBreakerError;
//! # #[tokio::main]
//! # async fn main() {
//! let breaker = CircuitBreaker::new(5, Duration::from_secs(60));
//!
//! match breaker.call(|| async {
//!     // Your operation: replace with a real async call
//!     Ok::<&str, &str>("generated text")
//! }).await {
//!     Ok(result) => println!("{result}"),
//!     Err(CircuitBreakerError::Open) => {
//!         // Circuit open, fail fast
//!     }
//!     Err(CircuitBreakerError::Failed(e)) => {
//!         eprintln!("Operation failed: {e}");
//!     }
//! }
//! # }
//! ```

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker guarding one protected resource.
///
/// Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct CircuitBreaker {
    state: Arc<Mutex<CircuitState>>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

#[derive(Debug)]
struct CircuitState {
    status: CircuitStatus,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Set while the single half-open trial is outstanding.
    trial_in_flight: bool,
    last_state_change: Instant,
    total_successes: u64,
    total_failures: u64,
    times_opened: u64,
    /// Bumped on every status change.
    epoch: u64,
}

impl CircuitState {
    fn enter(&mut self, status: CircuitStatus, now: Instant) {
        self.status = status;
        self.last_state_change = now;
        self.epoch = self.epoch.wrapping_add(1);
    }

    /// `true` when a permit granted in `granted` no longer matches the
    /// current state. Unsourced records always apply.
    fn is_stale(&self, granted: Option<u64>) -> bool {
        granted.is_some_and(|epoch| epoch != self.epoch)
    }
}

/// Current state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    /// Circuit is closed: requests flow through normally.
    Closed,
    /// Circuit is open: requests are rejected immediately.
    Open,
    /// Circuit is half-open: one trial request tests recovery.
    HalfOpen,
}

impl CircuitStatus {
    /// Lowercase name used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker errors
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, request rejected
    Open,
    /// Operation failed
    Failed(E),
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    ///
    /// # Arguments
    /// * `failure_threshold` - Consecutive failures that open the circuit
    /// * `recovery_timeout` - How long to stay open before allowing a trial
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(CircuitState {
                status: CircuitStatus::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
                last_state_change: Instant::now(),
                total_successes: 0,
                total_failures: 0,
                times_opened: 0,
                epoch: 0,
            })),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
        }
    }

    /// Decide whether a call may proceed right now.
    ///
    /// In the open state the first call after the recovery timeout moves the
    /// breaker to half-open and is admitted as the single trial; every other
    /// caller is rejected until that trial is resolved with
    /// [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn allow(&self) -> bool {
        self.admit().is_some()
    }

    /// Like [`allow`](Self::allow), but returns a [`CallPermit`] that records
    /// a failure if it is dropped without being resolved.
    ///
    /// A permit only steers the state machine while the breaker is still in
    /// the state that granted it. Once the breaker has moved on, resolving an
    /// older permit updates the lifetime totals and nothing else.
    pub fn try_acquire(&self) -> Option<CallPermit> {
        self.admit().map(|epoch| CallPermit {
            breaker: self.clone(),
            epoch,
            resolved: false,
        })
    }

    /// Admission check. Returns the epoch the caller was admitted in.
    fn admit(&self) -> Option<u64> {
        let mut state = self.state.lock();

        match state.status {
            CircuitStatus::Closed => Some(state.epoch),
            CircuitStatus::Open => {
                let elapsed = state
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(self.recovery_timeout);
                if elapsed >= self.recovery_timeout {
                    state.enter(CircuitStatus::HalfOpen, Instant::now());
                    state.trial_in_flight = true;
                    info!("circuit breaker: transitioning to half-open (trial admitted)");
                    Some(state.epoch)
                } else {
                    let remaining = self.recovery_timeout - elapsed;
                    debug!(
                        remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                        "circuit breaker: request rejected (open)"
                    );
                    None
                }
            }
            CircuitStatus::HalfOpen => {
                if state.trial_in_flight {
                    debug!("circuit breaker: request rejected (half-open trial in flight)");
                    None
                } else {
                    state.trial_in_flight = true;
                    Some(state.epoch)
                }
            }
        }
    }

    /// Record a successful call.
    ///
    /// Resets the consecutive-failure count; a half-open trial success closes
    /// the circuit.
    pub fn record_success(&self) {
        self.on_success(None);
    }

    /// Record a failed call.
    ///
    /// In the closed state this counts towards the threshold; a half-open
    /// trial failure re-opens the circuit with a fresh timer.
    pub fn record_failure(&self) {
        self.on_failure(None);
    }

    fn on_success(&self, granted: Option<u64>) {
        let mut state = self.state.lock();
        state.total_successes += 1;

        if state.is_stale(granted) {
            debug!(
                permit_epoch = granted,
                epoch = state.epoch,
                status = state.status.as_str(),
                "circuit breaker: stale permit success counted only"
            );
            return;
        }
        state.consecutive_failures = 0;

        match state.status {
            CircuitStatus::HalfOpen => {
                state.enter(CircuitStatus::Closed, Instant::now());
                state.trial_in_flight = false;
                state.opened_at = None;
                info!("circuit breaker: closing (trial succeeded)");
            }
            CircuitStatus::Closed => {
                debug!("circuit breaker: success recorded");
            }
            CircuitStatus::Open => {
                // A call admitted before the circuit opened finished late.
                debug!("circuit breaker: late success ignored while open");
            }
        }
    }

    fn on_failure(&self, granted: Option<u64>) {
        let mut state = self.state.lock();
        state.total_failures += 1;

        if state.is_stale(granted) {
            debug!(
                permit_epoch = granted,
                epoch = state.epoch,
                status = state.status.as_str(),
                "circuit breaker: stale permit failure counted only"
            );
            return;
        }

        match state.status {
            CircuitStatus::Closed => {
                state.consecutive_failures += 1;
                warn!(
                    failures = state.consecutive_failures,
                    threshold = self.failure_threshold,
                    "circuit breaker: failure recorded"
                );
                if state.consecutive_failures >= self.failure_threshold {
                    let now = Instant::now();
                    state.enter(CircuitStatus::Open, now);
                    state.opened_at = Some(now);
                    state.times_opened += 1;
                    warn!(
                        failures = state.consecutive_failures,
                        threshold = self.failure_threshold,
                        "circuit breaker: opening (threshold reached)"
                    );
                }
            }
            CircuitStatus::HalfOpen => {
                let now = Instant::now();
                state.consecutive_failures += 1;
                state.enter(CircuitStatus::Open, now);
                state.opened_at = Some(now);
                state.trial_in_flight = false;
                state.times_opened += 1;
                warn!("circuit breaker: reopening (half-open trial failed)");
            }
            CircuitStatus::Open => {
                debug!("circuit breaker: late failure ignored while open");
            }
        }
    }

    /// Execute `f` through the breaker.
    ///
    /// # Errors
    ///
    /// [`CircuitBreakerError::Open`] if the call was rejected without running,
    /// [`CircuitBreakerError::Failed`] carrying the operation's own error.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire().ok_or(CircuitBreakerError::Open)?;

        match f().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                Err(CircuitBreakerError::Failed(e))
            }
        }
    }

    /// Current circuit status.
    pub fn status(&self) -> CircuitStatus {
        self.state.lock().status
    }

    /// Snapshot of the breaker counters.
    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.state.lock();
        CircuitBreakerStats {
            status: state.status,
            consecutive_failures: state.consecutive_failures,
            total_successes: state.total_successes,
            total_failures: state.total_failures,
            times_opened: state.times_opened,
            time_in_current_state: state.last_state_change.elapsed(),
        }
    }

    /// Manually reset the breaker to closed.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.enter(CircuitStatus::Closed, Instant::now());
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.trial_in_flight = false;
        info!("circuit breaker: manually reset to closed");
    }

    /// Force the circuit open (maintenance / testing).
    pub fn trip(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.enter(CircuitStatus::Open, now);
        state.opened_at = Some(now);
        state.trial_in_flight = false;
        state.times_opened += 1;
        warn!("circuit breaker: manually tripped to open");
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("status", &self.status())
            .field("failure_threshold", &self.failure_threshold)
            .field("recovery_timeout", &self.recovery_timeout)
            .finish()
    }
}

/// Admission ticket for one call through a [`CircuitBreaker`].
///
/// Resolve it with [`success`](Self::success) or [`failure`](Self::failure).
/// Dropping it unresolved (e.g. because the calling future was cancelled)
/// counts as a failure.
#[must_use = "an unresolved permit records a failure when dropped"]
pub struct CallPermit {
    breaker: CircuitBreaker,
    epoch: u64,
    resolved: bool,
}

impl CallPermit {
    /// The call succeeded.
    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success(Some(self.epoch));
    }

    /// The call failed.
    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(Some(self.epoch));
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.resolved {
            warn!("circuit breaker: permit dropped unresolved, recording failure");
            self.breaker.on_failure(Some(self.epoch));
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    /// Current state of the circuit breaker.
    pub status: CircuitStatus,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Successes recorded over the breaker's lifetime.
    pub total_successes: u64,
    /// Failures recorded over the breaker's lifetime.
    pub total_failures: u64,
    /// How many times the circuit has opened.
    pub times_opened: u64,
    /// Time spent in the current state.
    pub time_in_current_state: Duration,
}
