//! Rate Limiting
//!
//! Sliding-window rate limiter per session.
//!
//! Each session keeps the timestamps of its admitted requests inside the
//! trailing window. Timestamps older than the window are dropped on every
//! check, so a window never holds more than `max_requests` entries and never
//! retains anything older than `window`. Every 64th new session also drops
//! the windows that have fully drained, so one-off sessions do not pile up.
//!
//! ## Usage
//!
//! ```
//! use std::time::Duration;
//! use tokio_hybrid_router::enhanced::RateLimiter;
//!
//! let limiter = RateLimiter::new(10, Duration::from_secs(60)); // 10 requests per minute
//!
//! if limiter.allow("user-123") {
//!     // Process request
//! } else {
//!     // Rate limit exceeded
//! }
//! ```

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Rate limiter with per-session sliding windows.
///
/// Cloning yields another handle to the same windows.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<String, VecDeque<Instant>>>,
    created: Arc<AtomicU64>,
    max_requests: usize,
    window: Duration,
}

/// New windows between two opportunistic purges.
const SWEEP_EVERY: u64 = 64;

impl RateLimiter {
    /// Create a limiter admitting `max_requests` per `window` for each session.
    ///
    /// A limit of zero denies every request.
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            created: Arc::new(AtomicU64::new(0)),
            max_requests,
            window,
        }
    }

    /// Check whether `session_id` may make another request now, recording it
    /// if so.
    ///
    /// A denied request is not recorded and does not extend the window.
    pub fn allow(&self, session_id: &str) -> bool {
        let now = Instant::now();
        let mut created = false;
        let mut window = self
            .windows
            .entry(session_id.to_string())
            .or_insert_with(|| {
                created = true;
                VecDeque::new()
            });
        self.evict_stale(&mut window, now);

        let admitted = if window.len() >= self.max_requests {
            warn!(
                session_id = session_id,
                count = window.len(),
                limit = self.max_requests,
                "rate limit exceeded"
            );
            false
        } else {
            window.push_back(now);
            debug!(
                session_id = session_id,
                count = window.len(),
                limit = self.max_requests,
                "rate limit check passed"
            );
            true
        };
        drop(window);

        if created && (self.created.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            self.purge_idle();
        }
        admitted
    }

    /// Forget all recorded requests for `session_id`.
    pub fn reset(&self, session_id: &str) {
        self.windows.remove(session_id);
        debug!(session_id = session_id, "rate limit reset");
    }

    /// Current usage for `session_id`, or `None` if it has never been seen.
    pub fn usage(&self, session_id: &str) -> Option<RateLimitInfo> {
        let now = Instant::now();
        let mut window = self.windows.get_mut(session_id)?;
        self.evict_stale(&mut window, now);

        let used = window.len();
        let reset_in = window
            .front()
            .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)))
            .unwrap_or_default();

        Some(RateLimitInfo {
            used,
            remaining: self.max_requests.saturating_sub(used),
            reset_in,
        })
    }

    /// Drop sessions whose window has fully drained. Returns how many were
    /// removed.
    pub fn purge_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            self.evict_stale(window, now);
            !window.is_empty()
        });
        let purged = before.saturating_sub(self.windows.len());
        if purged > 0 {
            debug!(purged = purged, "rate limiter purged idle sessions");
        }
        purged
    }

    /// Number of sessions currently tracked.
    pub fn tracked_sessions(&self) -> usize {
        self.windows.len()
    }

    fn evict_stale(&self, window: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = window.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .field("tracked_sessions", &self.windows.len())
            .finish()
    }
}

/// Rate limit usage information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Requests admitted inside the current window.
    pub used: usize,
    /// Requests still available inside the current window.
    pub remaining: usize,
    /// Time until the oldest admitted request leaves the window.
    pub reset_in: Duration,
}
