//! # tokio-hybrid-router
//!
//! Hybrid response routing over Tokio: answer a query from a bank of
//! precomputed responses when a pattern matches confidently enough, and fall
//! through to an expensive external generator only when it does not.
//!
//! ## Architecture
//!
//! ```text
//! RouteRequest → validate → cache ─hit──────────────────────────→ Cache
//!                              │miss
//!                              ▼
//!                           scorer ─confident─────────────────────→ Static
//!                              │
//!                              ▼
//!                  rate limiter + circuit breaker ─denied─────────→ StaticFallback
//!                              │admitted
//!                              ▼
//!                     generator (bounded timeout) ─ok─────────────→ Dynamic
//!                                                 └failed/timeout→ StaticFallback
//! ```
//!
//! The shared mutable state (cache, breaker, limiter, sessions) is owned by a
//! [`HybridRouter`] instance; nothing is process-global except the optional
//! Prometheus registry in [`metrics`].

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod enhanced;
pub mod generator;
pub mod metrics;
pub mod routing;
pub mod session;

// Re-exports for convenience
pub use config::RouterConfig;
pub use generator::{
    EchoGenerator, FailingGenerator, FileExcerpt, Generator, WorkspaceContextLoader,
};
pub use routing::{
    ConfidenceScorer, DetectedPattern, FallbackReason, HybridRouter, PatternDefinition,
    PatternIndex, RouteDecision, RouteRequest, RouteType,
};
pub use session::SessionStore;

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"`: structured JSON output for log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`RouterError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Example
///
/// ```no_run
/// # use tokio_hybrid_router::{init_tracing, RouterError};
/// # fn example() -> Result<(), RouterError> {
/// init_tracing()?;
/// # Ok(()) }
/// ```
pub fn init_tracing() -> Result<(), RouterError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| RouterError::Other(format!("tracing init failed: {e}")))
}

/// Top-level router errors.
///
/// Only [`RouterError::Validation`] ever crosses the public boundary of
/// [`HybridRouter::route`]. The admission and generation variants describe
/// failures that the router absorbs into a
/// [`RouteType::StaticFallback`] decision; they surface in logs and in the
/// decision's [`FallbackReason`].
#[derive(Error, Debug)]
pub enum RouterError {
    /// The request was malformed (empty query, oversized context, ...).
    #[error("invalid request field '{field}': {reason}")]
    Validation {
        /// Name of the offending request field.
        field: &'static str,
        /// Human-readable explanation.
        reason: String,
    },

    /// The session exhausted its dynamic-generation budget for the window.
    #[error("rate limit exceeded for session {session}")]
    RateLimited {
        /// Session that was denied.
        session: String,
    },

    /// The circuit breaker guarding the generator is open.
    #[error("circuit open: generator temporarily disabled")]
    CircuitOpen,

    /// The generator did not answer within the configured deadline.
    #[error("generation timed out after {0:?}")]
    GenerationTimeout(Duration),

    /// The generator returned an error or an unusable response.
    #[error("generation failed: {0}")]
    Generation(String),

    /// A configuration value is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Pattern definitions could not be loaded.
    #[error(transparent)]
    Pattern(#[from] routing::PatternError),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

/// Opaque conversation identifier.
///
/// Either supplied by the caller or generated on first contact by the
/// [`SessionStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(
    /// The raw string ID, typically a UUID or user-provided token.
    pub String,
);

impl SessionId {
    /// Create a new [`SessionId`] from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random (UUID v4) session id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Return the session ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
