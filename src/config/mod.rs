//! # Router Configuration
//!
//! ## Responsibility
//! Describe every tunable of the hybrid router in one serde-friendly tree,
//! parse it from TOML, and validate it before a router is built.
//!
//! ```text
//! cargo run -- router.toml
//! ```
//!
//! ## Guarantees
//! - Every field has a documented default, so an empty file is a valid config
//! - Validated: semantic constraints are checked before a config is accepted
//! - Schema-exportable: [`json_schema`] renders a JSON Schema for editors
//!
//! ## NOT Responsible For
//! - Loading pattern definitions (that belongs to `routing::pattern`)
//! - Building the router (that belongs to `routing::router`)

pub mod loader;
pub mod validation;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ── Default value functions ──────────────────────────────────────────────

/// Default confidence a static candidate needs to be served directly.
fn default_static_acceptance_threshold() -> f64 {
    0.7
}

/// Default generator deadline: 30 seconds.
fn default_generation_timeout_ms() -> u64 {
    30_000
}

/// Default maximum query size: 16 KiB.
fn default_max_query_bytes() -> usize {
    16 * 1024
}

/// Default maximum context size: 100 KiB.
fn default_max_context_bytes() -> usize {
    100 * 1024
}

/// Default confidence reported for generated answers.
fn default_dynamic_confidence() -> f64 {
    0.9
}

/// Default payload when no static candidate exists for a fallback.
fn default_fallback_message() -> String {
    "No confident answer is available right now. Please rephrase the question \
     or try again shortly."
        .to_string()
}

/// Default number of matched positive indicators before damping applies.
fn default_diminishing_after() -> usize {
    3
}

/// Default multiplier applied to verbose positive matches.
fn default_diminishing_factor() -> f64 {
    0.9
}

/// Default multiplier applied when any negative indicator matches.
fn default_contradiction_factor() -> f64 {
    0.7
}

/// Default cache capacity: 1000 entries.
fn default_cache_max_entries() -> usize {
    1000
}

/// Default cache TTL: 1 hour.
fn default_cache_ttl_secs() -> u64 {
    3600
}

/// Default consecutive failures that open the circuit.
fn default_failure_threshold() -> u32 {
    5
}

/// Default open-circuit recovery timeout: 60 seconds.
fn default_recovery_timeout_ms() -> u64 {
    60_000
}

/// Default dynamic attempts per session per window.
fn default_rate_max_requests() -> usize {
    10
}

/// Default rate window: 60 seconds.
fn default_rate_window_secs() -> u64 {
    60
}

/// Default session inactivity TTL: 1 hour.
fn default_session_ttl_secs() -> u64 {
    3600
}

/// Default maximum excerpts per session.
fn default_session_max_files() -> usize {
    10
}

/// Default per-excerpt byte budget: 1 MiB.
fn default_session_max_file_bytes() -> usize {
    1024 * 1024
}

/// Default aggregate excerpt byte budget per session: 5 MiB.
fn default_session_max_total_bytes() -> usize {
    5 * 1024 * 1024
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for a [`HybridRouter`](crate::HybridRouter).
///
/// # Example
///
/// ```toml
/// patterns_path = "patterns/coaching.toml"
///
/// [router]
/// static_acceptance_threshold = 0.75
///
/// [circuit_breaker]
/// failure_threshold = 3
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RouterConfig {
    /// Pattern definition file (TOML or JSON). `None` means the caller
    /// supplies a [`PatternIndex`](crate::PatternIndex) directly.
    #[serde(default)]
    pub patterns_path: Option<PathBuf>,
    /// Routing thresholds, limits and fallback behaviour.
    #[serde(default)]
    pub router: RouterSection,
    /// Confidence scoring constants.
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Response cache sizing.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Circuit breaker guarding the generator.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Per-session admission control for generation.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Session lifetime and excerpt budgets.
    #[serde(default)]
    pub session: SessionConfig,
}

// ── Sections ─────────────────────────────────────────────────────────────

/// Routing thresholds and request limits.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RouterSection {
    /// Minimum confidence for a static candidate to be served without
    /// generation. Range `(0.0, 1.0]`.
    #[serde(default = "default_static_acceptance_threshold")]
    pub static_acceptance_threshold: f64,
    /// Deadline for a single generator call, in milliseconds.
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,
    /// Largest accepted query, in bytes.
    #[serde(default = "default_max_query_bytes")]
    pub max_query_bytes: usize,
    /// Largest accepted context string, in bytes.
    #[serde(default = "default_max_context_bytes")]
    pub max_context_bytes: usize,
    /// Confidence attached to generated answers. Range `[0.0, 1.0]`.
    #[serde(default = "default_dynamic_confidence")]
    pub dynamic_confidence: f64,
    /// Payload for a fallback when no pattern was detected at all.
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
    /// Root directory handed to the workspace context loader.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            static_acceptance_threshold: default_static_acceptance_threshold(),
            generation_timeout_ms: default_generation_timeout_ms(),
            max_query_bytes: default_max_query_bytes(),
            max_context_bytes: default_max_context_bytes(),
            dynamic_confidence: default_dynamic_confidence(),
            fallback_message: default_fallback_message(),
            workspace_root: None,
        }
    }
}

impl RouterSection {
    /// Generator deadline as a [`Duration`].
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }
}

/// Heuristic constants used by the
/// [`ConfidenceScorer`](crate::ConfidenceScorer).
///
/// The defaults are tuning values, not derived ones; they are exposed so they
/// can be re-fitted against a labelled corpus.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ScoringConfig {
    /// Damping starts once more than this many positive indicators match.
    #[serde(default = "default_diminishing_after")]
    pub diminishing_after: usize,
    /// Multiplier for the positive sum once damping applies. Range `(0.0, 1.0]`.
    #[serde(default = "default_diminishing_factor")]
    pub diminishing_factor: f64,
    /// Multiplier for the whole score when any negative indicator matches.
    /// Range `(0.0, 1.0]`.
    #[serde(default = "default_contradiction_factor")]
    pub contradiction_factor: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            diminishing_after: default_diminishing_after(),
            diminishing_factor: default_diminishing_factor(),
            contradiction_factor: default_contradiction_factor(),
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of cached decisions.
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    /// Time-to-live of a cached decision, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl CacheConfig {
    /// TTL as a [`Duration`].
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive generator failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time the circuit stays open before a trial call, in milliseconds.
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Recovery timeout as a [`Duration`].
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

/// Sliding-window rate limit configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RateLimitConfig {
    /// Generation attempts admitted per session per window.
    #[serde(default = "default_rate_max_requests")]
    pub max_requests: usize,
    /// Window length in seconds.
    #[serde(default = "default_rate_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_rate_max_requests(),
            window_secs: default_rate_window_secs(),
        }
    }
}

impl RateLimitConfig {
    /// Window as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Session lifetime and excerpt budgets.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SessionConfig {
    /// Inactivity after which a session is purged, in seconds.
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    /// Maximum excerpts held per session.
    #[serde(default = "default_session_max_files")]
    pub max_files: usize,
    /// Maximum size of one excerpt, in bytes.
    #[serde(default = "default_session_max_file_bytes")]
    pub max_file_bytes: usize,
    /// Maximum aggregate excerpt size per session, in bytes.
    #[serde(default = "default_session_max_total_bytes")]
    pub max_total_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            max_files: default_session_max_files(),
            max_file_bytes: default_session_max_file_bytes(),
            max_total_bytes: default_session_max_total_bytes(),
        }
    }
}

impl SessionConfig {
    /// Inactivity TTL as a [`Duration`].
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Render the JSON Schema of [`RouterConfig`].
///
/// # Errors
///
/// Returns the serializer error if the schema cannot be rendered.
pub fn json_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(RouterConfig);
    serde_json::to_string_pretty(&schema)
}
