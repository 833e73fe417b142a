//! # Stage: Hybrid Routing
//!
//! ## Responsibility
//! Decide, per request, whether a precomputed static response matched by the
//! pattern bank is good enough, or whether the expensive external generator
//! must be called. Generation is guarded by a per-session rate limiter and a
//! circuit breaker, and every answer worth keeping is cached.
//!
//! ## Guarantees
//! - Deterministic scoring: the same text always produces the same ranked
//!   patterns (ties broken by id).
//! - Exactly one [`RouteDecision`] per valid request; downstream failures
//!   degrade to [`RouteType::StaticFallback`] and are never returned as
//!   errors.
//! - Bounded: every generator call runs under an explicit deadline, and a
//!   timeout is recorded exactly like a failure.
//! - Pattern definitions are read-only after load.
//!
//! ## NOT Responsible For
//! - Talking to a real model backend (that is the [`Generator`](crate::Generator))
//! - Reading workspace files (that is the
//!   [`WorkspaceContextLoader`](crate::WorkspaceContextLoader))
//! - Semantic understanding of queries (indicator matching only)

pub mod pattern;
pub mod router;
pub mod scorer;

// Re-exports for convenience
pub use pattern::{
    Indicator, MatcherSpec, NegativeIndicator, PatternDefinition, PatternError, PatternIndex,
    Severity,
};
pub use router::{
    FallbackReason, HybridRouter, RouteDecision, RouteRequest, RouteType, RouterStats,
};
pub use scorer::{combine_score, ConfidenceScorer, DetectedPattern, PatternScore};
