//! Enhanced Features
//!
//! Shared resilience primitives owned by the router: response caching,
//! per-session rate limiting and circuit breaking.

pub mod cache;
pub mod circuit_breaker;
pub mod rate_limit;

// Re-exports
pub use cache::{cache_key, normalize_query, CacheStats, CacheStore};
pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitBreakerStats, CircuitStatus};
pub use rate_limit::{RateLimitInfo, RateLimiter};
