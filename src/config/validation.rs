//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`RouterConfig`] that cannot
//! be expressed through the type system alone (range checks, cross-field
//! invariants).
//!
//! ## Guarantees
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value

use super::RouterConfig;

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "cache.max_entries").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl From<ConfigError> for crate::RouterError {
    fn from(err: ConfigError) -> Self {
        crate::RouterError::Config(err.to_string())
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// `(0.0, 1.0]`, rejecting NaN.
fn in_unit_open_closed(v: f64) -> bool {
    v > 0.0 && v <= 1.0
}

/// Validate all semantic constraints on a [`RouterConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Returns
///
/// - `Ok(())` if all constraints pass.
/// - `Err(Vec<ConfigError>)` with every violation found.
pub fn validate(config: &RouterConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Router ───────────────────────────────────────────────────────
    let router = &config.router;
    if !in_unit_open_closed(router.static_acceptance_threshold) {
        errors.push(invalid(
            "router.static_acceptance_threshold",
            router.static_acceptance_threshold,
            "must be within (0.0, 1.0]",
        ));
    }

    if router.generation_timeout_ms == 0 {
        errors.push(invalid(
            "router.generation_timeout_ms",
            0,
            "must be at least 1ms",
        ));
    }

    if router.max_query_bytes == 0 {
        errors.push(invalid("router.max_query_bytes", 0, "must be at least 1"));
    }

    if !(0.0..=1.0).contains(&router.dynamic_confidence) {
        errors.push(invalid(
            "router.dynamic_confidence",
            router.dynamic_confidence,
            "must be within [0.0, 1.0]",
        ));
    }

    if router.fallback_message.trim().is_empty() {
        errors.push(invalid(
            "router.fallback_message",
            "",
            "fallback message must not be empty",
        ));
    }

    // ── Scoring ──────────────────────────────────────────────────────
    if !in_unit_open_closed(config.scoring.diminishing_factor) {
        errors.push(invalid(
            "scoring.diminishing_factor",
            config.scoring.diminishing_factor,
            "must be within (0.0, 1.0]",
        ));
    }

    if !in_unit_open_closed(config.scoring.contradiction_factor) {
        errors.push(invalid(
            "scoring.contradiction_factor",
            config.scoring.contradiction_factor,
            "must be within (0.0, 1.0]",
        ));
    }

    // ── Cache ────────────────────────────────────────────────────────
    if config.cache.max_entries == 0 {
        errors.push(invalid("cache.max_entries", 0, "must be at least 1"));
    }

    if config.cache.ttl_secs == 0 {
        errors.push(invalid("cache.ttl_secs", 0, "must be at least 1 second"));
    }

    // ── Circuit breaker ──────────────────────────────────────────────
    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(invalid(
            "circuit_breaker.failure_threshold",
            0,
            "must be at least 1",
        ));
    }

    if config.circuit_breaker.recovery_timeout_ms == 0 {
        errors.push(invalid(
            "circuit_breaker.recovery_timeout_ms",
            0,
            "must be at least 1ms",
        ));
    }

    // ── Rate limit ───────────────────────────────────────────────────
    if config.rate_limit.window_secs == 0 {
        errors.push(invalid(
            "rate_limit.window_secs",
            0,
            "must be at least 1 second",
        ));
    }

    // ── Session ──────────────────────────────────────────────────────
    let session = &config.session;
    if session.ttl_secs == 0 {
        errors.push(invalid("session.ttl_secs", 0, "must be at least 1 second"));
    }

    if session.max_file_bytes == 0 {
        errors.push(invalid("session.max_file_bytes", 0, "must be at least 1"));
    }

    if session.max_file_bytes > session.max_total_bytes {
        errors.push(invalid(
            "session.max_file_bytes",
            session.max_file_bytes,
            "must be \u{2264} session.max_total_bytes",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
