//! Prometheus metrics for the hybrid router.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`record_route`, `inc_fallback`, …) are no-ops if `init_metrics` was never
//! called, so routers built in tests never need a registry.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `hybrid_router_routes_total` | Counter | `route` |
//! | `hybrid_router_fallbacks_total` | Counter | `reason` |
//! | `hybrid_router_route_duration_seconds` | Histogram | `route` |
//! | `hybrid_router_cache_lookups_total` | Counter | `outcome` |

use crate::RouterError;
use prometheus::{
    core::Collector, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All router metrics, stored together in a single [`OnceLock`].
pub struct Metrics {
    /// Registry that owns all metric descriptors.
    pub registry: Registry,
    /// Decisions per route type.
    pub routes_total: CounterVec,
    /// Fallback decisions per reason.
    pub fallbacks_total: CounterVec,
    /// End-to-end routing latency per route type.
    pub route_duration: HistogramVec,
    /// Cache lookups by outcome (`hit` / `miss`).
    pub cache_lookups: CounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn init_err(e: prometheus::Error) -> RouterError {
    RouterError::Other(format!("metrics init failed: {e}"))
}

impl Metrics {
    fn build() -> Result<Self, RouterError> {
        let registry = Registry::new();

        let routes_total = CounterVec::new(
            Opts::new("hybrid_router_routes_total", "Routing decisions by route"),
            &["route"],
        )
        .map_err(init_err)?;
        registry
            .register(Box::new(routes_total.clone()))
            .map_err(init_err)?;

        let fallbacks_total = CounterVec::new(
            Opts::new(
                "hybrid_router_fallbacks_total",
                "Static fallback decisions by reason",
            ),
            &["reason"],
        )
        .map_err(init_err)?;
        registry
            .register(Box::new(fallbacks_total.clone()))
            .map_err(init_err)?;

        let route_duration = HistogramVec::new(
            HistogramOpts::new(
                "hybrid_router_route_duration_seconds",
                "End-to-end routing latency by route",
            ),
            &["route"],
        )
        .map_err(init_err)?;
        registry
            .register(Box::new(route_duration.clone()))
            .map_err(init_err)?;

        let cache_lookups = CounterVec::new(
            Opts::new(
                "hybrid_router_cache_lookups_total",
                "Response cache lookups by outcome",
            ),
            &["outcome"],
        )
        .map_err(init_err)?;
        registry
            .register(Box::new(cache_lookups.clone()))
            .map_err(init_err)?;

        Ok(Self {
            registry,
            routes_total,
            fallbacks_total,
            route_duration,
            cache_lookups,
        })
    }
}

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all metrics and register them with a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`RouterError::Other`] if metric construction or registration
/// fails.
pub fn init_metrics() -> Result<(), RouterError> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    // A racing initialiser builds identical descriptors; first one wins.
    let _ = METRICS.set(Metrics::build()?);
    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Count one routing decision and observe its latency.
///
/// No-op if metrics have not been initialised.
pub fn record_route(route: &str, latency: Duration) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.routes_total.get_metric_with_label_values(&[route]) {
            c.inc();
        }
        if let Ok(h) = m.route_duration.get_metric_with_label_values(&[route]) {
            h.observe(latency.as_secs_f64());
        }
    }
}

/// Count one fallback decision.
///
/// No-op if metrics have not been initialised.
pub fn inc_fallback(reason: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.fallbacks_total.get_metric_with_label_values(&[reason]) {
            c.inc();
        }
    }
}

/// Count one cache lookup (`"hit"` or `"miss"`).
///
/// No-op if metrics have not been initialised.
pub fn inc_cache_lookup(outcome: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.cache_lookups.get_metric_with_label_values(&[outcome]) {
            c.inc();
        }
    }
}

/// Encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or encoding
/// fails.
pub fn gather() -> String {
    let Some(m) = metrics() else {
        return String::new();
    };
    encode(&m.registry)
}

fn encode(registry: &Registry) -> String {
    let families = registry.gather();
    let mut buffer = Vec::new();
    if TextEncoder::new().encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Current counter values, keyed by label value.
#[derive(Debug, Default)]
pub struct MetricsSummary {
    /// Decisions keyed by route.
    pub routes_total: HashMap<String, u64>,
    /// Fallbacks keyed by reason.
    pub fallbacks_total: HashMap<String, u64>,
    /// Cache lookups keyed by outcome.
    pub cache_lookups: HashMap<String, u64>,
}

fn counter_values(counter: &CounterVec, label: &str) -> HashMap<String, u64> {
    let mut out = HashMap::new();
    for family in counter.collect() {
        for metric in family.get_metric() {
            let key = metric
                .get_label()
                .iter()
                .find(|l| l.get_name() == label)
                .map_or("unknown", |l| l.get_value());
            out.insert(key.to_string(), metric.get_counter().get_value() as u64);
        }
    }
    out
}

/// Return the current counter values.
///
/// Returns an empty [`MetricsSummary`] if metrics have not been initialised.
pub fn get_metrics_summary() -> MetricsSummary {
    let Some(m) = metrics() else {
        return MetricsSummary::default();
    };
    MetricsSummary {
        routes_total: counter_values(&m.routes_total, "route"),
        fallbacks_total: counter_values(&m.fallbacks_total, "reason"),
        cache_lookups: counter_values(&m.cache_lookups, "outcome"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolated_bundle_registers_all_families() {
        let m = Metrics::build().expect("test: build metrics");
        m.routes_total.with_label_values(&["static"]).inc();
        m.fallbacks_total.with_label_values(&["circuit_open"]).inc();
        m.route_duration
            .with_label_values(&["static"])
            .observe(0.002);
        m.cache_lookups.with_label_values(&["miss"]).inc();

        let text = encode(&m.registry);
        assert!(text.contains("hybrid_router_routes_total"));
        assert!(text.contains("hybrid_router_fallbacks_total"));
        assert!(text.contains("hybrid_router_route_duration_seconds"));
        assert!(text.contains("hybrid_router_cache_lookups_total"));
    }

    #[test]
    fn test_counter_values_keyed_by_label() {
        let m = Metrics::build().expect("test: build metrics");
        m.routes_total.with_label_values(&["cache"]).inc();
        m.routes_total.with_label_values(&["cache"]).inc();
        m.routes_total.with_label_values(&["dynamic"]).inc();

        let values = counter_values(&m.routes_total, "route");
        assert_eq!(values.get("cache"), Some(&2));
        assert_eq!(values.get("dynamic"), Some(&1));
    }

    #[test]
    fn test_global_helpers_count_after_init() {
        init_metrics().expect("test: init");
        init_metrics().expect("test: second init is a no-op");

        let before = get_metrics_summary()
            .fallbacks_total
            .get("rate_limited")
            .copied()
            .unwrap_or(0);
        inc_fallback("rate_limited");
        record_route("static_fallback", Duration::from_millis(3));
        inc_cache_lookup("miss");

        let summary = get_metrics_summary();
        assert_eq!(summary.fallbacks_total.get("rate_limited"), Some(&(before + 1)));
        assert!(gather().contains("hybrid_router_routes_total"));
    }
}
