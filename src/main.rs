//! Demo binary for tokio-hybrid-router
//!
//! Routes a fixed set of queries through a [`HybridRouter`] backed by an
//! [`EchoGenerator`] and prints the resulting metrics.
//!
//! ```text
//! hybrid-router [config.toml]
//! ```
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json`: structured JSON output (production)
//! - `RUST_LOG=info`: log level filter (default: info)

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_hybrid_router::config::loader;
use tokio_hybrid_router::{
    init_tracing, metrics, EchoGenerator, Generator, HybridRouter, PatternIndex, RouteRequest,
    RouterConfig,
};
use tracing::{info, warn};

const BUILTIN_PATTERNS: &str = include_str!("../patterns/coaching.toml");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = init_tracing();
    metrics::init_metrics()?;

    let config = match std::env::args().nth(1) {
        Some(path) => loader::load_from_file(Path::new(&path))?,
        None => RouterConfig::default(),
    };

    let index = match &config.patterns_path {
        Some(path) => PatternIndex::load_from_file(path)?,
        None => PatternIndex::from_toml_str(BUILTIN_PATTERNS, "builtin:coaching.toml")?,
    };

    let generator: Arc<dyn Generator> =
        Arc::new(EchoGenerator::with_delay(Duration::from_millis(50)));
    let router = HybridRouter::new(config, Arc::new(index), generator)?;
    let maintenance = router.spawn_maintenance(Duration::from_secs(30));

    info!("Starting tokio-hybrid-router demo");

    let demo_requests = vec![
        ("session-1", "My callback code is a nested pyramid and totally unreadable"),
        ("session-2", "Each row in the loop runs another SQL query, hundreds of queries per page"),
        ("session-1", "my callback code is a nested   pyramid and totally unreadable"),
        ("session-3", "How do I structure a CLI with subcommands?"),
        ("session-4", "We have no tests and need to refactor the billing module"),
        ("session-3", "How do I structure a CLI with subcommands?"),
        ("session-5", "Should I optimize this before release? I haven't profiled it"),
    ];

    info!(count = demo_requests.len(), "Routing demo requests");

    for (session_id, query) in demo_requests {
        match router
            .route(RouteRequest::new(query).with_session(session_id))
            .await
        {
            Ok(decision) => info!(
                session_id,
                route = %decision.route,
                confidence = decision.confidence,
                pattern_id = decision.pattern_id.as_deref().unwrap_or("-"),
                latency_ms = decision.latency_ms(),
                payload = %decision.payload,
                "decision"
            ),
            Err(e) => warn!(error = %e, session_id, "request rejected"),
        }
    }

    let stats = router.stats();
    info!(
        cache_hits = stats.cache.hits,
        cache_misses = stats.cache.misses,
        cache_size = stats.cache.size,
        breaker = stats.breaker.status.as_str(),
        sessions = stats.sessions,
        "Demo complete"
    );

    maintenance.abort();
    println!("{}", metrics::gather());

    Ok(())
}
