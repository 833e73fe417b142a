//! End-to-end routing scenarios.
//!
//! Each test builds an isolated router with its own cache, breaker, limiter
//! and sessions. Time-driven scenarios run on a paused Tokio clock.

use std::sync::Arc;
use std::time::Duration;
use tokio_hybrid_router::routing::{Indicator, MatcherSpec, Severity};
use tokio_hybrid_router::{
    EchoGenerator, FailingGenerator, FallbackReason, Generator, HybridRouter, PatternDefinition,
    PatternIndex, RouteRequest, RouteType, RouterConfig,
};

fn keyword(k: &str, weight: f64) -> Indicator {
    Indicator {
        matcher: MatcherSpec::Keyword(k.to_string()),
        weight,
        description: format!("mentions {k}"),
    }
}

/// `four-signals` reaches a raw sum of 1.6 when all four keywords appear;
/// `weak-signal` peaks at 0.3.
fn index() -> Arc<PatternIndex> {
    let defs = vec![
        PatternDefinition {
            id: "four-signals".to_string(),
            name: "Four signals".to_string(),
            severity: Severity::High,
            category: Some("demo".to_string()),
            threshold: 0.5,
            response: "static: four signals".to_string(),
            indicators: vec![
                keyword("alpha", 0.4),
                keyword("bravo", 0.4),
                keyword("charlie", 0.4),
                keyword("delta", 0.4),
            ],
            negative_indicators: Vec::new(),
        },
        PatternDefinition {
            id: "weak-signal".to_string(),
            name: "Weak signal".to_string(),
            severity: Severity::Low,
            category: None,
            threshold: 0.25,
            response: "static: weak signal".to_string(),
            indicators: vec![keyword("hazy", 0.3)],
            negative_indicators: Vec::new(),
        },
    ];
    Arc::new(PatternIndex::from_definitions(defs).expect("test: valid patterns"))
}

fn router(config: RouterConfig, generator: Arc<dyn Generator>) -> HybridRouter {
    HybridRouter::new(config, index(), generator).expect("test: router")
}

#[tokio::test(start_paused = true)]
async fn scenario_a_confident_match_is_static_and_cached() {
    let generator = Arc::new(EchoGenerator::with_delay(Duration::from_millis(500)));
    let router = router(RouterConfig::default(), generator.clone());

    let decision = router
        .route(RouteRequest::new("alpha bravo charlie delta"))
        .await
        .expect("test: route");

    assert_eq!(decision.route, RouteType::Static);
    assert!((decision.confidence - 1.0).abs() < 1e-9);
    assert_eq!(decision.payload, "static: four signals");
    assert_eq!(decision.pattern_id.as_deref(), Some("four-signals"));
    assert!(!decision.was_cached);
    assert_eq!(router.stats().cache.size, 1);
    assert_eq!(generator.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn scenario_b_low_confidence_generates_then_hits_cache() {
    let generator = Arc::new(EchoGenerator::with_delay(Duration::from_millis(500)));
    let router = router(RouterConfig::default(), generator.clone());
    let request = RouteRequest::new("something hazy").with_session("b");

    let first = router.route(request.clone()).await.expect("test: route");
    assert_eq!(first.route, RouteType::Dynamic);
    assert_eq!(first.payload, "echo: something hazy");
    assert!(first.latency >= Duration::from_millis(500));
    assert!(!first.was_cached);

    let second = router.route(request).await.expect("test: route");
    assert_eq!(second.route, RouteType::Cache);
    assert!(second.was_cached);
    assert_eq!(second.payload, first.payload);
    assert!((second.confidence - first.confidence).abs() < 1e-9);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn scenario_c_open_breaker_skips_generation() {
    let generator = Arc::new(EchoGenerator::with_delay(Duration::from_millis(500)));
    let router = router(RouterConfig::default(), generator.clone());
    for _ in 0..5 {
        router.breaker().record_failure();
    }

    let decision = router
        .route(RouteRequest::new("something hazy"))
        .await
        .expect("test: route");

    assert_eq!(decision.route, RouteType::StaticFallback);
    assert_eq!(decision.fallback_reason, Some(FallbackReason::CircuitOpen));
    assert_eq!(decision.payload, "static: weak signal");
    assert!((decision.confidence - 0.3).abs() < 1e-9);
    assert_eq!(generator.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn scenario_d_eleventh_request_is_rate_limited() {
    let generator = Arc::new(EchoGenerator::with_delay(Duration::from_millis(10)));
    let router = router(RouterConfig::default(), generator.clone());

    for i in 0..10 {
        let decision = router
            .route(RouteRequest::new(format!("question {i}")).with_session("d"))
            .await
            .expect("test: route");
        assert_eq!(decision.route, RouteType::Dynamic, "request {i}");
    }

    let decision = router
        .route(RouteRequest::new("question 10").with_session("d"))
        .await
        .expect("test: route");
    assert_eq!(decision.route, RouteType::StaticFallback);
    assert_eq!(decision.fallback_reason, Some(FallbackReason::RateLimited));
    assert_eq!(generator.calls(), 10);

    // Other sessions keep their own budget.
    let other = router
        .route(RouteRequest::new("question 10").with_session("e"))
        .await
        .expect("test: route");
    assert_eq!(other.route, RouteType::Dynamic);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_recovers_after_window() {
    let generator = Arc::new(EchoGenerator::with_delay(Duration::ZERO));
    let router = router(RouterConfig::default(), generator);

    for i in 0..10 {
        router
            .route(RouteRequest::new(format!("q{i}")).with_session("w"))
            .await
            .expect("test: route");
    }
    let denied = router
        .route(RouteRequest::new("late").with_session("w"))
        .await
        .expect("test: route");
    assert_eq!(denied.route, RouteType::StaticFallback);

    tokio::time::advance(Duration::from_secs(61)).await;
    let allowed = router
        .route(RouteRequest::new("later").with_session("w"))
        .await
        .expect("test: route");
    assert_eq!(allowed.route, RouteType::Dynamic);
}

#[tokio::test(start_paused = true)]
async fn generator_timeout_falls_back_and_records_failure() {
    let mut config = RouterConfig::default();
    config.router.generation_timeout_ms = 100;
    let generator = Arc::new(EchoGenerator::with_delay(Duration::from_secs(5)));
    let router = router(config, generator.clone());

    let decision = router
        .route(RouteRequest::new("something hazy"))
        .await
        .expect("test: route");

    assert_eq!(decision.route, RouteType::StaticFallback);
    assert_eq!(decision.fallback_reason, Some(FallbackReason::GenerationTimeout));
    assert!(decision.latency < Duration::from_secs(1));
    assert_eq!(router.stats().breaker.consecutive_failures, 1);
    assert_eq!(router.stats().cache.size, 0);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn force_dynamic_bypasses_cached_static_answer() {
    let generator = Arc::new(EchoGenerator::with_delay(Duration::ZERO));
    let router = router(RouterConfig::default(), generator.clone());
    let query = "alpha bravo charlie delta";

    let first = router.route(RouteRequest::new(query)).await.expect("test: route");
    assert_eq!(first.route, RouteType::Static);

    let forced = router
        .route(RouteRequest::new(query).with_force_dynamic(true))
        .await
        .expect("test: route");
    assert_eq!(forced.route, RouteType::Dynamic);
    assert_eq!(forced.payload, format!("echo: {query}"));

    // The generated answer replaced the static one in the cache.
    let cached = router.route(RouteRequest::new(query)).await.expect("test: route");
    assert_eq!(cached.route, RouteType::Cache);
    assert_eq!(cached.payload, forced.payload);
}

#[tokio::test]
async fn context_changes_the_cache_key() {
    let generator = Arc::new(EchoGenerator::with_delay(Duration::ZERO));
    let router = router(RouterConfig::default(), generator.clone());

    router
        .route(RouteRequest::new("plain question").with_context("project A"))
        .await
        .expect("test: route");
    let other = router
        .route(RouteRequest::new("plain question").with_context("project B"))
        .await
        .expect("test: route");
    assert_eq!(other.route, RouteType::Dynamic);
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn context_contributes_to_scoring() {
    let router = router(RouterConfig::default(), Arc::new(FailingGenerator::new()));
    let decision = router
        .route(RouteRequest::new("alpha bravo").with_context("charlie delta"))
        .await
        .expect("test: route");
    assert_eq!(decision.route, RouteType::Static);
    assert_eq!(decision.pattern_id.as_deref(), Some("four-signals"));
}

#[tokio::test]
async fn concurrent_requests_each_get_one_decision() {
    let generator = Arc::new(EchoGenerator::with_delay(Duration::from_millis(5)));
    let router = Arc::new(router(RouterConfig::default(), generator));

    let mut handles = Vec::new();
    for i in 0..32 {
        let router = Arc::clone(&router);
        handles.push(tokio::spawn(async move {
            let request =
                RouteRequest::new(format!("parallel {}", i % 4)).with_session(format!("s{i}"));
            router.route(request).await
        }));
    }

    for handle in handles {
        let decision = handle
            .await
            .expect("test: task joins")
            .expect("test: route");
        assert!(matches!(decision.route, RouteType::Dynamic | RouteType::Cache));
    }
    assert_eq!(router.stats().sessions, 32);
    assert!(router.stats().cache.size <= 4);
}
