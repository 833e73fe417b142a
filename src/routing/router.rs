//! Hybrid routing logic.
//!
//! The [`HybridRouter`] combines a [`ConfidenceScorer`] with a response
//! cache, a circuit breaker, a per-session rate limiter and a session store
//! to decide, for each request, whether a precomputed static response is good
//! enough or whether the external [`Generator`] must be called.
//!
//! Downstream failures never escape [`HybridRouter::route`]: a denied or
//! failed generation attempt becomes a [`RouteType::StaticFallback`]
//! decision. Only request validation errors are returned to the caller.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::pattern::PatternIndex;
use super::scorer::{ConfidenceScorer, DetectedPattern};
use crate::config::{validation, RouterConfig};
use crate::enhanced::{
    cache_key, CacheStats, CacheStore, CircuitBreaker, CircuitBreakerStats, RateLimiter,
};
use crate::generator::{FileExcerpt, Generator, WorkspaceContextLoader};
use crate::metrics;
use crate::session::SessionStore;
use crate::{RouterError, SessionId};

// ── Route types ────────────────────────────────────────────────────────────

/// Which path produced a [`RouteDecision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteType {
    /// Served from the response cache.
    Cache,
    /// A pattern matched confidently; its precomputed response was served.
    Static,
    /// The generator produced the answer.
    Dynamic,
    /// Generation was skipped or failed; the best static candidate (or the
    /// generic fallback message) was served.
    StaticFallback,
}

impl RouteType {
    /// Stable lowercase label, used for logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Static => "static",
            Self::Dynamic => "dynamic",
            Self::StaticFallback => "static_fallback",
        }
    }
}

impl fmt::Display for RouteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request ended in [`RouteType::StaticFallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallbackReason {
    /// The session exhausted its generation budget for the window.
    RateLimited,
    /// The circuit breaker refused the call.
    CircuitOpen,
    /// The generator missed its deadline.
    GenerationTimeout,
    /// The generator failed or returned an empty answer.
    GenerationFailed,
}

impl FallbackReason {
    /// Stable lowercase label, used for logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::CircuitOpen => "circuit_open",
            Self::GenerationTimeout => "generation_timeout",
            Self::GenerationFailed => "generation_failed",
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Request / decision ─────────────────────────────────────────────────────

/// One routing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteRequest {
    /// Free-text query. Must not be blank.
    pub query: String,
    /// Optional extra context, scored together with the query.
    pub context: Option<String>,
    /// Caller-supplied session id; a new one is generated when absent.
    pub session_id: Option<String>,
    /// Skip the cache and static acceptance and go straight to generation.
    pub force_dynamic: bool,
    /// Workspace paths to load into the session before routing.
    pub files: Vec<String>,
}

impl RouteRequest {
    /// Request for `query` with no context or session.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Attach a context string.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Attach a session id.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Force generation.
    pub fn with_force_dynamic(mut self, force: bool) -> Self {
        self.force_dynamic = force;
        self
    }

    /// Workspace files to attach to the session.
    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }
}

/// The outcome of routing one request. Constructed once, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    /// Path that produced the payload.
    pub route: RouteType,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Response text.
    pub payload: String,
    /// End-to-end latency of the `route` call.
    pub latency: Duration,
    /// `true` only for [`RouteType::Cache`].
    pub was_cached: bool,
    /// Session the request was attributed to.
    pub session_id: SessionId,
    /// Pattern whose response was served, if any.
    pub pattern_id: Option<String>,
    /// Set for [`RouteType::StaticFallback`] decisions.
    pub fallback_reason: Option<FallbackReason>,
}

impl RouteDecision {
    /// Latency in whole milliseconds.
    pub fn latency_ms(&self) -> u64 {
        u64::try_from(self.latency.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Cached form of a static or dynamic answer.
#[derive(Debug, Clone)]
struct CachedResponse {
    origin: RouteType,
    confidence: f64,
    payload: String,
    pattern_id: Option<String>,
}

/// Point-in-time view of the router's shared state.
#[derive(Debug, Clone)]
pub struct RouterStats {
    /// Response cache counters.
    pub cache: CacheStats,
    /// Circuit breaker state and counters.
    pub breaker: CircuitBreakerStats,
    /// Live (not yet purged) sessions.
    pub sessions: usize,
    /// Sessions with an active rate window.
    pub rate_limited_sessions: usize,
}

/// A static candidate joined with its definition's response text.
struct Candidate {
    detected: DetectedPattern,
    response: String,
}

// ── Router ─────────────────────────────────────────────────────────────────

/// Routes requests between cached, static and generated answers.
///
/// All shared mutable state (cache, breaker, limiter, sessions) is owned by
/// the instance, so independent routers never interfere with each other.
pub struct HybridRouter {
    config: RouterConfig,
    scorer: ConfidenceScorer,
    cache: CacheStore<CachedResponse>,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    sessions: SessionStore,
    generator: Arc<dyn Generator>,
    context_loader: Option<Arc<dyn WorkspaceContextLoader>>,
}

impl HybridRouter {
    /// Build a router from a validated config, a loaded pattern index and a
    /// generator.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Config`] listing every violation if `config`
    /// fails validation.
    pub fn new(
        config: RouterConfig,
        index: Arc<PatternIndex>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self, RouterError> {
        validation::validate(&config).map_err(|errors| {
            RouterError::Config(
                errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })?;

        info!(
            patterns = index.len(),
            static_threshold = config.router.static_acceptance_threshold,
            cache_capacity = config.cache.max_entries,
            "hybrid router initialised"
        );

        Ok(Self {
            scorer: ConfidenceScorer::new(index, config.scoring.clone()),
            cache: CacheStore::new(config.cache.max_entries, config.cache.ttl()),
            breaker: CircuitBreaker::new(
                config.circuit_breaker.failure_threshold,
                config.circuit_breaker.recovery_timeout(),
            ),
            limiter: RateLimiter::new(config.rate_limit.max_requests, config.rate_limit.window()),
            sessions: SessionStore::new(config.session.clone()),
            generator,
            context_loader: None,
            config,
        })
    }

    /// Build a router, loading patterns from `config.patterns_path`.
    ///
    /// # Errors
    ///
    /// - [`RouterError::Config`] if no pattern path is configured or the
    ///   config is invalid.
    /// - [`RouterError::Pattern`] if the pattern file cannot be loaded.
    pub fn from_config(
        config: RouterConfig,
        generator: Arc<dyn Generator>,
    ) -> Result<Self, RouterError> {
        let path = config
            .patterns_path
            .clone()
            .ok_or_else(|| RouterError::Config("patterns_path is not set".to_string()))?;
        let index = PatternIndex::load_from_file(&path)?;
        Self::new(config, Arc::new(index), generator)
    }

    /// Attach a loader used for [`RouteRequest::files`].
    pub fn with_context_loader(mut self, loader: Arc<dyn WorkspaceContextLoader>) -> Self {
        self.context_loader = Some(loader);
        self
    }

    /// Route one request.
    ///
    /// # Errors
    ///
    /// Only [`RouterError::Validation`]: blank query, oversized query or
    /// context, or a blank session id. Every downstream failure is absorbed
    /// into a [`RouteType::StaticFallback`] decision.
    #[instrument(
        skip_all,
        fields(session_id = tracing::field::Empty, route = tracing::field::Empty)
    )]
    pub async fn route(&self, request: RouteRequest) -> Result<RouteDecision, RouterError> {
        let started = Instant::now();
        self.validate(&request)?;

        let session_id = self.sessions.touch(request.session_id.as_deref());
        tracing::Span::current().record("session_id", session_id.as_str());

        if !request.files.is_empty() {
            self.attach_files(&session_id, &request.files);
        }

        let context = request.context.as_deref();
        let excerpts = self.sessions.excerpts(&session_id);
        let key = request_key(&request.query, context, &excerpts);

        // 1. Cache
        if !request.force_dynamic {
            if let Some(hit) = self.cache.get(&key) {
                metrics::inc_cache_lookup("hit");
                debug!(origin = hit.origin.as_str(), "cache hit");
                let draft = Draft {
                    route: RouteType::Cache,
                    confidence: hit.confidence,
                    payload: hit.payload,
                    pattern_id: hit.pattern_id,
                    fallback_reason: None,
                };
                return Ok(self.finish(draft, session_id, started));
            }
            metrics::inc_cache_lookup("miss");
            debug!("cache miss");
        }

        // 2. Static candidate
        let candidate = self.candidate(&request.query, context);
        if let Some(c) = &candidate {
            debug!(
                pattern_id = %c.detected.pattern_id,
                confidence = c.detected.confidence,
                evidence = ?c.detected.evidence,
                "static candidate"
            );
        }

        if !request.force_dynamic {
            if let Some(c) = candidate.as_ref().filter(|c| {
                c.detected.confidence >= self.config.router.static_acceptance_threshold
            }) {
                self.cache.put(
                    key,
                    CachedResponse {
                        origin: RouteType::Static,
                        confidence: c.detected.confidence,
                        payload: c.response.clone(),
                        pattern_id: Some(c.detected.pattern_id.clone()),
                    },
                );
                let draft = Draft {
                    route: RouteType::Static,
                    confidence: c.detected.confidence,
                    payload: c.response.clone(),
                    pattern_id: Some(c.detected.pattern_id.clone()),
                    fallback_reason: None,
                };
                return Ok(self.finish(draft, session_id, started));
            }
        }

        // 3. Admission. The limiter goes first so a denied request never
        //    consumes the breaker's half-open trial.
        if !self.limiter.allow(session_id.as_str()) {
            let err = RouterError::RateLimited {
                session: session_id.to_string(),
            };
            warn!(error = %err, "generation skipped");
            return Ok(self.fallback(candidate, FallbackReason::RateLimited, session_id, started));
        }

        let Some(permit) = self.breaker.try_acquire() else {
            warn!(error = %RouterError::CircuitOpen, "generation skipped");
            return Ok(self.fallback(candidate, FallbackReason::CircuitOpen, session_id, started));
        };

        // 4. Generation
        let prompt = build_prompt(&request.query, context, &excerpts);
        let deadline = self.config.router.generation_timeout();
        let generation = self.generator.generate(&prompt, deadline);

        let outcome = match tokio::time::timeout(deadline, generation).await {
            Ok(Ok(text)) if !text.trim().is_empty() => Ok(text),
            Ok(Ok(_)) => Err((
                FallbackReason::GenerationFailed,
                RouterError::Generation("generator returned an empty answer".to_string()),
            )),
            Ok(Err(e)) => Err((
                FallbackReason::GenerationFailed,
                RouterError::Generation(e.to_string()),
            )),
            Err(_) => Err((
                FallbackReason::GenerationTimeout,
                RouterError::GenerationTimeout(deadline),
            )),
        };

        match outcome {
            Ok(text) => {
                permit.success();
                let confidence = self.config.router.dynamic_confidence;
                self.cache.put(
                    key,
                    CachedResponse {
                        origin: RouteType::Dynamic,
                        confidence,
                        payload: text.clone(),
                        pattern_id: None,
                    },
                );
                let draft = Draft {
                    route: RouteType::Dynamic,
                    confidence,
                    payload: text,
                    pattern_id: None,
                    fallback_reason: None,
                };
                Ok(self.finish(draft, session_id, started))
            }
            Err((reason, err)) => {
                permit.failure();
                warn!(error = %err, breaker = self.breaker.status().as_str(), "generation failed");
                Ok(self.fallback(candidate, reason, session_id, started))
            }
        }
    }

    /// Snapshot of cache, breaker and session state.
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            cache: self.cache.stats(),
            breaker: self.breaker.stats(),
            sessions: self.sessions.len(),
            rate_limited_sessions: self.limiter.tracked_sessions(),
        }
    }

    /// Spawn a task that periodically purges expired sessions, idle rate
    /// windows and expired cache entries.
    ///
    /// The task runs until the returned handle is aborted or the runtime
    /// shuts down.
    pub fn spawn_maintenance(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.cache.clone();
        let limiter = self.limiter.clone();
        let sessions = self.sessions.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let sessions_purged = sessions.purge_expired();
                let windows_purged = limiter.purge_idle();
                let entries_purged = cache.purge_expired();
                debug!(
                    sessions_purged,
                    windows_purged, entries_purged, "maintenance sweep"
                );
            }
        })
    }

    /// The circuit breaker guarding the generator.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The per-session rate limiter.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// The session store.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// The active configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    // ── internals ──────────────────────────────────────────────────────────

    fn validate(&self, request: &RouteRequest) -> Result<(), RouterError> {
        let limits = &self.config.router;
        if request.query.trim().is_empty() {
            return Err(RouterError::Validation {
                field: "query",
                reason: "must not be empty".to_string(),
            });
        }
        if request.query.len() > limits.max_query_bytes {
            return Err(RouterError::Validation {
                field: "query",
                reason: format!(
                    "{} bytes exceeds limit of {}",
                    request.query.len(),
                    limits.max_query_bytes
                ),
            });
        }
        if let Some(context) = &request.context {
            if context.len() > limits.max_context_bytes {
                return Err(RouterError::Validation {
                    field: "context",
                    reason: format!(
                        "{} bytes exceeds limit of {}",
                        context.len(),
                        limits.max_context_bytes
                    ),
                });
            }
        }
        if request
            .session_id
            .as_deref()
            .is_some_and(|s| s.trim().is_empty())
        {
            return Err(RouterError::Validation {
                field: "session_id",
                reason: "must not be blank".to_string(),
            });
        }
        Ok(())
    }

    fn candidate(&self, query: &str, context: Option<&str>) -> Option<Candidate> {
        let detected = self.scorer.best(query, context)?;
        let response = self.scorer.index().get(&detected.pattern_id)?.response.clone();
        Some(Candidate { detected, response })
    }

    fn attach_files(&self, session_id: &SessionId, files: &[String]) {
        let Some(loader) = &self.context_loader else {
            debug!(files = files.len(), "no context loader configured, ignoring files");
            return;
        };
        let root = self
            .config
            .router
            .workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        match loader.load_files(files, &root) {
            Ok(excerpts) => {
                self.sessions.add_excerpts(session_id, excerpts);
            }
            Err(e) => warn!(error = %e, "workspace files not loaded"),
        }
    }

    fn fallback(
        &self,
        candidate: Option<Candidate>,
        reason: FallbackReason,
        session_id: SessionId,
        started: Instant,
    ) -> RouteDecision {
        metrics::inc_fallback(reason.as_str());
        let draft = match candidate {
            Some(c) => Draft {
                route: RouteType::StaticFallback,
                confidence: c.detected.confidence,
                payload: c.response,
                pattern_id: Some(c.detected.pattern_id),
                fallback_reason: Some(reason),
            },
            None => Draft {
                route: RouteType::StaticFallback,
                confidence: 0.0,
                payload: self.config.router.fallback_message.clone(),
                pattern_id: None,
                fallback_reason: Some(reason),
            },
        };
        self.finish(draft, session_id, started)
    }

    fn finish(&self, draft: Draft, session_id: SessionId, started: Instant) -> RouteDecision {
        let latency = started.elapsed();
        tracing::Span::current().record("route", draft.route.as_str());
        metrics::record_route(draft.route.as_str(), latency);
        info!(
            route = draft.route.as_str(),
            confidence = draft.confidence,
            pattern_id = draft.pattern_id.as_deref().unwrap_or("-"),
            fallback_reason = draft.fallback_reason.map_or("-", |r| r.as_str()),
            latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            "request routed"
        );
        RouteDecision {
            was_cached: draft.route == RouteType::Cache,
            route: draft.route,
            confidence: draft.confidence,
            payload: draft.payload,
            latency,
            session_id,
            pattern_id: draft.pattern_id,
            fallback_reason: draft.fallback_reason,
        }
    }
}

impl fmt::Debug for HybridRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridRouter")
            .field("patterns", &self.scorer.index().len())
            .field("cache", &self.cache)
            .field("breaker", &self.breaker)
            .field("limiter", &self.limiter)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

struct Draft {
    route: RouteType,
    confidence: f64,
    payload: String,
    pattern_id: Option<String>,
    fallback_reason: Option<FallbackReason>,
}

/// Assemble the generator prompt: workspace files, then context, then the
/// query last.
/// Cache key for a request. Session excerpts feed the prompt, so they are
/// part of the key whenever the session holds any.
fn request_key(query: &str, context: Option<&str>, excerpts: &[FileExcerpt]) -> String {
    let key = cache_key(query, context);
    if excerpts.is_empty() {
        return key;
    }

    let mut hasher = DefaultHasher::new();
    for excerpt in excerpts {
        excerpt.path.hash(&mut hasher);
        excerpt.content.hash(&mut hasher);
    }
    format!("{key}:files:{:x}", hasher.finish())
}

fn build_prompt(query: &str, context: Option<&str>, excerpts: &[FileExcerpt]) -> String {
    let mut prompt = String::new();
    if !excerpts.is_empty() {
        prompt.push_str("## Workspace files\n\n");
        for excerpt in excerpts {
            prompt.push_str(&format!("### {}\n```\n{}\n```\n\n", excerpt.path, excerpt.content));
        }
    }
    if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str("## Context\n");
        prompt.push_str(context.trim());
        prompt.push_str("\n\n");
    }
    prompt.push_str("## Query\n");
    prompt.push_str(query.trim());
    prompt.push('\n');
    prompt
}
