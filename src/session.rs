//! Per-conversation session state.
//!
//! ## Responsibility
//! Hold bounded auxiliary state per session (file excerpts used to enrich
//! generation prompts) and expire sessions after a period of inactivity.
//!
//! ## Guarantees
//! - A session never holds more than `max_files` excerpts or more than
//!   `max_total_bytes` of excerpt text; the oldest excerpts go first.
//! - All mutation of one session happens under its `DashMap` shard lock, so
//!   concurrent requests on the same session cannot corrupt the excerpt list.
//! - Sessions expire purely by inactivity; there is no LRU eviction of
//!   sessions.
//! - Every 64th session created triggers a purge of expired sessions, so
//!   the map stays bounded by recent activity even without a maintenance
//!   task.
//!
//! ## NOT Responsible For
//! - Reading files (that belongs to the
//!   [`WorkspaceContextLoader`](crate::WorkspaceContextLoader))

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::generator::FileExcerpt;
use crate::SessionId;

/// State of one session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    id: SessionId,
    created_at: Instant,
    last_active_at: Instant,
    excerpts: VecDeque<FileExcerpt>,
    total_bytes: usize,
}

impl SessionContext {
    fn new(id: SessionId, now: Instant) -> Self {
        Self {
            id,
            created_at: now,
            last_active_at: now,
            excerpts: VecDeque::new(),
            total_bytes: 0,
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// When the session was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the session was last touched.
    pub fn last_active_at(&self) -> Instant {
        self.last_active_at
    }

    /// Excerpts, oldest first.
    pub fn excerpts(&self) -> impl Iterator<Item = &FileExcerpt> {
        self.excerpts.iter()
    }

    /// Number of excerpts held.
    pub fn excerpt_count(&self) -> usize {
        self.excerpts.len()
    }

    /// Aggregate excerpt size in bytes.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    fn is_expired(&self, now: Instant, config: &SessionConfig) -> bool {
        now.saturating_duration_since(self.last_active_at) >= config.ttl()
    }

    /// Insert an excerpt, enforcing the per-file, count and byte budgets.
    fn add_excerpt(&mut self, mut excerpt: FileExcerpt, config: &SessionConfig) {
        if excerpt.content.len() > config.max_file_bytes {
            warn!(
                session_id = %self.id,
                path = %excerpt.path,
                size = excerpt.content.len(),
                limit = config.max_file_bytes,
                "excerpt exceeds per-file budget, truncating"
            );
            truncate_at_char_boundary(&mut excerpt.content, config.max_file_bytes);
        }

        // Re-adding a path replaces the older copy.
        if let Some(pos) = self.excerpts.iter().position(|e| e.path == excerpt.path) {
            if let Some(old) = self.excerpts.remove(pos) {
                self.total_bytes -= old.size();
            }
        }

        self.total_bytes += excerpt.size();
        self.excerpts.push_back(excerpt);

        while self.excerpts.len() > config.max_files || self.total_bytes > config.max_total_bytes {
            match self.excerpts.pop_front() {
                Some(evicted) => {
                    self.total_bytes -= evicted.size();
                    debug!(
                        session_id = %self.id,
                        path = %evicted.path,
                        "evicted oldest excerpt"
                    );
                }
                None => break,
            }
        }
    }
}

fn truncate_at_char_boundary(s: &mut String, max_bytes: usize) {
    if s.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}

/// Thread-safe map of live sessions.
///
/// Cloning yields another handle to the same sessions.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, SessionContext>>,
    created: Arc<AtomicU64>,
    config: SessionConfig,
}

/// Sessions created between two opportunistic purges.
const SWEEP_EVERY: u64 = 64;

impl SessionStore {
    /// Create an empty store with the given limits.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            created: Arc::new(AtomicU64::new(0)),
            config,
        }
    }

    /// Create or refresh a session.
    ///
    /// With `None` a new session with a generated id is created. With an id
    /// the session is refreshed if live, and (re)created if unknown or
    /// expired.
    pub fn touch(&self, requested: Option<&str>) -> SessionId {
        let now = Instant::now();

        let Some(id) = requested else {
            let id = SessionId::generate();
            self.sessions
                .insert(id.0.clone(), SessionContext::new(id.clone(), now));
            info!(session_id = %id, "session created");
            self.note_created();
            return id;
        };

        let session_id = SessionId::new(id);
        let mut created = false;
        let mut entry = self.sessions.entry(id.to_string()).or_insert_with(|| {
            info!(session_id = id, "session created (caller-supplied id)");
            created = true;
            SessionContext::new(session_id.clone(), now)
        });

        if entry.is_expired(now, &self.config) {
            info!(session_id = id, "session expired, starting fresh");
            *entry = SessionContext::new(session_id.clone(), now);
        } else {
            entry.last_active_at = now;
        }
        drop(entry);

        if created {
            self.note_created();
        }
        session_id
    }

    /// Count a new session and purge expired ones every [`SWEEP_EVERY`]
    /// creations. Must not be called while holding a map guard.
    fn note_created(&self) {
        let created = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        if created % SWEEP_EVERY == 0 {
            let purged = self.purge_expired();
            debug!(created, purged, "opportunistic session sweep");
        }
    }

    /// Attach excerpts to a live session, oldest-first eviction on overflow.
    ///
    /// Returns `false` if the session does not exist.
    pub fn add_excerpts(
        &self,
        session_id: &SessionId,
        excerpts: impl IntoIterator<Item = FileExcerpt>,
    ) -> bool {
        let Some(mut session) = self.sessions.get_mut(session_id.as_str()) else {
            return false;
        };
        for excerpt in excerpts {
            session.add_excerpt(excerpt, &self.config);
        }
        debug!(
            session_id = %session_id,
            files = session.excerpt_count(),
            bytes = session.total_bytes(),
            "session excerpts updated"
        );
        true
    }

    /// Copy of a session's excerpts, oldest first.
    pub fn excerpts(&self, session_id: &SessionId) -> Vec<FileExcerpt> {
        self.sessions
            .get(session_id.as_str())
            .map(|s| s.excerpts.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Cloned snapshot of a session.
    pub fn snapshot(&self, session_id: &SessionId) -> Option<SessionContext> {
        self.sessions.get(session_id.as_str()).map(|s| s.clone())
    }

    /// Remove a session.
    pub fn remove(&self, session_id: &SessionId) -> Option<SessionContext> {
        self.sessions.remove(session_id.as_str()).map(|(_, v)| v)
    }

    /// Drop every session idle for longer than the TTL. Returns how many were
    /// removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| !session.is_expired(now, &self.config));
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            info!(purged = purged, "purged expired sessions");
        }
        purged
    }

    /// Number of sessions held (expired ones included until purged).
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// `true` if no sessions are held.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.sessions.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn small_config() -> SessionConfig {
        SessionConfig {
            ttl_secs: 60,
            max_files: 3,
            max_file_bytes: 10,
            max_total_bytes: 20,
        }
    }

    fn paths(store: &SessionStore, id: &SessionId) -> Vec<String> {
        store.excerpts(id).into_iter().map(|e| e.path).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_without_id_creates_session() {
        let store = SessionStore::new(SessionConfig::default());
        let a = store.touch(None);
        let b = store.touch(None);
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_with_id_refreshes() {
        let store = SessionStore::new(small_config());
        let id = store.touch(Some("user-1"));
        assert_eq!(id.as_str(), "user-1");
        let created = store.snapshot(&id).expect("test: exists").created_at();

        tokio::time::advance(Duration::from_secs(30)).await;
        store.touch(Some("user-1"));
        let snap = store.snapshot(&id).expect("test: exists");
        assert_eq!(snap.created_at(), created);
        assert_eq!(snap.last_active_at(), created + Duration::from_secs(30));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_is_recreated_empty() {
        let store = SessionStore::new(small_config());
        let id = store.touch(Some("s"));
        assert!(store.add_excerpts(&id, [FileExcerpt::new("a.rs", "aaa")]));

        tokio::time::advance(Duration::from_secs(61)).await;
        store.touch(Some("s"));
        let snap = store.snapshot(&id).expect("test: exists");
        assert_eq!(snap.excerpt_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_keeps_session_alive() {
        let store = SessionStore::new(small_config());
        let id = store.touch(Some("s"));
        store.add_excerpts(&id, [FileExcerpt::new("a.rs", "aaa")]);

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(50)).await;
            store.touch(Some("s"));
        }
        assert_eq!(store.purge_expired(), 0);
        assert_eq!(store.snapshot(&id).map(|s| s.excerpt_count()), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_anonymous_sessions_stay_bounded_without_maintenance() {
        let store = SessionStore::new(SessionConfig {
            ttl_secs: 5,
            ..small_config()
        });

        for _ in 0..500 {
            store.touch(None);
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        // Five live sessions plus at most one sweep interval of expired ones.
        let bound = 5 + usize::try_from(SWEEP_EVERY).expect("test: small constant");
        assert!(store.len() <= bound, "{} sessions held", store.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_live_sessions() {
        let store = SessionStore::new(small_config());
        let keep = store.touch(Some("keep"));

        for _ in 0..SWEEP_EVERY * 2 {
            store.touch(None);
        }
        assert!(store.snapshot(&keep).is_some());
        assert_eq!(store.len(), usize::try_from(SWEEP_EVERY * 2 + 1).expect("test: fits"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_removes_idle_sessions_only() {
        let store = SessionStore::new(small_config());
        store.touch(Some("idle"));
        tokio::time::advance(Duration::from_secs(40)).await;
        store.touch(Some("active"));
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(store.purge_expired(), 1);
        assert!(store.snapshot(&SessionId::new("idle")).is_none());
        assert!(store.snapshot(&SessionId::new("active")).is_some());
    }

    #[test]
    fn test_count_overflow_drops_oldest() {
        let store = SessionStore::new(small_config());
        let id = store.touch(Some("s"));
        store.add_excerpts(
            &id,
            (0..5).map(|i| FileExcerpt::new(format!("f{i}"), "x")),
        );
        assert_eq!(paths(&store, &id), vec!["f2", "f3", "f4"]);
    }

    #[test]
    fn test_byte_overflow_drops_oldest() {
        let store = SessionStore::new(small_config());
        let id = store.touch(Some("s"));
        store.add_excerpts(
            &id,
            [
                FileExcerpt::new("a", "0123456789"),
                FileExcerpt::new("b", "0123456789"),
                FileExcerpt::new("c", "01234"),
            ],
        );
        assert_eq!(paths(&store, &id), vec!["b", "c"]);
        assert_eq!(store.snapshot(&id).map(|s| s.total_bytes()), Some(15));
    }

    #[test]
    fn test_oversized_excerpt_is_truncated_at_char_boundary() {
        let store = SessionStore::new(small_config());
        let id = store.touch(Some("s"));
        // 'é' is two bytes; a cut at byte 10 would split the sixth one.
        store.add_excerpts(&id, [FileExcerpt::new("big", "ééééééé")]);
        let excerpts = store.excerpts(&id);
        assert_eq!(excerpts[0].content, "ééééé");
        assert!(excerpts[0].size() <= 10);
    }

    #[test]
    fn test_readding_path_replaces_previous_copy() {
        let store = SessionStore::new(small_config());
        let id = store.touch(Some("s"));
        store.add_excerpts(&id, [FileExcerpt::new("a", "old"), FileExcerpt::new("b", "bb")]);
        store.add_excerpts(&id, [FileExcerpt::new("a", "newer")]);

        let excerpts = store.excerpts(&id);
        assert_eq!(excerpts.len(), 2);
        assert_eq!(excerpts[1], FileExcerpt::new("a", "newer"));
        assert_eq!(store.snapshot(&id).map(|s| s.total_bytes()), Some(7));
    }

    #[test]
    fn test_add_to_unknown_session_returns_false() {
        let store = SessionStore::new(small_config());
        assert!(!store.add_excerpts(&SessionId::new("ghost"), [FileExcerpt::new("a", "b")]));
    }

    #[test]
    fn test_remove_session() {
        let store = SessionStore::new(small_config());
        let id = store.touch(Some("s"));
        assert!(store.remove(&id).is_some());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_adds_respect_limits() {
        let store = SessionStore::new(small_config());
        let id = store.touch(Some("shared"));
        let mut handles = Vec::new();
        for t in 0..8 {
            let s = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    s.add_excerpts(&id, [FileExcerpt::new(format!("t{t}-{i}"), "abcd")]);
                }
            }));
        }
        for h in handles {
            h.await.unwrap_or(());
        }

        let snap = store.snapshot(&id).expect("test: exists");
        assert!(snap.excerpt_count() <= 3);
        assert!(snap.total_bytes() <= 20);
        assert_eq!(
            snap.total_bytes(),
            snap.excerpts().map(FileExcerpt::size).sum::<usize>()
        );
    }
}
