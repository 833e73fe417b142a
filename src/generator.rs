//! External collaborators consumed by the router.
//!
//! - [`Generator`]: the expensive dynamic-answer step (an LLM call, a remote
//!   reasoning service, ...). Async and object-safe so it can be shared as
//!   `Arc<dyn Generator>`.
//! - [`WorkspaceContextLoader`]: supplies already size- and path-validated
//!   file excerpts. The router trusts its output.
//!
//! Two small generators ship with the crate for demos and tests:
//! [`EchoGenerator`] and [`FailingGenerator`].

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a [`Generator`].
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// The backend could not be reached or rejected the request.
    #[error("generator backend error: {0}")]
    Backend(String),

    /// The backend answered with something unusable.
    #[error("invalid generator response: {0}")]
    InvalidResponse(String),
}

/// Errors reported by a [`WorkspaceContextLoader`].
#[derive(Debug, Error)]
pub enum LoaderError {
    /// A requested path is outside the workspace or otherwise refused.
    #[error("path rejected: {0}")]
    Rejected(String),

    /// Reading failed.
    #[error("IO error reading {path}: {source}")]
    Io {
        /// Path that could not be read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A piece of workspace text attached to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileExcerpt {
    /// Workspace-relative path.
    pub path: String,
    /// Excerpt text.
    pub content: String,
}

impl FileExcerpt {
    /// Create an excerpt.
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Size of the content in bytes.
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// Trait for dynamic answer generators.
///
/// Implementations must be thread-safe (Send + Sync) for use across tasks.
/// The router always wraps the call in its own deadline and drops the future
/// when it fires, so implementations need not enforce `timeout` themselves;
/// it is passed along for backends that can use it (e.g. as an HTTP timeout).
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce an answer for `prompt`.
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, GeneratorError>;
}

/// Trait for workspace file loaders.
pub trait WorkspaceContextLoader: Send + Sync {
    /// Load excerpts for `paths`, relative to `workspace_root`.
    fn load_files(
        &self,
        paths: &[String],
        workspace_root: &Path,
    ) -> Result<Vec<FileExcerpt>, LoaderError>;
}

// ============================================================================
// Echo Generator (Testing)
// ============================================================================

/// Generator that echoes the last line of the prompt back after a delay.
///
/// Useful for smoke tests and demos without a real backend.
#[derive(Debug)]
pub struct EchoGenerator {
    /// Simulated generation delay
    pub delay: Duration,
    calls: AtomicU64,
}

impl EchoGenerator {
    /// Echo generator with a 10ms delay.
    pub fn new() -> Self {
        Self::with_delay(Duration::from_millis(10))
    }

    /// Echo generator with a custom delay.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicU64::new(0),
        }
    }

    /// Number of times [`Generator::generate`] has been called.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for EchoGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(&self, prompt: &str, _timeout: Duration) -> Result<String, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        let last = prompt
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_default();
        Ok(format!("echo: {}", last.trim()))
    }
}

// ============================================================================
// Failing Generator (Testing)
// ============================================================================

/// Generator that always fails, optionally after a delay.
#[derive(Debug, Default)]
pub struct FailingGenerator {
    /// Delay before failing.
    pub delay: Duration,
    calls: AtomicU64,
}

impl FailingGenerator {
    /// Generator that fails immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generator that fails after `delay`; a delay longer than the router's
    /// deadline simulates a hung backend.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicU64::new(0),
        }
    }

    /// Number of times [`Generator::generate`] has been called.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for FailingGenerator {
    async fn generate(&self, _prompt: &str, _timeout: Duration) -> Result<String, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Err(GeneratorError::Backend("simulated backend failure".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_echo_generator_returns_last_line() {
        let generator = EchoGenerator::with_delay(Duration::from_millis(500));
        let out = generator
            .generate("## Query\nwhy is my build slow?\n\n", Duration::from_secs(1))
            .await
            .expect("test: echo succeeds");
        assert_eq!(out, "echo: why is my build slow?");
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_failing_generator_counts_calls() {
        let generator = FailingGenerator::new();
        assert!(generator.generate("x", Duration::from_secs(1)).await.is_err());
        assert!(generator.generate("y", Duration::from_secs(1)).await.is_err());
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_generator_is_object_safe() {
        let generator: Arc<dyn Generator> = Arc::new(EchoGenerator::with_delay(Duration::ZERO));
        let out = generator.generate("hello", Duration::from_secs(1)).await;
        assert_eq!(out.ok().as_deref(), Some("echo: hello"));
    }

    #[test]
    fn test_file_excerpt_size_is_bytes() {
        let excerpt = FileExcerpt::new("src/lib.rs", "héllo");
        assert_eq!(excerpt.size(), 6);
    }
}
