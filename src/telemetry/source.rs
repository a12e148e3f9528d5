//! Raw sample accessor abstraction.
//!
//! The build pipeline only ever sees this trait; the production
//! implementation is the HTTP upstream client in `crate::api`, and tests use
//! the in-memory [`StaticSource`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::session::SessionKey;

use super::types::RawSession;

/// Errors from the upstream telemetry provider.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Upstream request failed: {0}")]
    RequestFailed(String),

    #[error("Session not available upstream: {0}")]
    SessionUnavailable(String),

    #[error("Failed to parse upstream response: {0}")]
    ParseError(String),
}

/// Uniform read interface to the upstream provider.
///
/// One call per session key yields every per-driver lap plus the static
/// session metadata; the builder does not go back to the source afterwards.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn fetch(&self, key: &SessionKey) -> Result<RawSession, SourceError>;
}

/// In-memory source backed by pre-registered sessions.
///
/// Used by the test suites and for serving canned sessions in development.
#[derive(Default)]
pub struct StaticSource {
    sessions: Mutex<HashMap<SessionKey, RawSession>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session to be served for `key`.
    pub fn insert(&self, key: SessionKey, session: RawSession) {
        self.sessions
            .lock()
            .expect("static source lock poisoned")
            .insert(key, session);
    }
}

#[async_trait]
impl TelemetrySource for StaticSource {
    async fn fetch(&self, key: &SessionKey) -> Result<RawSession, SourceError> {
        self.sessions
            .lock()
            .expect("static source lock poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| SourceError::SessionUnavailable(key.session_id()))
    }
}
