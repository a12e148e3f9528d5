//! Session identity, lifecycle state machine, and the mutable record
//! envelope shared between the registry, the build dispatcher, and every
//! streaming attachment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::encode::FrameCache;
use crate::telemetry::frame::SessionArtifact;

use super::progress::LoadingEvent;

/// Session variant within a race weekend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionType {
    #[serde(rename = "R")]
    Race,
    #[serde(rename = "Q")]
    Qualifying,
    #[serde(rename = "S")]
    Sprint,
    #[serde(rename = "SQ")]
    SprintQualifying,
}

impl SessionType {
    pub fn code(&self) -> &'static str {
        match self {
            SessionType::Race => "R",
            SessionType::Qualifying => "Q",
            SessionType::Sprint => "S",
            SessionType::SprintQualifying => "SQ",
        }
    }
}

impl FromStr for SessionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "R" => Ok(SessionType::Race),
            "Q" => Ok(SessionType::Qualifying),
            "S" => Ok(SessionType::Sprint),
            "SQ" => Ok(SessionType::SprintQualifying),
            other => Err(format!(
                "Invalid session type: {}. Use 'R', 'Q', 'S' or 'SQ'",
                other
            )),
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The (year, round, session_type) triple identifying a race session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub year: u16,
    pub round: u8,
    pub session_type: SessionType,
}

impl SessionKey {
    pub fn new(year: u16, round: u8, session_type: SessionType) -> Self {
        Self {
            year,
            round,
            session_type,
        }
    }

    /// Canonical string id, e.g. `2023_1_R`.
    pub fn session_id(&self) -> String {
        format!("{}_{}_{}", self.year, self.round, self.session_type)
    }

    /// Parse a canonical session id back into a key.
    pub fn parse_id(id: &str) -> Result<Self, String> {
        let mut parts = id.splitn(3, '_');
        let year = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| format!("Invalid session id: {}", id))?;
        let round = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| format!("Invalid session id: {}", id))?;
        let session_type = parts
            .next()
            .ok_or_else(|| format!("Invalid session id: {}", id))?
            .parse()?;

        Ok(Self::new(year, round, session_type))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.session_id())
    }
}

/// Lifecycle state of a session record.
///
/// Transitions are monotonic: `Init -> Loading -> (Ready | Error)`; the
/// terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Init,
    Loading,
    Ready,
    Error,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Error)
    }
}

/// Snapshot of a record's public lifecycle state, for the session listing.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub state: SessionState,
}

struct RecordInner {
    state: SessionState,
    progress: u8,
    message: String,
    error: Option<String>,
    artifact: Option<Arc<SessionArtifact>>,
    cache: Option<Arc<FrameCache>>,
    load_time_seconds: Option<f64>,
    started_at: Option<Instant>,
    subscribers: HashMap<Uuid, mpsc::UnboundedSender<LoadingEvent>>,
}

/// Mutable envelope for one session.
///
/// All loading-state mutation goes through the methods below, which hold one
/// lock across the state change and the subscriber fan-out. That single lock
/// is what gives every subscriber a totally ordered, monotonic event stream.
pub struct SessionRecord {
    key: SessionKey,
    inner: Mutex<RecordInner>,
}

impl SessionRecord {
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            inner: Mutex::new(RecordInner {
                state: SessionState::Init,
                progress: 0,
                message: String::new(),
                error: None,
                artifact: None,
                cache: None,
                load_time_seconds: None,
                started_at: None,
                subscribers: HashMap::new(),
            }),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.key.session_id(),
            state: self.state(),
        }
    }

    /// Artifact handle, present once the record is READY.
    pub fn artifact(&self) -> Option<Arc<SessionArtifact>> {
        self.lock().artifact.clone()
    }

    /// Encoded-frame cache, present once the record is READY.
    pub fn frame_cache(&self) -> Option<Arc<FrameCache>> {
        self.lock().cache.clone()
    }

    /// Attempt the `Init -> Loading` transition.
    ///
    /// Exactly one caller wins; everyone else attaches to the build already
    /// in flight.
    pub fn begin_loading(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != SessionState::Init {
            return false;
        }
        inner.state = SessionState::Loading;
        inner.started_at = Some(Instant::now());
        inner.message = "Starting".to_string();
        true
    }

    /// Register a loading-phase subscriber.
    ///
    /// A late joiner attaching after the record turned terminal receives the
    /// synthesized tail immediately: `progress(100)` + `loading_complete`,
    /// or `loading_error`. The state check and the registration share the
    /// record lock, so no event can slip between them.
    pub fn subscribe(&self, id: Uuid) -> mpsc::UnboundedReceiver<LoadingEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();

        match inner.state {
            SessionState::Ready => {
                let elapsed = inner.elapsed_seconds();
                let _ = tx.send(LoadingEvent::Progress {
                    progress: 100,
                    message: inner.message.clone(),
                    elapsed_seconds: elapsed,
                });
                if let Some(artifact) = &inner.artifact {
                    let _ = tx.send(LoadingEvent::Complete {
                        frames: artifact.total_frames(),
                        load_time_seconds: inner.load_time_seconds.unwrap_or(0.0),
                        elapsed_seconds: elapsed,
                        metadata: Arc::new(artifact.metadata.clone()),
                    });
                }
            }
            SessionState::Error => {
                let _ = tx.send(LoadingEvent::Error {
                    message: inner
                        .error
                        .clone()
                        .unwrap_or_else(|| "Unknown load failure".to_string()),
                });
            }
            SessionState::Init | SessionState::Loading => {
                inner.subscribers.insert(id, tx);
                debug!(session = %self.key, subscriber = %id, "Subscriber attached");
            }
        }

        rx
    }

    pub fn unsubscribe(&self, id: &Uuid) {
        self.lock().subscribers.remove(id);
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Record a progress point and fan it out.
    ///
    /// Regressions from out-of-order worker completion are clamped to the
    /// high-water mark. Ignored once the record is terminal.
    pub fn emit_progress(&self, progress: u8, message: impl Into<String>) {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return;
        }

        inner.progress = inner.progress.max(progress.min(100));
        inner.message = message.into();

        let event = LoadingEvent::Progress {
            progress: inner.progress,
            message: inner.message.clone(),
            elapsed_seconds: inner.elapsed_seconds(),
        };
        inner.fan_out(&self.key, event);
    }

    /// Seal the record: transition to READY and broadcast `loading_complete`.
    pub fn complete(&self, artifact: Arc<SessionArtifact>, cache: Arc<FrameCache>) {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            warn!(session = %self.key, "Ignoring completion on terminal record");
            return;
        }

        let load_time = inner
            .started_at
            .map(|s| s.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        inner.state = SessionState::Ready;
        inner.progress = 100;
        inner.load_time_seconds = Some(load_time);
        inner.artifact = Some(artifact.clone());
        inner.cache = Some(cache);

        let event = LoadingEvent::Complete {
            frames: artifact.total_frames(),
            load_time_seconds: load_time,
            elapsed_seconds: inner.elapsed_seconds(),
            metadata: Arc::new(artifact.metadata.clone()),
        };
        inner.fan_out(&self.key, event);
        inner.subscribers.clear();
    }

    /// Transition to ERROR and broadcast `loading_error`.
    pub fn fail(&self, message: impl Into<String>) {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            warn!(session = %self.key, "Ignoring failure on terminal record");
            return;
        }

        let message = message.into();
        inner.state = SessionState::Error;
        inner.error = Some(message.clone());
        inner.artifact = None;
        inner.cache = None;

        inner.fan_out(&self.key, LoadingEvent::Error { message });
        inner.subscribers.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordInner> {
        self.inner.lock().expect("session record lock poisoned")
    }
}

impl RecordInner {
    fn elapsed_seconds(&self) -> u64 {
        self.started_at.map(|s| s.elapsed().as_secs()).unwrap_or(0)
    }

    /// Send an event to every subscriber; failures mean the attachment is
    /// gone and are dropped along with the sender.
    fn fan_out(&mut self, key: &SessionKey, event: LoadingEvent) {
        self.subscribers.retain(|id, tx| {
            if tx.send(event.clone()).is_err() {
                warn!(session = %key, subscriber = %id, "Dropping dead subscriber");
                false
            } else {
                true
            }
        });
    }
}
