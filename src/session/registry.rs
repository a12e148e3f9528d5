//! Session registry and build scheduler.
//!
//! The registry owns every [`SessionRecord`] and guarantees that at most one
//! build task runs per session key. Each build gets a dispatcher task on the
//! async side that drains worker progress, mutates the record, and fans
//! events out to subscribers in a single ordered stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::Tuning;
use crate::encode::FrameCache;
use crate::session::progress::milestone;
use crate::telemetry::builder::build_artifact;
use crate::telemetry::frame::SessionArtifact;
use crate::telemetry::source::TelemetrySource;

use super::record::{SessionKey, SessionRecord, SessionSummary};
use super::store::ArtifactStore;

/// Registry of all known sessions plus the build scheduler.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionKey, Arc<SessionRecord>>>,
    /// Builds started per key; lets tests observe the at-most-once property.
    builds_started: Mutex<HashMap<SessionKey, usize>>,
    source: Arc<dyn TelemetrySource>,
    store: Option<Arc<dyn ArtifactStore>>,
    tuning: Tuning,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        store: Option<Arc<dyn ArtifactStore>>,
        tuning: Tuning,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            builds_started: Mutex::new(HashMap::new()),
            source,
            store,
            tuning,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    /// Create or look up the record for `key` without starting its build.
    ///
    /// The request surface uses this: the response carries only the session
    /// id, and the streaming channel stays the single source of loading
    /// state (and the build trigger).
    pub fn create(&self, key: SessionKey) -> Arc<SessionRecord> {
        let mut sessions = self.lock_sessions();
        sessions
            .entry(key.clone())
            .or_insert_with(|| Arc::new(SessionRecord::new(key)))
            .clone()
    }

    /// Start the build for `record` unless one already ran.
    ///
    /// The `Init -> Loading` transition is atomic on the record, so any
    /// number of concurrent attachments produce exactly one build task.
    /// Returns whether this call spawned it.
    pub fn start_build(self: &Arc<Self>, record: &Arc<SessionRecord>) -> bool {
        if !record.begin_loading() {
            return false;
        }

        *self
            .builds_started
            .lock()
            .expect("build counter lock poisoned")
            .entry(record.key().clone())
            .or_insert(0) += 1;

        let registry = self.clone();
        let record = record.clone();
        tokio::spawn(async move {
            registry.run_build(record).await;
        });
        true
    }

    /// Create or attach to the session for `key` and make sure its build is
    /// running. Convenience for embedding; the server surface splits this
    /// into [`create`](Self::create) and [`start_build`](Self::start_build).
    pub fn open(self: &Arc<Self>, key: SessionKey) -> Arc<SessionRecord> {
        let record = self.create(key);
        self.start_build(&record);
        record
    }

    /// Look up an existing record without creating one.
    pub fn get(&self, key: &SessionKey) -> Option<Arc<SessionRecord>> {
        self.lock_sessions().get(key).cloned()
    }

    /// Lifecycle snapshots of every known session.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.lock_sessions()
            .values()
            .map(|record| record.summary())
            .collect()
    }

    /// How many builds have been started for `key`.
    pub fn builds_started(&self, key: &SessionKey) -> usize {
        self.builds_started
            .lock()
            .expect("build counter lock poisoned")
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Cancel all in-flight builds; used for process shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// The per-session build dispatcher.
    ///
    /// Runs on the async side for the lifetime of one build. Everything the
    /// record's subscribers observe flows through here, in order.
    #[instrument(skip(self, record), fields(session = %record.key()))]
    async fn run_build(self: Arc<Self>, record: Arc<SessionRecord>) {
        let key = record.key().clone();
        record.emit_progress(milestone::BEGIN, "Starting session load");

        // A persisted artifact short-circuits the build at the raw-load
        // milestone; progress still walks the later milestones.
        if let Some(store) = &self.store {
            match store.load(&key).await {
                Ok(Some(artifact)) => {
                    record.emit_progress(milestone::RAW_LOADED, "Loaded persisted session");
                    record.emit_progress(milestone::GEOMETRY, "Restoring track geometry");
                    self.seal(&record, Arc::new(artifact), false).await;
                    return;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(session = %key, error = %err, "Artifact store read failed, rebuilding");
                }
            }
        }

        let raw = match self.source.fetch(&key).await {
            Ok(raw) => raw,
            Err(err) => {
                error!(session = %key, error = %err, "Upstream fetch failed");
                record.fail(err.to_string());
                return;
            }
        };
        record.emit_progress(milestone::RAW_LOADED, "Raw telemetry loaded");

        // Worker threads post progress through this channel; this task is
        // the only one that touches the record.
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let build_cancel = self.shutdown.child_token();
        let build_key = key.clone();
        let tuning = self.tuning;

        let handle = tokio::task::spawn_blocking(move || {
            build_artifact(build_key, raw, tuning, progress_tx, build_cancel)
        });

        // Drain until the builder drops its sender, then collect the result.
        while let Some(update) = progress_rx.recv().await {
            record.emit_progress(update.progress, update.message);
        }

        match handle.await {
            Ok(Ok(artifact)) => {
                self.seal(&record, Arc::new(artifact), true).await;
            }
            Ok(Err(err)) => {
                error!(session = %key, error = %err, "Build failed");
                record.fail(err.to_string());
            }
            Err(join_err) => {
                error!(session = %key, error = %join_err, "Build task panicked");
                record.fail(format!("Build task panicked: {}", join_err));
            }
        }
    }

    /// Encode the frame cache, optionally persist, and flip the record to
    /// READY.
    async fn seal(&self, record: &Arc<SessionRecord>, artifact: Arc<SessionArtifact>, persist: bool) {
        record.emit_progress(milestone::SERIALIZE, "Encoding frames");

        let cache_artifact = artifact.clone();
        let tuning = self.tuning;
        let cache = match tokio::task::spawn_blocking(move || {
            FrameCache::build(&cache_artifact, &tuning)
        })
        .await
        {
            Ok(Ok(cache)) => Arc::new(cache),
            Ok(Err(err)) => {
                error!(session = %record.key(), error = %err, "Frame encoding failed");
                record.fail(err.to_string());
                return;
            }
            Err(join_err) => {
                error!(session = %record.key(), error = %join_err, "Encoding task panicked");
                record.fail(format!("Encoding task panicked: {}", join_err));
                return;
            }
        };

        if persist {
            if let Some(store) = &self.store {
                if let Err(err) = store.store(&artifact).await {
                    // Persistence is best-effort; the session still serves.
                    warn!(session = %record.key(), error = %err, "Artifact store write failed");
                }
            }
        }

        record.emit_progress(milestone::SEALED, "Artifact sealed");
        record.complete(artifact, cache);
        info!(session = %record.key(), "Session ready");
    }

    fn lock_sessions(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<SessionKey, Arc<SessionRecord>>> {
        self.sessions.lock().expect("session registry lock poisoned")
    }
}
