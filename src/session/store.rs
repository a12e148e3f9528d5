//! Persistent artifact store.
//!
//! Built sessions can optionally be persisted so a later process skips the
//! expensive build. The store is a plain key-value contract: an opaque blob
//! per session key. The filesystem implementation is the default; anything
//! that can hold bytes by key can implement the trait.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::session::SessionKey;
use crate::telemetry::frame::SessionArtifact;

/// Artifact store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Artifact store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode artifact: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode artifact: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Key-value persistence for built session artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Load the artifact for `key`, or `None` if it was never stored.
    async fn load(&self, key: &SessionKey) -> Result<Option<SessionArtifact>, StoreError>;

    /// Persist a sealed artifact.
    async fn store(&self, artifact: &SessionArtifact) -> Result<(), StoreError>;
}

/// Filesystem-backed artifact store: one binary blob per session under the
/// configured directory.
#[derive(Debug)]
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &SessionKey) -> PathBuf {
        self.dir.join(format!("{}_telemetry.bin", key.session_id()))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<SessionArtifact>, StoreError> {
        let path = self.path_for(key);
        let blob = match tokio::fs::read(&path).await {
            Ok(blob) => blob,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(session = %key, "No persisted artifact");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let artifact: SessionArtifact = rmp_serde::from_slice(&blob)?;
        info!(
            session = %key,
            frames = artifact.total_frames(),
            path = %path.display(),
            "Loaded persisted artifact"
        );
        Ok(Some(artifact))
    }

    async fn store(&self, artifact: &SessionArtifact) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(&artifact.key);
        let blob = rmp_serde::to_vec(artifact)?;
        tokio::fs::write(&path, &blob).await?;

        info!(
            session = %artifact.key,
            bytes = blob.len(),
            path = %path.display(),
            "Persisted artifact"
        );
        Ok(())
    }
}
