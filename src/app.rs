//! Main application orchestrator for the Race Replay server.
//!
//! Wires the upstream client, artifact store, and session registry into the
//! HTTP/WebSocket surface and coordinates graceful shutdown.

use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::UpstreamClient;
use crate::config::Config;
use crate::server::{AppState, router};
use crate::session::{ArtifactStore, FsArtifactStore, SessionRegistry};

/// Race Replay server application
pub struct ReplayApp {
    config: Config,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
}

impl ReplayApp {
    /// Create a new application instance
    pub fn new(config: Config) -> Self {
        let source = Arc::new(UpstreamClient::new(&config.upstream_url));

        let store: Option<Arc<dyn ArtifactStore>> = config
            .artifact_dir
            .as_ref()
            .map(|dir| Arc::new(FsArtifactStore::new(dir)) as Arc<dyn ArtifactStore>);

        let registry = SessionRegistry::new(source, store, config.tuning);

        Self {
            config,
            registry,
            shutdown: CancellationToken::new(),
        }
    }

    /// Shared registry handle, mainly for embedding and tests.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Run the server until Ctrl+C or an explicit shutdown.
    pub async fn run(self) -> anyhow::Result<()> {
        info!("Starting Race Replay server");
        info!("Upstream provider: {}", self.config.upstream_url);
        match &self.config.artifact_dir {
            Some(dir) => info!("Artifact cache: {}", dir.display()),
            None => info!("Artifact cache disabled"),
        }

        let state = AppState {
            registry: self.registry.clone(),
            shutdown: self.shutdown.clone(),
        };
        let app = router(state);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        info!("Listening on {}", listener.local_addr()?);

        let shutdown = self.shutdown.clone();
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down...");
                }
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                }
            }
        });

        let result = serve.await;

        // Stop attachments and in-flight builds before exiting.
        self.shutdown.cancel();
        self.registry.shutdown();

        if let Err(err) = &result {
            warn!(error = %err, "Server exited with error");
        }
        info!("Race Replay server shutdown complete");
        result.map_err(Into::into)
    }

    /// Request application shutdown
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
