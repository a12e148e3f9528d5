//! HTTP client for the upstream telemetry provider.
//!
//! The provider serves complete per-session telemetry dumps: one request per
//! session key returns every driver's laps plus the static metadata. This
//! client is the production implementation of
//! [`TelemetrySource`](crate::telemetry::TelemetrySource).

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, instrument};

use crate::session::SessionKey;
use crate::telemetry::source::{SourceError, TelemetrySource};
use crate::telemetry::types::RawSession;

use super::models::UpstreamHealth;

/// Client for the upstream telemetry provider API.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    base_url: String,
}

impl UpstreamClient {
    /// Create a new client against `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Create a client with a custom reqwest Client
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn session_url(&self, key: &SessionKey) -> String {
        format!(
            "{}/api/v1/telemetry/{}/{}/{}",
            self.base_url, key.year, key.round, key.session_type
        )
    }

    /// Check provider health
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<UpstreamHealth, SourceError> {
        let url = format!("{}/api/v1/health", self.base_url);
        debug!("Health check: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::RequestFailed(e.to_string()))?;

        if response.status().is_success() {
            response
                .json::<UpstreamHealth>()
                .await
                .map_err(|e| SourceError::ParseError(e.to_string()))
        } else {
            Err(SourceError::RequestFailed(format!(
                "health endpoint returned {}",
                response.status()
            )))
        }
    }

    /// Fetch the full telemetry dump for one session.
    #[instrument(skip(self), fields(session = %key))]
    pub async fn fetch_session(&self, key: &SessionKey) -> Result<RawSession, SourceError> {
        let url = self.session_url(key);
        debug!("Fetching session telemetry: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::RequestFailed(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::SessionUnavailable(key.session_id()));
        }
        if !response.status().is_success() {
            return Err(SourceError::RequestFailed(format!(
                "upstream returned {}",
                response.status()
            )));
        }

        let session = response
            .json::<RawSession>()
            .await
            .map_err(|e| SourceError::ParseError(e.to_string()))?;

        info!(
            session = %key,
            drivers = session.drivers.len(),
            samples = session.sample_count(),
            "Session telemetry fetched"
        );
        Ok(session)
    }
}

#[async_trait]
impl TelemetrySource for UpstreamClient {
    async fn fetch(&self, key: &SessionKey) -> Result<RawSession, SourceError> {
        self.fetch_session(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionType;

    #[test]
    fn test_client_creation() {
        let client = UpstreamClient::new("http://localhost:8100");
        assert_eq!(client.base_url, "http://localhost:8100");
    }

    #[test]
    fn test_session_url_shape() {
        let client = UpstreamClient::new("http://provider");
        let key = SessionKey::new(2023, 1, SessionType::SprintQualifying);
        assert_eq!(
            client.session_url(&key),
            "http://provider/api/v1/telemetry/2023/1/SQ"
        );
    }
}
