//! Response models for the upstream provider's service endpoints.
//!
//! The telemetry payload itself deserializes straight into
//! [`RawSession`](crate::telemetry::types::RawSession); only the auxiliary
//! endpoints need their own shapes.

use serde::{Deserialize, Serialize};

/// Upstream health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamHealth {
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
}
