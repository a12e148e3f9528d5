//! HTTP client for the upstream telemetry provider.

mod client;
mod models;

pub use client::UpstreamClient;
pub use models::UpstreamHealth;
