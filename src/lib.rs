//! Race Replay Server Library
//!
//! Real-time replay engine for motorsport telemetry. This library provides
//! modules for:
//!
//! - **api**: HTTP client for the upstream telemetry provider
//! - **config**: Configuration management (CLI, env) and pipeline tuning
//! - **telemetry**: Per-driver normalization and the race-frame builder
//! - **session**: Session lifecycle, build scheduling, and persistence
//! - **encode**: Binary frame encoding and the encoded-frame cache
//! - **stream**: The per-attachment streaming control plane
//! - **server**: axum transport host (routes + WebSocket adapter)

pub mod api;
pub mod app;
pub mod config;
pub mod encode;
pub mod server;
pub mod session;
pub mod stream;
pub mod telemetry;

// Re-export commonly used types
pub use api::UpstreamClient;
pub use app::ReplayApp;
pub use config::{Config, OUTPUT_FPS, Tuning};
pub use session::{SessionKey, SessionRegistry, SessionState, SessionType};
pub use telemetry::{Frame, SessionArtifact};
