//! Wire messages for the replay channel.
//!
//! Inbound: JSON playback commands. Outbound during loading: JSON events.
//! Outbound during playback: binary frame payloads (no envelope; direction
//! is implied by the preceding `loading_complete`).

use serde::{Deserialize, Serialize};

use crate::session::LoadingEvent;
use crate::telemetry::frame::SessionMetadata;

/// A playback command from the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum PlaybackCommand {
    /// Start or resume playback, optionally changing speed.
    Play { speed: Option<f64> },
    /// Freeze the playhead.
    Pause,
    /// Jump to a frame index; clamped server-side.
    Seek { frame: i64 },
}

/// Parse an inbound text message into a command.
///
/// Malformed JSON and unknown actions surface as errors; the plane logs and
/// ignores them without closing the channel.
pub fn parse_command(text: &str) -> Result<PlaybackCommand, serde_json::Error> {
    serde_json::from_str(text)
}

/// Loading-phase event as it appears on the wire.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoadingMessage<'a> {
    LoadingProgress {
        progress: u8,
        message: &'a str,
        elapsed_seconds: u64,
    },
    LoadingComplete {
        frames: usize,
        load_time_seconds: f64,
        elapsed_seconds: u64,
        metadata: &'a SessionMetadata,
    },
    LoadingError {
        message: &'a str,
    },
}

impl<'a> LoadingMessage<'a> {
    pub fn from_event(event: &'a LoadingEvent) -> Self {
        match event {
            LoadingEvent::Progress {
                progress,
                message,
                elapsed_seconds,
            } => LoadingMessage::LoadingProgress {
                progress: *progress,
                message,
                elapsed_seconds: *elapsed_seconds,
            },
            LoadingEvent::Complete {
                frames,
                load_time_seconds,
                elapsed_seconds,
                metadata,
            } => LoadingMessage::LoadingComplete {
                frames: *frames,
                load_time_seconds: *load_time_seconds,
                elapsed_seconds: *elapsed_seconds,
                metadata,
            },
            LoadingEvent::Error { message } => LoadingMessage::LoadingError { message },
        }
    }
}

/// Serialize a loading event for the text side of the channel.
pub fn encode_loading_event(event: &LoadingEvent) -> String {
    serde_json::to_string(&LoadingMessage::from_event(event))
        .expect("loading events always serialize")
}

/// The error frame sent before closing an attachment that addressed an
/// unknown session.
pub fn session_not_found() -> String {
    serde_json::to_string(&LoadingMessage::LoadingError {
        message: "session_not_found",
    })
    .expect("static message serializes")
}
