//! Loading progress events and the worker-to-dispatcher handoff type.

use std::sync::Arc;

use crate::telemetry::frame::SessionMetadata;

/// Milestone percentages used by the build pipeline.
pub mod milestone {
    pub const BEGIN: u8 = 0;
    pub const RAW_LOADED: u8 = 10;
    pub const RESAMPLE_START: u8 = 15;
    pub const RESAMPLE_END: u8 = 60;
    pub const GEOMETRY: u8 = 75;
    pub const SERIALIZE: u8 = 90;
    pub const SEALED: u8 = 100;
}

/// An event delivered to loading-phase subscribers.
///
/// For any subscriber the sequence is: zero or more `Progress` with
/// non-decreasing percentages, then exactly one terminal `Complete` or
/// `Error`. Late joiners receive a synthesized tail of that sequence.
#[derive(Debug, Clone)]
pub enum LoadingEvent {
    Progress {
        progress: u8,
        message: String,
        elapsed_seconds: u64,
    },
    Complete {
        frames: usize,
        load_time_seconds: f64,
        elapsed_seconds: u64,
        metadata: Arc<SessionMetadata>,
    },
    Error {
        message: String,
    },
}

/// A progress point posted by the build worker to the session dispatcher.
///
/// Workers never touch the session record or its subscribers; they only send
/// these over an unbounded channel, which is safe from any thread.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub progress: u8,
    pub message: String,
}

impl ProgressUpdate {
    pub fn new(progress: u8, message: impl Into<String>) -> Self {
        Self {
            progress,
            message: message.into(),
        }
    }
}
