//! Telemetry pipeline: raw sample access, per-driver normalization, and the
//! race-frame builder.

pub mod builder;
pub mod frame;
pub mod geometry;
pub mod normalizer;
pub mod resample;
pub mod source;
pub mod types;

pub use builder::{BuildError, build_artifact};
pub use frame::{DriverFrame, DriverStatus, Frame, SessionArtifact, SessionMetadata};
pub use source::{SourceError, StaticSource, TelemetrySource};
pub use types::{DriverLaps, DriverTimeline, LapSamples, RawSession, RawSessionMeta};
