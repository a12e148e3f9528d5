//! Race frame and session artifact types.
//!
//! A [`Frame`] is the full race state at one instant of the 25 Hz replay
//! timeline. The [`SessionArtifact`] is the immutable product of a build:
//! the ordered frame sequence plus the public metadata the viewer needs.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::session::SessionKey;
use crate::telemetry::geometry::TrackGeometry;
use crate::telemetry::types::WeatherSummary;

/// Race status of a driver at one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    Running,
    Retired,
    /// Laps behind the leader.
    Lapped(u32),
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverStatus::Running => write!(f, "Running"),
            DriverStatus::Retired => write!(f, "Retired"),
            DriverStatus::Lapped(n) => write!(f, "+{}L", n),
        }
    }
}

impl FromStr for DriverStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Running" => Ok(DriverStatus::Running),
            "Retired" => Ok(DriverStatus::Retired),
            other => {
                let laps = other
                    .strip_prefix('+')
                    .and_then(|rest| rest.strip_suffix('L'))
                    .and_then(|n| n.parse::<u32>().ok())
                    .ok_or_else(|| format!("Invalid driver status: {}", other))?;
                Ok(DriverStatus::Lapped(laps))
            }
        }
    }
}

// On the wire the status is its display string ("Running", "Retired", "+1L").
impl Serialize for DriverStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DriverStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// One driver's state within a frame.
///
/// Numeric widths follow the wire projection: exact quantities are integers,
/// positions and distances stay f64, everything else is narrowed to f32.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverFrame {
    pub x: f64,
    pub y: f64,
    /// Cumulative race distance, meters.
    pub dist: f64,
    /// In-lap distance normalized to 0..1.
    pub rel_dist: f32,
    pub lap: u32,
    pub tyre: u8,
    /// m/s
    pub speed: f32,
    pub gear: i8,
    pub drs: u8,
    pub throttle: f32,
    pub brake: f32,
    pub rpm: f32,
    /// Rank at this frame, 1-based and unique across drivers present.
    pub position: u16,
    /// Seconds to the driver one position ahead; 0 for the leader.
    pub gap_to_previous: f32,
    /// Seconds to the leader; 0 for the leader.
    pub gap_to_leader: f32,
    pub status: DriverStatus,
}

/// The full race state at one instant of the replay timeline.
///
/// `drivers` is ordered by driver code so the encoded form is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Seconds from race start.
    pub t: f64,
    /// Leader's current lap.
    pub lap: u32,
    pub drivers: BTreeMap<String, DriverFrame>,
}

/// A flattened track-status interval, referenced to the race-start origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackStatusInterval {
    pub start_time: f64,
    pub end_time: f64,
    pub status: String,
}

/// Public session metadata delivered with `loading_complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub year: u16,
    pub round: u8,
    pub session_type: String,
    pub total_frames: usize,
    pub total_laps: u32,
    pub driver_colors: HashMap<String, [u8; 3]>,
    pub driver_numbers: HashMap<String, u32>,
    pub driver_teams: HashMap<String, String>,
    pub track_geometry: TrackGeometry,
    pub track_statuses: Vec<TrackStatusInterval>,
    /// Session-absolute time of the earliest sample, seconds.
    pub race_start_time: f64,
    pub weather: WeatherSummary,
}

/// The immutable product of a session build.
///
/// Once sealed, an artifact is never mutated; concurrent attachments read it
/// without guards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionArtifact {
    pub key: SessionKey,
    pub frames: Vec<Frame>,
    pub metadata: SessionMetadata,
    pub built_at: DateTime<Utc>,
}

impl SessionArtifact {
    pub fn total_frames(&self) -> usize {
        self.frames.len()
    }
}
