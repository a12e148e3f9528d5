//! Raw telemetry data model.
//!
//! These types mirror what the upstream provider hands us: per-driver,
//! per-lap columnar sample arrays plus the static session metadata needed
//! to build a replay artifact.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One lap of columnar telemetry samples for a single driver.
///
/// All arrays have equal length. `t` is session-absolute seconds and is
/// non-decreasing within the lap; violations are rejected by the normalizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LapSamples {
    pub lap_number: u32,
    /// Session-absolute sample times, seconds.
    pub t: Vec<f64>,
    /// World-plane coordinates, meters.
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Distance travelled within this lap, meters.
    pub distance: Vec<f64>,
    /// Instantaneous speed, m/s.
    pub speed: Vec<f64>,
    pub throttle: Vec<f64>,
    pub brake: Vec<f64>,
    pub gear: Vec<f64>,
    pub drs: Vec<f64>,
    pub rpm: Vec<f64>,
    /// Tyre compound code (0 unknown, 1 soft, 2 medium, 3 hard, 4 inter, 5 wet).
    pub tyre: Vec<f64>,
}

impl LapSamples {
    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }
}

/// All laps recorded for one driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverLaps {
    /// Three-letter driver code, e.g. "VER".
    pub code: String,
    pub laps: Vec<LapSamples>,
}

/// Samples of the session's globally fastest lap, used for track geometry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FastestLap {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Distance within the lap, meters.
    pub distance: Vec<f64>,
    /// Track-width proxy at each sample, meters.
    pub width: Vec<f64>,
}

/// A raw track-status log entry from the upstream provider.
///
/// `end_time` is absent for the final entry of the log; flattening closes it
/// at the session end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTrackStatus {
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub status: String,
}

/// Compact weather summary carried into the artifact metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherSummary {
    pub air_temp: f64,
    pub track_temp: f64,
    pub humidity: f64,
    pub rainfall: bool,
}

/// Static session metadata from the upstream provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSessionMeta {
    /// Team color per driver code, RGB.
    pub driver_colors: HashMap<String, [u8; 3]>,
    pub driver_numbers: HashMap<String, u32>,
    pub driver_teams: HashMap<String, String>,
    pub fastest_lap: FastestLap,
    /// Lap distances at which sectors 1 and 2 end, meters.
    pub sector_splits: [f64; 2],
    pub track_statuses: Vec<RawTrackStatus>,
    pub weather: WeatherSummary,
    pub total_laps: u32,
}

/// Everything the upstream provider yields for one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSession {
    pub drivers: Vec<DriverLaps>,
    pub meta: RawSessionMeta,
}

impl RawSession {
    /// Total sample count across all drivers and laps.
    pub fn sample_count(&self) -> usize {
        self.drivers
            .iter()
            .flat_map(|d| d.laps.iter())
            .map(|l| l.len())
            .sum()
    }
}

/// A single driver's normalized time series: all laps concatenated in
/// chronological order, one entry per sample.
///
/// Invariants after normalization: `t` weakly monotonic, `lap` and
/// `race_distance` non-decreasing.
#[derive(Debug, Clone, Default)]
pub struct DriverTimeline {
    pub code: String,
    pub t: Vec<f64>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// In-lap distance, meters.
    pub distance: Vec<f64>,
    pub speed: Vec<f64>,
    pub throttle: Vec<f64>,
    pub brake: Vec<f64>,
    pub gear: Vec<f64>,
    pub drs: Vec<f64>,
    pub rpm: Vec<f64>,
    pub tyre: Vec<f64>,
    /// Lap number per sample.
    pub lap: Vec<f64>,
    /// Cumulative distance since session start, meters.
    pub race_distance: Vec<f64>,
    /// In-lap distance normalized to 0..1.
    pub relative_distance: Vec<f64>,
}

impl DriverTimeline {
    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    /// First sample time, if any samples exist.
    pub fn first_t(&self) -> Option<f64> {
        self.t.first().copied()
    }

    /// Last sample time, if any samples exist.
    pub fn last_t(&self) -> Option<f64> {
        self.t.last().copied()
    }
}
