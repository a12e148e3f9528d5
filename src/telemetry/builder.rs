//! Race-frame builder.
//!
//! Orchestrates per-driver normalization across a worker pool, resamples
//! every driver onto the shared 25 Hz timeline, and assembles the
//! position-ranked frame sequence that becomes the session artifact.
//!
//! The builder runs on blocking worker threads. It communicates progress
//! exclusively through the provided channel sender; the session dispatcher
//! on the async side is the only place subscribers are invoked.

use chrono::Utc;
use rayon::prelude::*;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{OUTPUT_FPS, Tuning};
use crate::session::progress::{ProgressUpdate, milestone};
use crate::session::SessionKey;

use super::frame::{
    DriverFrame, DriverStatus, Frame, SessionArtifact, SessionMetadata, TrackStatusInterval,
};
use super::geometry::TrackGeometry;
use super::normalizer::{NormalizeError, normalize_driver};
use super::resample::{build_timeline, cumulative_max, resample_linear, round_categorical};
use super::types::{DriverTimeline, RawSession};

/// Race distance must move at least this far to count as advancing.
const STALL_EPSILON_METERS: f64 = 1e-3;

/// Frame interval between progress emissions during assembly.
const PROGRESS_FRAME_STRIDE: usize = 250;

/// Fatal build failures.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("No usable drivers in session")]
    NoDrivers,

    #[error("Build cancelled")]
    Cancelled,
}

impl From<NormalizeError> for BuildError {
    fn from(err: NormalizeError) -> Self {
        BuildError::DataIntegrity(err.to_string())
    }
}

/// One driver's columns resampled onto the output timeline.
struct ResampledDriver {
    code: String,
    x: Vec<f64>,
    y: Vec<f64>,
    distance: Vec<f64>,
    relative_distance: Vec<f64>,
    speed: Vec<f64>,
    throttle: Vec<f64>,
    brake: Vec<f64>,
    rpm: Vec<f64>,
    gear: Vec<f64>,
    drs: Vec<f64>,
    tyre: Vec<f64>,
    lap: Vec<f64>,
    race_distance: Vec<f64>,
    /// First frame at which this driver counts as retired, if any.
    retired_from: Option<usize>,
}

/// Build the session artifact from raw upstream data.
///
/// CPU-bound; intended to run inside `spawn_blocking`. Per-driver work fans
/// out over rayon. Progress lands on `progress` as `ProgressUpdate`s; the
/// sender is the only channel back to the async side.
pub fn build_artifact(
    key: SessionKey,
    raw: RawSession,
    tuning: Tuning,
    progress: mpsc::UnboundedSender<ProgressUpdate>,
    cancel: CancellationToken,
) -> Result<SessionArtifact, BuildError> {
    let emit = |pct: u8, msg: &str| {
        let _ = progress.send(ProgressUpdate::new(pct, msg));
    };

    info!(session = %key, drivers = raw.drivers.len(), "Starting frame build");
    emit(milestone::RESAMPLE_START, "Normalizing driver telemetry");

    // Per-driver normalization is embarrassingly parallel. Order of the
    // input driver list is preserved through collect().
    let normalized: Vec<Result<DriverTimeline, NormalizeError>> = raw
        .drivers
        .par_iter()
        .map(normalize_driver)
        .collect();

    if cancel.is_cancelled() {
        return Err(BuildError::Cancelled);
    }

    let mut timelines = Vec::with_capacity(normalized.len());
    for result in normalized {
        match result {
            Ok(timeline) if timeline.is_empty() => {
                warn!(driver = %timeline.code, "Dropping driver with no samples");
            }
            Ok(timeline) => timelines.push(timeline),
            Err(NormalizeError::NoLaps { code }) => {
                warn!(driver = %code, "Dropping driver with no usable laps");
            }
            Err(err @ NormalizeError::DataIntegrity { .. }) => return Err(err.into()),
        }
    }

    if timelines.is_empty() {
        return Err(BuildError::NoDrivers);
    }

    // Global origin and output timeline.
    let t_min = timelines
        .iter()
        .filter_map(DriverTimeline::first_t)
        .fold(f64::INFINITY, f64::min);
    let t_max = timelines
        .iter()
        .filter_map(DriverTimeline::last_t)
        .fold(f64::NEG_INFINITY, f64::max);

    for timeline in &mut timelines {
        for t in &mut timeline.t {
            *t -= t_min;
        }
    }

    let span = t_max - t_min;
    let frame_count = ((span * OUTPUT_FPS as f64).ceil() as usize).max(1);
    let timeline = build_timeline(frame_count, OUTPUT_FPS);
    debug!(
        session = %key,
        frames = frame_count,
        span_seconds = span,
        "Output timeline computed"
    );

    // Resample every driver onto the shared timeline.
    let resampled: Vec<ResampledDriver> = timelines
        .par_iter()
        .map(|driver| resample_driver(driver, &timeline, &tuning))
        .collect();

    if cancel.is_cancelled() {
        return Err(BuildError::Cancelled);
    }

    let frames = assemble_frames(&resampled, &timeline, &tuning, &emit, &cancel)?;

    emit(milestone::GEOMETRY, "Building track geometry");
    let track_geometry = TrackGeometry::build(&raw.meta.fastest_lap, raw.meta.sector_splits);

    let track_statuses = flatten_track_statuses(&raw, t_min, span);

    let total_laps = if raw.meta.total_laps > 0 {
        raw.meta.total_laps
    } else {
        resampled
            .iter()
            .filter_map(|d| d.lap.last().map(|&l| l as u32))
            .max()
            .unwrap_or(0)
    };

    let metadata = SessionMetadata {
        year: key.year,
        round: key.round,
        session_type: key.session_type.code().to_string(),
        total_frames: frame_count,
        total_laps,
        driver_colors: raw.meta.driver_colors.clone(),
        driver_numbers: raw.meta.driver_numbers.clone(),
        driver_teams: raw.meta.driver_teams.clone(),
        track_geometry,
        track_statuses,
        race_start_time: t_min,
        weather: raw.meta.weather,
    };

    info!(session = %key, frames = frame_count, laps = total_laps, "Frame build finished");

    Ok(SessionArtifact {
        key,
        frames,
        metadata,
        built_at: Utc::now(),
    })
}

/// Resample one normalized driver onto the output timeline and precompute
/// the frame index at which the driver counts as retired.
fn resample_driver(driver: &DriverTimeline, timeline: &[f64], tuning: &Tuning) -> ResampledDriver {
    let numeric = |v: &[f64]| resample_linear(&driver.t, v, timeline);
    let categorical = |v: &[f64]| round_categorical(&resample_linear(&driver.t, v, timeline));

    let race_distance = numeric(&driver.race_distance);
    let lap = cumulative_max(&categorical(&driver.lap));
    let retired_from =
        retirement_frame(&race_distance, timeline, tuning.retirement_stall_seconds);

    ResampledDriver {
        code: driver.code.clone(),
        x: numeric(&driver.x),
        y: numeric(&driver.y),
        distance: numeric(&driver.distance),
        relative_distance: numeric(&driver.relative_distance),
        speed: numeric(&driver.speed),
        throttle: numeric(&driver.throttle),
        brake: numeric(&driver.brake),
        rpm: numeric(&driver.rpm),
        gear: categorical(&driver.gear),
        drs: categorical(&driver.drs),
        tyre: categorical(&driver.tyre),
        lap,
        race_distance,
        retired_from,
    }
}

/// First frame index at which the driver's race distance has been stalled
/// for longer than the retirement threshold. Retirement is latched: once
/// detected the driver stays retired for the rest of the session.
fn retirement_frame(race_distance: &[f64], timeline: &[f64], stall_seconds: f64) -> Option<usize> {
    let mut last_advance = 0usize;
    for i in 1..race_distance.len() {
        if race_distance[i] > race_distance[last_advance] + STALL_EPSILON_METERS {
            last_advance = i;
        } else if timeline[i] - timeline[last_advance] > stall_seconds {
            return Some(i);
        }
    }
    None
}

/// Assemble the frame sequence: positions, leader lap, statuses, and the
/// periodically refreshed gaps.
fn assemble_frames(
    drivers: &[ResampledDriver],
    timeline: &[f64],
    tuning: &Tuning,
    emit: &dyn Fn(u8, &str),
    cancel: &CancellationToken,
) -> Result<Vec<Frame>, BuildError> {
    let frame_count = timeline.len();
    let gap_stride = ((tuning.gap_refresh_seconds * OUTPUT_FPS as f64).round() as usize).max(1);

    // Gaps held between refresh instants, keyed by driver index.
    let mut held_gaps: Vec<(f32, f32)> = vec![(0.0, 0.0); drivers.len()];
    let mut frames = Vec::with_capacity(frame_count);

    // Scratch ranking: (driver index, retired) sorted per frame.
    let mut order: Vec<usize> = (0..drivers.len()).collect();

    for i in 0..frame_count {
        if i % 1000 == 0 && cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        if i % PROGRESS_FRAME_STRIDE == 0 {
            let span = (milestone::RESAMPLE_END - milestone::RESAMPLE_START) as usize;
            let pct = milestone::RESAMPLE_START + (span * i / frame_count.max(1)) as u8;
            emit(pct, "Building race frames");
        }

        // Rank: running drivers by race distance, retired drivers after all
        // running ones. Ties break on lap, then driver code.
        order.sort_by(|&a, &b| {
            let ra = drivers[a].retired_from.is_some_and(|f| i >= f);
            let rb = drivers[b].retired_from.is_some_and(|f| i >= f);
            ra.cmp(&rb)
                .then_with(|| {
                    drivers[b].race_distance[i]
                        .partial_cmp(&drivers[a].race_distance[i])
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| {
                    drivers[b].lap[i]
                        .partial_cmp(&drivers[a].lap[i])
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| drivers[a].code.cmp(&drivers[b].code))
        });

        let leader = &drivers[order[0]];
        let leader_lap = leader.lap[i] as u32;

        if i % gap_stride == 0 {
            refresh_gaps(drivers, &order, i, tuning, &mut held_gaps);
        }

        let mut frame_drivers = BTreeMap::new();
        for (rank, &idx) in order.iter().enumerate() {
            let d = &drivers[idx];
            let retired = d.retired_from.is_some_and(|f| i >= f);
            let lap = d.lap[i] as u32;

            let status = if retired {
                DriverStatus::Retired
            } else if lap < leader_lap {
                DriverStatus::Lapped(leader_lap - lap)
            } else {
                DriverStatus::Running
            };

            let (gap_to_previous, gap_to_leader) = held_gaps[idx];

            frame_drivers.insert(
                d.code.clone(),
                DriverFrame {
                    x: d.x[i],
                    y: d.y[i],
                    dist: d.race_distance[i],
                    rel_dist: d.relative_distance[i] as f32,
                    lap,
                    tyre: d.tyre[i].clamp(0.0, u8::MAX as f64) as u8,
                    speed: d.speed[i] as f32,
                    gear: d.gear[i].clamp(i8::MIN as f64, i8::MAX as f64) as i8,
                    drs: d.drs[i].clamp(0.0, u8::MAX as f64) as u8,
                    throttle: d.throttle[i] as f32,
                    brake: d.brake[i] as f32,
                    rpm: d.rpm[i] as f32,
                    position: (rank + 1) as u16,
                    gap_to_previous,
                    gap_to_leader,
                    status,
                },
            );
        }

        frames.push(Frame {
            t: timeline[i],
            lap: leader_lap,
            drivers: frame_drivers,
        });
    }

    Ok(frames)
}

/// Recompute the held gaps at a refresh instant.
///
/// The gap is the time to cover the race-distance deficit at the chasing
/// driver's current speed, floored to avoid blow-ups at crawl speeds.
fn refresh_gaps(
    drivers: &[ResampledDriver],
    order: &[usize],
    i: usize,
    tuning: &Tuning,
    held: &mut [(f32, f32)],
) {
    let leader_distance = drivers[order[0]].race_distance[i];
    held[order[0]] = (0.0, 0.0);

    for rank in 1..order.len() {
        let idx = order[rank];
        let prev_idx = order[rank - 1];
        let d = &drivers[idx];

        let speed = d.speed[i].max(tuning.speed_floor);
        let to_previous = (drivers[prev_idx].race_distance[i] - d.race_distance[i]).max(0.0);
        let to_leader = (leader_distance - d.race_distance[i]).max(0.0);

        held[idx] = ((to_previous / speed) as f32, (to_leader / speed) as f32);
    }
}

/// Flatten the raw status log into non-overlapping intervals relative to
/// the race-start origin. Open intervals close at the session end.
fn flatten_track_statuses(raw: &RawSession, t_min: f64, span: f64) -> Vec<TrackStatusInterval> {
    let mut entries: Vec<_> = raw.meta.track_statuses.clone();
    entries.sort_by(|a, b| {
        a.start_time
            .partial_cmp(&b.start_time)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut intervals = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let start = (entry.start_time - t_min).max(0.0);
        let next_start = entries
            .get(i + 1)
            .map(|n| (n.start_time - t_min).max(0.0))
            .unwrap_or(span);
        let end = entry
            .end_time
            .map(|e| (e - t_min).clamp(start, next_start))
            .unwrap_or(next_start);

        if end > start {
            intervals.push(TrackStatusInterval {
                start_time: start,
                end_time: end,
                status: entry.status.clone(),
            });
        }
    }

    intervals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionType;
    use crate::telemetry::types::{DriverLaps, LapSamples, RawTrackStatus};

    fn lap(lap_number: u32, start_t: f64, samples: usize, speed: f64) -> LapSamples {
        // One sample per second, constant speed.
        let t: Vec<f64> = (0..samples).map(|j| start_t + j as f64).collect();
        let distance: Vec<f64> = (0..samples).map(|j| j as f64 * speed).collect();
        let n = samples;
        LapSamples {
            lap_number,
            x: t.iter().map(|t| t * 2.0).collect(),
            y: vec![0.0; n],
            distance,
            speed: vec![speed; n],
            throttle: vec![0.9; n],
            brake: vec![0.0; n],
            gear: vec![5.0; n],
            drs: vec![0.0; n],
            rpm: vec![10_000.0; n],
            tyre: vec![2.0; n],
            t,
        }
    }

    fn two_driver_session() -> RawSession {
        // VER is faster than HAM, both run 60 s single laps.
        RawSession {
            drivers: vec![
                DriverLaps {
                    code: "VER".to_string(),
                    laps: vec![lap(1, 0.0, 61, 60.0)],
                },
                DriverLaps {
                    code: "HAM".to_string(),
                    laps: vec![lap(1, 0.0, 61, 55.0)],
                },
            ],
            meta: Default::default(),
        }
    }

    fn build(raw: RawSession) -> Result<SessionArtifact, BuildError> {
        let (tx, _rx) = mpsc::unbounded_channel();
        build_artifact(
            SessionKey::new(2023, 1, SessionType::Race),
            raw,
            Tuning::default(),
            tx,
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_frame_count_matches_span() {
        let artifact = build(two_driver_session()).unwrap();
        // 60 s span at 25 fps.
        assert_eq!(artifact.frames.len(), 1500);
        assert_eq!(artifact.metadata.total_frames, 1500);
    }

    #[test]
    fn test_frame_times_monotonic() {
        let artifact = build(two_driver_session()).unwrap();
        assert!(
            artifact
                .frames
                .windows(2)
                .all(|w| w[0].t <= w[1].t)
        );
    }

    #[test]
    fn test_positions_unique_permutation() {
        let artifact = build(two_driver_session()).unwrap();
        for frame in &artifact.frames {
            let mut positions: Vec<u16> =
                frame.drivers.values().map(|d| d.position).collect();
            positions.sort_unstable();
            let expected: Vec<u16> = (1..=frame.drivers.len() as u16).collect();
            assert_eq!(positions, expected);
        }
    }

    #[test]
    fn test_faster_driver_leads() {
        let artifact = build(two_driver_session()).unwrap();
        let last = artifact.frames.last().unwrap();
        assert_eq!(last.drivers["VER"].position, 1);
        assert_eq!(last.drivers["HAM"].position, 2);
    }

    #[test]
    fn test_leader_gaps_are_zero() {
        let artifact = build(two_driver_session()).unwrap();
        for frame in &artifact.frames {
            let leader = frame
                .drivers
                .values()
                .find(|d| d.position == 1)
                .expect("frame has a leader");
            assert_eq!(leader.gap_to_leader, 0.0);
            assert_eq!(leader.gap_to_previous, 0.0);
        }
    }

    #[test]
    fn test_trailing_driver_has_positive_gap() {
        let artifact = build(two_driver_session()).unwrap();
        // Well after the first gap refresh, HAM trails by a growing deficit.
        let frame = &artifact.frames[1000];
        assert!(frame.drivers["HAM"].gap_to_leader > 0.0);
        assert_eq!(
            frame.drivers["HAM"].gap_to_leader,
            frame.drivers["HAM"].gap_to_previous
        );
    }

    #[test]
    fn test_zero_sample_driver_dropped() {
        let mut raw = two_driver_session();
        raw.drivers.push(DriverLaps {
            code: "BOT".to_string(),
            laps: vec![],
        });

        let artifact = build(raw).unwrap();
        assert_eq!(artifact.frames[0].drivers.len(), 2);
        assert!(!artifact.frames[0].drivers.contains_key("BOT"));
    }

    #[test]
    fn test_no_drivers_is_fatal() {
        let raw = RawSession {
            drivers: vec![DriverLaps {
                code: "BOT".to_string(),
                laps: vec![],
            }],
            meta: Default::default(),
        };
        assert!(matches!(build(raw), Err(BuildError::NoDrivers)));
    }

    #[test]
    fn test_integrity_violation_is_fatal() {
        let mut raw = two_driver_session();
        // Inject a time regression into VER's lap.
        raw.drivers[0].laps[0].t[30] = 0.5;
        assert!(matches!(build(raw), Err(BuildError::DataIntegrity(_))));
    }

    #[test]
    fn test_retirement_detection_and_latch() {
        // HAM's data ends at t=60 while VER continues to t=200; HAM's
        // clamped race distance stalls from t=60 on.
        let raw = RawSession {
            drivers: vec![
                DriverLaps {
                    code: "VER".to_string(),
                    laps: vec![lap(1, 0.0, 201, 60.0)],
                },
                DriverLaps {
                    code: "HAM".to_string(),
                    laps: vec![lap(1, 0.0, 61, 55.0)],
                },
            ],
            meta: Default::default(),
        };

        let artifact = build(raw).unwrap();

        // Before the stall threshold HAM still counts as running.
        let before = &artifact.frames[25 * 60];
        assert_ne!(before.drivers["HAM"].status, DriverStatus::Retired);

        // After 60 s stalled + 30 s threshold, retired and last.
        let after_idx = 25 * 91;
        for frame in &artifact.frames[after_idx..] {
            assert_eq!(frame.drivers["HAM"].status, DriverStatus::Retired);
            assert_eq!(frame.drivers["HAM"].position, 2);
        }
    }

    #[test]
    fn test_retired_ranks_after_running() {
        // SLOW retires early with a big head start; the running driver
        // still outranks them once retired even while behind on distance.
        let raw = RawSession {
            drivers: vec![
                DriverLaps {
                    code: "SLO".to_string(),
                    laps: vec![lap(1, 0.0, 11, 500.0)],
                },
                DriverLaps {
                    code: "RUN".to_string(),
                    laps: vec![lap(1, 0.0, 301, 20.0)],
                },
            ],
            meta: Default::default(),
        };

        let artifact = build(raw).unwrap();
        // SLO stalls at t=10 with 5000 m banked; RUN reaches 5000 m only
        // at t=250. From t>40 SLO is retired and must rank last anyway.
        let frame = &artifact.frames[25 * 100];
        assert_eq!(frame.drivers["SLO"].status, DriverStatus::Retired);
        assert_eq!(frame.drivers["RUN"].position, 1);
        assert_eq!(frame.drivers["SLO"].position, 2);
    }

    #[test]
    fn test_lapped_status() {
        // VER laps every 50 s, BOT every 100 s; by the end BOT is laps down.
        let raw = RawSession {
            drivers: vec![
                DriverLaps {
                    code: "VER".to_string(),
                    laps: (0..4)
                        .map(|i| lap(i as u32 + 1, i as f64 * 50.0, 51, 40.0))
                        .collect(),
                },
                DriverLaps {
                    code: "BOT".to_string(),
                    laps: (0..2)
                        .map(|i| lap(i as u32 + 1, i as f64 * 100.0, 101, 20.0))
                        .collect(),
                },
            ],
            meta: Default::default(),
        };

        let artifact = build(raw).unwrap();
        let last = artifact.frames.last().unwrap();
        assert_eq!(last.lap, 4);
        assert!(matches!(
            last.drivers["BOT"].status,
            DriverStatus::Lapped(_)
        ));
    }

    #[test]
    fn test_progress_monotonic_and_complete() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        build_artifact(
            SessionKey::new(2023, 1, SessionType::Race),
            two_driver_session(),
            Tuning::default(),
            tx,
            CancellationToken::new(),
        )
        .unwrap();

        let mut seen = Vec::new();
        while let Ok(update) = rx.try_recv() {
            seen.push(update.progress);
        }

        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen.contains(&milestone::RESAMPLE_START));
        assert!(seen.contains(&milestone::GEOMETRY));
        assert!(*seen.last().unwrap() <= 100);
    }

    #[test]
    fn test_cancellation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = build_artifact(
            SessionKey::new(2023, 1, SessionType::Race),
            two_driver_session(),
            Tuning::default(),
            tx,
            cancel,
        );
        assert!(matches!(result, Err(BuildError::Cancelled)));
    }

    #[test]
    fn test_track_status_flattening() {
        let mut raw = two_driver_session();
        raw.meta.track_statuses = vec![
            RawTrackStatus {
                start_time: 0.0,
                end_time: Some(10.0),
                status: "1".to_string(),
            },
            RawTrackStatus {
                start_time: 10.0,
                end_time: None,
                status: "2".to_string(),
            },
        ];

        let artifact = build(raw).unwrap();
        let statuses = &artifact.metadata.track_statuses;
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].end_time, 10.0);
        // Open interval closes at the session end.
        assert_eq!(statuses[1].end_time, 60.0);
        // Non-overlapping, ordered.
        assert!(statuses[0].end_time <= statuses[1].start_time);
    }

    #[test]
    fn test_retirement_frame_helper() {
        let timeline: Vec<f64> = (0..100).map(|i| i as f64).collect();
        // Advances for 10 s then stalls.
        let mut distance: Vec<f64> = (0..10).map(|i| i as f64 * 50.0).collect();
        distance.extend(std::iter::repeat(450.0).take(90));

        let frame = retirement_frame(&distance, &timeline, 30.0).unwrap();
        // Last advance at t=9; stall exceeds 30 s strictly after t=39.
        assert_eq!(frame, 40);
    }
}
