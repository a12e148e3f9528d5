//! Per-driver normalizer.
//!
//! Turns one driver's per-lap sample arrays into a single chronological
//! timeline with derived race distance. Laps are cheap to order (at most a
//! few hundred per driver), so the normalizer sorts lap start times instead
//! of reordering every sample column.

use tracing::warn;

use super::types::{DriverLaps, DriverTimeline, LapSamples};

/// Errors raised while normalizing a single driver.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Data integrity violation for driver {code}: {detail}")]
    DataIntegrity { code: String, detail: String },

    #[error("Driver {code} has no usable laps")]
    NoLaps { code: String },
}

/// Normalize one driver's laps into a single monotonic timeline.
///
/// Empty laps are skipped with a warning. A monotonicity violation inside a
/// lap, or across the concatenated sequence, is fatal for the session build.
pub fn normalize_driver(driver: &DriverLaps) -> Result<DriverTimeline, NormalizeError> {
    let mut intervals: Vec<&LapSamples> = Vec::with_capacity(driver.laps.len());

    for lap in &driver.laps {
        if lap.is_empty() {
            warn!(
                driver = %driver.code,
                lap = lap.lap_number,
                "Skipping empty lap"
            );
            continue;
        }

        verify_lap(&driver.code, lap)?;
        intervals.push(lap);
    }

    if intervals.is_empty() {
        return Err(NormalizeError::NoLaps {
            code: driver.code.clone(),
        });
    }

    // Expected already sorted; verified by sorting on lap start time.
    intervals.sort_by(|a, b| {
        a.t[0]
            .partial_cmp(&b.t[0])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let total: usize = intervals.iter().map(|lap| lap.len()).sum();
    let mut timeline = DriverTimeline {
        code: driver.code.clone(),
        t: Vec::with_capacity(total),
        x: Vec::with_capacity(total),
        y: Vec::with_capacity(total),
        distance: Vec::with_capacity(total),
        speed: Vec::with_capacity(total),
        throttle: Vec::with_capacity(total),
        brake: Vec::with_capacity(total),
        gear: Vec::with_capacity(total),
        drs: Vec::with_capacity(total),
        rpm: Vec::with_capacity(total),
        tyre: Vec::with_capacity(total),
        lap: Vec::with_capacity(total),
        race_distance: Vec::with_capacity(total),
        relative_distance: Vec::with_capacity(total),
    };

    // Distance already covered when each lap starts.
    let mut lap_offset = 0.0;

    for lap in &intervals {
        let lap_length = lap.distance.last().copied().unwrap_or(0.0);

        timeline.t.extend_from_slice(&lap.t);
        timeline.x.extend_from_slice(&lap.x);
        timeline.y.extend_from_slice(&lap.y);
        timeline.distance.extend_from_slice(&lap.distance);
        timeline.speed.extend_from_slice(&lap.speed);
        timeline.throttle.extend_from_slice(&lap.throttle);
        timeline.brake.extend_from_slice(&lap.brake);
        timeline.gear.extend_from_slice(&lap.gear);
        timeline.drs.extend_from_slice(&lap.drs);
        timeline.rpm.extend_from_slice(&lap.rpm);
        timeline.tyre.extend_from_slice(&lap.tyre);
        timeline
            .lap
            .extend(std::iter::repeat(lap.lap_number as f64).take(lap.len()));
        timeline
            .race_distance
            .extend(lap.distance.iter().map(|d| lap_offset + d));

        if lap_length > 0.0 {
            timeline
                .relative_distance
                .extend(lap.distance.iter().map(|d| (d / lap_length).clamp(0.0, 1.0)));
        } else {
            warn!(
                driver = %driver.code,
                lap = lap.lap_number,
                "Lap has zero length, relative distance pinned to 0"
            );
            timeline
                .relative_distance
                .extend(std::iter::repeat(0.0).take(lap.len()));
        }

        lap_offset += lap_length;
    }

    verify_concatenated(&driver.code, &timeline)?;

    Ok(timeline)
}

/// Per-lap integrity checks: equal column lengths, non-decreasing time.
fn verify_lap(code: &str, lap: &LapSamples) -> Result<(), NormalizeError> {
    let n = lap.t.len();
    let columns = [
        ("x", lap.x.len()),
        ("y", lap.y.len()),
        ("distance", lap.distance.len()),
        ("speed", lap.speed.len()),
        ("throttle", lap.throttle.len()),
        ("brake", lap.brake.len()),
        ("gear", lap.gear.len()),
        ("drs", lap.drs.len()),
        ("rpm", lap.rpm.len()),
        ("tyre", lap.tyre.len()),
    ];

    for (name, len) in columns {
        if len != n {
            return Err(NormalizeError::DataIntegrity {
                code: code.to_string(),
                detail: format!(
                    "lap {}: column {} has {} samples, expected {}",
                    lap.lap_number, name, len, n
                ),
            });
        }
    }

    if let Some(i) = first_time_regression(&lap.t) {
        return Err(NormalizeError::DataIntegrity {
            code: code.to_string(),
            detail: format!(
                "lap {}: time regresses at sample {} ({} -> {})",
                lap.lap_number,
                i + 1,
                lap.t[i],
                lap.t[i + 1]
            ),
        });
    }

    Ok(())
}

/// Post-concatenation check: time weakly monotonic across the full sequence.
fn verify_concatenated(code: &str, timeline: &DriverTimeline) -> Result<(), NormalizeError> {
    if let Some(i) = first_time_regression(&timeline.t) {
        return Err(NormalizeError::DataIntegrity {
            code: code.to_string(),
            detail: format!(
                "concatenated timeline regresses at sample {} ({} -> {})",
                i + 1,
                timeline.t[i],
                timeline.t[i + 1]
            ),
        });
    }
    Ok(())
}

/// Index of the first sample whose successor moves backwards in time.
fn first_time_regression(t: &[f64]) -> Option<usize> {
    t.windows(2).position(|w| w[1] < w[0])
}
