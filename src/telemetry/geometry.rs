//! Track geometry derived from the session's fastest lap.

use serde::{Deserialize, Serialize};

use super::types::FastestLap;

/// Track outline for the viewer: centerline plus parallel inner/outer edges,
/// bounding box, and a sector index per centerline point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackGeometry {
    pub centerline_x: Vec<f64>,
    pub centerline_y: Vec<f64>,
    pub inner_x: Vec<f64>,
    pub inner_y: Vec<f64>,
    pub outer_x: Vec<f64>,
    pub outer_y: Vec<f64>,
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    /// Sector index per centerline point, 1..=3.
    pub sector: Vec<u8>,
}

impl TrackGeometry {
    /// Build the outline from the fastest lap's raw samples.
    ///
    /// Inner/outer edges are the centerline offset along the local normal by
    /// half the track-width proxy. Sector indices bucket each point's in-lap
    /// distance against the session's two sector boundaries.
    pub fn build(lap: &FastestLap, sector_splits: [f64; 2]) -> Self {
        debug_assert!(
            sector_splits[0] > 0.0 && sector_splits[1] > sector_splits[0],
            "sector boundaries must be positive and ascending"
        );

        let n = lap.x.len();
        let mut geometry = TrackGeometry {
            centerline_x: lap.x.clone(),
            centerline_y: lap.y.clone(),
            inner_x: Vec::with_capacity(n),
            inner_y: Vec::with_capacity(n),
            outer_x: Vec::with_capacity(n),
            outer_y: Vec::with_capacity(n),
            x_min: f64::INFINITY,
            x_max: f64::NEG_INFINITY,
            y_min: f64::INFINITY,
            y_max: f64::NEG_INFINITY,
            sector: Vec::with_capacity(n),
        };

        if n == 0 {
            geometry.x_min = 0.0;
            geometry.x_max = 0.0;
            geometry.y_min = 0.0;
            geometry.y_max = 0.0;
            return geometry;
        }

        for i in 0..n {
            let (dx, dy) = tangent(&lap.x, &lap.y, i);
            let length = (dx * dx + dy * dy).sqrt();
            // Normal to the direction of travel; degenerate tangents
            // (repeated points) collapse both edges onto the centerline.
            let (nx, ny) = if length > 0.0 {
                (-dy / length, dx / length)
            } else {
                (0.0, 0.0)
            };

            let half_width = lap.width.get(i).copied().unwrap_or(0.0) / 2.0;
            geometry.inner_x.push(lap.x[i] - nx * half_width);
            geometry.inner_y.push(lap.y[i] - ny * half_width);
            geometry.outer_x.push(lap.x[i] + nx * half_width);
            geometry.outer_y.push(lap.y[i] + ny * half_width);

            geometry.sector.push(sector_for(
                lap.distance.get(i).copied().unwrap_or(0.0),
                sector_splits,
            ));
        }

        for (&x, &y) in geometry
            .outer_x
            .iter()
            .chain(geometry.inner_x.iter())
            .zip(geometry.outer_y.iter().chain(geometry.inner_y.iter()))
        {
            geometry.x_min = geometry.x_min.min(x);
            geometry.x_max = geometry.x_max.max(x);
            geometry.y_min = geometry.y_min.min(y);
            geometry.y_max = geometry.y_max.max(y);
        }

        geometry
    }

    pub fn len(&self) -> usize {
        self.centerline_x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centerline_x.is_empty()
    }
}

/// Central-difference tangent, one-sided at the ends.
fn tangent(x: &[f64], y: &[f64], i: usize) -> (f64, f64) {
    let n = x.len();
    if n < 2 {
        return (0.0, 0.0);
    }
    let prev = i.saturating_sub(1);
    let next = (i + 1).min(n - 1);
    (x[next] - x[prev], y[next] - y[prev])
}

/// Sector index for an in-lap distance; distances past the last boundary
/// fall into sector 3.
fn sector_for(distance: f64, splits: [f64; 2]) -> u8 {
    if distance < splits[0] {
        1
    } else if distance < splits[1] {
        2
    } else {
        3
    }
}
