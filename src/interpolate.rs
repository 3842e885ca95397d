// Spatial interpolation
// k-nearest-neighbour inverse distance weighting from lat/lon to normalized map space

use std::cmp::Ordering;
use std::fmt;

use nalgebra as na;
use na::Vector2;

use crate::calibration::CalibrationPoint;
use crate::constants::{DEFAULT_DISTANCE_POWER, DEFAULT_K_NEIGHBORS, EXACT_MATCH_DISTANCE_SQ, MIN_WEIGHT_SUM};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationError {
    EmptyGrid,
}

impl fmt::Display for InterpolationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpolationError::EmptyGrid => write!(f, "cannot interpolate against an empty grid"),
        }
    }
}

impl std::error::Error for InterpolationError {}

/// Point in normalized map space, nominally [0, 1] x [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    pub fn new(x: f64, y: f64) -> Self {
        NormalizedPoint { x, y }
    }

    fn of(point: &CalibrationPoint) -> Self {
        NormalizedPoint::new(point.normalized_x, point.normalized_y)
    }
}

/// Neighbour count and IDW power, as configured for a deployment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interpolator {
    pub k: i32,
    pub power: f64,
}

impl Default for Interpolator {
    fn default() -> Self {
        Interpolator {
            k: DEFAULT_K_NEIGHBORS,
            power: DEFAULT_DISTANCE_POWER,
        }
    }
}

impl Interpolator {
    pub fn new(k: i32, power: f64) -> Self {
        Interpolator { k, power }
    }

    pub fn interpolate(&self, lat: f64, lon: f64, points: &[CalibrationPoint]) -> Result<NormalizedPoint, InterpolationError> {
        interpolate(lat, lon, points, self.k, self.power)
    }
}

/// Orders by squared distance, then by position in the grid so ties are stable.
fn by_distance(a: &(f64, usize), b: &(f64, usize)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

/// Indices of the `k` points nearest to (lat, lon), nearest first, with squared distances.
///
/// `k` must be in 1..=points.len().
fn nearest(lat: f64, lon: f64, points: &[CalibrationPoint], k: usize) -> Vec<(f64, usize)> {
    let mut dists: Vec<(f64, usize)> = points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let dlat = p.lat - lat;
            let dlon = p.lon - lon;
            (dlat * dlat + dlon * dlon, i)
        })
        .collect();

    if k < dists.len() {
        dists.select_nth_unstable_by(k - 1, by_distance);
        dists.truncate(k);
    }
    dists.sort_by(by_distance);
    dists
}

/// Map a geographic coordinate into normalized map space.
///
/// Picks the `k` calibration points nearest in (lat, lon) and blends their
/// normalized coordinates with weights `1 / d^power`. `k <= 0` is treated as 1
/// and `k` larger than the grid uses every point.
///
/// A query within 1e-9 degrees of a calibration point returns that point's
/// coordinate exactly. If the weights underflow (huge `power` or distances) the
/// nearest neighbour's coordinate is returned.
///
/// # Errors
/// Returns `InterpolationError::EmptyGrid` if `points` is empty.
pub fn interpolate(
    lat: f64,
    lon: f64,
    points: &[CalibrationPoint],
    k: i32,
    power: f64,
) -> Result<NormalizedPoint, InterpolationError> {
    if points.is_empty() {
        return Err(InterpolationError::EmptyGrid);
    }

    let k = (k.max(1) as usize).min(points.len());
    let neighbors = nearest(lat, lon, points, k);

    let (nearest_sq, nearest_idx) = neighbors[0];
    let first = NormalizedPoint::of(&points[nearest_idx]);
    if nearest_sq < EXACT_MATCH_DISTANCE_SQ {
        return Ok(first);
    }

    let mut sum_weights = 0.0;
    let mut acc = Vector2::<f64>::zeros();
    for &(dist_sq, idx) in &neighbors {
        let p = &points[idx];
        let w = 1.0 / dist_sq.sqrt().powf(power);
        sum_weights += w;
        acc += Vector2::new(p.normalized_x, p.normalized_y) * w;
    }

    if !sum_weights.is_finite() || !(sum_weights >= MIN_WEIGHT_SUM) || !acc.iter().all(|v| v.is_finite()) {
        return Ok(first);
    }

    let blended = acc / sum_weights;
    Ok(NormalizedPoint::new(blended.x, blended.y))
}
