// Coordinate mapping
// Normalized map space -> target space, and the full lat/lon -> target projection

use std::sync::Arc;

use serde::Serialize;

use crate::calibration::CalibrationGrid;
use crate::constants::{DEFAULT_BOUNDS_BOTTOM, DEFAULT_BOUNDS_LEFT, DEFAULT_BOUNDS_RIGHT, DEFAULT_BOUNDS_TOP};
use crate::fix::PositionFix;
use crate::interpolate::{InterpolationError, Interpolator, NormalizedPoint};

/// Target-space rectangle that normalized (0,0)..(1,1) spans.
///
/// `top`/`bottom` follow the target's own vertical convention. The defaults
/// put `top` above `bottom` numerically because the map canvas grows downward
/// into negative y.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

impl Default for Bounds {
    fn default() -> Self {
        Bounds {
            left: DEFAULT_BOUNDS_LEFT,
            right: DEFAULT_BOUNDS_RIGHT,
            top: DEFAULT_BOUNDS_TOP,
            bottom: DEFAULT_BOUNDS_BOTTOM,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TargetPoint {
    pub x: f64,
    pub y: f64,
}

#[inline]
fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Affine map from normalized space into `bounds`.
///
/// Inputs are not clamped: values outside [0, 1] extrapolate past the rectangle.
pub fn to_target_space(norm: NormalizedPoint, bounds: &Bounds) -> TargetPoint {
    TargetPoint {
        x: lerp(bounds.left, bounds.right, norm.x),
        y: lerp(bounds.top, bounds.bottom, norm.y),
    }
}

/// Everything needed to turn a fix into a renderable coordinate.
///
/// Cheap to clone; the grid is shared.
#[derive(Debug, Clone)]
pub struct MapProjector {
    grid: Arc<CalibrationGrid>,
    interpolator: Interpolator,
    bounds: Bounds,
}

impl MapProjector {
    pub fn new(grid: Arc<CalibrationGrid>, interpolator: Interpolator, bounds: Bounds) -> Self {
        MapProjector {
            grid,
            interpolator,
            bounds,
        }
    }

    pub fn grid(&self) -> &CalibrationGrid {
        &self.grid
    }

    pub fn interpolator(&self) -> Interpolator {
        self.interpolator
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn normalize(&self, lat: f64, lon: f64) -> Result<NormalizedPoint, InterpolationError> {
        self.interpolator.interpolate(lat, lon, self.grid.points())
    }

    pub fn project(&self, lat: f64, lon: f64) -> Result<TargetPoint, InterpolationError> {
        let norm = self.normalize(lat, lon)?;
        Ok(to_target_space(norm, &self.bounds))
    }

    /// Altitude is carried on the fix but plays no part in the mapping.
    pub fn project_fix(&self, fix: &PositionFix) -> Result<TargetPoint, InterpolationError> {
        self.project(fix.latitude, fix.longitude)
    }
}
