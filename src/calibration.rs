// Calibration grid
// Reference points correlating geographic coordinates with normalized map coordinates

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One measured correspondence between a lat/lon and a spot on the map image.
///
/// `normalized_x`/`normalized_y` are expected in [0, 1] but this is not enforced;
/// points outside the unit square simply map outside the image bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub lat: f64,
    pub lon: f64,
    #[serde(rename = "normalizedX")]
    pub normalized_x: f64,
    #[serde(rename = "normalizedY")]
    pub normalized_y: f64,
}

impl CalibrationPoint {
    pub fn new(lat: f64, lon: f64, normalized_x: f64, normalized_y: f64) -> Self {
        CalibrationPoint {
            lat,
            lon,
            normalized_x,
            normalized_y,
        }
    }
}

#[derive(Debug)]
pub enum LoadError {
    /// The source parsed but holds no points
    Empty,
    /// The source is not a document with a `grid` array of points
    Malformed(serde_json::Error),
    /// The source could not be read
    Io(io::Error),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Empty => write!(f, "calibration grid contains no points"),
            LoadError::Malformed(e) => write!(f, "calibration grid is malformed: {}", e),
            LoadError::Io(e) => write!(f, "failed to read calibration grid: {}", e),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Empty => None,
            LoadError::Malformed(e) => Some(e),
            LoadError::Io(e) => Some(e),
        }
    }
}

impl From<io::Error> for LoadError {
    fn from(e: io::Error) -> Self {
        LoadError::Io(e)
    }
}

/// On-disk document shape: `{"grid": [{"normalizedX", "normalizedY", "lat", "lon"}, ...]}`
#[derive(Deserialize)]
struct GridDocument {
    grid: Vec<CalibrationPoint>,
}

/// Immutable, non-empty set of calibration points.
///
/// Loaded once at startup and shared behind an `Arc`; all reads are lock free.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationGrid {
    points: Vec<CalibrationPoint>,
}

impl CalibrationGrid {
    /// Build a grid from points already in memory.
    pub fn from_points(points: Vec<CalibrationPoint>) -> Result<Self, LoadError> {
        if points.is_empty() {
            return Err(LoadError::Empty);
        }
        Ok(CalibrationGrid { points })
    }

    /// Parse a grid document.
    pub fn from_json_str(source: &str) -> Result<Self, LoadError> {
        let doc: GridDocument = serde_json::from_str(source).map_err(LoadError::Malformed)?;
        Self::from_points(doc.grid)
    }

    /// Read and parse a grid document from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Convenience for the common case of sharing the grid across tasks.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false for a constructed grid; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CalibrationPoint> {
        self.points.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "grid": [
            {"normalizedX": 0.0, "normalizedY": 0.0, "lat": 63.44, "lon": 10.36},
            {"normalizedX": 1.0, "normalizedY": 0.0, "lat": 63.44, "lon": 10.44},
            {"normalizedX": 0.5, "normalizedY": 1.0, "lat": 63.40, "lon": 10.40}
        ]
    }"#;

    #[test]
    fn test_load_sample_grid() {
        let grid = CalibrationGrid::from_json_str(SAMPLE).unwrap();
        assert_eq!(grid.len(), 3);
        assert!(!grid.is_empty());
        let p = grid.points()[2];
        assert_eq!(p, CalibrationPoint::new(63.40, 10.40, 0.5, 1.0));
    }

    #[test]
    fn test_order_preserved() {
        let grid = CalibrationGrid::from_json_str(SAMPLE).unwrap();
        let xs: Vec<f64> = grid.iter().map(|p| p.normalized_x).collect();
        assert_eq!(xs, vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn test_empty_grid_rejected() {
        let err = CalibrationGrid::from_json_str(r#"{"grid": []}"#).unwrap_err();
        assert!(matches!(err, LoadError::Empty));
        assert!(matches!(CalibrationGrid::from_points(Vec::new()), Err(LoadError::Empty)));
    }

    #[test]
    fn test_malformed_grid_rejected() {
        for source in [
            "",
            "{",
            r#"{"points": []}"#,
            r#"{"grid": {}}"#,
            r#"{"grid": [{"lat": 1.0, "lon": 2.0}]}"#,
            r#"{"grid": [{"normalizedX": "a", "normalizedY": 0, "lat": 1, "lon": 2}]}"#,
        ] {
            let err = CalibrationGrid::from_json_str(source).unwrap_err();
            assert!(matches!(err, LoadError::Malformed(_)), "source {:?} gave {}", source, err);
        }
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("gps-overlay-grid-{}.json", std::process::id()));
        std::fs::write(&path, SAMPLE).unwrap();
        let grid = CalibrationGrid::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(grid.len(), 3);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = CalibrationGrid::load("/nonexistent/gps-overlay/grid.json").unwrap_err();
        assert!(matches!(err, LoadError::Io(_)));
        assert!(err.to_string().contains("failed to read"));
    }
}
