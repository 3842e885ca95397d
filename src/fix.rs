// Position fix record
// One decoded wire record from the position server

use serde::{Deserialize, Serialize};

/// A single GPS fix as sent by the position server.
///
/// Wire format is a JSON object:
/// `{"latitude": 63.43, "longitude": 10.39, "altitude": 5.0, "timestamp": 1700000000000, "valid": true}`
///
/// `latitude` and `longitude` are required. The remaining fields fall back to
/// zero / `false` when missing, so a record without `valid` is never published.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
    /// Epoch milliseconds as stamped by the producer
    #[serde(rename = "timestamp", default)]
    pub timestamp_ms: i64,
    #[serde(default)]
    pub valid: bool,
}

impl PositionFix {
    pub fn new(latitude: f64, longitude: f64, altitude: f64, timestamp_ms: i64, valid: bool) -> Self {
        PositionFix {
            latitude,
            longitude,
            altitude,
            timestamp_ms,
            valid,
        }
    }

    /// Parse one framed record.
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Serialize as a single-line JSON record (no trailing newline).
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// True when the producer marked the fix valid and the coordinates are on the globe.
    pub fn is_plausible(&self) -> bool {
        self.valid
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_record() {
        let json = br#"{"latitude": 63.4305, "longitude": 10.3951, "altitude": 7.5, "timestamp": 1700000000123, "valid": true}"#;
        let fix = PositionFix::from_json(json).unwrap();
        assert_eq!(fix.latitude, 63.4305);
        assert_eq!(fix.longitude, 10.3951);
        assert_eq!(fix.altitude, 7.5);
        assert_eq!(fix.timestamp_ms, 1700000000123);
        assert!(fix.valid);
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let fix = PositionFix::from_json(br#"{"latitude": 1.0, "longitude": 2.0}"#).unwrap();
        assert_eq!(fix.altitude, 0.0);
        assert_eq!(fix.timestamp_ms, 0);
        assert!(!fix.valid);
    }

    #[test]
    fn test_missing_coordinates_rejected() {
        assert!(PositionFix::from_json(br#"{"longitude": 2.0, "valid": true}"#).is_err());
        assert!(PositionFix::from_json(b"not json").is_err());
    }

    #[test]
    fn test_wire_name_for_timestamp() {
        let fix = PositionFix::new(1.0, 2.0, 3.0, 42, true);
        let json = fix.to_json().unwrap();
        assert!(json.contains("\"timestamp\":42"));
        assert!(!json.contains('\n'));
    }

    #[test]
    fn test_plausibility() {
        assert!(PositionFix::new(63.4, 10.4, 0.0, 0, true).is_plausible());
        assert!(!PositionFix::new(63.4, 10.4, 0.0, 0, false).is_plausible());
        assert!(!PositionFix::new(91.0, 10.4, 0.0, 0, true).is_plausible());
        assert!(!PositionFix::new(63.4, -181.0, 0.0, 0, true).is_plausible());
    }
}
