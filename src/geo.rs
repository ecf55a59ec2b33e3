//! Geographic location model and the proximity predicate that drives the
//! registration engine (see `crate::registration`).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Planar approximation of 1/3 mile in decimal degrees.
pub const PROXIMITY_RADIUS_DEGREES: f64 = 0.00483091787;

/// A client's current position, as reported by `update_location`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationData {
    pub altitude: f64,
    #[serde(rename = "altitudeAccuracy")]
    pub altitude_accuracy: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub heading: f64,
    pub speed: f64,
}

/// A location update tagged with the client it came from, broadcast to
/// every other connected client as `peer_location`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationBundle {
    #[serde(rename = "UUID")]
    pub uuid: Uuid,
    pub location: LocationData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// `true` iff `a` and `b` are both present and within the proximity
/// radius of each other. A missing location on either side never
/// registers anything (spec: "a null location yields `false`").
pub fn within_range(a: Option<&LocationData>, b: Option<&LocationData>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => {
            let d_lat = a.latitude - b.latitude;
            let d_lon = a.longitude - b.longitude;
            (d_lat * d_lat + d_lon * d_lon).sqrt() <= PROXIMITY_RADIUS_DEGREES
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(lat: f64, lon: f64) -> LocationData {
        LocationData {
            altitude: 0.0,
            altitude_accuracy: 0.0,
            latitude: lat,
            longitude: lon,
            accuracy: 0.0,
            heading: 0.0,
            speed: 0.0,
        }
    }

    #[test]
    fn identical_points_are_within_range() {
        let a = loc(37.0, -122.0);
        assert!(within_range(Some(&a), Some(&a)));
    }

    #[test]
    fn exact_boundary_distance_is_within_range() {
        let a = loc(0.0, 0.0);
        let b = loc(PROXIMITY_RADIUS_DEGREES, 0.0);
        assert!(within_range(Some(&a), Some(&b)));
    }

    #[test]
    fn just_past_boundary_is_out_of_range() {
        let a = loc(0.0, 0.0);
        let b = loc(PROXIMITY_RADIUS_DEGREES + 0.0001, 0.0);
        assert!(!within_range(Some(&a), Some(&b)));
    }

    #[test]
    fn a_thousand_meters_away_is_out_of_range() {
        let a = loc(37.0, -122.0);
        let b = loc(37.01, -122.0);
        assert!(!within_range(Some(&a), Some(&b)));
    }

    #[test]
    fn missing_location_on_either_side_is_never_in_range() {
        let a = loc(37.0, -122.0);
        assert!(!within_range(None, Some(&a)));
        assert!(!within_range(Some(&a), None));
        assert!(!within_range(None, None));
    }
}
