//! Geographic helpers shared by the evaluator and the session.

use geo::{Distance, Haversine, Point};

use crate::RawSample;

/// Mean Earth radius in meters, the same radius `geo`'s haversine uses.
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Haversine distance between two coordinates in meters.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    Haversine::distance(Point::new(lon1, lat1), Point::new(lon2, lat2))
}

/// Great-circle distance between two samples in meters.
pub fn sample_distance(a: &RawSample, b: &RawSample) -> f64 {
    haversine_distance(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Total distance along a sequence of samples in meters.
pub fn path_length(samples: &[RawSample]) -> f64 {
    samples
        .windows(2)
        .map(|w| sample_distance(&w[0], &w[1]))
        .sum()
}

/// Offset a coordinate by a distance in meters along north/east axes.
///
/// Uses the equirectangular approximation, accurate to well under a meter
/// for the few-hundred-meter offsets used when synthesizing tracks.
pub fn offset_meters(lat: f64, lon: f64, north_m: f64, east_m: f64) -> (f64, f64) {
    let d_lat = (north_m / EARTH_RADIUS_METERS).to_degrees();
    let d_lon = (east_m / (EARTH_RADIUS_METERS * lat.to_radians().cos())).to_degrees();
    (lat + d_lat, lon + d_lon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distance() {
        // London to Paris is roughly 344 km
        let d = haversine_distance(51.5074, -0.1278, 48.8566, 2.3522);
        assert!((d - 343_500.0).abs() < 2_000.0, "got {}", d);
    }

    #[test]
    fn test_zero_distance() {
        assert_eq!(haversine_distance(51.5, -0.1, 51.5, -0.1), 0.0);
    }

    #[test]
    fn test_offset_round_trip() {
        let (lat, lon) = offset_meters(51.5, -0.1, 100.0, 0.0);
        let d = haversine_distance(51.5, -0.1, lat, lon);
        assert!((d - 100.0).abs() < 0.5, "got {}", d);

        let (lat, lon) = offset_meters(51.5, -0.1, 0.0, 50.0);
        let d = haversine_distance(51.5, -0.1, lat, lon);
        assert!((d - 50.0).abs() < 0.5, "got {}", d);
    }
}
