//! Great-circle distance helpers.

use crate::model::Position;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two positions in meters.
#[must_use]
pub fn haversine_distance(a: &Position, b: &Position) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);

    let c = 2.0 * h.sqrt().asin();

    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pos(lat: f64, lng: f64) -> Position {
        Position::new(lat, lng, 5.0, Utc::now())
    }

    #[test]
    fn test_same_point_is_zero() {
        let p = pos(51.5, -0.12);
        assert!(haversine_distance(&p, &p).abs() < f64::EPSILON);
    }

    #[test]
    fn test_one_degree_latitude() {
        // One degree of latitude is ~111.2 km everywhere
        let d = haversine_distance(&pos(0.0, 0.0), &pos(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 10.0, "got {d}");
    }

    #[test]
    fn test_symmetric() {
        let a = pos(40.7128, -74.0060);
        let b = pos(34.0522, -118.2437);
        let ab = haversine_distance(&a, &b);
        let ba = haversine_distance(&b, &a);
        assert!((ab - ba).abs() < 1e-6);
        // New York to Los Angeles is roughly 3936 km
        assert!((ab / 1000.0 - 3936.0).abs() < 10.0, "got {ab}");
    }
}
