/// Geographic proximity scoring
///
/// Pure functions shared by both ranking domains. The SQL synthesis in
/// `services::query` must stay numerically consistent with this module;
/// `tests/geo_sql_parity_test.rs` guards the invariant.
use crate::models::GeoPoint;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points using the haversine formula
/// (kilometers).
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1_rad = a.latitude.to_radians();
    let lat2_rad = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lon = (b.longitude - a.longitude).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Proximity multiplier in (0, 1].
///
/// Neutral 1.0 when either side has no usable coordinates. Full score
/// within `full_radius_km`, then hyperbolic decay: strictly decreasing in
/// distance and never reaching zero.
pub fn proximity_score(
    viewer: Option<&GeoPoint>,
    target: Option<&GeoPoint>,
    full_radius_km: f64,
    decay_per_km: f64,
) -> f64 {
    let (Some(viewer), Some(target)) = (viewer, target) else {
        return 1.0;
    };

    let distance_km = haversine_km(viewer, target);
    if distance_km <= full_radius_km {
        1.0
    } else {
        1.0 / (1.0 + decay_per_km * (distance_km - full_radius_km))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    #[test]
    fn test_haversine_known_distance() {
        // Berlin -> Hamburg is roughly 255 km
        let berlin = point(52.52, 13.405);
        let hamburg = point(53.551, 9.993);
        let d = haversine_km(&berlin, &hamburg);
        assert!((d - 255.0).abs() < 5.0, "got {}", d);
    }

    #[test]
    fn test_haversine_zero_for_same_point() {
        let p = point(48.137, 11.575);
        assert!(haversine_km(&p, &p) < 1e-9);
    }

    #[test]
    fn test_missing_coordinates_are_neutral() {
        let p = point(0.0, 0.0);
        assert_eq!(proximity_score(None, Some(&p), 25.0, 0.05), 1.0);
        assert_eq!(proximity_score(Some(&p), None, 25.0, 0.05), 1.0);
        assert_eq!(proximity_score(None, None, 25.0, 0.05), 1.0);
    }

    #[test]
    fn test_full_score_within_radius() {
        let viewer = point(0.0, 0.0);
        // ~0.18 km per 0.0016 degrees of latitude
        let nearby = point(0.0016, 0.0);
        assert_eq!(proximity_score(Some(&viewer), Some(&nearby), 25.0, 0.05), 1.0);
    }

    #[test]
    fn test_decay_is_strictly_decreasing_and_positive() {
        let viewer = point(0.0, 0.0);
        let mut prev = 1.0;
        // Step targets out in ~55 km increments of longitude at the equator
        for step in 1..20 {
            let target = point(0.0, 0.5 * step as f64);
            let score = proximity_score(Some(&viewer), Some(&target), 25.0, 0.05);
            assert!(score > 0.0);
            assert!(score <= prev);
            if haversine_km(&viewer, &target) > 25.0 {
                assert!(score < prev, "must strictly decrease past the radius");
            }
            prev = score;
        }
    }
}
