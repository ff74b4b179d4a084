//! Spherical-earth geometry.

use wayfinder_types::GeoPoint;

/// Mean Earth radius used by every distance computation, in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

const COMPASS_POINTS: [&str; 8] = [
    "North",
    "North-East",
    "East",
    "South-East",
    "South",
    "South-West",
    "West",
    "North-West",
];

/// Great-circle distance between two points (haversine formula).
pub fn haversine_m(from: GeoPoint, to: GeoPoint) -> f64 {
    let phi1 = from.lat.to_radians();
    let phi2 = to.lat.to_radians();
    let d_phi = (to.lat - from.lat).to_radians();
    let d_lambda = (to.lng - from.lng).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Initial great-circle bearing from `from` to `to`, in `[0, 360)`.
pub fn forward_azimuth_deg(from: GeoPoint, to: GeoPoint) -> f64 {
    let phi1 = from.lat.to_radians();
    let phi2 = to.lat.to_radians();
    let d_lambda = (to.lng - from.lng).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    normalize_deg(y.atan2(x).to_degrees())
}

/// Wrap any angle into `[0, 360)`.
///
/// `rem_euclid` alone rounds tiny negatives such as `-1e-15` up to `360.0`.
pub fn normalize_deg(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// `target − heading` wrapped into `(-180, 180]`.
///
/// Positive means the target lies clockwise of the current heading.
pub fn signed_difference(target_deg: f64, heading_deg: f64) -> f64 {
    let d = (target_deg - heading_deg).rem_euclid(360.0);
    if d > 180.0 { d - 360.0 } else { d }
}

/// Nearest of the eight principal compass points for `bearing_deg`.
pub fn compass_point(bearing_deg: f64) -> &'static str {
    let sector = (bearing_deg.rem_euclid(360.0) / 45.0).round() as usize % 8;
    COMPASS_POINTS[sector]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn tiny_negative_angle_wraps_to_zero() {
        assert_eq!(normalize_deg(-1e-15), 0.0);
        assert_eq!(normalize_deg(-90.0), 270.0);
        assert_eq!(normalize_deg(720.0), 0.0);
    }

    #[test]
    fn bearing_just_west_of_north_stays_in_range() {
        let origin = GeoPoint::new(0.0, 0.0);
        let b = forward_azimuth_deg(origin, GeoPoint::new(1.0, -1e-17));
        assert!((0.0..360.0).contains(&b), "{b}");
    }

    #[test]
    fn due_east_along_equator() {
        let origin = GeoPoint::new(0.0, 0.0);
        let east = GeoPoint::new(0.0, 0.001);
        assert!(approx(forward_azimuth_deg(origin, east), 90.0, 1e-6));
        // 0.001° of longitude at the equator ≈ 111.19 m
        assert!(approx(haversine_m(origin, east), 111.195, 0.01));
    }

    #[test]
    fn cardinal_bearings() {
        let origin = GeoPoint::new(10.0, 10.0);
        assert!(approx(forward_azimuth_deg(origin, GeoPoint::new(11.0, 10.0)), 0.0, 1e-6));
        assert!(approx(forward_azimuth_deg(origin, GeoPoint::new(9.0, 10.0)), 180.0, 1e-6));
        let west = forward_azimuth_deg(origin, GeoPoint::new(10.0, 9.999));
        assert!(approx(west, 270.0, 0.01), "{west}");
    }

    #[test]
    fn distance_is_zero_for_same_point() {
        let p = GeoPoint::new(40.4168, -3.7038);
        assert!(haversine_m(p, p) < 1e-9);
    }

    #[test]
    fn difference_wraps_into_half_open_range() {
        assert!(approx(signed_difference(10.0, 350.0), 20.0, 1e-9));
        assert!(approx(signed_difference(350.0, 10.0), -20.0, 1e-9));
        assert!(approx(signed_difference(180.0, 0.0), 180.0, 1e-9));
        assert!(approx(signed_difference(0.0, 180.0), 180.0, 1e-9));
        assert!(approx(signed_difference(90.0, 90.0), 0.0, 1e-9));
    }

    #[test]
    fn compass_names() {
        assert_eq!(compass_point(0.0), "North");
        assert_eq!(compass_point(44.0), "North-East");
        assert_eq!(compass_point(90.0), "East");
        assert_eq!(compass_point(200.0), "South");
        assert_eq!(compass_point(337.6), "North");
        assert_eq!(compass_point(-90.0), "West");
    }
}
