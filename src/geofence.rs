use geo_types::Point;

use crate::entities::Coordinates;

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Radius around the pickup point inside which arrival may be confirmed.
pub const ARRIVAL_RADIUS_METERS: f64 = 100.0;

/// Great-circle distance in meters using the haversine formula.
pub fn distance_meters(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_METERS * c
}

pub fn distance_between(a: Point<f64>, b: Point<f64>) -> f64 {
    distance_meters(a.y(), a.x(), b.y(), b.x())
}

pub fn within_radius(distance: f64, radius_meters: f64) -> bool {
    distance <= radius_meters
}

/// Checks a driver position against a pickup point and returns the computed
/// distance alongside the verdict.
pub fn check_arrival(driver: Coordinates, pickup: Coordinates, radius_meters: f64) -> (f64, bool) {
    let distance = distance_between(driver.into(), pickup.into());

    (distance, within_radius(distance, radius_meters))
}

#[test]
fn zero_distance_to_self() {
    for (lat, lng) in [(0.0, 0.0), (52.1332, -106.67), (-33.8688, 151.2093), (89.9, 179.9)] {
        assert_eq!(distance_meters(lat, lng, lat, lng), 0.0);
    }
}

#[test]
fn distance_is_symmetric() {
    let a = (52.1332, -106.67);
    let b = (49.8951, -97.1384);

    let forward = distance_meters(a.0, a.1, b.0, b.1);
    let backward = distance_meters(b.0, b.1, a.0, a.1);

    assert!((forward - backward).abs() < 1e-6);
}

#[test]
fn known_pair_saskatoon_regina() {
    // Saskatoon to Regina is roughly 235 km
    let distance = distance_meters(52.1332, -106.67, 50.4452, -104.6189);

    assert!(distance > 225_000.0 && distance < 245_000.0);
}

#[test]
fn pickup_radius_boundaries() {
    let pickup = Coordinates::new(52.1332, -106.67);

    assert!(within_radius(0.0, ARRIVAL_RADIUS_METERS));

    let (near, ok) = check_arrival(Coordinates::new(52.1340, -106.67), pickup, ARRIVAL_RADIUS_METERS);
    assert!(ok);
    assert!((near - 89.0).abs() < 1.0);

    let (far, ok) = check_arrival(Coordinates::new(52.1350, -106.67), pickup, ARRIVAL_RADIUS_METERS);
    assert!(!ok);
    assert!((far - 200.0).abs() < 1.5);

    // about 150 m north
    let (_, ok) = check_arrival(Coordinates::new(52.13455, -106.67), pickup, ARRIVAL_RADIUS_METERS);
    assert!(!ok);
}
