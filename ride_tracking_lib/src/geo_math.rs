use geo_types::Point;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub fn degrees_to_radians(degrees: f64) -> f64 {
    degrees * std::f64::consts::PI / 180.0
}

pub fn radians_to_degrees(radians: f64) -> f64 {
    radians * 180.0 / std::f64::consts::PI
}

pub fn coordinates_in_range(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

/// Great-circle (haversine) distance in meters between two WGS84 points.
/// Points are (x = longitude, y = latitude). Out-of-range input yields NaN;
/// callers are expected to validate coordinates first.
pub fn distance_meters(a: Point<f64>, b: Point<f64>) -> f64 {
    if !coordinates_in_range(a.y(), a.x()) || !coordinates_in_range(b.y(), b.x()) {
        return f64::NAN;
    }

    let lat_a = degrees_to_radians(a.y());
    let lat_b = degrees_to_radians(b.y());
    let d_lat = degrees_to_radians(b.y() - a.y());
    let d_lon = degrees_to_radians(b.x() - a.x());

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Initial bearing from `a` to `b`, in radians from north.
fn initial_bearing_radians(a: Point<f64>, b: Point<f64>) -> f64 {
    let lat_a = degrees_to_radians(a.y());
    let lat_b = degrees_to_radians(b.y());
    let d_lon = degrees_to_radians(b.x() - a.x());

    let y = d_lon.sin() * lat_b.cos();
    let x = lat_a.cos() * lat_b.sin() - lat_a.sin() * lat_b.cos() * d_lon.cos();

    y.atan2(x)
}

/// Distance in meters from `point` to the great circle through `start` and
/// `end`. Used to measure how far a vehicle has drifted off its direct route.
pub fn cross_track_distance_meters(point: Point<f64>, start: Point<f64>, end: Point<f64>) -> f64 {
    let d13 = distance_meters(start, point) / EARTH_RADIUS_M;
    let b13 = initial_bearing_radians(start, point);
    let b12 = initial_bearing_radians(start, end);

    (d13.sin() * (b13 - b12).sin()).asin().abs() * EARTH_RADIUS_M
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_between_known_points() {
        // One degree of latitude is ~111.19 km on the reference sphere.
        let a = Point::new(10.0, 56.0);
        let b = Point::new(10.0, 57.0);
        let d = distance_meters(a, b);
        assert!((d - 111_195.0).abs() < 100.0, "got {d}");
    }

    #[test]
    fn zero_distance_for_same_point() {
        let p = Point::new(2.3522, 48.8566);
        assert_eq!(distance_meters(p, p), 0.0);
    }

    #[test]
    fn out_of_range_is_nan() {
        let ok = Point::new(10.0, 56.0);
        let bad = Point::new(200.0, 56.0);
        assert!(distance_meters(ok, bad).is_nan());
        assert!(distance_meters(Point::new(10.0, f64::NAN), ok).is_nan());
    }

    #[test]
    fn cross_track_of_on_route_point_is_small() {
        let start = Point::new(10.0, 56.0);
        let end = Point::new(10.0, 57.0);
        // On the meridian between them.
        let on_route = Point::new(10.0, 56.5);
        assert!(cross_track_distance_meters(on_route, start, end) < 1.0);

        // ~0.01 degrees of longitude off the meridian at 56.5N is ~600 m.
        let off_route = Point::new(10.01, 56.5);
        let d = cross_track_distance_meters(off_route, start, end);
        assert!(d > 400.0 && d < 800.0, "got {d}");
    }

    #[test]
    fn degree_radian_round_trip() {
        assert!((radians_to_degrees(degrees_to_radians(73.5)) - 73.5).abs() < 1e-12);
    }
}
