//! Great-circle distance and geocenter math.
//!
//! Distances use the Haversine formula on a spherical Earth of radius
//! 6378 km. The geocenter of a weighted point set is computed twice, once
//! against the Greenwich prime meridian and once against a dateline-shifted
//! frame, and the frame with the smaller weighted mean distance wins; this
//! keeps clusters that straddle the antimeridian from averaging to the
//! wrong side of the planet.

/// Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6378.0;

/// A coordinate with an attached weight, input to [`find_geocenter`].
#[derive(Debug, Clone, Copy)]
pub struct WeightedPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub weight: f64,
}

/// Weighted centroid of a point set.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeocenterSolution {
    pub latitude: f64,
    pub longitude: f64,
    /// Weighted mean distance of the points from the centroid.
    pub avg_dist: f64,
    /// Sum of the input weights.
    pub weight: f64,
}

// haversin(theta)
fn hsin(theta: f64) -> f64 {
    (theta / 2.0).sin().powi(2)
}

/// Great-circle distance in kilometers between two points given in degrees.
pub fn km_between(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let la1 = lat1.to_radians();
    let lo1 = lon1.to_radians();
    let la2 = lat2.to_radians();
    let lo2 = lon2.to_radians();

    let h = hsin(la2 - la1) + la1.cos() * la2.cos() * hsin(lo2 - lo1);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Maps a longitude between the Greenwich and dateline meridian frames.
/// The mapping is its own inverse.
pub fn switch_meridians(lon: f64) -> f64 {
    if lon < 0.0 {
        lon + 180.0
    } else {
        lon - 180.0
    }
}

/// Computes the weighted geocenter of `points`.
///
/// Returns the zero solution for an empty set.
pub fn find_geocenter(points: &[WeightedPoint]) -> GeocenterSolution {
    let mut gc = GeocenterSolution::default();
    if points.is_empty() {
        return gc;
    }

    // First pass: weighted centroids on both meridian frames.
    let mut lat = 0.0;
    let mut lon_gw = 0.0;
    let mut lon_dl = 0.0;
    for p in points {
        lat += p.latitude * p.weight;
        lon_gw += p.longitude * p.weight;
        lon_dl += switch_meridians(p.longitude) * p.weight;
        gc.weight += p.weight;
    }
    lat /= gc.weight;
    lon_gw /= gc.weight;
    lon_dl /= gc.weight;
    let lon_dl = switch_meridians(lon_dl);

    // Second pass: the frame whose weighted mean distance to the points is
    // shorter is the correct one.
    let mut avg_dist_gw = 0.0;
    let mut avg_dist_dl = 0.0;
    for p in points {
        avg_dist_gw += km_between(p.latitude, p.longitude, lat, lon_gw) * p.weight;
        avg_dist_dl += km_between(p.latitude, p.longitude, lat, lon_dl) * p.weight;
    }
    avg_dist_gw /= gc.weight;
    avg_dist_dl /= gc.weight;

    if avg_dist_gw > avg_dist_dl {
        gc.longitude = lon_dl;
        gc.avg_dist = avg_dist_dl;
    } else {
        gc.longitude = lon_gw;
        gc.avg_dist = avg_dist_gw;
    }
    gc.latitude = lat;
    gc
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAN_FRANCISCO: (f64, f64) = (37.7697, -122.3933);
    const TAIPEI: (f64, f64) = (25.0631, 121.5326);
    const PORTLAND: (f64, f64) = (45.5235, -122.675);

    #[test]
    fn test_km_between_zero_for_same_point() {
        let d = km_between(SAN_FRANCISCO.0, SAN_FRANCISCO.1, SAN_FRANCISCO.0, SAN_FRANCISCO.1);
        assert!(d.abs() < 1e-9);
    }

    #[test]
    fn test_km_between_known_distances() {
        let sf_taipei = km_between(SAN_FRANCISCO.0, SAN_FRANCISCO.1, TAIPEI.0, TAIPEI.1);
        assert_eq!(sf_taipei.round() as i64, 10371);

        let sf_portland = km_between(SAN_FRANCISCO.0, SAN_FRANCISCO.1, PORTLAND.0, PORTLAND.1);
        assert_eq!(sf_portland.round() as i64, 863);
    }

    #[test]
    fn test_km_between_symmetric() {
        let a = km_between(SAN_FRANCISCO.0, SAN_FRANCISCO.1, TAIPEI.0, TAIPEI.1);
        let b = km_between(TAIPEI.0, TAIPEI.1, SAN_FRANCISCO.0, SAN_FRANCISCO.1);
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn test_switch_meridians_is_involution() {
        for lon in [-179.9, -122.0, -0.1, 0.0, 45.0, 179.9] {
            let once = switch_meridians(lon);
            let twice = switch_meridians(once);
            assert!((twice - lon).abs() < 1e-9, "lon {} -> {} -> {}", lon, once, twice);
        }
    }

    #[test]
    fn test_find_geocenter_single_point() {
        let points = [WeightedPoint {
            latitude: SAN_FRANCISCO.0,
            longitude: SAN_FRANCISCO.1,
            weight: 3.0,
        }];
        let gc = find_geocenter(&points);
        assert!((gc.latitude - SAN_FRANCISCO.0).abs() < 1e-9);
        assert!((gc.longitude - SAN_FRANCISCO.1).abs() < 1e-9);
        assert!(gc.avg_dist < 1e-6);
        assert!((gc.weight - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_find_geocenter_empty_is_zero() {
        let gc = find_geocenter(&[]);
        assert_eq!(gc, GeocenterSolution::default());
    }

    #[test]
    fn test_find_geocenter_weights_pull_centroid() {
        // A heavily weighted San Francisco against a single Portland event
        // keeps the centroid close to San Francisco.
        let points = [
            WeightedPoint {
                latitude: SAN_FRANCISCO.0,
                longitude: SAN_FRANCISCO.1,
                weight: 10.0,
            },
            WeightedPoint {
                latitude: PORTLAND.0,
                longitude: PORTLAND.1,
                weight: 1.0,
            },
        ];
        let gc = find_geocenter(&points);
        let to_sf = km_between(gc.latitude, gc.longitude, SAN_FRANCISCO.0, SAN_FRANCISCO.1);
        let to_pdx = km_between(gc.latitude, gc.longitude, PORTLAND.0, PORTLAND.1);
        assert!(to_sf < to_pdx);
    }

    #[test]
    fn test_find_geocenter_antimeridian_cluster() {
        // Points on both sides of the dateline; a Greenwich-frame average
        // would land near lon 0, half a planet away.
        let points = [
            WeightedPoint {
                latitude: 35.0,
                longitude: 179.5,
                weight: 1.0,
            },
            WeightedPoint {
                latitude: 35.0,
                longitude: -179.5,
                weight: 1.0,
            },
        ];
        let gc = find_geocenter(&points);
        assert!(
            gc.longitude.abs() > 179.0,
            "geocenter longitude {} should sit at the dateline",
            gc.longitude
        );
        assert!(gc.avg_dist < 100.0);
    }
}
