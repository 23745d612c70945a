//! Great-circle distances.

use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 coordinate, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Haversine distance to `other`, in kilometres.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lng = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);

        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_point() {
        let paris = GeoPoint::new(48.8566, 2.3522);
        assert!(paris.distance_km(&paris).abs() < 1e-9);
    }

    #[test]
    fn test_known_distance() {
        let paris = GeoPoint::new(48.8566, 2.3522);
        let casablanca = GeoPoint::new(33.5731, -7.5898);

        let distance = paris.distance_km(&casablanca);
        assert!((1880.0..1920.0).contains(&distance), "{distance}");
        assert!(
            (distance - casablanca.distance_km(&paris)).abs() < 1e-9,
            "distance must be symmetric"
        );
    }
}
