//! Geofence verification

use punch_api::{LocationSample, WorkplaceSite};

use crate::{EngineError, EngineResult};

/// Mean Earth radius in meters (IUGG)
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Result of checking one sample against one site
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoVerdict {
    pub within_fence: bool,
    pub distance_meters: f64,
}

/// Range and finiteness check for a latitude/longitude pair
pub fn check_coordinate(latitude: f64, longitude: f64) -> EngineResult<()> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(EngineError::InvalidCoordinate(format!(
            "latitude {} outside [-90, 90]",
            latitude
        )));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(EngineError::InvalidCoordinate(format!(
            "longitude {} outside [-180, 180]",
            longitude
        )));
    }
    Ok(())
}

/// Great-circle distance between two points, in meters
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Distance between two samples, in meters
pub fn sample_distance(a: &LocationSample, b: &LocationSample) -> f64 {
    haversine_meters(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Check whether `sample` lies inside the site's circular fence.
/// The boundary itself counts as inside.
pub fn verify(sample: &LocationSample, site: &WorkplaceSite) -> EngineResult<GeoVerdict> {
    check_coordinate(sample.latitude, sample.longitude)?;
    check_coordinate(site.center_latitude, site.center_longitude)?;

    let distance_meters = haversine_meters(
        sample.latitude,
        sample.longitude,
        site.center_latitude,
        site.center_longitude,
    );

    Ok(GeoVerdict {
        within_fence: distance_meters <= site.radius_meters,
        distance_meters,
    })
}

/// How much of the reported accuracy circle can be trusted to sit inside the fence.
///
/// 1.0 when the whole accuracy circle is inside the fence. Falls linearly to
/// 0.0 as the accuracy radius grows until the circle covers the whole fence.
/// 0.0 when the reported point itself is outside.
pub fn plausibility_score(sample: &LocationSample, site: &WorkplaceSite) -> EngineResult<f64> {
    let verdict = verify(sample, site)?;
    if !verdict.within_fence {
        return Ok(0.0);
    }

    let margin = site.radius_meters - verdict.distance_meters;
    let accuracy = sample.accuracy_meters.max(0.0);
    if accuracy <= margin {
        return Ok(1.0);
    }

    // Accuracy radius at which the circle swallows the fence
    let covering = verdict.distance_meters + site.radius_meters;
    let span = covering - margin;
    if span <= f64::EPSILON {
        return Ok(0.0);
    }

    Ok(((covering - accuracy) / span).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use punch_util::SiteId;

    fn site(radius: f64) -> WorkplaceSite {
        WorkplaceSite {
            id: SiteId::new("w1"),
            name: "Head office".into(),
            address: None,
            center_latitude: 40.7128,
            center_longitude: -74.0060,
            radius_meters: radius,
        }
    }

    fn sample(lat: f64, lon: f64, accuracy: f64) -> LocationSample {
        LocationSample {
            latitude: lat,
            longitude: lon,
            accuracy_meters: accuracy,
            captured_at: Local::now(),
        }
    }

    /// Point `meters` due north of the site center
    fn north_of_center(meters: f64) -> (f64, f64) {
        let d_lat = (meters / EARTH_RADIUS_METERS).to_degrees();
        (40.7128 + d_lat, -74.0060)
    }

    #[test]
    fn center_is_inside() {
        let verdict = verify(&sample(40.7128, -74.0060, 5.0), &site(100.0)).unwrap();
        assert!(verdict.within_fence);
        assert!(verdict.distance_meters < 1e-6);
    }

    #[test]
    fn known_distance() {
        // New York to Los Angeles, ~3936 km on the mean sphere
        let d = haversine_meters(40.7128, -74.0060, 34.0522, -118.2437);
        assert!((d - 3_935_746.0).abs() < 2_000.0, "got {}", d);
    }

    #[test]
    fn fence_boundary() {
        let radius = 100.0;
        let (lat, lon) = north_of_center(radius - 0.01);
        assert!(verify(&sample(lat, lon, 5.0), &site(radius)).unwrap().within_fence);

        let (lat, lon) = north_of_center(radius + 0.5);
        let verdict = verify(&sample(lat, lon, 5.0), &site(radius)).unwrap();
        assert!(!verdict.within_fence);
        assert!((verdict.distance_meters - 100.5).abs() < 0.01);
    }

    #[test]
    fn exactly_on_radius_is_inside() {
        let (lat, lon) = north_of_center(73.0);
        let radius = haversine_meters(lat, lon, 40.7128, -74.0060);

        let verdict = verify(&sample(lat, lon, 5.0), &site(radius)).unwrap();
        assert!(verdict.within_fence);
        assert_eq!(verdict.distance_meters, radius);
    }

    #[test]
    fn malformed_coordinates_rejected() {
        let s = site(100.0);
        for (lat, lon) in [(90.5, 0.0), (-91.0, 0.0), (0.0, 180.01), (f64::NAN, 0.0), (0.0, f64::INFINITY)] {
            assert!(matches!(
                verify(&sample(lat, lon, 5.0), &s),
                Err(EngineError::InvalidCoordinate(_))
            ));
        }
        assert!(verify(&sample(90.0, 180.0, 5.0), &s).is_ok());
    }

    #[test]
    fn plausibility_scoring() {
        let s = site(100.0);

        assert_eq!(plausibility_score(&sample(40.7128, -74.0060, 5.0), &s).unwrap(), 1.0);

        let (lat, lon) = north_of_center(50.0);
        let score = plausibility_score(&sample(lat, lon, 100.0), &s).unwrap();
        assert!(score > 0.0 && score < 1.0, "got {}", score);

        let covered = plausibility_score(&sample(lat, lon, 200.0), &s).unwrap();
        assert_eq!(covered, 0.0);

        let (lat, lon) = north_of_center(150.0);
        assert_eq!(plausibility_score(&sample(lat, lon, 5.0), &s).unwrap(), 0.0);
    }
}
