//! Great-circle distance and radius search helpers.
//!
//! Radii come in kilometers. The store indexes plain latitude/longitude
//! degrees, so every radius is converted to an angular distance (radians)
//! first and to degree bounds last. Nothing in between mixes the two units.

use std::cmp::Ordering;

use tapline_db::models::BoundingBox;
use tapline_types::models::{GeoPoint, PresenceRecord};

/// Mean Earth radius (IUGG).
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Kilometers along the surface to the central angle they subtend.
pub fn km_to_radians(km: f64) -> f64 {
    km / EARTH_RADIUS_KM
}

pub fn radians_to_km(rad: f64) -> f64 {
    rad * EARTH_RADIUS_KM
}

/// Haversine distance between two points, in kilometers.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // clamp guards against h drifting past 1.0 for antipodal points
    radians_to_km(2.0 * h.sqrt().min(1.0).asin())
}

pub fn is_valid_point(p: GeoPoint) -> bool {
    p.latitude.is_finite()
        && p.longitude.is_finite()
        && (-90.0..=90.0).contains(&p.latitude)
        && (-180.0..=180.0).contains(&p.longitude)
}

/// Degree rectangles that together cover every point within `radius_km`
/// of `center`. A circle crossing the antimeridian yields two rectangles;
/// a circle containing a pole yields one full-longitude band.
pub fn bounding_boxes(center: GeoPoint, radius_km: f64) -> Vec<BoundingBox> {
    let r = km_to_radians(radius_km);
    let dlat = r.to_degrees();
    let min_lat = center.latitude - dlat;
    let max_lat = center.latitude + dlat;

    if min_lat <= -90.0 || max_lat >= 90.0 {
        return vec![BoundingBox {
            min_lat: min_lat.max(-90.0),
            max_lat: max_lat.min(90.0),
            min_lon: -180.0,
            max_lon: 180.0,
        }];
    }

    // Widest longitude offset of a spherical cap with angular radius r
    let dlon = (r.sin() / center.latitude.to_radians().cos()).asin().to_degrees();
    let min_lon = center.longitude - dlon;
    let max_lon = center.longitude + dlon;
    let band = |min_lon, max_lon| BoundingBox {
        min_lat,
        max_lat,
        min_lon,
        max_lon,
    };

    if min_lon < -180.0 {
        vec![band(min_lon + 360.0, 180.0), band(-180.0, max_lon)]
    } else if max_lon > 180.0 {
        vec![band(min_lon, 180.0), band(-180.0, max_lon - 360.0)]
    } else {
        vec![band(min_lon, max_lon)]
    }
}

/// Keeps records with a location within `radius_km` of `center` and orders
/// them by distance ascending, ties broken by most recently updated.
pub fn rank_by_distance(
    center: GeoPoint,
    radius_km: f64,
    candidates: Vec<PresenceRecord>,
) -> Vec<(PresenceRecord, f64)> {
    let mut ranked: Vec<(PresenceRecord, f64)> = candidates
        .into_iter()
        .filter_map(|record| {
            let point = record.location?.point();
            let d = haversine_km(center, point);
            (d <= radius_km).then_some((record, d))
        })
        .collect();

    ranked.sort_by(|(a, da), (b, db)| match da.total_cmp(db) {
        Ordering::Equal => b.last_updated.cmp(&a.last_updated),
        other => other,
    });
    ranked
}
