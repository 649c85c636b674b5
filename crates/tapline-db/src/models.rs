//! Database row types. These map directly to SQLite rows and stay
//! independent of the tapline-types wire models.

/// Timestamps are RFC 3339 UTC strings with millisecond precision
/// (`2026-10-18T12:00:00.000Z`), so lexical order is chronological order.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceRow {
    pub id: String,
    pub user_id: String,
    pub brewery_id: Option<String>,
    pub lifecycle_status: String,
    pub connectivity_status: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub visibility: String,
    pub is_active: bool,
    pub estimated_duration: Option<i64>,
    pub notes: Option<String>,
    pub created_at: String,
    pub last_updated: String,
    pub departure_time: Option<String>,
    pub expires_at: Option<String>,
}

/// Column-level patch. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct PresencePatch {
    pub brewery_id: Option<String>,
    pub lifecycle_status: Option<String>,
    pub connectivity_status: Option<String>,
    pub visibility: Option<String>,
    /// (latitude, longitude, accuracy); written as a unit.
    pub location: Option<(f64, f64, Option<f64>)>,
    pub estimated_duration: Option<i64>,
    pub notes: Option<String>,
    /// Marks the record inactive. There is no way back: a record is never reactivated.
    pub deactivate: bool,
    pub departure_time: Option<String>,
    pub expires_at: Option<String>,
}

/// Rectangle in decimal degrees; `min_lon <= max_lon` always holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

pub struct BreweryRow {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}
