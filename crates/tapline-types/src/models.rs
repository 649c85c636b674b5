use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Check-in lifecycle of a presence record. `Departed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Arrived,
    AtVenue,
    Departed,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arrived => "arrived",
            Self::AtVenue => "at_venue",
            Self::Departed => "departed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Departed)
    }
}

impl FromStr for LifecycleStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arrived" => Ok(Self::Arrived),
            "at_venue" => Ok(Self::AtVenue),
            "departed" => Ok(Self::Departed),
            other => Err(UnknownVariant::new("lifecycle status", other)),
        }
    }
}

/// Connection-level status, independent of the check-in lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityStatus {
    Online,
    Away,
    Offline,
}

impl ConnectivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Away => "away",
            Self::Offline => "offline",
        }
    }
}

impl FromStr for ConnectivityStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "away" => Ok(Self::Away),
            "offline" => Ok(Self::Offline),
            other => Err(UnknownVariant::new("connectivity status", other)),
        }
    }
}

/// Viewer-relative access tier of a presence record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Friends,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Friends => "friends",
            Self::Private => "private",
        }
    }
}

impl FromStr for Visibility {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "friends" => Ok(Self::Friends),
            "private" => Ok(Self::Private),
            other => Err(UnknownVariant::new("visibility", other)),
        }
    }
}

/// Returned when a stored or submitted string is outside a closed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// A WGS84 point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// Reported position of a user, with optional accuracy in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl Location {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// The authoritative "where is this user right now" record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub brewery_id: Option<String>,
    pub lifecycle_status: LifecycleStatus,
    pub connectivity_status: ConnectivityStatus,
    pub location: Option<Location>,
    pub visibility: Visibility,
    pub is_active: bool,
    /// Minutes the user expects to stay.
    pub estimated_duration: Option<u32>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub departure_time: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PresenceRecord {
    /// Active and not past its TTL watermark.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|t| t > now)
    }
}

/// Display fields of the presence owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerInfo {
    pub user_id: Uuid,
    pub username: String,
}

/// Display fields of a brewery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueInfo {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub location: Option<GeoPoint>,
}

/// A presence record with best-effort denormalized display fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceView {
    #[serde(flatten)]
    pub presence: PresenceRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<OwnerInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brewery: Option<VenueInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

impl PresenceView {
    pub fn bare(presence: PresenceRecord) -> Self {
        Self {
            presence,
            user: None,
            brewery: None,
            distance_km: None,
        }
    }
}
