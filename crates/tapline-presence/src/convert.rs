//! Mapping between store rows and wire records.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use uuid::Uuid;

use tapline_db::models::PresenceRow;
use tapline_types::models::{Location, PresenceRecord};

/// Current time at the precision the store keeps.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub(crate) fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("corrupt timestamp '{}'", s))?
        .with_timezone(&Utc))
}

pub(crate) fn to_row(r: &PresenceRecord) -> PresenceRow {
    PresenceRow {
        id: r.id.to_string(),
        user_id: r.user_id.to_string(),
        brewery_id: r.brewery_id.clone(),
        lifecycle_status: r.lifecycle_status.as_str().to_string(),
        connectivity_status: r.connectivity_status.as_str().to_string(),
        latitude: r.location.map(|l| l.latitude),
        longitude: r.location.map(|l| l.longitude),
        accuracy: r.location.and_then(|l| l.accuracy),
        visibility: r.visibility.as_str().to_string(),
        is_active: r.is_active,
        estimated_duration: r.estimated_duration.map(i64::from),
        notes: r.notes.clone(),
        created_at: fmt_ts(r.created_at),
        last_updated: fmt_ts(r.last_updated),
        departure_time: r.departure_time.map(fmt_ts),
        expires_at: r.expires_at.map(fmt_ts),
    }
}

pub(crate) fn from_row(row: PresenceRow) -> Result<PresenceRecord> {
    let location = match (row.latitude, row.longitude) {
        (Some(latitude), Some(longitude)) => Some(Location {
            latitude,
            longitude,
            accuracy: row.accuracy,
        }),
        _ => None,
    };

    Ok(PresenceRecord {
        id: parse_uuid(&row.id)?,
        user_id: parse_uuid(&row.user_id)?,
        brewery_id: row.brewery_id,
        lifecycle_status: row.lifecycle_status.parse()?,
        connectivity_status: row.connectivity_status.parse()?,
        location,
        visibility: row.visibility.parse()?,
        is_active: row.is_active,
        estimated_duration: row.estimated_duration.and_then(|d| u32::try_from(d).ok()),
        notes: row.notes,
        created_at: parse_ts(&row.created_at)?,
        last_updated: parse_ts(&row.last_updated)?,
        departure_time: row.departure_time.as_deref().map(parse_ts).transpose()?,
        expires_at: row.expires_at.as_deref().map(parse_ts).transpose()?,
    })
}

pub(crate) fn from_rows(rows: Vec<PresenceRow>) -> Result<Vec<PresenceRecord>> {
    rows.into_iter().map(from_row).collect()
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    s.parse().with_context(|| format!("corrupt id '{}'", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapline_types::models::{ConnectivityStatus, LifecycleStatus, Visibility};

    #[test]
    fn row_roundtrip_keeps_millisecond_timestamps() {
        let t = now();
        let record = PresenceRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            brewery_id: None,
            lifecycle_status: LifecycleStatus::Arrived,
            connectivity_status: ConnectivityStatus::Away,
            location: Some(Location {
                latitude: 47.61,
                longitude: -122.33,
                accuracy: Some(12.0),
            }),
            visibility: Visibility::Private,
            is_active: true,
            estimated_duration: Some(90),
            notes: None,
            created_at: t,
            last_updated: t,
            departure_time: None,
            expires_at: Some(t + chrono::Duration::minutes(90)),
        };

        let row = to_row(&record);
        assert!(row.created_at.ends_with('Z'));
        assert_eq!(from_row(row).unwrap(), record);
    }

    #[test]
    fn corrupt_enum_is_an_error() {
        let t = fmt_ts(now());
        let row = PresenceRow {
            id: Uuid::new_v4().to_string(),
            user_id: Uuid::new_v4().to_string(),
            brewery_id: None,
            lifecycle_status: "wandering".into(),
            connectivity_status: "online".into(),
            latitude: None,
            longitude: None,
            accuracy: None,
            visibility: "public".into(),
            is_active: true,
            estimated_duration: None,
            notes: None,
            created_at: t.clone(),
            last_updated: t,
            departure_time: None,
            expires_at: None,
        };
        assert!(from_row(row).is_err());
    }
}
