use crate::Database;
use crate::models::{BoundingBox, BreweryRow, PresencePatch, PresenceRow};
use anyhow::Result;
use rusqlite::{Connection, Row};

const PRESENCE_COLUMNS: &str = "id, user_id, brewery_id, lifecycle_status, connectivity_status, \
     latitude, longitude, accuracy, visibility, is_active, estimated_duration, notes, \
     created_at, last_updated, departure_time, expires_at";

impl Database {
    // -- Presences --

    pub fn insert_presence(&self, row: &PresenceRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO presences ({PRESENCE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
                ),
                rusqlite::params![
                    row.id,
                    row.user_id,
                    row.brewery_id,
                    row.lifecycle_status,
                    row.connectivity_status,
                    row.latitude,
                    row.longitude,
                    row.accuracy,
                    row.visibility,
                    row.is_active,
                    row.estimated_duration,
                    row.notes,
                    row.created_at,
                    row.last_updated,
                    row.departure_time,
                    row.expires_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_presence(&self, id: &str) -> Result<Option<PresenceRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {PRESENCE_COLUMNS} FROM presences WHERE id = ?1"))?;
            let row = stmt.query_row([id], map_presence).optional()?;
            Ok(row)
        })
    }

    /// Writes only the columns present in `patch`. Returns false if no live
    /// row matched; ended or expired rows are never rewritten.
    pub fn patch_presence(&self, id: &str, patch: &PresencePatch, now: &str) -> Result<bool> {
        let (has_location, lat, lon, acc) = match patch.location {
            Some((lat, lon, acc)) => (true, Some(lat), Some(lon), acc),
            None => (false, None, None, None),
        };

        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE presences SET
                    brewery_id          = COALESCE(?2, brewery_id),
                    lifecycle_status    = COALESCE(?3, lifecycle_status),
                    connectivity_status = COALESCE(?4, connectivity_status),
                    visibility          = COALESCE(?5, visibility),
                    latitude            = CASE WHEN ?6 THEN ?7 ELSE latitude END,
                    longitude           = CASE WHEN ?6 THEN ?8 ELSE longitude END,
                    accuracy            = CASE WHEN ?6 THEN ?9 ELSE accuracy END,
                    estimated_duration  = COALESCE(?10, estimated_duration),
                    notes               = COALESCE(?11, notes),
                    is_active           = CASE WHEN ?12 THEN 0 ELSE is_active END,
                    departure_time      = COALESCE(?13, departure_time),
                    expires_at          = COALESCE(?14, expires_at),
                    last_updated        = ?15
                 WHERE id = ?1 AND is_active = 1
                   AND (expires_at IS NULL OR expires_at > ?15)",
                rusqlite::params![
                    id,
                    patch.brewery_id,
                    patch.lifecycle_status,
                    patch.connectivity_status,
                    patch.visibility,
                    has_location,
                    lat,
                    lon,
                    acc,
                    patch.estimated_duration,
                    patch.notes,
                    patch.deactivate,
                    patch.departure_time,
                    patch.expires_at,
                    now,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Ends every active record of a user and returns the ended rows.
    pub fn deactivate_user_presences(&self, user_id: &str, now: &str) -> Result<Vec<PresenceRow>> {
        self.with_conn(|conn| {
            query_presences(
                conn,
                &format!(
                    "UPDATE presences
                     SET is_active = 0, lifecycle_status = 'departed',
                         departure_time = ?2, last_updated = ?2
                     WHERE user_id = ?1 AND is_active = 1
                     RETURNING {PRESENCE_COLUMNS}"
                ),
                &[&user_id, &now],
            )
        })
    }

    /// Ends the user's active records and inserts `row` in one transaction.
    /// Returns how many records were ended.
    pub fn replace_active_presence(&self, row: &PresenceRow, now: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let ended = tx.execute(
                "UPDATE presences
                 SET is_active = 0, lifecycle_status = 'departed',
                     departure_time = ?2, last_updated = ?2
                 WHERE user_id = ?1 AND is_active = 1",
                (&row.user_id, now),
            )?;
            tx.execute(
                &format!(
                    "INSERT INTO presences ({PRESENCE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
                ),
                rusqlite::params![
                    row.id,
                    row.user_id,
                    row.brewery_id,
                    row.lifecycle_status,
                    row.connectivity_status,
                    row.latitude,
                    row.longitude,
                    row.accuracy,
                    row.visibility,
                    row.is_active,
                    row.estimated_duration,
                    row.notes,
                    row.created_at,
                    row.last_updated,
                    row.departure_time,
                    row.expires_at,
                ],
            )?;
            tx.commit()?;
            Ok(ended)
        })
    }

    /// Ends every active record of a user except `keep_id`.
    pub fn deactivate_user_presences_except(
        &self,
        user_id: &str,
        keep_id: &str,
        now: &str,
    ) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE presences
                 SET is_active = 0, lifecycle_status = 'departed',
                     departure_time = ?3, last_updated = ?3
                 WHERE user_id = ?1 AND is_active = 1 AND id != ?2",
                (user_id, keep_id, now),
            )?;
            Ok(n)
        })
    }

    /// Sets the connectivity status on a user's live records.
    pub fn set_user_connectivity(&self, user_id: &str, status: &str, now: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE presences
                 SET connectivity_status = ?2, last_updated = ?3
                 WHERE user_id = ?1 AND is_active = 1
                   AND (expires_at IS NULL OR expires_at > ?3)",
                (user_id, status, now),
            )?;
            Ok(n)
        })
    }

    /// Active, unexpired records of a user, most recently updated first.
    pub fn live_presences_for_user(&self, user_id: &str, now: &str) -> Result<Vec<PresenceRow>> {
        self.with_conn(|conn| {
            query_presences(
                conn,
                &format!(
                    "SELECT {PRESENCE_COLUMNS} FROM presences
                     WHERE user_id = ?1 AND is_active = 1
                       AND (expires_at IS NULL OR expires_at > ?2)
                     ORDER BY last_updated DESC, created_at DESC, id"
                ),
                &[&user_id, &now],
            )
        })
    }

    pub fn live_presences_for_brewery(
        &self,
        brewery_id: &str,
        now: &str,
    ) -> Result<Vec<PresenceRow>> {
        self.with_conn(|conn| {
            query_presences(
                conn,
                &format!(
                    "SELECT {PRESENCE_COLUMNS} FROM presences
                     WHERE brewery_id = ?1 AND is_active = 1
                       AND (expires_at IS NULL OR expires_at > ?2)
                     ORDER BY last_updated DESC, created_at DESC, id"
                ),
                &[&brewery_id, &now],
            )
        })
    }

    /// Batch-fetch live records for a set of users.
    pub fn live_presences_for_users(
        &self,
        user_ids: &[String],
        now: &str,
    ) -> Result<Vec<PresenceRow>> {
        if user_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (2..=user_ids.len() + 1).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {PRESENCE_COLUMNS} FROM presences
                 WHERE is_active = 1 AND (expires_at IS NULL OR expires_at > ?1)
                   AND user_id IN ({})
                 ORDER BY last_updated DESC, created_at DESC, id",
                placeholders.join(", ")
            );

            let mut params: Vec<&dyn rusqlite::types::ToSql> = Vec::with_capacity(user_ids.len() + 1);
            params.push(&now);
            params.extend(user_ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));

            query_presences(conn, &sql, &params)
        })
    }

    /// Live records with a location inside `bounds`. Uses the geo index as a
    /// coarse prefilter; callers apply the exact distance check.
    pub fn live_presences_in_bounds(
        &self,
        bounds: &BoundingBox,
        now: &str,
    ) -> Result<Vec<PresenceRow>> {
        self.with_conn(|conn| {
            query_presences(
                conn,
                &format!(
                    "SELECT {PRESENCE_COLUMNS} FROM presences
                     WHERE is_active = 1
                       AND latitude BETWEEN ?1 AND ?2
                       AND longitude BETWEEN ?3 AND ?4
                       AND (expires_at IS NULL OR expires_at > ?5)"
                ),
                &[&bounds.min_lat, &bounds.max_lat, &bounds.min_lon, &bounds.max_lon, &now],
            )
        })
    }

    /// TTL sweep: ends active records whose `expires_at` has passed.
    pub fn expire_presences(&self, now: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE presences
                 SET is_active = 0, lifecycle_status = 'departed',
                     departure_time = COALESCE(departure_time, expires_at),
                     last_updated = ?1
                 WHERE is_active = 1 AND expires_at IS NOT NULL AND expires_at <= ?1",
                [now],
            )?;
            Ok(n)
        })
    }

    // -- Users --

    pub fn create_user(&self, id: &str, username: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username) VALUES (?1, ?2)",
                (id, username),
            )?;
            Ok(())
        })
    }

    pub fn get_username(&self, id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let name = conn
                .query_row("SELECT username FROM users WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            Ok(name)
        })
    }

    // -- Friendships --

    pub fn add_friend(&self, user_id: &str, friend_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO friendships (user_id, friend_id) VALUES (?1, ?2)",
                (user_id, friend_id),
            )?;
            Ok(())
        })
    }

    pub fn friends_of(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT friend_id FROM friendships WHERE user_id = ?1")?;
            let ids = stmt
                .query_map([user_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    // -- Breweries --

    pub fn upsert_brewery(&self, row: &BreweryRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO breweries (id, name, address, latitude, longitude)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name, address = excluded.address,
                    latitude = excluded.latitude, longitude = excluded.longitude",
                rusqlite::params![row.id, row.name, row.address, row.latitude, row.longitude],
            )?;
            Ok(())
        })
    }

    pub fn get_brewery(&self, id: &str) -> Result<Option<BreweryRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, address, latitude, longitude FROM breweries WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(BreweryRow {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            address: row.get(2)?,
                            latitude: row.get(3)?,
                            longitude: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }
}

fn query_presences(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<PresenceRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, map_presence)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_presence(row: &Row<'_>) -> rusqlite::Result<PresenceRow> {
    Ok(PresenceRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        brewery_id: row.get(2)?,
        lifecycle_status: row.get(3)?,
        connectivity_status: row.get(4)?,
        latitude: row.get(5)?,
        longitude: row.get(6)?,
        accuracy: row.get(7)?,
        visibility: row.get(8)?,
        is_active: row.get(9)?,
        estimated_duration: row.get(10)?,
        notes: row.get(11)?,
        created_at: row.get(12)?,
        last_updated: row.get(13)?,
        departure_time: row.get(14)?,
        expires_at: row.get(15)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: &str = "2026-10-18T12:00:00.000Z";
    const T1: &str = "2026-10-18T12:05:00.000Z";
    const T2: &str = "2026-10-18T13:00:00.000Z";

    fn row(id: &str, user_id: &str, lat: f64, lon: f64) -> PresenceRow {
        PresenceRow {
            id: id.into(),
            user_id: user_id.into(),
            brewery_id: Some("brew-1".into()),
            lifecycle_status: "arrived".into(),
            connectivity_status: "online".into(),
            latitude: Some(lat),
            longitude: Some(lon),
            accuracy: None,
            visibility: "public".into(),
            is_active: true,
            estimated_duration: None,
            notes: None,
            created_at: T0.into(),
            last_updated: T0.into(),
            departure_time: None,
            expires_at: Some(T2.into()),
        }
    }

    #[test]
    fn replace_leaves_exactly_one_active_row() {
        let db = Database::open_in_memory().unwrap();
        db.insert_presence(&row("p1", "u1", 47.0, -122.0)).unwrap();

        let mut next = row("p2", "u1", 47.1, -122.1);
        next.created_at = T1.into();
        next.last_updated = T1.into();
        assert_eq!(db.replace_active_presence(&next, T1).unwrap(), 1);

        let live = db.live_presences_for_user("u1", T1).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, "p2");
        assert!(!db.get_presence("p1").unwrap().unwrap().is_active);
    }

    #[test]
    fn deactivate_ends_every_active_row_and_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.insert_presence(&row("p1", "u1", 47.0, -122.0)).unwrap();
        db.insert_presence(&row("p2", "u1", 47.0, -122.0)).unwrap();

        let ended = db.deactivate_user_presences("u1", T1).unwrap();
        assert_eq!(ended.len(), 2);
        assert!(ended.iter().all(|r| !r.is_active && r.lifecycle_status == "departed"));
        assert!(db.deactivate_user_presences("u1", T1).unwrap().is_empty());

        let p1 = db.get_presence("p1").unwrap().unwrap();
        assert!(!p1.is_active);
        assert_eq!(p1.lifecycle_status, "departed");
        assert_eq!(p1.departure_time.as_deref(), Some(T1));
    }

    #[test]
    fn patch_only_touches_provided_columns() {
        let db = Database::open_in_memory().unwrap();
        let mut r = row("p1", "u1", 47.0, -122.0);
        r.notes = Some("by the window".into());
        db.insert_presence(&r).unwrap();

        let patch = PresencePatch {
            visibility: Some("friends".into()),
            ..Default::default()
        };
        assert!(db.patch_presence("p1", &patch, T1).unwrap());
        assert!(!db.patch_presence("missing", &patch, T1).unwrap());

        let p = db.get_presence("p1").unwrap().unwrap();
        assert_eq!(p.visibility, "friends");
        assert_eq!(p.notes.as_deref(), Some("by the window"));
        assert_eq!(p.latitude, Some(47.0));
        assert_eq!(p.last_updated, T1);
        assert!(p.is_active);
    }

    #[test]
    fn patch_leaves_ended_and_expired_rows_alone() {
        let db = Database::open_in_memory().unwrap();
        let mut ended = row("p1", "u1", 47.0, -122.0);
        ended.is_active = false;
        ended.lifecycle_status = "departed".into();
        ended.departure_time = Some(T1.into());
        db.insert_presence(&ended).unwrap();

        let mut stale = row("p2", "u2", 47.0, -122.0);
        stale.expires_at = Some(T1.into());
        db.insert_presence(&stale).unwrap();

        let patch = PresencePatch {
            lifecycle_status: Some("at_venue".into()),
            expires_at: Some(T2.into()),
            ..Default::default()
        };
        assert!(!db.patch_presence("p1", &patch, T1).unwrap());
        assert!(!db.patch_presence("p2", &patch, T2).unwrap());

        let p1 = db.get_presence("p1").unwrap().unwrap();
        assert_eq!(p1.lifecycle_status, "departed");
        assert_eq!(p1.last_updated, T0);
        let p2 = db.get_presence("p2").unwrap().unwrap();
        assert_eq!(p2.lifecycle_status, "arrived");
        assert_eq!(p2.expires_at.as_deref(), Some(T1));
    }

    #[test]
    fn expired_rows_drop_out_of_reads_and_sweep() {
        let db = Database::open_in_memory().unwrap();
        let mut r = row("p1", "u1", 47.0, -122.0);
        r.expires_at = Some(T1.into());
        db.insert_presence(&r).unwrap();

        assert_eq!(db.live_presences_for_user("u1", T0).unwrap().len(), 1);
        assert!(db.live_presences_for_user("u1", T2).unwrap().is_empty());

        assert_eq!(db.expire_presences(T2).unwrap(), 1);
        assert_eq!(db.expire_presences(T2).unwrap(), 0);
        let p = db.get_presence("p1").unwrap().unwrap();
        assert!(!p.is_active);
        assert_eq!(p.departure_time.as_deref(), Some(T1));
    }

    #[test]
    fn bounds_prefilter_uses_coordinates() {
        let db = Database::open_in_memory().unwrap();
        db.insert_presence(&row("near", "u1", 47.61, -122.33)).unwrap();
        db.insert_presence(&row("far", "u2", 45.52, -122.68)).unwrap();
        let mut no_loc = row("noloc", "u3", 0.0, 0.0);
        no_loc.latitude = None;
        no_loc.longitude = None;
        db.insert_presence(&no_loc).unwrap();

        let bounds = BoundingBox {
            min_lat: 47.5,
            max_lat: 47.7,
            min_lon: -122.5,
            max_lon: -122.2,
        };
        let rows = db.live_presences_in_bounds(&bounds, T1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "near");
    }

    #[test]
    fn batch_fetch_by_users() {
        let db = Database::open_in_memory().unwrap();
        db.insert_presence(&row("p1", "u1", 1.0, 1.0)).unwrap();
        db.insert_presence(&row("p2", "u2", 1.0, 1.0)).unwrap();
        db.insert_presence(&row("p3", "u3", 1.0, 1.0)).unwrap();

        let rows = db
            .live_presences_for_users(&["u1".to_string(), "u3".to_string()], T1)
            .unwrap();
        let mut ids: Vec<_> = rows.into_iter().map(|r| r.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["p1", "p3"]);
        assert!(db.live_presences_for_users(&[], T1).unwrap().is_empty());
    }

    #[test]
    fn friendships_are_directed() {
        let db = Database::open_in_memory().unwrap();
        db.add_friend("u1", "u2").unwrap();
        db.add_friend("u1", "u2").unwrap();
        assert_eq!(db.friends_of("u1").unwrap(), vec!["u2".to_string()]);
        assert!(db.friends_of("u2").unwrap().is_empty());
    }
}
