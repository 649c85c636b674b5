use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (presence schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE breweries (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                address     TEXT,
                latitude    REAL,
                longitude   REAL
            );

            -- Directed edge: friend_id is in user_id's friend list
            CREATE TABLE friendships (
                user_id     TEXT NOT NULL,
                friend_id   TEXT NOT NULL,
                PRIMARY KEY (user_id, friend_id)
            );

            CREATE TABLE presences (
                id                  TEXT PRIMARY KEY,
                user_id             TEXT NOT NULL,
                brewery_id          TEXT,
                lifecycle_status    TEXT NOT NULL
                    CHECK (lifecycle_status IN ('arrived', 'at_venue', 'departed')),
                connectivity_status TEXT NOT NULL
                    CHECK (connectivity_status IN ('online', 'away', 'offline')),
                latitude            REAL,
                longitude           REAL,
                accuracy            REAL,
                visibility          TEXT NOT NULL
                    CHECK (visibility IN ('public', 'friends', 'private')),
                is_active           INTEGER NOT NULL DEFAULT 1,
                estimated_duration  INTEGER,
                notes               TEXT,
                created_at          TEXT NOT NULL,
                last_updated        TEXT NOT NULL,
                departure_time      TEXT,
                expires_at          TEXT
            );

            CREATE INDEX idx_presences_user_active
                ON presences(user_id, is_active);

            CREATE INDEX idx_presences_brewery_active
                ON presences(brewery_id, is_active);

            -- Spatial prefilter for nearby queries
            CREATE INDEX idx_presences_geo
                ON presences(is_active, latitude, longitude);

            CREATE INDEX idx_presences_expiry
                ON presences(is_active, expires_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
