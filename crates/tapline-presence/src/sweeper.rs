use std::time::Duration;

use tracing::{info, warn};

use crate::error::PresenceError;
use crate::manager::PresenceManager;

/// Background task that ends presences past their TTL.
///
/// Runs on an interval and marks every active record whose `expires_at`
/// has passed as departed. Reads already hide such records; the sweep
/// keeps the store consistent with them.
pub async fn run_expiry_loop(manager: PresenceManager, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        match manager.expire_stale().await {
            Ok(count) => {
                if count > 0 {
                    info!("Expiry sweep: ended {} stale presences", count);
                }
            }
            Err(PresenceError::Internal(e)) => {
                warn!("Expiry sweep error: {:#}", e);
            }
            Err(e) => {
                warn!("Expiry sweep error: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tapline_db::Database;
    use tapline_db::models::PresenceRow;

    use crate::manager::PresenceConfig;
    use crate::notify::NullNotifier;

    #[tokio::test]
    async fn loop_ends_expired_presences() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let manager = PresenceManager::new(
            db.clone(),
            db.clone(),
            Arc::new(NullNotifier),
            PresenceConfig::default(),
        );
        db.insert_presence(&PresenceRow {
            id: "p1".into(),
            user_id: "00000000-0000-0000-0000-000000000001".into(),
            brewery_id: Some("brew-1".into()),
            lifecycle_status: "at_venue".into(),
            connectivity_status: "online".into(),
            latitude: None,
            longitude: None,
            accuracy: None,
            visibility: "public".into(),
            is_active: true,
            estimated_duration: None,
            notes: None,
            created_at: "2020-01-01T00:00:00.000Z".into(),
            last_updated: "2020-01-01T00:00:00.000Z".into(),
            departure_time: None,
            expires_at: Some("2020-01-01T04:00:00.000Z".into()),
        })
        .unwrap();

        let task = tokio::spawn(run_expiry_loop(manager, Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(200)).await;
        task.abort();

        let row = db.get_presence("p1").unwrap().unwrap();
        assert!(!row.is_active);
        assert_eq!(row.lifecycle_status, "departed");
        assert_eq!(row.departure_time.as_deref(), Some("2020-01-01T04:00:00.000Z"));
    }
}
