//! Lookups owned by services outside this workspace: the friend graph,
//! brewery display data and user display names.

use std::collections::HashSet;

use anyhow::Result;
use tracing::warn;
use uuid::Uuid;

use tapline_db::Database;
use tapline_types::models::{GeoPoint, OwnerInfo, VenueInfo};

/// Blocking lookups; callers run them off the async runtime.
pub trait Directory: Send + Sync {
    /// Flat friend list of `user_id`. Pending requests are not included.
    fn friends_of(&self, user_id: Uuid) -> Result<HashSet<Uuid>>;

    fn venue_info(&self, brewery_id: &str) -> Result<Option<VenueInfo>>;

    fn owner_info(&self, user_id: Uuid) -> Result<Option<OwnerInfo>>;
}

/// Reads the collaborator tables mirrored into the presence database.
impl Directory for Database {
    fn friends_of(&self, user_id: Uuid) -> Result<HashSet<Uuid>> {
        let ids = Database::friends_of(self, &user_id.to_string())?;
        Ok(ids
            .into_iter()
            .filter_map(|id| match id.parse() {
                Ok(uid) => Some(uid),
                Err(e) => {
                    warn!("Corrupt friend id '{}' for {}: {}", id, user_id, e);
                    None
                }
            })
            .collect())
    }

    fn venue_info(&self, brewery_id: &str) -> Result<Option<VenueInfo>> {
        Ok(self.get_brewery(brewery_id)?.map(|b| VenueInfo {
            location: match (b.latitude, b.longitude) {
                (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
                _ => None,
            },
            id: b.id,
            name: b.name,
            address: b.address,
        }))
    }

    fn owner_info(&self, user_id: Uuid) -> Result<Option<OwnerInfo>> {
        Ok(self
            .get_username(&user_id.to_string())?
            .map(|username| OwnerInfo { user_id, username }))
    }
}
