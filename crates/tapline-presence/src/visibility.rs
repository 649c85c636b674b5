use std::collections::{HashMap, HashSet};

use tracing::warn;
use uuid::Uuid;

use tapline_types::models::{PresenceRecord, Visibility};

use crate::directory::Directory;

/// Whether `viewer` may see `record`. `owner_friends` is the friend list of
/// `record.user_id`; an anonymous viewer is `None`.
///
/// Every read path (nearby, brewery, friends, gateway fan-out) goes through
/// this function.
pub fn can_view(viewer: Option<Uuid>, record: &PresenceRecord, owner_friends: &HashSet<Uuid>) -> bool {
    match record.visibility {
        Visibility::Public => true,
        Visibility::Friends => {
            viewer.is_some_and(|v| v == record.user_id || owner_friends.contains(&v))
        }
        Visibility::Private => viewer == Some(record.user_id),
    }
}

/// Applies [`can_view`] over many records, fetching each owner's friend
/// list at most once and only when the answer depends on it.
pub struct ViewerFilter<'a> {
    directory: &'a dyn Directory,
    viewer: Option<Uuid>,
    friends: HashMap<Uuid, HashSet<Uuid>>,
}

impl<'a> ViewerFilter<'a> {
    pub fn new(directory: &'a dyn Directory, viewer: Option<Uuid>) -> Self {
        Self {
            directory,
            viewer,
            friends: HashMap::new(),
        }
    }

    pub fn allows(&mut self, record: &PresenceRecord) -> bool {
        let needs_friends = record.visibility == Visibility::Friends
            && self.viewer.is_some_and(|v| v != record.user_id);
        if !needs_friends {
            return can_view(self.viewer, record, &HashSet::new());
        }

        let directory = self.directory;
        let friends = self.friends.entry(record.user_id).or_insert_with(|| {
            directory.friends_of(record.user_id).unwrap_or_else(|e| {
                // Fail closed: an unknown friend list hides friends-only records
                warn!("Friend lookup for {} failed: {:#}", record.user_id, e);
                HashSet::new()
            })
        });
        can_view(self.viewer, record, friends)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tapline_types::models::{ConnectivityStatus, LifecycleStatus, OwnerInfo, VenueInfo};

    fn record(owner: Uuid, visibility: Visibility) -> PresenceRecord {
        let now = Utc::now();
        PresenceRecord {
            id: Uuid::new_v4(),
            user_id: owner,
            brewery_id: None,
            lifecycle_status: LifecycleStatus::AtVenue,
            connectivity_status: ConnectivityStatus::Online,
            location: None,
            visibility,
            is_active: true,
            estimated_duration: None,
            notes: None,
            created_at: now,
            last_updated: now,
            departure_time: None,
            expires_at: None,
        }
    }

    #[test]
    fn public_is_visible_to_everyone() {
        let r = record(Uuid::new_v4(), Visibility::Public);
        assert!(can_view(None, &r, &HashSet::new()));
        assert!(can_view(Some(Uuid::new_v4()), &r, &HashSet::new()));
    }

    #[test]
    fn friends_only_is_visible_to_owner_and_friends() {
        let owner = Uuid::new_v4();
        let friend = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let r = record(owner, Visibility::Friends);
        let friends: HashSet<Uuid> = [friend].into();

        assert!(can_view(Some(owner), &r, &friends));
        assert!(can_view(Some(friend), &r, &friends));
        assert!(!can_view(Some(stranger), &r, &friends));
        assert!(!can_view(None, &r, &friends));
    }

    #[test]
    fn private_is_visible_to_owner_only() {
        let owner = Uuid::new_v4();
        let friend = Uuid::new_v4();
        let r = record(owner, Visibility::Private);
        let friends: HashSet<Uuid> = [friend].into();

        assert!(can_view(Some(owner), &r, &friends));
        assert!(!can_view(Some(friend), &r, &friends));
        assert!(!can_view(None, &r, &friends));
    }

    struct CountingDirectory {
        friend: Uuid,
        lookups: AtomicUsize,
    }

    impl Directory for CountingDirectory {
        fn friends_of(&self, _user_id: Uuid) -> anyhow::Result<HashSet<Uuid>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok([self.friend].into())
        }

        fn venue_info(&self, _brewery_id: &str) -> anyhow::Result<Option<VenueInfo>> {
            Ok(None)
        }

        fn owner_info(&self, _user_id: Uuid) -> anyhow::Result<Option<OwnerInfo>> {
            Ok(None)
        }
    }

    #[test]
    fn filter_looks_up_each_owner_once() {
        let owner = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        let dir = CountingDirectory {
            friend: viewer,
            lookups: AtomicUsize::new(0),
        };
        let mut filter = ViewerFilter::new(&dir, Some(viewer));

        assert!(filter.allows(&record(owner, Visibility::Friends)));
        assert!(filter.allows(&record(owner, Visibility::Friends)));
        assert!(filter.allows(&record(Uuid::new_v4(), Visibility::Public)));
        assert!(!filter.allows(&record(owner, Visibility::Private)));
        assert_eq!(dir.lookups.load(Ordering::SeqCst), 1);
    }
}
