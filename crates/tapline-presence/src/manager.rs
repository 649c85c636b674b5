//! The presence manager owns every write to the presence store and every
//! read that leaves it.
//!
//! A user has at most one active record. Creation ends the previous one in
//! the same transaction; reads that still find several (concurrent creates
//! on separate connections) keep the most recently updated and end the rest.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tapline_db::Database;
use tapline_db::models::PresencePatch;
use tapline_types::api::{CreatePresenceRequest, PageResponse, UpdatePresenceRequest};
use tapline_types::events::PresenceUpdatePayload;
use tapline_types::models::{
    ConnectivityStatus, GeoPoint, LifecycleStatus, Location, OwnerInfo, PresenceRecord,
    PresenceView, UnknownVariant, VenueInfo, Visibility,
};

use crate::convert::{self, fmt_ts};
use crate::directory::Directory;
use crate::error::{PresenceError, PresenceResult};
use crate::geo;
use crate::notify::NearbyNotifier;
use crate::visibility::ViewerFilter;

pub const MAX_NOTES_LEN: usize = 500;
/// One day, in minutes.
pub const MAX_ESTIMATED_DURATION: u32 = 24 * 60;
pub const DEFAULT_PAGE_SIZE: u64 = 25;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Lifetime of a record that carries no `estimatedDuration`.
    pub default_ttl: Duration,
    /// Largest radius a nearby search may ask for.
    pub max_radius_km: f64,
    /// Radius handed to the notifier when a public presence is created.
    pub notify_radius_km: f64,
    pub default_visibility: Visibility,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::minutes(240),
            max_radius_km: 50.0,
            notify_radius_km: 5.0,
            default_visibility: Visibility::Public,
        }
    }
}

/// Parameters of a nearby search. `viewer` is `None` for anonymous callers.
#[derive(Debug, Clone, Copy)]
pub struct NearbySearch {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
    pub viewer: Option<Uuid>,
    pub exclude_viewer: bool,
}

/// Validated fields of a record about to be created.
#[derive(Debug, Clone)]
struct NewPresence {
    brewery_id: String,
    lifecycle_status: LifecycleStatus,
    connectivity_status: ConnectivityStatus,
    visibility: Visibility,
    location: Option<Location>,
    estimated_duration: Option<u32>,
    notes: Option<String>,
}

/// Validated partial update. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
struct PresenceChanges {
    lifecycle_status: Option<LifecycleStatus>,
    connectivity_status: Option<ConnectivityStatus>,
    visibility: Option<Visibility>,
    location: Option<Location>,
    estimated_duration: Option<u32>,
    notes: Option<String>,
}

impl NewPresence {
    fn from_request(req: CreatePresenceRequest, config: &PresenceConfig) -> PresenceResult<Self> {
        let brewery_id = require_brewery(req.brewery_id)?;
        if let Some(loc) = &req.location {
            validate_location(loc)?;
        }
        validate_duration(req.estimated_duration)?;
        validate_notes(req.notes.as_deref())?;

        Ok(Self {
            brewery_id,
            lifecycle_status: parse_enum(req.status)?.unwrap_or(LifecycleStatus::Arrived),
            connectivity_status: ConnectivityStatus::Online,
            visibility: parse_enum(req.visibility)?.unwrap_or(config.default_visibility),
            location: req.location,
            estimated_duration: req.estimated_duration,
            notes: req.notes,
        })
    }
}

impl PresenceChanges {
    fn from_request(req: UpdatePresenceRequest) -> PresenceResult<Self> {
        if let Some(loc) = &req.location {
            validate_location(loc)?;
        }
        validate_duration(req.estimated_duration)?;
        validate_notes(req.notes.as_deref())?;

        Ok(Self {
            lifecycle_status: parse_enum(req.status)?,
            connectivity_status: parse_enum(req.connectivity_status)?,
            visibility: parse_enum(req.visibility)?,
            location: req.location,
            estimated_duration: req.estimated_duration,
            notes: req.notes,
        })
    }

    /// Gateway payload: `status` is connectivity, `lifecycleStatus` is lifecycle.
    fn from_gateway(payload: &PresenceUpdatePayload) -> PresenceResult<Self> {
        if let Some(loc) = &payload.location {
            validate_location(loc)?;
        }
        Ok(Self {
            lifecycle_status: parse_enum(payload.lifecycle_status.clone())?,
            connectivity_status: parse_enum(payload.status.clone())?,
            visibility: parse_enum(payload.visibility.clone())?,
            location: payload.location,
            ..Default::default()
        })
    }
}

fn parse_enum<T>(value: Option<String>) -> PresenceResult<Option<T>>
where
    T: FromStr<Err = UnknownVariant>,
{
    value
        .map(|v| v.parse::<T>().map_err(|e| PresenceError::validation(e.to_string())))
        .transpose()
}

fn require_brewery(brewery_id: Option<String>) -> PresenceResult<String> {
    match brewery_id.map(|b| b.trim().to_string()) {
        Some(b) if !b.is_empty() => Ok(b),
        _ => Err(PresenceError::validation("breweryId is required")),
    }
}

fn validate_point(p: GeoPoint) -> PresenceResult<()> {
    if geo::is_valid_point(p) {
        Ok(())
    } else {
        Err(PresenceError::validation(
            "latitude must be within [-90, 90] and longitude within [-180, 180]",
        ))
    }
}

fn validate_location(loc: &Location) -> PresenceResult<()> {
    validate_point(loc.point())?;
    match loc.accuracy {
        Some(a) if !a.is_finite() || a < 0.0 => {
            Err(PresenceError::validation("accuracy must be a non-negative number of meters"))
        }
        _ => Ok(()),
    }
}

fn validate_duration(minutes: Option<u32>) -> PresenceResult<()> {
    match minutes {
        Some(0) => Err(PresenceError::validation("estimatedDuration must be positive")),
        Some(m) if m > MAX_ESTIMATED_DURATION => Err(PresenceError::validation(format!(
            "estimatedDuration must not exceed {} minutes",
            MAX_ESTIMATED_DURATION
        ))),
        _ => Ok(()),
    }
}

fn validate_notes(notes: Option<&str>) -> PresenceResult<()> {
    match notes {
        Some(n) if n.chars().count() > MAX_NOTES_LEN => Err(PresenceError::validation(format!(
            "notes must not exceed {} characters",
            MAX_NOTES_LEN
        ))),
        _ => Ok(()),
    }
}

/// Keeps the most recently updated record of each user, newest first.
fn latest_per_user(mut records: Vec<PresenceRecord>) -> Vec<PresenceRecord> {
    records.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
    let mut seen = HashSet::new();
    records.retain(|r| seen.insert(r.user_id));
    records
}

/// Result of a write that may either patch or create.
struct Upserted {
    view: PresenceView,
    created: bool,
}

/// Cheap to clone; all clones share the same store and collaborators.
#[derive(Clone)]
pub struct PresenceManager {
    inner: Arc<Inner>,
}

struct Inner {
    db: Arc<Database>,
    directory: Arc<dyn Directory>,
    notifier: Arc<dyn NearbyNotifier>,
    config: PresenceConfig,
}

impl PresenceManager {
    pub fn new(
        db: Arc<Database>,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn NearbyNotifier>,
        config: PresenceConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                directory,
                notifier,
                config,
            }),
        }
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.inner.config
    }

    /// Runs blocking store work off the async runtime.
    async fn run<F, T>(&self, f: F) -> PresenceResult<T>
    where
        F: FnOnce(&Inner) -> PresenceResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| PresenceError::Internal(anyhow!("presence task failed: {}", e)))?
    }

    pub async fn create_presence(
        &self,
        user_id: Uuid,
        req: CreatePresenceRequest,
    ) -> PresenceResult<PresenceView> {
        let new = NewPresence::from_request(req, &self.inner.config)?;
        let view = self.run(move |inner| inner.create(user_id, new)).await?;
        self.after_create(&view.presence);
        Ok(view)
    }

    pub async fn update_presence(
        &self,
        id: Uuid,
        user_id: Uuid,
        req: UpdatePresenceRequest,
    ) -> PresenceResult<PresenceView> {
        let changes = PresenceChanges::from_request(req)?;
        self.run(move |inner| inner.update(id, user_id, changes)).await
    }

    /// Ends whatever the user has active. Returns how many records ended;
    /// zero when nothing was active.
    pub async fn end_active_presence(&self, user_id: Uuid) -> PresenceResult<usize> {
        self.run(move |inner| Ok(inner.end_active(user_id)?.len()))
            .await
    }

    /// Ends the user's presence through a specific record id they own.
    /// Returns the records that were ended, empty if none was active.
    pub async fn end_presence(&self, id: Uuid, user_id: Uuid) -> PresenceResult<Vec<PresenceView>> {
        self.run(move |inner| inner.end(id, user_id)).await
    }

    pub async fn get_active_presence(&self, user_id: Uuid) -> PresenceResult<Option<PresenceView>> {
        self.run(move |inner| Ok(inner.active(user_id)?.map(|r| inner.enrich(r))))
            .await
    }

    pub async fn get_brewery_active_presences(
        &self,
        brewery_id: String,
        viewer: Option<Uuid>,
    ) -> PresenceResult<Vec<PresenceView>> {
        self.run(move |inner| inner.brewery_presences(&brewery_id, viewer))
            .await
    }

    pub async fn get_friends_presences(
        &self,
        viewer: Uuid,
        page: Option<u64>,
        page_size: Option<u64>,
    ) -> PresenceResult<PageResponse<PresenceView>> {
        let page = page.unwrap_or(1);
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page == 0 {
            return Err(PresenceError::validation("page must be at least 1"));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(PresenceError::validation(format!(
                "pageSize must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        self.run(move |inner| inner.friends_presences(viewer, page, page_size))
            .await
    }

    pub async fn find_nearby_presences(
        &self,
        search: NearbySearch,
    ) -> PresenceResult<Vec<PresenceView>> {
        validate_point(GeoPoint::new(search.latitude, search.longitude))?;
        if !search.radius_km.is_finite() || search.radius_km <= 0.0 {
            return Err(PresenceError::validation("radius must be a positive number of kilometers"));
        }
        if search.radius_km > self.inner.config.max_radius_km {
            return Err(PresenceError::validation(format!(
                "radius must not exceed {} km",
                self.inner.config.max_radius_km
            )));
        }
        self.run(move |inner| inner.nearby(search)).await
    }

    /// Gateway `presence:update`: patches the active record, or creates one
    /// when the user has none or names a different brewery.
    pub async fn update_or_create(
        &self,
        user_id: Uuid,
        payload: PresenceUpdatePayload,
    ) -> PresenceResult<PresenceView> {
        let changes = PresenceChanges::from_gateway(&payload)?;
        let brewery_id = payload.brewery_id;
        let upserted = self
            .run(move |inner| inner.update_or_create(user_id, brewery_id, changes))
            .await?;
        if upserted.created {
            self.after_create(&upserted.view.presence);
        }
        Ok(upserted.view)
    }

    pub async fn check_in(
        &self,
        user_id: Uuid,
        brewery_id: String,
        location: Option<Location>,
    ) -> PresenceResult<PresenceView> {
        let brewery_id = require_brewery(Some(brewery_id))?;
        if let Some(loc) = &location {
            validate_location(loc)?;
        }
        let upserted = self
            .run(move |inner| inner.check_in(user_id, brewery_id, location))
            .await?;
        if upserted.created {
            self.after_create(&upserted.view.presence);
        }
        Ok(upserted.view)
    }

    /// Connectivity goes offline; the record itself stays active.
    pub async fn mark_offline(&self, user_id: Uuid) -> PresenceResult<Option<PresenceView>> {
        self.run(move |inner| inner.mark_offline(user_id)).await
    }

    /// Friend list of `user_id`, for callers that apply the visibility
    /// policy themselves.
    pub async fn friends_of(&self, user_id: Uuid) -> PresenceResult<HashSet<Uuid>> {
        self.run(move |inner| Ok(inner.directory.friends_of(user_id)?))
            .await
    }

    /// Ends every active record past its TTL.
    pub async fn expire_stale(&self) -> PresenceResult<usize> {
        self.run(|inner| Ok(inner.db.expire_presences(&fmt_ts(convert::now()))?))
            .await
    }

    /// Fire-and-forget nearby notification for newly public records.
    fn after_create(&self, record: &PresenceRecord) {
        if record.visibility != Visibility::Public || !record.is_active || record.location.is_none()
        {
            return;
        }
        let notifier = self.inner.notifier.clone();
        let radius_km = self.inner.config.notify_radius_km;
        let record = record.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = notifier.notify_nearby(&record, radius_km) {
                warn!("Nearby notification for presence {} failed: {:#}", record.id, e);
            }
        });
    }
}

impl Inner {
    fn expiry(&self, now: DateTime<Utc>, estimated_duration: Option<u32>) -> DateTime<Utc> {
        now + estimated_duration
            .map(|m| Duration::minutes(i64::from(m)))
            .unwrap_or(self.config.default_ttl)
    }

    fn load(&self, id: Uuid) -> PresenceResult<PresenceRecord> {
        let row = self
            .db
            .get_presence(&id.to_string())?
            .ok_or(PresenceError::NotFound)?;
        Ok(convert::from_row(row)?)
    }

    fn create(&self, user_id: Uuid, new: NewPresence) -> PresenceResult<PresenceView> {
        let now = convert::now();
        let terminal = new.lifecycle_status.is_terminal();
        let record = PresenceRecord {
            id: Uuid::new_v4(),
            user_id,
            brewery_id: Some(new.brewery_id),
            lifecycle_status: new.lifecycle_status,
            connectivity_status: new.connectivity_status,
            location: new.location,
            visibility: new.visibility,
            is_active: !terminal,
            estimated_duration: new.estimated_duration,
            notes: new.notes,
            created_at: now,
            last_updated: now,
            departure_time: terminal.then_some(now),
            expires_at: Some(self.expiry(now, new.estimated_duration)),
        };

        let ended = self
            .db
            .replace_active_presence(&convert::to_row(&record), &fmt_ts(now))?;
        if ended > 0 {
            debug!("Ended {} previous presence(s) of {}", ended, user_id);
        }
        info!(
            presence_id = %record.id,
            user_id = %user_id,
            brewery_id = record.brewery_id.as_deref().unwrap_or("-"),
            visibility = record.visibility.as_str(),
            "Presence created",
        );
        Ok(self.enrich(record))
    }

    /// Applies `changes` to a live record. A terminal lifecycle status ends
    /// it; anything else refreshes its expiry.
    fn apply(
        &self,
        current: &PresenceRecord,
        changes: PresenceChanges,
    ) -> PresenceResult<PresenceRecord> {
        let now = convert::now();
        let terminal = changes.lifecycle_status.is_some_and(|s| s.is_terminal());
        let duration = changes.estimated_duration.or(current.estimated_duration);

        let patch = PresencePatch {
            brewery_id: None,
            lifecycle_status: changes.lifecycle_status.map(|s| s.as_str().to_string()),
            connectivity_status: changes.connectivity_status.map(|s| s.as_str().to_string()),
            visibility: changes.visibility.map(|v| v.as_str().to_string()),
            location: changes.location.map(|l| (l.latitude, l.longitude, l.accuracy)),
            estimated_duration: changes.estimated_duration.map(i64::from),
            notes: changes.notes,
            deactivate: terminal,
            departure_time: terminal.then(|| fmt_ts(now)),
            expires_at: (!terminal).then(|| fmt_ts(self.expiry(now, duration))),
        };

        // Ended or expired since it was read.
        if !self
            .db
            .patch_presence(&current.id.to_string(), &patch, &fmt_ts(now))?
        {
            return Err(PresenceError::validation("Presence has already ended"));
        }
        self.load(current.id)
    }

    fn update(
        &self,
        id: Uuid,
        user_id: Uuid,
        changes: PresenceChanges,
    ) -> PresenceResult<PresenceView> {
        let current = self.load(id)?;
        if current.user_id != user_id {
            return Err(PresenceError::Forbidden);
        }
        if !current.is_live_at(convert::now()) {
            return Err(PresenceError::validation("Presence has already ended"));
        }
        let updated = self.apply(&current, changes)?;
        debug!("Presence {} updated by {}", id, user_id);
        Ok(self.enrich(updated))
    }

    fn end_active(&self, user_id: Uuid) -> PresenceResult<Vec<PresenceRecord>> {
        let ended = convert::from_rows(
            self.db
                .deactivate_user_presences(&user_id.to_string(), &fmt_ts(convert::now()))?,
        )?;
        match ended.len() {
            0 => debug!("No active presence to end for {}", user_id),
            1 => info!("Presence of {} ended", user_id),
            n => warn!("Ended {} concurrent active presences of {}", n, user_id),
        }
        Ok(ended)
    }

    fn end(&self, id: Uuid, user_id: Uuid) -> PresenceResult<Vec<PresenceView>> {
        let record = self.load(id)?;
        if record.user_id != user_id {
            return Err(PresenceError::Forbidden);
        }
        let ended = self.end_active(user_id)?;
        Ok(self.enrich_all(ended.into_iter().map(|r| (r, None)).collect()))
    }

    /// The user's single live record. Extra live records left behind by
    /// racing creates are ended here.
    fn active(&self, user_id: Uuid) -> PresenceResult<Option<PresenceRecord>> {
        let now = fmt_ts(convert::now());
        let uid = user_id.to_string();
        let mut records = convert::from_rows(self.db.live_presences_for_user(&uid, &now)?)?;

        if records.len() > 1 {
            let keep = records[0].id;
            let healed = self
                .db
                .deactivate_user_presences_except(&uid, &keep.to_string(), &now)?;
            warn!(
                "User {} had {} active presences; kept {}, ended {}",
                user_id,
                records.len(),
                keep,
                healed
            );
            records.truncate(1);
        }
        Ok(records.pop())
    }

    fn update_or_create(
        &self,
        user_id: Uuid,
        brewery_id: Option<String>,
        changes: PresenceChanges,
    ) -> PresenceResult<Upserted> {
        let brewery_id = brewery_id
            .map(|b| require_brewery(Some(b)))
            .transpose()?;

        match self.active(user_id)? {
            Some(current)
                if brewery_id
                    .as_deref()
                    .is_none_or(|b| current.brewery_id.as_deref() == Some(b)) =>
            {
                let updated = self.apply(&current, changes)?;
                Ok(Upserted {
                    view: self.enrich(updated),
                    created: false,
                })
            }
            current => {
                let brewery_id = brewery_id.ok_or_else(|| {
                    PresenceError::validation("breweryId is required to start a presence")
                })?;
                let new = NewPresence {
                    brewery_id,
                    lifecycle_status: changes.lifecycle_status.unwrap_or(LifecycleStatus::Arrived),
                    connectivity_status: changes
                        .connectivity_status
                        .unwrap_or(ConnectivityStatus::Online),
                    visibility: changes
                        .visibility
                        .or(current.map(|c| c.visibility))
                        .unwrap_or(self.config.default_visibility),
                    location: changes.location,
                    estimated_duration: None,
                    notes: None,
                };
                Ok(Upserted {
                    view: self.create(user_id, new)?,
                    created: true,
                })
            }
        }
    }

    fn check_in(
        &self,
        user_id: Uuid,
        brewery_id: String,
        location: Option<Location>,
    ) -> PresenceResult<Upserted> {
        match self.active(user_id)? {
            Some(current) if current.brewery_id.as_deref() == Some(brewery_id.as_str()) => {
                let changes = PresenceChanges {
                    connectivity_status: Some(ConnectivityStatus::Online),
                    location,
                    ..Default::default()
                };
                let updated = self.apply(&current, changes)?;
                Ok(Upserted {
                    view: self.enrich(updated),
                    created: false,
                })
            }
            current => {
                let new = NewPresence {
                    brewery_id,
                    lifecycle_status: LifecycleStatus::Arrived,
                    connectivity_status: ConnectivityStatus::Online,
                    visibility: current
                        .map(|c| c.visibility)
                        .unwrap_or(self.config.default_visibility),
                    location,
                    estimated_duration: None,
                    notes: None,
                };
                Ok(Upserted {
                    view: self.create(user_id, new)?,
                    created: true,
                })
            }
        }
    }

    fn mark_offline(&self, user_id: Uuid) -> PresenceResult<Option<PresenceView>> {
        let Some(current) = self.active(user_id)? else {
            return Ok(None);
        };
        if current.connectivity_status == ConnectivityStatus::Offline {
            return Ok(Some(self.enrich(current)));
        }

        self.db.set_user_connectivity(
            &user_id.to_string(),
            ConnectivityStatus::Offline.as_str(),
            &fmt_ts(convert::now()),
        )?;
        let record = self.load(current.id)?;
        debug!("User {} marked offline", user_id);
        Ok(Some(self.enrich(record)))
    }

    fn brewery_presences(
        &self,
        brewery_id: &str,
        viewer: Option<Uuid>,
    ) -> PresenceResult<Vec<PresenceView>> {
        let now = fmt_ts(convert::now());
        let records = convert::from_rows(self.db.live_presences_for_brewery(brewery_id, &now)?)?;

        let mut filter = ViewerFilter::new(self.directory.as_ref(), viewer);
        let visible = latest_per_user(records)
            .into_iter()
            .filter(|r| filter.allows(r))
            .map(|r| (r, None))
            .collect();
        Ok(self.enrich_all(visible))
    }

    fn friends_presences(
        &self,
        viewer: Uuid,
        page: u64,
        page_size: u64,
    ) -> PresenceResult<PageResponse<PresenceView>> {
        let friends = self.directory.friends_of(viewer)?;
        let ids: Vec<String> = friends.iter().map(Uuid::to_string).collect();
        let now = fmt_ts(convert::now());
        let records = convert::from_rows(self.db.live_presences_for_users(&ids, &now)?)?;

        let mut filter = ViewerFilter::new(self.directory.as_ref(), Some(viewer));
        let visible: Vec<PresenceRecord> = latest_per_user(records)
            .into_iter()
            .filter(|r| filter.allows(r))
            .collect();

        let total = visible.len() as u64;
        let skip = usize::try_from((page - 1).saturating_mul(page_size)).unwrap_or(usize::MAX);
        let items = visible
            .into_iter()
            .skip(skip)
            .take(page_size as usize)
            .map(|r| (r, None))
            .collect();
        Ok(PageResponse::new(self.enrich_all(items), page, page_size, total))
    }

    fn nearby(&self, search: NearbySearch) -> PresenceResult<Vec<PresenceView>> {
        let center = GeoPoint::new(search.latitude, search.longitude);
        let now = fmt_ts(convert::now());

        let mut candidates = Vec::new();
        for bounds in geo::bounding_boxes(center, search.radius_km) {
            candidates.extend(convert::from_rows(
                self.db.live_presences_in_bounds(&bounds, &now)?,
            )?);
        }

        // A candidate counts only if it is its owner's current record; an
        // older duplicate inside the box must not stand in for a newer one
        // that is elsewhere or has no location.
        let owners: Vec<String> = candidates
            .iter()
            .map(|r| r.user_id.to_string())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let current: HashMap<Uuid, Uuid> =
            latest_per_user(convert::from_rows(self.db.live_presences_for_users(&owners, &now)?)?)
                .into_iter()
                .map(|r| (r.user_id, r.id))
                .collect();

        let candidates: Vec<PresenceRecord> = candidates
            .into_iter()
            .filter(|r| current.get(&r.user_id) == Some(&r.id))
            .filter(|r| !(search.exclude_viewer && search.viewer == Some(r.user_id)))
            .collect();

        let mut filter = ViewerFilter::new(self.directory.as_ref(), search.viewer);
        let ranked = geo::rank_by_distance(center, search.radius_km, candidates)
            .into_iter()
            .filter(|(r, _)| filter.allows(r))
            .map(|(r, d)| (r, Some(d)))
            .collect();
        Ok(self.enrich_all(ranked))
    }

    fn owner(&self, user_id: Uuid) -> Option<OwnerInfo> {
        self.directory.owner_info(user_id).unwrap_or_else(|e| {
            warn!("Owner lookup for {} failed: {:#}", user_id, e);
            None
        })
    }

    fn venue(&self, brewery_id: &str) -> Option<VenueInfo> {
        self.directory.venue_info(brewery_id).unwrap_or_else(|e| {
            warn!("Venue lookup for {} failed: {:#}", brewery_id, e);
            None
        })
    }

    /// Attaches display fields. Lookup failures leave them empty.
    fn enrich(&self, record: PresenceRecord) -> PresenceView {
        PresenceView {
            user: self.owner(record.user_id),
            brewery: record.brewery_id.as_deref().and_then(|b| self.venue(b)),
            presence: record,
            distance_km: None,
        }
    }

    fn enrich_all(&self, items: Vec<(PresenceRecord, Option<f64>)>) -> Vec<PresenceView> {
        let mut owners: HashMap<Uuid, Option<OwnerInfo>> = HashMap::new();
        let mut venues: HashMap<String, Option<VenueInfo>> = HashMap::new();

        items
            .into_iter()
            .map(|(record, distance_km)| {
                let user = owners
                    .entry(record.user_id)
                    .or_insert_with(|| self.owner(record.user_id))
                    .clone();
                let brewery = record.brewery_id.as_ref().and_then(|b| {
                    venues
                        .entry(b.clone())
                        .or_insert_with(|| self.venue(b))
                        .clone()
                });
                PresenceView {
                    presence: record,
                    user,
                    brewery,
                    distance_km,
                }
            })
            .collect()
    }
}
