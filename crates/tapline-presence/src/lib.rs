//! Presence core: one authoritative "where is this user right now" record
//! per user, nearby search under a visibility policy, and a notification hook.
//!
//! - `manager`: create / update / end / query operations
//! - `visibility`: who may see a record
//! - `geo`: haversine distance, bounding boxes, nearby ranking
//! - `notify`: out-of-band notification extension point
//! - `directory`: friends, venue and owner lookups owned by other services
//! - `sweeper`: periodic TTL expiry

pub mod directory;
pub mod error;
pub mod geo;
pub mod manager;
pub mod notify;
pub mod sweeper;
pub mod visibility;

mod convert;

pub use directory::Directory;
pub use error::{PresenceError, PresenceResult};
pub use manager::{NearbySearch, PresenceConfig, PresenceManager};
pub use notify::{NearbyNotifier, NullNotifier, TracingNotifier};
pub use visibility::can_view;
