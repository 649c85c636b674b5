/// Out-of-band notification of people near a newly public presence.
///
/// Push delivery lives outside this workspace; the manager only calls the
/// hook. Implementations can fan out to a push service, write to tracing,
/// or discard.
use tapline_types::models::PresenceRecord;

pub trait NearbyNotifier: Send + Sync {
    fn notify_nearby(&self, record: &PresenceRecord, radius_km: f64) -> anyhow::Result<()>;
}

/// Notifier that uses the `tracing` crate.
pub struct TracingNotifier;

impl NearbyNotifier for TracingNotifier {
    fn notify_nearby(&self, record: &PresenceRecord, radius_km: f64) -> anyhow::Result<()> {
        tracing::info!(
            presence_id = %record.id,
            user_id = %record.user_id,
            brewery_id = record.brewery_id.as_deref().unwrap_or("-"),
            radius_km,
            "notify_nearby",
        );
        Ok(())
    }
}

/// No-op notifier.
pub struct NullNotifier;

impl NearbyNotifier for NullNotifier {
    fn notify_nearby(&self, _record: &PresenceRecord, _radius_km: f64) -> anyhow::Result<()> {
        Ok(())
    }
}
