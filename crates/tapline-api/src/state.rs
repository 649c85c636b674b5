use tapline_gateway::Gateway;
use tapline_presence::PresenceManager;

/// Shared by every REST handler. REST writes fan out through the same
/// gateway as WebSocket writes.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
}

impl AppState {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    pub fn presence(&self) -> &PresenceManager {
        self.gateway.presence()
    }
}
