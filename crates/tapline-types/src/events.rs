use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Location, PresenceView};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum GatewayEvent {
    /// Handshake accepted
    #[serde(rename = "ready")]
    Ready { user_id: Uuid, username: String },

    /// Handshake rejected; the socket is closed right after
    #[serde(rename = "connect_error")]
    ConnectError { message: String },

    /// Ack to the sender of a `presence:update`
    #[serde(rename = "presence:update:success")]
    PresenceUpdateSuccess(PresenceView),

    #[serde(rename = "presence:update:error")]
    PresenceUpdateError(String),

    /// Fan-out of someone's changed presence
    #[serde(rename = "presence:updated")]
    PresenceUpdated {
        user_id: Uuid,
        username: String,
        presence: PresenceView,
    },

    /// Snapshot sent to a new brewery watcher
    #[serde(rename = "brewery:presence:list")]
    BreweryPresenceList(Vec<PresenceView>),

    /// Someone just arrived at a watched brewery
    #[serde(rename = "brewery:checkin")]
    BreweryCheckin {
        user_id: Uuid,
        username: String,
        brewery_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    #[serde(rename = "checkin:create:success")]
    CheckinCreateSuccess { presence: PresenceView },

    #[serde(rename = "checkin:create:error")]
    CheckinCreateError(String),

    /// A user's last connection closed
    #[serde(rename = "presence:offline")]
    PresenceOffline { user_id: Uuid, username: String },

    /// Failure of a command that has no dedicated error event
    #[serde(rename = "error")]
    Error { message: String },
}

impl GatewayEvent {
    /// Wire name of the event, as found in the `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::ConnectError { .. } => "connect_error",
            Self::PresenceUpdateSuccess(_) => "presence:update:success",
            Self::PresenceUpdateError(_) => "presence:update:error",
            Self::PresenceUpdated { .. } => "presence:updated",
            Self::BreweryPresenceList(_) => "brewery:presence:list",
            Self::BreweryCheckin { .. } => "brewery:checkin",
            Self::CheckinCreateSuccess { .. } => "checkin:create:success",
            Self::CheckinCreateError(_) => "checkin:create:error",
            Self::PresenceOffline { .. } => "presence:offline",
            Self::Error { .. } => "error",
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum GatewayCommand {
    /// Authenticate a connection that did not carry a token on upgrade
    #[serde(rename = "identify")]
    Identify { token: String },

    #[serde(rename = "presence:update")]
    PresenceUpdate(PresenceUpdatePayload),

    #[serde(rename = "brewery:watch")]
    BreweryWatch(String),

    #[serde(rename = "brewery:unwatch")]
    BreweryUnwatch(String),

    #[serde(rename = "checkin:create")]
    CheckinCreate(CheckinPayload),
}

impl GatewayCommand {
    /// Event that reports a failure of the command named `command_type`.
    pub fn error_event(command_type: &str, message: String) -> GatewayEvent {
        match command_type {
            "presence:update" => GatewayEvent::PresenceUpdateError(message),
            "checkin:create" => GatewayEvent::CheckinCreateError(message),
            _ => GatewayEvent::Error { message },
        }
    }
}

/// Just the `type` of an inbound frame, used to route decode failures.
#[derive(Debug, Deserialize)]
pub struct CommandEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
}

/// Payload of `presence:update`. `status` is the connectivity axis,
/// `lifecycleStatus` the check-in axis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdatePayload {
    pub status: Option<String>,
    pub lifecycle_status: Option<String>,
    pub location: Option<Location>,
    pub brewery_id: Option<String>,
    pub visibility: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinPayload {
    pub brewery_id: String,
    pub location: Option<Location>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_colon_event_names() {
        let cmd: GatewayCommand =
            serde_json::from_str(r#"{"type":"brewery:watch","data":"brew-9"}"#).unwrap();
        assert!(matches!(cmd, GatewayCommand::BreweryWatch(ref id) if id == "brew-9"));

        let cmd: GatewayCommand = serde_json::from_str(
            r#"{"type":"presence:update","data":{"status":"away","breweryId":"brew-1"}}"#,
        )
        .unwrap();
        match cmd {
            GatewayCommand::PresenceUpdate(p) => {
                assert_eq!(p.status.as_deref(), Some("away"));
                assert_eq!(p.brewery_id.as_deref(), Some("brew-1"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn events_serialize_with_camel_case_fields() {
        let user_id = Uuid::new_v4();
        let event = GatewayEvent::PresenceOffline {
            user_id,
            username: "ada".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "presence:offline");
        assert_eq!(json["data"]["userId"], user_id.to_string());
        assert_eq!(event.name(), "presence:offline");

        let json = serde_json::to_value(GatewayEvent::PresenceUpdateError("nope".into())).unwrap();
        assert_eq!(json["data"], "nope");
    }

    #[test]
    fn error_event_routes_by_command_type() {
        let ev = GatewayCommand::error_event("checkin:create", "bad".into());
        assert_eq!(ev.name(), "checkin:create:error");
        let ev = GatewayCommand::error_event("brewery:watch", "bad".into());
        assert_eq!(ev.name(), "error");
    }
}
