//! Event handlers of the real-time gateway.
//!
//! A [`Gateway`] is built once at startup and handed to the WebSocket route
//! and the REST handlers. It turns inbound commands into presence manager
//! calls and fans the results out through the [`Dispatcher`], filtering
//! every target connection through the visibility policy.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tapline_presence::{PresenceError, PresenceManager, can_view};
use tapline_types::events::{CommandEnvelope, GatewayCommand, GatewayEvent};
use tapline_types::models::{PresenceRecord, PresenceView, Visibility};

use crate::auth::{AuthError, AuthVerifier, Identity};
use crate::dispatcher::{Dispatcher, Room};

/// Command types understood on the wire.
const COMMAND_TYPES: [&str; 5] = [
    "identify",
    "presence:update",
    "brewery:watch",
    "brewery:unwatch",
    "checkin:create",
];

/// Lifecycle of one connection after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authenticated,
    /// Watching at least one brewery.
    Subscribed,
    Disconnected,
}

/// An authenticated connection.
pub struct Session {
    pub conn_id: Uuid,
    pub identity: Identity,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != SessionState::Disconnected {
            *state = next;
        }
    }

    /// Moves to `Disconnected`. Returns false if it already was.
    fn close(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let was_open = *state != SessionState::Disconnected;
        *state = SessionState::Disconnected;
        was_open
    }
}

#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    dispatcher: Dispatcher,
    presence: PresenceManager,
    auth: Arc<dyn AuthVerifier>,
}

impl Gateway {
    pub fn new(presence: PresenceManager, auth: Arc<dyn AuthVerifier>) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                dispatcher: Dispatcher::new(),
                presence,
                auth,
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn presence(&self) -> &PresenceManager {
        &self.inner.presence
    }

    pub fn authenticate(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        match token {
            Some(token) => self.inner.auth.verify(token),
            None => Err(AuthError::Missing),
        }
    }

    /// Registers an authenticated connection and joins its user room.
    pub async fn open_session(
        &self,
        identity: Identity,
    ) -> (Session, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (conn_id, rx) = self.inner.dispatcher.register(identity.user_id).await;
        info!(
            "{} ({}) connected to gateway as {}",
            identity.username, identity.user_id, conn_id
        );
        let session = Session {
            conn_id,
            identity,
            state: Mutex::new(SessionState::Authenticated),
        };
        (session, rx)
    }

    pub async fn handle_command(&self, session: &Session, cmd: GatewayCommand) {
        if session.state() == SessionState::Disconnected {
            return;
        }
        let user_id = session.identity.user_id;

        match cmd {
            GatewayCommand::Identify { .. } => {
                debug!("{} sent identify after handshake, ignoring", user_id);
            }

            GatewayCommand::PresenceUpdate(payload) => {
                match self.inner.presence.update_or_create(user_id, payload).await {
                    Ok(view) => {
                        self.reply(session, GatewayEvent::PresenceUpdateSuccess(view.clone()))
                            .await;
                        self.publish_presence(&session.identity, &view, Some(session.conn_id))
                            .await;
                    }
                    Err(e) => {
                        let message = client_message(&e);
                        self.reply(session, GatewayEvent::PresenceUpdateError(message))
                            .await;
                    }
                }
            }

            GatewayCommand::BreweryWatch(brewery_id) => {
                self.watch(session, brewery_id).await;
            }

            GatewayCommand::BreweryUnwatch(brewery_id) => {
                let room = Room::Brewery(brewery_id.trim().to_string());
                let remaining = self.inner.dispatcher.leave(session.conn_id, &room).await;
                if remaining == 0 {
                    session.set_state(SessionState::Authenticated);
                }
                debug!("{} stopped watching {:?}", user_id, room);
            }

            GatewayCommand::CheckinCreate(payload) => {
                match self
                    .inner
                    .presence
                    .check_in(user_id, payload.brewery_id, payload.location)
                    .await
                {
                    Ok(view) => {
                        self.reply(
                            session,
                            GatewayEvent::CheckinCreateSuccess {
                                presence: view.clone(),
                            },
                        )
                        .await;
                        self.publish_checkin(&session.identity, &view).await;
                        self.publish_presence(&session.identity, &view, Some(session.conn_id))
                            .await;
                    }
                    Err(e) => {
                        let message = client_message(&e);
                        self.reply(session, GatewayEvent::CheckinCreateError(message))
                            .await;
                    }
                }
            }
        }
    }

    /// Handles a text frame that did not decode as a command.
    pub async fn reject_frame(&self, session: &Session, text: &str, err: serde_json::Error) {
        let kind = serde_json::from_str::<CommandEnvelope>(text)
            .ok()
            .map(|envelope| envelope.kind)
            .filter(|kind| COMMAND_TYPES.contains(&kind.as_str()));

        match kind {
            Some(kind) => {
                debug!("{} sent malformed {}: {}", session.identity.user_id, kind, err);
                let event = GatewayCommand::error_event(&kind, format!("Invalid {} payload", kind));
                self.reply(session, event).await;
            }
            None => {
                warn!(
                    "{} ({}) bad command: {} -- raw: {}",
                    session.identity.username,
                    session.identity.user_id,
                    err,
                    text.chars().take(200).collect::<String>()
                );
            }
        }
    }

    async fn watch(&self, session: &Session, brewery_id: String) {
        let brewery_id = brewery_id.trim().to_string();
        if brewery_id.is_empty() {
            self.reply(
                session,
                GatewayEvent::Error {
                    message: "breweryId is required".into(),
                },
            )
            .await;
            return;
        }

        self.inner
            .dispatcher
            .join(session.conn_id, Room::Brewery(brewery_id.clone()))
            .await;
        session.set_state(SessionState::Subscribed);
        debug!("{} watching {}", session.identity.user_id, brewery_id);

        match self
            .inner
            .presence
            .get_brewery_active_presences(brewery_id, Some(session.identity.user_id))
            .await
        {
            Ok(list) => self.reply(session, GatewayEvent::BreweryPresenceList(list)).await,
            Err(e) => {
                let message = client_message(&e);
                self.reply(session, GatewayEvent::Error { message }).await;
            }
        }
    }

    /// Ends a connection's session. Safe to call more than once; only the
    /// first call for the user's last connection marks them offline and
    /// emits `presence:offline`.
    pub async fn disconnect(&self, session: &Session) {
        if !session.close() {
            return;
        }
        let identity = &session.identity;
        let Some(departure) = self.inner.dispatcher.unregister(session.conn_id).await else {
            return;
        };
        info!(
            "{} ({}) disconnected from gateway",
            identity.username, identity.user_id
        );
        if !departure.last_connection {
            return;
        }

        let record = match self.inner.presence.mark_offline(identity.user_id).await {
            Ok(view) => view.map(|v| v.presence),
            Err(e) => {
                warn!("Marking {} offline failed: {:?}", identity.user_id, e);
                None
            }
        };
        self.publish_offline(identity, record.as_ref()).await;
    }

    /// Fans `presence:updated` out to every connection allowed to see the
    /// record, except `skip_conn`.
    pub async fn publish_presence(
        &self,
        owner: &Identity,
        view: &PresenceView,
        skip_conn: Option<Uuid>,
    ) -> usize {
        let friends = self.owner_friends(owner.user_id, Some(&view.presence)).await;
        let event = GatewayEvent::PresenceUpdated {
            user_id: owner.user_id,
            username: owner.username.clone(),
            presence: view.clone(),
        };
        self.inner
            .dispatcher
            .fan_out(None, &event, |conn_id, viewer| {
                Some(conn_id) != skip_conn && can_view(Some(viewer), &view.presence, &friends)
            })
            .await
    }

    /// Venue-scoped `brewery:checkin` for the brewery's watchers.
    async fn publish_checkin(&self, owner: &Identity, view: &PresenceView) {
        let Some(brewery_id) = view.presence.brewery_id.clone() else {
            return;
        };
        let friends = self.owner_friends(owner.user_id, Some(&view.presence)).await;
        let event = GatewayEvent::BreweryCheckin {
            user_id: owner.user_id,
            username: owner.username.clone(),
            brewery_id: brewery_id.clone(),
            timestamp: view.presence.last_updated,
        };
        let sent = self
            .inner
            .dispatcher
            .fan_out(Some(&Room::Brewery(brewery_id)), &event, |_, viewer| {
                can_view(Some(viewer), &view.presence, &friends)
            })
            .await;
        debug!("brewery:checkin from {} reached {} watchers", owner.user_id, sent);
    }

    /// Without a record the notice goes to the owner's friends only.
    async fn publish_offline(&self, owner: &Identity, record: Option<&PresenceRecord>) {
        let friends = self.owner_friends(owner.user_id, record).await;
        let event = GatewayEvent::PresenceOffline {
            user_id: owner.user_id,
            username: owner.username.clone(),
        };
        self.inner
            .dispatcher
            .fan_out(None, &event, |_, viewer| match record {
                Some(record) => viewer != owner.user_id && can_view(Some(viewer), record, &friends),
                None => friends.contains(&viewer),
            })
            .await;
    }

    /// Friend set of the owner, fetched only when the visibility decision
    /// depends on it. Fails closed.
    async fn owner_friends(&self, owner: Uuid, record: Option<&PresenceRecord>) -> HashSet<Uuid> {
        let needed = record.is_none_or(|r| r.visibility == Visibility::Friends);
        if !needed {
            return HashSet::new();
        }
        self.inner
            .presence
            .friends_of(owner)
            .await
            .unwrap_or_else(|e| {
                warn!("Friend lookup for {} failed: {}", owner, e);
                HashSet::new()
            })
    }

    async fn reply(&self, session: &Session, event: GatewayEvent) {
        if !self.inner.dispatcher.send_to_conn(session.conn_id, event).await {
            debug!("Connection {} gone before reply", session.conn_id);
        }
    }
}

/// Message safe to show a client. Internal failures are logged here and
/// reach the client only as a generic message.
fn client_message(e: &PresenceError) -> String {
    if let PresenceError::Internal(source) = e {
        error!("Presence operation failed: {:#}", source);
    }
    e.to_string()
}
