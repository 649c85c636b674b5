use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use tapline_types::events::GatewayEvent;

/// Broadcast scope on the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// Every connection of one user; joined on handshake.
    User(Uuid),
    /// Watchers of one brewery.
    Brewery(String),
}

/// Result of removing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    pub user_id: Uuid,
    /// No other connection of the same user remains.
    pub last_connection: bool,
}

/// Tracks live connections and their rooms, and routes events to them.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// conn_id -> connection. Lock before `rooms` when both are needed.
    connections: RwLock<HashMap<Uuid, ConnectionEntry>>,

    /// room -> member conn_ids
    rooms: RwLock<HashMap<Room, HashSet<Uuid>>>,
}

struct ConnectionEntry {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
    rooms: HashSet<Room>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and join its user room. Returns (conn_id, receiver).
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let room = Room::User(user_id);

        let mut connections = self.inner.connections.write().await;
        let mut rooms = self.inner.rooms.write().await;
        connections.insert(
            conn_id,
            ConnectionEntry {
                user_id,
                tx,
                rooms: HashSet::from([room.clone()]),
            },
        );
        rooms.entry(room).or_default().insert(conn_id);

        (conn_id, rx)
    }

    /// Remove a connection from every room. Returns `None` if it was
    /// already gone, so a repeated call is a no-op.
    pub async fn unregister(&self, conn_id: Uuid) -> Option<Departure> {
        let mut connections = self.inner.connections.write().await;
        let mut rooms = self.inner.rooms.write().await;

        let entry = connections.remove(&conn_id)?;
        for room in &entry.rooms {
            if let Some(members) = rooms.get_mut(room) {
                members.remove(&conn_id);
                if members.is_empty() {
                    rooms.remove(room);
                }
            }
        }

        Some(Departure {
            user_id: entry.user_id,
            last_connection: !rooms.contains_key(&Room::User(entry.user_id)),
        })
    }

    /// Returns false if the connection is unknown.
    pub async fn join(&self, conn_id: Uuid, room: Room) -> bool {
        let mut connections = self.inner.connections.write().await;
        let Some(entry) = connections.get_mut(&conn_id) else {
            return false;
        };
        let mut rooms = self.inner.rooms.write().await;
        entry.rooms.insert(room.clone());
        rooms.entry(room).or_default().insert(conn_id);
        true
    }

    /// Returns how many brewery rooms the connection is still in.
    pub async fn leave(&self, conn_id: Uuid, room: &Room) -> usize {
        let mut connections = self.inner.connections.write().await;
        let mut rooms = self.inner.rooms.write().await;
        let remaining = match connections.get_mut(&conn_id) {
            Some(entry) => {
                entry.rooms.remove(room);
                entry
                    .rooms
                    .iter()
                    .filter(|r| matches!(r, Room::Brewery(_)))
                    .count()
            }
            None => 0,
        };
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&conn_id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
        remaining
    }

    /// Send a targeted event to one connection.
    pub async fn send_to_conn(&self, conn_id: Uuid, event: GatewayEvent) -> bool {
        let connections = self.inner.connections.read().await;
        match connections.get(&conn_id) {
            Some(entry) => entry.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver `event` to the connections in `room` (every connection when
    /// `None`) for which `allow(conn_id, user_id)` holds. Returns how many
    /// connections it was queued for.
    pub async fn fan_out<F>(&self, room: Option<&Room>, event: &GatewayEvent, allow: F) -> usize
    where
        F: Fn(Uuid, Uuid) -> bool,
    {
        let connections = self.inner.connections.read().await;
        let targets: Vec<Uuid> = match room {
            Some(room) => {
                let rooms = self.inner.rooms.read().await;
                rooms
                    .get(room)
                    .map(|members| members.iter().copied().collect())
                    .unwrap_or_default()
            }
            None => connections.keys().copied().collect(),
        };

        let mut sent = 0;
        for conn_id in targets {
            let Some(entry) = connections.get(&conn_id) else {
                continue;
            };
            if allow(conn_id, entry.user_id) && entry.tx.send(event.clone()).is_ok() {
                sent += 1;
            }
        }
        sent
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(&Room::User(user_id))
            .map_or(0, HashSet::len)
    }

    pub async fn in_room(&self, conn_id: Uuid, room: &Room) -> bool {
        self.inner
            .rooms
            .read()
            .await
            .get(room)
            .is_some_and(|members| members.contains(&conn_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> GatewayEvent {
        GatewayEvent::Error {
            message: "ping".into(),
        }
    }

    #[tokio::test]
    async fn last_connection_is_reported_once() {
        let d = Dispatcher::new();
        let user = Uuid::new_v4();
        let (c1, _rx1) = d.register(user).await;
        let (c2, _rx2) = d.register(user).await;
        assert_eq!(d.connection_count(user).await, 2);

        assert_eq!(
            d.unregister(c1).await,
            Some(Departure {
                user_id: user,
                last_connection: false
            })
        );
        assert_eq!(d.unregister(c1).await, None);
        assert_eq!(
            d.unregister(c2).await,
            Some(Departure {
                user_id: user,
                last_connection: true
            })
        );
        assert_eq!(d.connection_count(user).await, 0);
    }

    #[tokio::test]
    async fn room_fan_out_reaches_members_only() {
        let d = Dispatcher::new();
        let (c1, mut rx1) = d.register(Uuid::new_v4()).await;
        let (c2, mut rx2) = d.register(Uuid::new_v4()).await;
        let room = Room::Brewery("brew-1".into());

        assert!(d.join(c1, room.clone()).await);
        assert_eq!(d.fan_out(Some(&room), &event(), |_, _| true).await, 1);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());

        let other = Room::Brewery("brew-2".into());
        assert!(d.join(c1, other.clone()).await);
        assert_eq!(d.leave(c1, &room).await, 1);
        assert!(!d.in_room(c1, &room).await);
        assert_eq!(d.leave(c1, &other).await, 0);
        assert_eq!(d.fan_out(Some(&room), &event(), |_, _| true).await, 0);

        assert_eq!(d.fan_out(None, &event(), |conn, _| conn == c2).await, 1);
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unregister_drops_room_memberships() {
        let d = Dispatcher::new();
        let (c1, _rx) = d.register(Uuid::new_v4()).await;
        let room = Room::Brewery("brew-1".into());
        d.join(c1, room.clone()).await;
        d.unregister(c1).await;

        assert!(!d.in_room(c1, &room).await);
        assert!(!d.join(c1, room).await);
        assert!(!d.send_to_conn(c1, event()).await);
    }
}
