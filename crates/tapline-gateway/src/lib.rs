//! Real-time presence gateway: authenticated WebSocket connections, per-user
//! and per-brewery rooms, and visibility-filtered fan-out.

pub mod auth;
pub mod connection;
pub mod dispatcher;
pub mod gateway;

pub use auth::{AuthError, AuthVerifier, Identity, JwtVerifier};
pub use connection::handle_connection;
pub use dispatcher::{Dispatcher, Room};
pub use gateway::{Gateway, Session, SessionState};
