//! Wiring for the `tapline` binary: builds the presence manager and
//! gateway from config and assembles the HTTP + WebSocket router.

pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
    routing::get,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use tapline_api::{ApiError, AppState};
use tapline_db::Database;
use tapline_gateway::{Gateway, JwtVerifier, handle_connection};
use tapline_presence::{Directory, NearbyNotifier, NullNotifier, PresenceManager, TracingNotifier};

pub use config::ServerConfig;

pub fn build_gateway(config: &ServerConfig, db: Arc<Database>) -> Gateway {
    let notifier: Arc<dyn NearbyNotifier> = if config.notify_log {
        Arc::new(TracingNotifier)
    } else {
        Arc::new(NullNotifier)
    };
    let directory: Arc<dyn Directory> = db.clone();
    let presence = PresenceManager::new(db, directory, notifier, config.presence_config());
    Gateway::new(presence, Arc::new(JwtVerifier::new(&config.jwt_secret)))
}

/// REST routes, `/health` and the `/gateway` WebSocket endpoint.
pub fn build_app(gateway: Gateway) -> Router {
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway.clone());

    tapline_api::router(AppState::new(gateway))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket upgrade, so the token may
/// also arrive as `?token=`. Without either, the socket must `identify`.
async fn ws_upgrade(
    State(gateway): State<Gateway>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = bearer
        .map(|TypedHeader(Authorization(b))| b.token().to_string())
        .or(params.token);

    let identity = match token {
        Some(token) => Some(gateway.authenticate(Some(&token))?),
        None => None,
    };
    debug!(
        "Gateway upgrade ({})",
        if identity.is_some() { "token" } else { "identify" }
    );

    Ok(ws.on_upgrade(move |socket| handle_connection(socket, gateway, identity)))
}
