//! REST surface of the presence service.

pub mod error;
pub mod middleware;
pub mod presence;
pub mod state;

use axum::{
    Json, Router, middleware as axum_middleware,
    routing::{get, post, put},
};
use serde_json::{Value, json};

pub use error::ApiError;
pub use state::AppState;

/// Presence routes plus `/health`. Transport layers (CORS, tracing) are
/// added by the server.
pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/presence", post(presence::create_presence))
        .route("/presence/me", get(presence::get_my_presence))
        .route("/presence/friends", get(presence::get_friends_presences))
        .route(
            "/presence/{id}",
            put(presence::update_presence).delete(presence::end_presence),
        )
        .route("/presence/{id}/end", post(presence::end_presence))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    let viewer_routes = Router::new()
        .route("/presence/nearby", get(presence::get_nearby_presences))
        .route(
            "/presence/brewery/{brewery_id}",
            get(presence::get_brewery_presences),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::optional_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected_routes)
        .merge(viewer_routes)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
