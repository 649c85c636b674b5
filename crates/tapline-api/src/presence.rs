use axum::{
    Extension, Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;
use uuid::Uuid;

use tapline_gateway::Identity;
use tapline_presence::NearbySearch;
use tapline_types::api::{
    CreatePresenceRequest, EndPresenceResponse, NearbyQuery, PageQuery, PageResponse,
    UpdatePresenceRequest,
};
use tapline_types::models::PresenceView;

use crate::error::ApiError;
use crate::middleware::Viewer;
use crate::state::AppState;

/// Radius used when a nearby query omits one.
pub const DEFAULT_NEARBY_RADIUS_KM: f64 = 10.0;

fn bad_json(e: JsonRejection) -> ApiError {
    ApiError::BadRequest(e.body_text())
}

fn bad_query(e: QueryRejection) -> ApiError {
    ApiError::BadRequest(e.body_text())
}

fn bad_path(e: PathRejection) -> ApiError {
    ApiError::BadRequest(e.body_text())
}

/// `POST /presence`: ends any previous presence and starts a new one.
pub async fn create_presence(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    body: Result<Json<CreatePresenceRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body.map_err(bad_json)?;
    let view = state.presence().create_presence(identity.user_id, req).await?;

    state.gateway.publish_presence(&identity, &view, None).await;
    Ok((StatusCode::CREATED, Json(view)))
}

/// `GET /presence/me`: the caller's active presence, or `null`.
pub async fn get_my_presence(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Option<PresenceView>>, ApiError> {
    let view = state.presence().get_active_presence(identity.user_id).await?;
    Ok(Json(view))
}

pub async fn update_presence(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<UpdatePresenceRequest>, JsonRejection>,
) -> Result<Json<PresenceView>, ApiError> {
    let Path(id) = id.map_err(bad_path)?;
    let Json(req) = body.map_err(bad_json)?;
    let view = state
        .presence()
        .update_presence(id, identity.user_id, req)
        .await?;

    state.gateway.publish_presence(&identity, &view, None).await;
    Ok(Json(view))
}

/// `POST /presence/{id}/end` and `DELETE /presence/{id}`.
pub async fn end_presence(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<EndPresenceResponse>, ApiError> {
    let Path(id) = id.map_err(bad_path)?;
    let ended = state.presence().end_presence(id, identity.user_id).await?;
    debug!("{} ended {} presence(s) via {}", identity.user_id, ended.len(), id);

    for view in &ended {
        state.gateway.publish_presence(&identity, view, None).await;
    }
    Ok(Json(EndPresenceResponse {
        ended: ended.len(),
    }))
}

pub async fn get_friends_presences(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<PageResponse<PresenceView>>, ApiError> {
    let Query(page) = query.map_err(bad_query)?;
    let result = state
        .presence()
        .get_friends_presences(identity.user_id, page.page, page.page_size)
        .await?;
    Ok(Json(result))
}

/// `GET /presence/nearby?latitude&longitude&radius&excludeMe`
pub async fn get_nearby_presences(
    State(state): State<AppState>,
    Extension(Viewer(viewer)): Extension<Viewer>,
    query: Result<Query<NearbyQuery>, QueryRejection>,
) -> Result<Json<Vec<PresenceView>>, ApiError> {
    let Query(q) = query.map_err(bad_query)?;
    let (Some(latitude), Some(longitude)) = (q.latitude, q.longitude) else {
        return Err(ApiError::BadRequest(
            "latitude and longitude are required".into(),
        ));
    };

    let found = state
        .presence()
        .find_nearby_presences(NearbySearch {
            latitude,
            longitude,
            radius_km: q.radius.unwrap_or(DEFAULT_NEARBY_RADIUS_KM),
            viewer: viewer.map(|v| v.user_id),
            exclude_viewer: q.exclude_me,
        })
        .await?;
    Ok(Json(found))
}

pub async fn get_brewery_presences(
    State(state): State<AppState>,
    Extension(Viewer(viewer)): Extension<Viewer>,
    Path(brewery_id): Path<String>,
) -> Result<Json<Vec<PresenceView>>, ApiError> {
    let list = state
        .presence()
        .get_brewery_active_presences(brewery_id, viewer.map(|v| v.user_id))
        .await?;
    Ok(Json(list))
}
