use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};

use tapline_gateway::Identity;

use crate::error::ApiError;
use crate::state::AppState;

/// Caller of a route that also serves anonymous viewers.
#[derive(Debug, Clone)]
pub struct Viewer(pub Option<Identity>);

/// Validate the bearer token and attach the caller's [`Identity`].
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer.as_ref().map(|TypedHeader(auth)| auth.token());
    let identity = state.gateway.authenticate(token)?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Like [`require_auth`] but lets requests without a token through as
/// anonymous. A token that is present must still be valid.
pub async fn optional_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = match bearer {
        Some(TypedHeader(auth)) => Some(state.gateway.authenticate(Some(auth.token()))?),
        None => None,
    };

    req.extensions_mut().insert(Viewer(identity));
    Ok(next.run(req).await)
}
