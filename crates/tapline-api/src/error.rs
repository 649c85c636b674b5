//! Maps presence and auth failures to HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use tapline_gateway::AuthError;
use tapline_presence::PresenceError;
use tapline_types::api::ErrorBody;

#[derive(Debug)]
pub enum ApiError {
    Presence(PresenceError),
    Unauthorized(AuthError),
    /// Malformed path, query or body.
    BadRequest(String),
}

impl From<PresenceError> for ApiError {
    fn from(e: PresenceError) -> Self {
        Self::Presence(e)
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::Unauthorized(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message),
            ApiError::Unauthorized(e) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", e.to_string()),
            ApiError::Presence(e) => {
                let message = e.to_string();
                match e {
                    PresenceError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message),
                    PresenceError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", message),
                    PresenceError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", message),
                    PresenceError::Internal(source) => {
                        tracing::error!(error = %format!("{:#}", source), "Internal server error");
                        (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
                    }
                }
            }
        };

        let body = ErrorBody {
            error: code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_are_500() {
        let source = std::io::Error::other("disk on fire");
        let err = ApiError::from(PresenceError::Internal(source.into()));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let cases = [
            (ApiError::from(PresenceError::validation("bad")), StatusCode::BAD_REQUEST),
            (ApiError::from(PresenceError::NotFound), StatusCode::NOT_FOUND),
            (ApiError::from(PresenceError::Forbidden), StatusCode::FORBIDDEN),
            (ApiError::from(AuthError::Invalid), StatusCode::UNAUTHORIZED),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
