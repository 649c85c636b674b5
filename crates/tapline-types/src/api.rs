use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Location;

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway handshake.
/// Tokens are issued by the account service; this workspace only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Presence --

/// Body of `POST /presence`. Enum fields arrive as raw strings so that an
/// out-of-set value is reported as a validation error instead of a decode error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePresenceRequest {
    pub brewery_id: Option<String>,
    pub status: Option<String>,
    pub visibility: Option<String>,
    pub location: Option<Location>,
    pub estimated_duration: Option<u32>,
    pub notes: Option<String>,
}

/// Body of `PUT /presence/{id}`. Only provided fields change.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePresenceRequest {
    pub status: Option<String>,
    pub connectivity_status: Option<String>,
    pub visibility: Option<String>,
    pub location: Option<Location>,
    pub estimated_duration: Option<u32>,
    pub notes: Option<String>,
}

/// Query string of `GET /presence/nearby`. Coordinates stay optional here so
/// the handler can answer a missing value with its own 400 body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyQuery {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Kilometers.
    pub radius: Option<f64>,
    #[serde(default)]
    pub exclude_me: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub page: u64,
    pub page_size: u64,
    pub total_items: u64,
    pub has_next: bool,
}

impl<T> PageResponse<T> {
    pub fn new(items: Vec<T>, page: u64, page_size: u64, total_items: u64) -> Self {
        Self {
            has_next: page.saturating_mul(page_size) < total_items,
            items,
            page,
            page_size,
            total_items,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndPresenceResponse {
    pub ended: usize,
}

// -- Errors --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_next_tracks_remaining_items() {
        let page: PageResponse<u8> = PageResponse::new(vec![1, 2], 1, 2, 5);
        assert!(page.has_next);
        let last: PageResponse<u8> = PageResponse::new(vec![5], 3, 2, 5);
        assert!(!last.has_next);
    }

    #[test]
    fn create_request_keeps_raw_enum_strings() {
        let req: CreatePresenceRequest = serde_json::from_str(
            r#"{"breweryId":"brew-1","status":"dancing","visibility":"public","location":{"latitude":1.0,"longitude":2.0}}"#,
        )
        .unwrap();
        assert_eq!(req.status.as_deref(), Some("dancing"));
        assert_eq!(req.location.unwrap().accuracy, None);
    }
}
