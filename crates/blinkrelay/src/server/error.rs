//! HTTP error responses.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use tracing::{error, warn};

use crate::error::Error;

/// Error returned by request handlers.
///
/// Client errors become `400 {"error"}`. Downstream failures become
/// `500 {"success": false, "error"}`. Anything else is a `500 {"error"}`.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::malformed(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        let (status, body) = if self.0.is_client_error() {
            (StatusCode::BAD_REQUEST, json!({ "error": message }))
        } else if self.0.is_downstream_error() {
            warn!("Downstream request failed: {message}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "success": false, "error": message }),
            )
        } else {
            error!("Request failed: {message}");
            (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message }))
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(err: Error) -> (StatusCode, serde_json::Value) {
        let response = ApiError(err).into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_validation_is_bad_request() {
        let (status, body) = render(Error::missing("deviceId")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "deviceId required" }));
    }

    #[tokio::test]
    async fn test_downstream_is_server_error_with_success_flag() {
        let (status, body) = render(Error::downstream("webhook returned 502")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("502"));
    }

    #[tokio::test]
    async fn test_internal_is_server_error() {
        let (status, body) = render(Error::internal("boom")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.get("success").is_none());
    }
}
