use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

/// Body of `POST /publish`. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub message: String,
}

/// Every reply `POST /publish` can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Published,
    InvalidRequest,
    PublishFailed,
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Reply::Published => (StatusCode::OK, json!({ "status": "Message published" })),
            Reply::InvalidRequest => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Invalid request format" }),
            ),
            Reply::PublishFailed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Failed to publish message" }),
            ),
        };
        (status, Json(body)).into_response()
    }
}
