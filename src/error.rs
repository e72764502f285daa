use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::{json, Value};

use crate::upstream::TransportFailure;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Public ID is required")]
    MissingPublicId,

    #[error("Cloudinary credentials are not configured")]
    Misconfigured { missing: Vec<&'static str> },

    #[error("Cloudinary API rejected the request")]
    UpstreamRejected { status: u16, body: Bytes },

    #[error("Cloudinary API unreachable")]
    Transport {
        failure: TransportFailure,
        attempts: u32,
    },

    #[error("Cloudinary API returned a body that is not JSON")]
    InvalidUpstreamBody(String),

    #[error("Invalid upstream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingPublicId => StatusCode::BAD_REQUEST,
            ProxyError::Misconfigured { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::UpstreamRejected { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ProxyError::Transport { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::InvalidUpstreamBody(_) => StatusCode::BAD_GATEWAY,
            ProxyError::InvalidUrl(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            ProxyError::MissingPublicId => json!({ "error": self.to_string() }),
            ProxyError::Misconfigured { missing } => json!({
                "error": self.to_string(),
                "details": { "missing": missing },
            }),
            ProxyError::UpstreamRejected { status, body } => json!({
                "error": self.to_string(),
                "status": status,
                "body": upstream_body(body),
            }),
            ProxyError::Transport { failure, attempts } => json!({
                "error": self.to_string(),
                "details": {
                    "kind": failure.kind,
                    "code": failure.code,
                    "message": failure.message,
                    "attempts": attempts,
                },
            }),
            ProxyError::InvalidUpstreamBody(reason) => json!({
                "error": self.to_string(),
                "details": reason,
            }),
            ProxyError::InvalidUrl(e) => json!({
                "error": "Proxy is misconfigured",
                "details": e.to_string(),
            }),
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Upstream error bodies are echoed as JSON when they parse, else as text.
fn upstream_body(body: &Bytes) -> Value {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}
