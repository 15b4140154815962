//! REST endpoints beside the real-time channel.
//!
//! `GET /messages/{counterpart_id}` returns the conversation between the
//! caller and the counterpart in ascending order. The caller is named by
//! the `X-Identity` header, set by the authentication proxy in front of
//! the server.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use wingchat_proto::Identity;
use wingchat_proto::message::Message;

use crate::server::ServerState;

/// Header carrying the authenticated caller identity.
pub const IDENTITY_HEADER: &str = "x-identity";

/// Errors returned by the REST endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No usable caller identity on the request.
    #[error("missing or empty {IDENTITY_HEADER} header")]
    MissingIdentity,
    /// The path named an empty counterpart.
    #[error("counterpart identity must not be empty")]
    InvalidCounterpart,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::MissingIdentity => StatusCode::UNAUTHORIZED,
            Self::InvalidCounterpart => StatusCode::BAD_REQUEST,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Result alias for REST handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Resolves the caller identity from the request headers.
fn caller(headers: &HeaderMap) -> ApiResult<Identity> {
    headers
        .get(IDENTITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(Identity::new)
        .filter(|id| !id.is_blank())
        .ok_or(ApiError::MissingIdentity)
}

/// `GET /messages/{counterpart_id}`.
pub async fn get_messages(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(counterpart_id): Path<String>,
) -> ApiResult<Json<Vec<Message>>> {
    let caller = caller(&headers)?;
    let counterpart = Identity::new(counterpart_id);
    if counterpart.is_blank() {
        return Err(ApiError::InvalidCounterpart);
    }
    let history = state.conversations.history(&caller, &counterpart);
    tracing::debug!(
        identity = %caller,
        counterpart = %counterpart,
        count = history.len(),
        "history requested"
    );
    Ok(Json(history))
}

/// `GET /health`.
pub async fn health() -> &'static str {
    "ok"
}
