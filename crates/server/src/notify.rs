//! Notification ingress: server-side code pushes a payload to one user.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use contested_shared::{user_channel, ProblemDetails, ServerFrame};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;
use crate::state::AppState;

pub const NOTIFY_KEY_HEADER: &str = "x-contested-key";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyRequest {
    pub user_id: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyResponse {
    pub channel: String,
    /// Live subscribers the notification reached.
    pub delivered: usize,
}

/// Publish a `notification` frame on the user's channel
pub async fn notify(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<NotifyRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<NotifyResponse>), ApiError> {
    if let Some(expected) = state.notify_key.as_deref() {
        let provided = headers
            .get(NOTIFY_KEY_HEADER)
            .and_then(|value| value.to_str().ok());
        if provided != Some(expected) {
            tracing::warn!("notify rejected: bad or missing key");
            return Err(ProblemDetails::unauthorized(format!(
                "missing or invalid {NOTIFY_KEY_HEADER} header"
            ))
            .into());
        }
    }

    let Json(request) = body.map_err(|e| ApiError(ProblemDetails::bad_request(e.body_text())))?;
    let user_id = request.user_id.trim();
    if user_id.is_empty() {
        return Err(ProblemDetails::bad_request("user_id must not be empty").into());
    }

    let channel = user_channel(user_id);
    let frame = ServerFrame::Notification {
        channel: channel.clone(),
        payload: request.payload,
        ts: Utc::now(),
    }
    .encode()
    .map_err(|e| ApiError(ProblemDetails::bad_request(e.to_string())))?;

    let delivered = state.channels.publish(&channel, frame).await;
    tracing::info!(%channel, delivered, "notification published");
    Ok((StatusCode::ACCEPTED, Json(NotifyResponse { channel, delivered })))
}
