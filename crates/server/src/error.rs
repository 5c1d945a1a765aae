//! HTTP error responses as RFC7807 problem details.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use contested_shared::ProblemDetails;

#[derive(Debug)]
pub struct ApiError(pub ProblemDetails);

impl From<ProblemDetails> for ApiError {
    fn from(problem: ProblemDetails) -> Self {
        Self(problem)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [(header::CONTENT_TYPE, "application/problem+json")],
            Json(self.0),
        )
            .into_response()
    }
}

/// Fallback for unknown routes.
pub async fn not_found() -> ApiError {
    ProblemDetails::not_found("no such route").into()
}
