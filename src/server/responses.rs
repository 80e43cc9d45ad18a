use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::subscriptions::SubscriptionError;

/// Body of every subscribe failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureBody {
    status: &'static str,
    channel: String,
    error: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Errors returned by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Invalid or missing signature")]
    Unauthorized,

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Subscription(err) => match err {
                SubscriptionError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                SubscriptionError::Rejected { .. } | SubscriptionError::Bus { .. } => {
                    StatusCode::BAD_GATEWAY
                }
                SubscriptionError::Cancelled { .. } => StatusCode::CONFLICT,
            },
        }
    }
}

fn failed_channel(err: &SubscriptionError) -> &str {
    match err {
        SubscriptionError::Timeout { channel, .. }
        | SubscriptionError::Rejected { channel, .. }
        | SubscriptionError::Bus { channel, .. }
        | SubscriptionError::Cancelled { channel } => channel,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Subscription(err) => {
                let body = FailureBody {
                    status: "failed",
                    channel: failed_channel(err).to_string(),
                    error: err.to_string(),
                };
                (status, Json(body)).into_response()
            }
            _ => (status, Json(ErrorBody { error: self.to_string() })).into_response(),
        }
    }
}
