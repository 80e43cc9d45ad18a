use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::domain::subscription::{
    SubscribeStatus, SubscriptionInfo, UnsubscribeOutcome,
};
use crate::server::AppState;
use crate::server::responses::ApiError;
use crate::subscriptions::SubscribeRequest;

#[derive(Debug, Deserialize)]
pub struct SubscribeBody {
    push: Option<PushFields>,
}

#[derive(Debug, Deserialize)]
struct PushFields {
    channel: Option<String>,
    signature: Option<String>,
    /// Issued as a number by the platform, but strings are accepted too.
    timestamp: Option<Value>,
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeBody {
    channel: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    status: SubscribeStatus,
    channel: String,
    expires_in: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionsResponse {
    subscriptions: Vec<SubscriptionInfo>,
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ApiError::BadRequest(format!("push.{field} is required"))),
    }
}

fn timestamp_text(value: Option<Value>) -> Result<String, ApiError> {
    match value {
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        _ => Err(ApiError::BadRequest(
            "push.timestamp is required".to_string(),
        )),
    }
}

impl TryFrom<SubscribeBody> for SubscribeRequest {
    type Error = ApiError;

    fn try_from(body: SubscribeBody) -> Result<Self, Self::Error> {
        let push = body
            .push
            .ok_or_else(|| ApiError::BadRequest("push object is required".to_string()))?;

        Ok(SubscribeRequest {
            channel: required(push.channel, "channel")?,
            signature: required(push.signature, "signature")?,
            timestamp: timestamp_text(push.timestamp)?,
            expires_in: push.expires_in,
        })
    }
}

pub async fn subscribe(
    State(state): State<AppState>,
    body: Result<Json<SubscribeBody>, JsonRejection>,
) -> Result<Json<SubscribeResponse>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let request = SubscribeRequest::try_from(body)?;

    let outcome = state.manager.subscribe(request).await?;
    info!(channel = %outcome.channel, status = ?outcome.status, "Subscribe request handled");

    Ok(Json(SubscribeResponse {
        status: outcome.status,
        channel: outcome.channel,
        expires_in: outcome.expires_in,
    }))
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    body: Result<Json<UnsubscribeBody>, JsonRejection>,
) -> Result<Json<UnsubscribeOutcome>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let channel = match body.channel {
        Some(channel) if !channel.trim().is_empty() => channel,
        _ => return Err(ApiError::BadRequest("channel is required".to_string())),
    };

    Ok(Json(state.manager.unsubscribe(&channel).await))
}

pub async fn list_subscriptions(State(state): State<AppState>) -> Json<SubscriptionsResponse> {
    Json(SubscriptionsResponse {
        subscriptions: state.manager.snapshot().await,
    })
}
