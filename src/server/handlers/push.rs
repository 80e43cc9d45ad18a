use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::events::InboundEnvelope;
use crate::server::AppState;
use crate::server::responses::ApiError;

pub const SIGNATURE_HEADER: &str = "x-signature";

const SUBSCRIPTION_VERIFICATION: &str = "subscription_verification";
const HOOK_VERIFY: &str = "hook.verify";

#[derive(Debug, Serialize)]
struct ChallengeResponse {
    status: &'static str,
    challenge: Value,
}

/// Challenge echoed back for a verification handshake, if `body` is one.
fn handshake_challenge(body: &Value) -> Option<&Value> {
    match body.get("type").and_then(Value::as_str)? {
        SUBSCRIPTION_VERIFICATION => body.get("challenge"),
        HOOK_VERIFY => body.get("challenge").or_else(|| body.get("code")),
        _ => None,
    }
}

pub async fn podio_push(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))?;

    if let Some(challenge) = handshake_challenge(&body) {
        info!("Answering webhook verification handshake");
        let response = ChallengeResponse {
            status: "OK",
            challenge: challenge.clone(),
        };
        return Ok(Json(response).into_response());
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    if !state.verifier.verify(&body, signature) {
        warn!(
            signature_present = signature.is_some(),
            secret_configured = state.verifier.has_secret(),
            "Rejected webhook with invalid signature"
        );
        return Err(ApiError::Unauthorized);
    }

    debug!(
        event_type = body.get("type").and_then(|v| v.as_str()).unwrap_or("-"),
        "Webhook accepted"
    );
    state.relay.relay(InboundEnvelope::from_webhook(body));

    Ok("OK".into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handshake_detection() {
        let verification = json!({"type": "subscription_verification", "challenge": "xyz"});
        assert_eq!(handshake_challenge(&verification), Some(&json!("xyz")));

        let hook = json!({"type": "hook.verify", "hook_id": 7, "code": "1234"});
        assert_eq!(handshake_challenge(&hook), Some(&json!("1234")));
    }

    #[test]
    fn test_regular_events_are_not_handshakes() {
        assert!(handshake_challenge(&json!({"type": "item.create", "item_id": 1})).is_none());
        assert!(handshake_challenge(&json!({"type": "subscription_verification"})).is_none());
        assert!(handshake_challenge(&json!({"challenge": "xyz"})).is_none());
        assert!(handshake_challenge(&json!([1, 2, 3])).is_none());
    }
}
