use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    channels: Vec<String>,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let channels = state.manager.list_active().await.into_iter().collect();
    Json(HealthResponse {
        status: "ok",
        channels,
    })
}
