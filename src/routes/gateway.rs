use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::Json;
use serde::Deserialize;

use crate::error::AppError;
use crate::gateway::events::{Dispatch, GATEWAY_VERSION};
use crate::gateway::hub::SessionInfo;
use crate::models::DataResponse;
use crate::state::AppState;

fn gateway_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    format!("ws://{host}/gateway?v={GATEWAY_VERSION}&encoding=json")
}

pub async fn get_gateway(headers: HeaderMap) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "data": {
            "url": gateway_url(&headers)
        }
    }))
}

pub async fn get_gateway_bot(headers: HeaderMap) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "data": {
            "url": gateway_url(&headers),
            "shards": 1,
            "session_start_limit": {
                "total": 1000,
                "remaining": 999,
                "reset_after": 14400000,
                "max_concurrency": 1
            }
        }
    }))
}

pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<DataResponse<Vec<SessionInfo>>>, AppError> {
    let sessions = state.hub.sessions().await?;
    Ok(Json(DataResponse::new(sessions)))
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub t: String,
    #[serde(default)]
    pub d: serde_json::Value,
}

/// Push an arbitrary dispatch to every authenticated gateway session.
pub async fn broadcast(
    State(state): State<AppState>,
    Json(body): Json<BroadcastRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let event_type = body.t.trim();
    if event_type.is_empty() {
        return Err(AppError::BadRequest("event type must not be empty".to_string()));
    }

    state
        .hub
        .broadcast(Dispatch::Custom {
            event_type: event_type.to_string(),
            data: body.d,
        })
        .await?;
    tracing::debug!(event = %event_type, "broadcast requested");

    Ok(Json(serde_json::json!({ "data": { "t": event_type } })))
}
