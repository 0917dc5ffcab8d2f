use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::voice::VoiceConnection;
use crate::models::DataResponse;
use crate::state::AppState;
use crate::voice;
use crate::voice::capture::{AudioFormat, QualityReport};

#[derive(Debug, Deserialize)]
pub struct ConnectionFilter {
    pub channel_id: Option<String>,
}

pub async fn list_connections(
    State(state): State<AppState>,
    Query(filter): Query<ConnectionFilter>,
) -> Json<DataResponse<Vec<VoiceConnection>>> {
    let connections = match filter.channel_id.as_deref() {
        Some(channel_id) => voice::state::get_channel_connections(&state, channel_id),
        None => voice::state::list_connections(&state),
    };
    Json(DataResponse::new(connections))
}

#[derive(Debug, Serialize)]
pub struct ActiveCapture {
    pub channel_id: String,
    pub packet_count: u64,
    /// Whether every packet captured so far is Opus.
    pub opus: bool,
}

pub async fn list_captures(State(state): State<AppState>) -> Json<DataResponse<Vec<ActiveCapture>>> {
    let mut captures: Vec<ActiveCapture> = state
        .capture
        .active_channels()
        .into_iter()
        .filter_map(|channel_id| {
            let report = state.capture.analyze_quality(&channel_id)?;
            let opus = state.capture.validate_format(&channel_id, AudioFormat::Opus);
            Some(ActiveCapture {
                channel_id,
                packet_count: report.packet_count,
                opus,
            })
        })
        .collect();
    captures.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
    Json(DataResponse::new(captures))
}

pub async fn get_capture_quality(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Result<Json<DataResponse<QualityReport>>, AppError> {
    let report = state
        .capture
        .analyze_quality(&channel_id)
        .ok_or_else(|| AppError::NotFound("no active capture for channel".to_string()))?;
    Ok(Json(DataResponse::new(report)))
}
