mod gateway;
mod health;
mod voice;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router: the gateway websocket plus the
/// REST surface under `/api/v10`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/version", get(health::version))
        .route("/gateway", get(crate::gateway::ws_upgrade))
        .nest("/api/v10", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Gateway
        .route("/gateway", get(gateway::get_gateway))
        .route("/gateway/bot", get(gateway::get_gateway_bot))
        .route("/gateway/sessions", get(gateway::list_sessions))
        .route("/gateway/broadcast", post(gateway::broadcast))
        // Voice
        .route("/voice/connections", get(voice::list_connections))
        .route("/voice/captures", get(voice::list_captures))
        .route(
            "/voice/captures/{channel_id}/quality",
            get(voice::get_capture_quality),
        )
}
