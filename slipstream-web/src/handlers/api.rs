//! JSON API handlers: torrent summaries and shutdown.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use slipstream_core::InfoHash;
use slipstream_core::coordinator::TorrentSummary;

use crate::server::AppState;

/// GET `/` and GET `/files` - summaries of every live torrent.
pub async fn list_torrents(State(state): State<AppState>) -> Json<Vec<TorrentSummary>> {
    let summaries = state
        .coordinator
        .torrents()
        .iter()
        .filter_map(|record| record.summary())
        .collect();
    Json(summaries)
}

/// GET `/files/{infohash}` - summary of one torrent, or 404.
pub async fn torrent_details(
    State(state): State<AppState>,
    Path(info_hash): Path<String>,
) -> Response {
    let Ok(info_hash) = InfoHash::from_hex(&info_hash) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match state
        .coordinator
        .torrent(info_hash)
        .and_then(|record| record.summary())
    {
        Some(summary) => Json(summary).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET `/shutdown` - acknowledge, then begin the graceful drain.
pub async fn shutdown(State(state): State<AppState>) -> StatusCode {
    tracing::info!("shutdown requested over http");
    state.coordinator.trigger_shutdown();
    StatusCode::OK
}
