//! Streaming handlers: the magnet-to-stream `/video` endpoint and direct
//! file streaming under `/files/{infohash}/{path}`.

use std::io::SeekFrom;
use std::path::{Path as FsPath, PathBuf};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Json, Redirect, Response};
use bytes::Bytes;
use futures::{Stream, stream};
use serde::Deserialize;
use slipstream_core::coordinator::ConnectionGuard;
use slipstream_core::swarm::magnet;
use slipstream_core::{FileView, InfoHash};

use super::range::parse_range_header;
use crate::server::AppState;

/// Chunk size of streamed response bodies.
const STREAM_CHUNK_SIZE: usize = 256 * 1024;

/// Wait before redirecting a client that polls for a not-yet-ready torrent.
const RETRY_REDIRECT_DELAY: Duration = Duration::from_secs(2);

/// Content type for a payload file, by extension.
///
/// The containers players ask us for get real video types; everything else
/// is an opaque download.
pub fn content_type_for(path: &FsPath) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("avi") => "video/avi",
        Some("mkv") => "video/x-matroska",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Query parameters of the `/video` endpoint.
#[derive(Debug, Deserialize)]
pub struct VideoQuery {
    /// Magnet link of the torrent to stream.
    pub magnet_link: Option<String>,
    /// Save directory; defaults to the configured download dir.
    pub download_dir: Option<PathBuf>,
    /// `"1"` turns the request into a readiness probe.
    pub preview: Option<String>,
    /// Initial look-ahead window as a fraction of the file's pieces.
    pub look_ahead: Option<f32>,
    /// Opaque analytics payload forwarded with lifecycle events.
    pub mixpanel_data: Option<String>,
}

/// GET `/video` - add a torrent from a magnet link and stream its largest
/// file, or report readiness when `preview=1`.
///
/// While the torrent or its metadata is still missing, a probe answers
/// `{"video_ready": false}` and a streaming request answers a delayed 307
/// back to itself, so dumb clients can just follow redirects until playback
/// starts.
pub async fn video(
    State(state): State<AppState>,
    uri: Uri,
    Query(query): Query<VideoQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(magnet_link) = query.magnet_link.as_deref() else {
        return (StatusCode::BAD_REQUEST, "Missing Magnet link").into_response();
    };
    let Ok(parsed) = magnet::parse(magnet_link) else {
        return (StatusCode::BAD_REQUEST, "Invalid Magnet link").into_response();
    };

    let config = state.coordinator.config();
    let save_dir = query
        .download_dir
        .clone()
        .unwrap_or_else(|| config.storage.download_dir.clone());
    let look_ahead = query
        .look_ahead
        .unwrap_or(config.lifecycle.default_look_ahead);
    let tag = query.mixpanel_data.clone().unwrap_or_default();
    let preview = query.preview.as_deref() == Some("1");

    if let Err(e) = state
        .coordinator
        .add_torrent(magnet_link, &save_dir, parsed.info_hash, look_ahead, &tag)
        .await
    {
        tracing::warn!("add of {} failed: {e}", parsed.info_hash);
    }

    // The registry entry appears only once the engine acknowledges the add.
    let Some(record) = state.coordinator.torrent(parsed.info_hash) else {
        return not_ready(preview, &uri).await;
    };
    let Ok(guard) = state.coordinator.register_connection(parsed.info_hash).await else {
        return not_ready(preview, &uri).await;
    };
    let Some(view) = record.largest_file() else {
        return not_ready(preview, &uri).await;
    };

    if preview {
        return Json(serde_json::json!({ "video_ready": view.is_video_ready() })).into_response();
    }
    stream_view(view, record.save_dir(), guard, &headers).await
}

/// GET `/files/{infohash}/{path}` - stream one payload file.
pub async fn stream_file(
    State(state): State<AppState>,
    Path((info_hash, file_path)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let Ok(info_hash) = InfoHash::from_hex(&info_hash) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(record) = state.coordinator.torrent(info_hash) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(view) = record.file_by_path(&file_path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Ok(guard) = state.coordinator.register_connection(info_hash).await else {
        return StatusCode::NOT_FOUND.into_response();
    };

    tracing::info!("serving file {file_path}");
    stream_view(view, record.save_dir(), guard, &headers).await
}

async fn not_ready(preview: bool, uri: &Uri) -> Response {
    if preview {
        return Json(serde_json::json!({ "video_ready": false })).into_response();
    }
    // Client-polling pattern: hold the request briefly, then send the
    // player back to the same URL.
    tokio::time::sleep(RETRY_REDIRECT_DELAY).await;
    Redirect::temporary(&uri.to_string()).into_response()
}

/// Opens the view and streams it, honouring a `Range` header.
async fn stream_view(
    mut view: FileView,
    save_dir: &FsPath,
    guard: ConnectionGuard,
    headers: &HeaderMap,
) -> Response {
    if let Err(e) = view.open(save_dir).await {
        tracing::warn!("open of {} failed: {e}", view.path().display());
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to open file").into_response();
    }

    let file_size = view.size();
    let content_type = content_type_for(view.path());

    match parse_range_header(headers) {
        Some((start, end)) => {
            let end = end.unwrap_or_else(|| file_size.saturating_sub(1));
            if start >= file_size || end >= file_size || start > end {
                return (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    [(header::CONTENT_RANGE, format!("bytes */{file_size}"))],
                )
                    .into_response();
            }
            let length = end - start + 1;

            if start > 0 {
                // A ranged start is a user scrub; the seek gate runs
                // time-critically before a single byte is produced.
                if let Err(e) = view.seek(SeekFrom::Start(start)).await {
                    tracing::warn!("seek to {start} in {} failed: {e}", view.path().display());
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            }

            let body = Body::from_stream(view_stream(view, length, guard));
            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, length.to_string())
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {start}-{end}/{file_size}"),
                )
                .header(header::ACCEPT_RANGES, "bytes")
                .header(header::CACHE_CONTROL, "no-cache")
                .body(body)
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        None => {
            let body = Body::from_stream(view_stream(view, file_size, guard));
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, file_size.to_string())
                .header(header::ACCEPT_RANGES, "bytes")
                .header(header::CACHE_CONTROL, "no-cache")
                .body(body)
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

/// Chunked body over a file view.
///
/// The view and the connection guard live inside the stream state, so the
/// connection count follows the actual response lifetime: it drops when the
/// body completes or the client disconnects. An error item terminates the
/// stream, which aborts the response mid-transfer.
fn view_stream(
    view: FileView,
    length: u64,
    guard: ConnectionGuard,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
    stream::unfold(
        (view, guard, 0u64),
        move |(mut view, guard, sent)| async move {
            if sent >= length {
                return None;
            }
            let chunk = STREAM_CHUNK_SIZE.min((length - sent) as usize);
            let mut buf = vec![0u8; chunk];
            match view.read(&mut buf).await {
                Ok(0) => None,
                Ok(read) => {
                    buf.truncate(read);
                    Some((Ok(Bytes::from(buf)), (view, guard, sent + read as u64)))
                }
                Err(e) => Some((Err(std::io::Error::other(e)), (view, guard, length))),
            }
        },
    )
}
