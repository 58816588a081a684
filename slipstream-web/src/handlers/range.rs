//! HTTP Range header handling for video streaming.
//!
//! Supports the single-range `bytes=start-end` form players actually send.
//! Suffix ranges (`bytes=-N`) and multi-range requests fall back to a full
//! response.

use axum::http::{HeaderMap, header};

/// Parses a `Range` header into `(start, Option<end>)`.
///
/// Returns `None` when the header is absent or not a usable
/// `bytes=start[-end]` range, in which case the caller serves the full
/// file.
pub fn parse_range_header(headers: &HeaderMap) -> Option<(u64, Option<u64>)> {
    let value = headers.get(header::RANGE)?.to_str().ok()?;
    let spec = value.strip_prefix("bytes=")?;

    let (start, end) = spec.split_once('-')?;
    let start = start.parse::<u64>().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse::<u64>().ok()?)
    };
    Some((start, end))
}
