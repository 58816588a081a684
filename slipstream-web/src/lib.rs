//! Slipstream Web - HTTP surface over the streaming coordinator
//!
//! Serves torrent summaries as JSON and torrent payload files as
//! range-capable byte streams, and hosts the `/video` magnet-to-stream
//! endpoint with its preview probe and client-polling redirect.

pub mod handlers;
pub mod server;

// Re-export main types
pub use server::{AppState, router, run_server};
