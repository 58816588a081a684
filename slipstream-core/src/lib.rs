//! Slipstream core - on-demand streaming coordination over a BitTorrent swarm
//!
//! This crate contains the streaming coordinator that sits above an external
//! swarm engine: per-file piece scheduling (look-ahead windows and deadline
//! ladders), the read/seek gate that blocks readers until pieces are local,
//! the connection-activity lifecycle (auto-pause, auto-remove, resume on
//! demand), and the alert loop that folds engine events into that state.
//!
//! The BitTorrent wire protocol itself lives behind the [`swarm::SwarmClient`]
//! trait; [`swarm::sim::SimSwarmClient`] is an in-process implementation used
//! by tests and demo runs.

#![deny(missing_docs)]
#![deny(clippy::missing_errors_doc)]
#![warn(clippy::too_many_lines)]

pub mod analytics;
pub mod config;
pub mod coordinator;
pub mod streaming;
pub mod swarm;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use analytics::EventSink;
pub use config::SlipstreamConfig;
pub use coordinator::{Coordinator, CoordinatorError, TorrentRecord};
pub use streaming::{FileView, StreamError};
pub use swarm::{Alert, InfoHash, SwarmClient, SwarmError, SwarmHandle};
pub use tracing_setup::{CliLogLevel, init_tracing};
