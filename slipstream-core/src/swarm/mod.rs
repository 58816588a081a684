//! Contract between the streaming coordinator and an external swarm engine.
//!
//! The engine owns the BitTorrent protocol: piece exchange, DHT, trackers,
//! encryption, disk I/O. This module defines the capability surface the
//! coordinator needs from it - add/remove torrents, piece priorities and
//! deadlines, piece availability queries, and an ordered alert stream.
//! [`sim::SimSwarmClient`] implements the contract in-process for tests and
//! demo runs; production deployments bind the trait to a real engine.

pub mod magnet;
pub mod sim;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::SwarmConfig;

/// 20-byte identifier of a torrent.
///
/// Canonical rendering is uppercase hex; that form keys the coordinator
/// registry and appears in every JSON surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates an `InfoHash` from its raw 20 bytes.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns a reference to the underlying 20 bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parses a 40-character hex string, in either case.
    ///
    /// # Errors
    /// Returns [`SwarmError::InvalidInfoHash`] when the string is not
    /// 40 hex characters.
    pub fn from_hex(hex: &str) -> Result<Self, SwarmError> {
        if hex.len() != 40 {
            return Err(SwarmError::InvalidInfoHash {
                reason: format!("expected 40 hex characters, got {}", hex.len()),
            });
        }
        let bytes = data_encoding::HEXLOWER_PERMISSIVE
            .decode(hex.to_ascii_lowercase().as_bytes())
            .map_err(|e| SwarmError::InvalidInfoHash {
                reason: e.to_string(),
            })?;
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&bytes);
        Ok(Self(hash))
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

/// Opaque reference to a torrent registered with the swarm engine.
///
/// Cheap to copy; minted by the engine when a torrent is added and resolved
/// internally by the trait implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwarmHandle {
    info_hash: InfoHash,
}

impl SwarmHandle {
    /// Creates a handle for the given torrent.
    pub fn new(info_hash: InfoHash) -> Self {
        Self { info_hash }
    }

    /// The torrent this handle refers to.
    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }
}

/// Single file within a torrent, as reported with the metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the torrent save directory.
    pub path: PathBuf,
    /// File size in bytes.
    pub size: u64,
    /// Byte offset of this file within the concatenated torrent payload.
    pub offset: u64,
}

/// Piece geometry and file table, available once metadata arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentLayout {
    /// Piece length in bytes.
    pub piece_length: u32,
    /// Total number of pieces in the torrent.
    pub num_pieces: u32,
    /// Files in torrent order.
    pub files: Vec<FileEntry>,
}

impl TorrentLayout {
    /// Sum of all file sizes.
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Engine-reported download state of a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentState {
    /// Waiting for a file check slot.
    QueuedForChecking,
    /// Verifying existing payload data.
    CheckingFiles,
    /// Fetching metadata from the swarm.
    DownloadingMetadata,
    /// Downloading payload pieces.
    Downloading,
    /// All wanted pieces downloaded.
    Finished,
    /// Complete and uploading to peers.
    Seeding,
    /// Allocating payload files on disk.
    Allocating,
    /// Verifying resume data.
    CheckingResumeData,
    /// State not recognized by the adapter.
    Unknown,
}

impl TorrentState {
    /// Numeric code used in JSON summaries.
    pub fn code(self) -> i32 {
        match self {
            TorrentState::QueuedForChecking => 0,
            TorrentState::CheckingFiles => 1,
            TorrentState::DownloadingMetadata => 2,
            TorrentState::Downloading => 3,
            TorrentState::Finished => 4,
            TorrentState::Seeding => 5,
            TorrentState::Allocating => 6,
            TorrentState::CheckingResumeData => 7,
            TorrentState::Unknown => -1,
        }
    }
}

impl fmt::Display for TorrentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TorrentState::QueuedForChecking => "Queued for checking",
            TorrentState::CheckingFiles => "Checking files",
            TorrentState::DownloadingMetadata => "Downloading metadata",
            TorrentState::Downloading => "Downloading",
            TorrentState::Finished => "Finished",
            TorrentState::Seeding => "Seeding",
            TorrentState::Allocating => "Allocating",
            TorrentState::CheckingResumeData => "Checking resume data",
            TorrentState::Unknown => "Unknown",
        };
        write!(f, "{label}")
    }
}

/// Snapshot of engine-side torrent status.
#[derive(Debug, Clone)]
pub struct TorrentStatus {
    /// Torrent display name; empty before metadata.
    pub name: String,
    /// Directory the payload is saved under.
    pub save_path: PathBuf,
    /// Current download state.
    pub state: TorrentState,
    /// Whether the torrent is paused.
    pub paused: bool,
    /// Completion in `[0, 1]`.
    pub progress: f32,
    /// Download rate in bytes per second.
    pub download_rate: u32,
    /// Upload rate in bytes per second.
    pub upload_rate: u32,
    /// Connected seeds.
    pub num_seeds: u32,
    /// Seeds known to exist in the swarm.
    pub num_complete: u32,
    /// Connected peers.
    pub num_peers: u32,
    /// Downloaders known to exist in the swarm.
    pub num_incomplete: u32,
}

/// Socket kind reported by listen alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenKind {
    /// Plain TCP listener.
    Tcp,
    /// TLS TCP listener.
    TcpSsl,
    /// UDP (uTP) listener.
    Udp,
}

/// Asynchronous event emitted by the swarm engine.
///
/// Alerts are consumed in the order the engine produced them; the
/// coordinator's alert dispatcher is the single consumer.
#[derive(Debug, Clone)]
pub enum Alert {
    /// A torrent was registered with the session.
    TorrentAdded {
        /// Handle of the new torrent.
        handle: SwarmHandle,
    },
    /// Metadata (file table and piece geometry) became available.
    MetadataReceived {
        /// Handle of the torrent.
        handle: SwarmHandle,
    },
    /// The torrent was paused.
    TorrentPaused {
        /// Handle of the torrent.
        handle: SwarmHandle,
    },
    /// The torrent was resumed.
    TorrentResumed {
        /// Handle of the torrent.
        handle: SwarmHandle,
    },
    /// All wanted pieces finished downloading.
    TorrentFinished {
        /// Handle of the torrent.
        handle: SwarmHandle,
    },
    /// The torrent was removed from the session.
    TorrentRemoved {
        /// Identifier of the removed torrent; the handle is dead by now.
        info_hash: InfoHash,
    },
    /// Payload files were deleted after removal.
    TorrentDeleted {
        /// Identifier of the torrent.
        info_hash: InfoHash,
    },
    /// Payload deletion failed after removal.
    TorrentDeleteFailed {
        /// Identifier of the torrent.
        info_hash: InfoHash,
    },
    /// A listen socket came up.
    ListenSucceeded {
        /// Endpoint the engine bound, e.g. `0.0.0.0:6881`.
        endpoint: String,
        /// Socket kind.
        kind: ListenKind,
    },
    /// Synchronous add acknowledgement; superseded by [`Alert::TorrentAdded`].
    AddTorrent {
        /// Handle of the torrent.
        handle: SwarmHandle,
    },
    /// Initial file check completed.
    TorrentChecked {
        /// Handle of the torrent.
        handle: SwarmHandle,
    },
    /// Download state transition.
    StateChanged {
        /// Handle of the torrent.
        handle: SwarmHandle,
    },
    /// A downloaded piece failed hash verification and will be re-fetched.
    HashFailed {
        /// Handle of the torrent.
        handle: SwarmHandle,
        /// Index of the failed piece.
        piece: u32,
    },
    /// The disk cache was flushed.
    CacheFlushed {
        /// Handle of the torrent.
        handle: SwarmHandle,
    },
    /// A peer told us our external address.
    ExternalIp {
        /// Reported address.
        address: String,
    },
    /// A port-mapping attempt failed.
    PortmapError {
        /// Engine-provided description.
        message: String,
    },
    /// A tracker announce failed.
    TrackerError {
        /// Engine-provided description.
        message: String,
    },
    /// A UDP-level error occurred.
    UdpError {
        /// Engine-provided description.
        message: String,
    },
    /// Any alert the adapter does not model explicitly.
    Other {
        /// Alert category name.
        what: String,
        /// Engine-provided description.
        message: String,
    },
}

/// Errors surfaced by swarm engine operations.
#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    /// Operation issued before `start` or after `stop`.
    #[error("swarm session is not running")]
    NotStarted,

    /// The handle does not refer to a live torrent.
    #[error("torrent {info_hash} is not registered")]
    UnknownTorrent {
        /// Identifier the operation was issued for.
        info_hash: InfoHash,
    },

    /// The magnet link could not be parsed.
    #[error("invalid magnet link: {reason}")]
    InvalidMagnet {
        /// Description of the parse failure.
        reason: String,
    },

    /// An info-hash string could not be decoded.
    #[error("invalid info hash: {reason}")]
    InvalidInfoHash {
        /// Description of the decode failure.
        reason: String,
    },

    /// Filesystem failure inside the engine.
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

/// Capability surface the coordinator requires from a swarm engine.
///
/// Add and remove are asynchronous submissions: completion is observed as
/// [`Alert::TorrentAdded`] and [`Alert::TorrentRemoved`] (plus
/// [`Alert::TorrentDeleted`] / [`Alert::TorrentDeleteFailed`] when payload
/// deletion was requested). Priority and deadline writes are fire-and-forget
/// scheduling hints; they are not ordered with respect to `have_piece`
/// reads.
#[async_trait::async_trait]
pub trait SwarmClient: Send + Sync {
    /// Starts the engine session and applies the given settings.
    ///
    /// # Errors
    /// Implementation-defined; typically listen socket or proxy failures.
    async fn start(&self, config: &SwarmConfig) -> Result<(), SwarmError>;

    /// Stops the engine session. Torrents should be removed first.
    ///
    /// # Errors
    /// Implementation-defined.
    async fn stop(&self) -> Result<(), SwarmError>;

    /// Submits an asynchronous add for the given magnet link.
    ///
    /// Adding an already-registered torrent is a no-op. The torrent becomes
    /// visible to the coordinator when [`Alert::TorrentAdded`] arrives.
    ///
    /// # Errors
    /// Returns [`SwarmError::InvalidMagnet`] for unparseable links and
    /// [`SwarmError::NotStarted`] outside a session.
    async fn add_torrent(&self, magnet_link: &str, save_dir: &Path) -> Result<(), SwarmError>;

    /// Submits an asynchronous removal, optionally deleting payload files.
    ///
    /// # Errors
    /// Returns [`SwarmError::UnknownTorrent`] for dead handles.
    async fn remove_torrent(&self, handle: SwarmHandle, delete_files: bool)
    -> Result<(), SwarmError>;

    /// Pauses the torrent. Completion is observed as [`Alert::TorrentPaused`].
    ///
    /// # Errors
    /// Returns [`SwarmError::UnknownTorrent`] for dead handles.
    async fn pause(&self, handle: SwarmHandle) -> Result<(), SwarmError>;

    /// Resumes the torrent. Completion is observed as [`Alert::TorrentResumed`].
    ///
    /// # Errors
    /// Returns [`SwarmError::UnknownTorrent`] for dead handles.
    async fn resume(&self, handle: SwarmHandle) -> Result<(), SwarmError>;

    /// Whether the piece is fully downloaded and verified locally.
    fn have_piece(&self, handle: SwarmHandle, piece: u32) -> bool;

    /// Current priority of the piece, 0 (skip) through 7 (highest).
    fn piece_priority(&self, handle: SwarmHandle, piece: u32) -> u8;

    /// Sets the priority of the piece, 0 (skip) through 7 (highest).
    fn set_piece_priority(&self, handle: SwarmHandle, piece: u32, priority: u8);

    /// Asks the engine to complete the piece within `deadline` from now.
    ///
    /// `flags` is passed through to the engine verbatim; the coordinator
    /// always passes 0.
    fn set_piece_deadline(&self, handle: SwarmHandle, piece: u32, deadline: Duration, flags: u32);

    /// Drops every outstanding piece deadline on the torrent.
    fn clear_piece_deadlines(&self, handle: SwarmHandle);

    /// File table and piece geometry; `None` until metadata arrives.
    fn torrent_files(&self, handle: SwarmHandle) -> Option<TorrentLayout>;

    /// Status snapshot; `None` for dead handles.
    fn status(&self, handle: SwarmHandle) -> Option<TorrentStatus>;

    /// Waits up to `timeout` for the next alert.
    ///
    /// Alerts are delivered in production order. Returns `None` on timeout.
    async fn next_alert(&self, timeout: Duration) -> Option<Alert>;
}
