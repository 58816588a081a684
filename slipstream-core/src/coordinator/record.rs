//! Per-torrent registry state: connection tracking and file views.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::streaming::FileView;
use crate::swarm::{InfoHash, SwarmClient, SwarmHandle};

/// Capacity of the per-torrent connection signal channel.
const SIGNAL_BUFFER: usize = 16;

/// Connection-activity state of a torrent.
///
/// `active` is written only by the lifecycle watcher (the single consumer of
/// the signal channel), `paused` only by the alert dispatcher, `served` once
/// by whichever reader crosses the threshold first. Everyone else just
/// reads.
pub struct ConnectionInfo {
    active: AtomicU32,
    served: AtomicBool,
    paused: AtomicBool,
    signal: mpsc::Sender<i32>,
}

impl ConnectionInfo {
    /// Creates the connection state together with the signal receiver the
    /// lifecycle watcher will consume.
    pub(crate) fn channel() -> (Arc<Self>, mpsc::Receiver<i32>) {
        let (signal, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        let info = Arc::new(Self {
            active: AtomicU32::new(0),
            served: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            signal,
        });
        (info, signal_rx)
    }

    /// Number of connections currently streaming from this torrent.
    pub fn active_count(&self) -> u32 {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn set_active(&self, count: u32) {
        self.active.store(count, Ordering::SeqCst);
    }

    /// Whether at least 10 MiB have been delivered to some client.
    pub fn is_served(&self) -> bool {
        self.served.load(Ordering::SeqCst)
    }

    /// Flips the served flag; returns true only on the first transition.
    pub(crate) fn mark_served(&self) -> bool {
        !self.served.swap(true, Ordering::SeqCst)
    }

    /// Whether the engine reports the torrent paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Updates the paused flag; returns true when the value changed.
    pub(crate) fn set_paused(&self, paused: bool) -> bool {
        self.paused.swap(paused, Ordering::SeqCst) != paused
    }

    /// Sender half of the connection signal channel.
    pub(crate) fn signal(&self) -> &mpsc::Sender<i32> {
        &self.signal
    }
}

/// Aggregate of a swarm handle, its file views and connection state.
///
/// Created by the alert dispatcher on `TorrentAdded`; `files` stays empty
/// until `MetadataReceived`. Destroyed when `TorrentRemoved` drops it from
/// the registry.
pub struct TorrentRecord {
    swarm: Arc<dyn SwarmClient>,
    info_hash: InfoHash,
    handle: SwarmHandle,
    save_dir: PathBuf,
    look_ahead_ratio: f32,
    analytics_tag: String,
    connection: Arc<ConnectionInfo>,
    files: RwLock<Vec<FileView>>,
}

impl TorrentRecord {
    pub(crate) fn new(
        swarm: Arc<dyn SwarmClient>,
        handle: SwarmHandle,
        save_dir: PathBuf,
        look_ahead_ratio: f32,
        analytics_tag: String,
        connection: Arc<ConnectionInfo>,
    ) -> Self {
        Self {
            swarm,
            info_hash: handle.info_hash(),
            handle,
            save_dir,
            look_ahead_ratio,
            analytics_tag,
            connection,
            files: RwLock::new(Vec::new()),
        }
    }

    /// Identifier of this torrent.
    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// Engine handle of this torrent.
    pub fn handle(&self) -> SwarmHandle {
        self.handle
    }

    /// Directory the payload is saved under.
    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// Look-ahead ratio requested when the torrent was added.
    pub fn look_ahead_ratio(&self) -> f32 {
        self.look_ahead_ratio
    }

    /// Opaque analytics payload supplied with the add request.
    pub fn analytics_tag(&self) -> &str {
        &self.analytics_tag
    }

    /// Connection-activity state.
    pub fn connection(&self) -> &Arc<ConnectionInfo> {
        &self.connection
    }

    /// Whether metadata has arrived and file views exist.
    pub fn has_metadata(&self) -> bool {
        !self.files.read().is_empty()
    }

    pub(crate) fn set_files(&self, views: Vec<FileView>) {
        *self.files.write() = views;
    }

    /// Detached view of the largest file, if metadata has arrived.
    ///
    /// The largest file of a video torrent is the video.
    pub fn largest_file(&self) -> Option<FileView> {
        self.files
            .read()
            .iter()
            .max_by_key(|view| view.size())
            .map(FileView::detach)
    }

    /// Detached view of the file with the given relative path.
    pub fn file_by_path(&self, path: &str) -> Option<FileView> {
        self.files
            .read()
            .iter()
            .find(|view| view.path() == Path::new(path))
            .map(FileView::detach)
    }

    /// JSON summary of this torrent, `None` once the handle is dead.
    pub fn summary(&self) -> Option<TorrentSummary> {
        let status = self.swarm.status(self.handle)?;
        let layout = self.swarm.torrent_files(self.handle);

        let files = self
            .files
            .read()
            .iter()
            .map(|view| FileSummary {
                path: view.path().display().to_string(),
                size: view.size(),
                complete_pieces: view.complete_pieces(),
                total_pieces: view.total_pieces(),
                piece_map: view.piece_map(),
            })
            .collect();

        Some(TorrentSummary {
            name: status.name,
            info_hash: self.info_hash.to_string(),
            download_dir: self.save_dir.display().to_string(),
            state: status.state.code(),
            state_str: status.state.to_string(),
            paused: status.paused,
            size: layout.as_ref().map(|l| l.total_size()).unwrap_or(0),
            pieces: layout.map(|l| l.num_pieces).unwrap_or(0),
            progress: status.progress,
            download_rate: status.download_rate / 1024,
            upload_rate: status.upload_rate / 1024,
            seeds: status.num_seeds,
            total_seeds: status.num_complete,
            peers: status.num_peers,
            total_peers: status.num_incomplete,
            files,
            connection_info: ConnectionSummary {
                connection_count: self.connection.active_count(),
                served: self.connection.is_served(),
            },
        })
    }
}

/// JSON summary of a torrent.
#[derive(Debug, Clone, Serialize)]
pub struct TorrentSummary {
    /// Torrent display name; empty before metadata.
    pub name: String,
    /// Uppercase hex info-hash.
    pub info_hash: String,
    /// Save directory.
    pub download_dir: String,
    /// Numeric engine state code.
    pub state: i32,
    /// Human-readable engine state.
    pub state_str: String,
    /// Whether the torrent is paused.
    pub paused: bool,
    /// Total payload size in bytes; 0 before metadata.
    pub size: u64,
    /// Total piece count; 0 before metadata.
    pub pieces: u32,
    /// Completion in `[0, 1]`.
    pub progress: f32,
    /// Download rate in KiB/s.
    pub download_rate: u32,
    /// Upload rate in KiB/s.
    pub upload_rate: u32,
    /// Connected seeds.
    pub seeds: u32,
    /// Seeds known in the swarm.
    pub total_seeds: u32,
    /// Connected peers.
    pub peers: u32,
    /// Downloaders known in the swarm.
    pub total_peers: u32,
    /// Per-file summaries; empty before metadata.
    pub files: Vec<FileSummary>,
    /// Connection-activity summary.
    pub connection_info: ConnectionSummary,
}

/// JSON summary of one file within a torrent.
#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    /// Path relative to the save directory.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Locally complete pieces overlapping this file.
    pub complete_pieces: u32,
    /// Total pieces overlapping this file.
    pub total_pieces: u32,
    /// Progress rows: `*` per complete piece, priority digit otherwise.
    pub piece_map: Vec<String>,
}

/// JSON summary of a torrent's connection activity.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    /// Connections currently streaming.
    pub connection_count: u32,
    /// Whether streaming has actually begun (10 MiB delivered).
    pub served: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn served_flag_is_monotonic_and_first_transition_wins() {
        let (info, _rx) = ConnectionInfo::channel();

        assert!(!info.is_served());
        assert!(info.mark_served());
        assert!(info.is_served());
        // Later attempts observe the flag already set.
        assert!(!info.mark_served());
        assert!(info.is_served());
    }

    #[test]
    fn paused_flag_deduplicates_transitions() {
        let (info, _rx) = ConnectionInfo::channel();

        assert!(info.set_paused(true));
        assert!(!info.set_paused(true));
        assert!(info.set_paused(false));
        assert!(!info.set_paused(false));
    }
}
