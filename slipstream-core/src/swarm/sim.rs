//! In-process swarm engine for tests and demo runs.
//!
//! `SimSwarmClient` keeps per-torrent piece, priority and deadline tables in
//! memory and delivers alerts through the same ordered stream a real engine
//! would. Tests drive it directly (install metadata, complete pieces, inject
//! alerts); the demo binary runs it with a synthetic seed that fabricates a
//! single-file torrent and completes pieces over time, honouring deadlines
//! before priorities so the scheduler is observable end-to-end.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    Alert, FileEntry, InfoHash, ListenKind, SwarmClient, SwarmError, SwarmHandle, TorrentLayout,
    TorrentState, TorrentStatus, magnet,
};
use crate::config::SwarmConfig;

/// Default piece priority assigned by the engine.
const DEFAULT_PRIORITY: u8 = 4;

/// Parameters for the synthetic seed used by demo runs.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticSeed {
    /// Size of the fabricated video file.
    pub file_size: u64,
    /// Piece length of the fabricated torrent.
    pub piece_length: u32,
    /// Pieces completed per tick.
    pub pieces_per_tick: u32,
    /// Interval between completion ticks.
    pub tick: Duration,
    /// Delay before metadata "arrives".
    pub metadata_delay: Duration,
}

impl Default for SyntheticSeed {
    fn default() -> Self {
        Self {
            file_size: 64 * 1024 * 1024,
            piece_length: 256 * 1024,
            pieces_per_tick: 4,
            tick: Duration::from_millis(100),
            metadata_delay: Duration::from_millis(500),
        }
    }
}

struct SimTorrent {
    name: String,
    save_path: PathBuf,
    layout: Option<TorrentLayout>,
    paused: bool,
    pieces: Vec<bool>,
    priorities: Vec<u8>,
    deadlines: HashMap<u32, Duration>,
    deadline_clears: u32,
}

impl SimTorrent {
    fn progress(&self) -> f32 {
        if self.pieces.is_empty() {
            return 0.0;
        }
        let complete = self.pieces.iter().filter(|p| **p).count();
        complete as f32 / self.pieces.len() as f32
    }

    fn state(&self) -> TorrentState {
        if self.layout.is_none() {
            TorrentState::DownloadingMetadata
        } else if self.pieces.iter().all(|p| *p) {
            TorrentState::Seeding
        } else {
            TorrentState::Downloading
        }
    }
}

struct SimState {
    started: bool,
    torrents: HashMap<InfoHash, SimTorrent>,
}

/// In-memory [`SwarmClient`] implementation.
pub struct SimSwarmClient {
    state: Arc<Mutex<SimState>>,
    alert_tx: mpsc::UnboundedSender<Alert>,
    alert_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Alert>>,
    synthetic: Option<SyntheticSeed>,
}

impl SimSwarmClient {
    /// Creates a client with no background behaviour; tests drive all state.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a client that fabricates a torrent for every added magnet and
    /// completes its pieces over time.
    pub fn with_synthetic_seed(seed: SyntheticSeed) -> Self {
        Self::build(Some(seed))
    }

    fn build(synthetic: Option<SyntheticSeed>) -> Self {
        let (alert_tx, alert_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(SimState {
                started: false,
                torrents: HashMap::new(),
            })),
            alert_tx,
            alert_rx: tokio::sync::Mutex::new(alert_rx),
            synthetic,
        }
    }

    /// Installs metadata for a torrent and emits [`Alert::MetadataReceived`].
    ///
    /// # Errors
    /// Returns [`SwarmError::UnknownTorrent`] when the torrent is not
    /// registered.
    pub fn install_metadata(
        &self,
        info_hash: InfoHash,
        layout: TorrentLayout,
    ) -> Result<(), SwarmError> {
        {
            let mut state = self.state.lock();
            let torrent = state
                .torrents
                .get_mut(&info_hash)
                .ok_or(SwarmError::UnknownTorrent { info_hash })?;
            torrent.pieces = vec![false; layout.num_pieces as usize];
            torrent.priorities = vec![DEFAULT_PRIORITY; layout.num_pieces as usize];
            torrent.layout = Some(layout);
        }
        let _ = self.alert_tx.send(Alert::MetadataReceived {
            handle: SwarmHandle::new(info_hash),
        });
        Ok(())
    }

    /// Marks a piece as locally complete.
    ///
    /// # Errors
    /// Returns [`SwarmError::UnknownTorrent`] when the torrent is not
    /// registered.
    pub fn complete_piece(&self, info_hash: InfoHash, piece: u32) -> Result<(), SwarmError> {
        let mut state = self.state.lock();
        let torrent = state
            .torrents
            .get_mut(&info_hash)
            .ok_or(SwarmError::UnknownTorrent { info_hash })?;
        if let Some(slot) = torrent.pieces.get_mut(piece as usize) {
            *slot = true;
        }
        torrent.deadlines.remove(&piece);
        Ok(())
    }

    /// Marks every piece of the torrent complete.
    ///
    /// # Errors
    /// Returns [`SwarmError::UnknownTorrent`] when the torrent is not
    /// registered.
    pub fn complete_all(&self, info_hash: InfoHash) -> Result<(), SwarmError> {
        let mut state = self.state.lock();
        let torrent = state
            .torrents
            .get_mut(&info_hash)
            .ok_or(SwarmError::UnknownTorrent { info_hash })?;
        torrent.pieces.fill(true);
        torrent.deadlines.clear();
        Ok(())
    }

    /// Injects an alert into the stream, as if the engine produced it.
    pub fn push_alert(&self, alert: Alert) {
        let _ = self.alert_tx.send(alert);
    }

    /// Whether the torrent is currently registered.
    pub fn contains(&self, info_hash: InfoHash) -> bool {
        self.state.lock().torrents.contains_key(&info_hash)
    }

    /// Whether the torrent is paused.
    pub fn is_paused(&self, info_hash: InfoHash) -> bool {
        self.state
            .lock()
            .torrents
            .get(&info_hash)
            .map(|t| t.paused)
            .unwrap_or(false)
    }

    /// Deadline currently set for a piece, if any.
    pub fn deadline_of(&self, info_hash: InfoHash, piece: u32) -> Option<Duration> {
        self.state
            .lock()
            .torrents
            .get(&info_hash)
            .and_then(|t| t.deadlines.get(&piece).copied())
    }

    /// Snapshot of all outstanding piece deadlines.
    pub fn deadlines(&self, info_hash: InfoHash) -> HashMap<u32, Duration> {
        self.state
            .lock()
            .torrents
            .get(&info_hash)
            .map(|t| t.deadlines.clone())
            .unwrap_or_default()
    }

    /// Number of `clear_piece_deadlines` calls seen for the torrent.
    pub fn deadline_clears(&self, info_hash: InfoHash) -> u32 {
        self.state
            .lock()
            .torrents
            .get(&info_hash)
            .map(|t| t.deadline_clears)
            .unwrap_or(0)
    }

    fn spawn_synthetic(&self, info_hash: InfoHash, seed: SyntheticSeed) {
        let state = Arc::clone(&self.state);
        let alert_tx = self.alert_tx.clone();
        let handle = SwarmHandle::new(info_hash);

        tokio::spawn(async move {
            tokio::time::sleep(seed.metadata_delay).await;

            let (name, save_path) = {
                let state = state.lock();
                let Some(torrent) = state.torrents.get(&info_hash) else {
                    return;
                };
                (torrent.name.clone(), torrent.save_path.clone())
            };

            let file_name = format!("{name}.mp4");
            let num_pieces = seed.file_size.div_ceil(u64::from(seed.piece_length)) as u32;
            let layout = TorrentLayout {
                piece_length: seed.piece_length,
                num_pieces,
                files: vec![FileEntry {
                    path: PathBuf::from(&file_name),
                    size: seed.file_size,
                    offset: 0,
                }],
            };

            if let Err(e) = create_backing_file(&save_path, &file_name, seed.file_size).await {
                tracing::warn!("synthetic seed could not create {file_name}: {e}");
                return;
            }

            {
                let mut state = state.lock();
                let Some(torrent) = state.torrents.get_mut(&info_hash) else {
                    return;
                };
                torrent.pieces = vec![false; num_pieces as usize];
                torrent.priorities = vec![DEFAULT_PRIORITY; num_pieces as usize];
                torrent.layout = Some(layout);
            }
            let _ = alert_tx.send(Alert::MetadataReceived { handle });

            loop {
                tokio::time::sleep(seed.tick).await;

                let all_complete = {
                    let mut state = state.lock();
                    let Some(torrent) = state.torrents.get_mut(&info_hash) else {
                        return;
                    };
                    if !torrent.paused {
                        for _ in 0..seed.pieces_per_tick {
                            let Some(piece) = next_synthetic_piece(torrent) else {
                                break;
                            };
                            torrent.pieces[piece as usize] = true;
                            torrent.deadlines.remove(&piece);
                        }
                    }
                    torrent.pieces.iter().all(|p| *p)
                };

                if all_complete {
                    let _ = alert_tx.send(Alert::TorrentFinished { handle });
                    return;
                }
            }
        });
    }
}

impl Default for SimSwarmClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Picks the next piece a deadline-aware picker would fetch: earliest
/// deadline first, then highest non-skip priority, lowest index breaking
/// ties.
fn next_synthetic_piece(torrent: &SimTorrent) -> Option<u32> {
    let deadline_pick = torrent
        .deadlines
        .iter()
        .filter(|(piece, _)| !torrent.pieces[**piece as usize])
        .min_by_key(|(piece, deadline)| (**deadline, **piece))
        .map(|(piece, _)| *piece);
    if deadline_pick.is_some() {
        return deadline_pick;
    }

    torrent
        .pieces
        .iter()
        .enumerate()
        .filter(|(i, complete)| !**complete && torrent.priorities[*i] > 0)
        .max_by_key(|(i, _)| (torrent.priorities[*i], std::cmp::Reverse(*i)))
        .map(|(i, _)| i as u32)
}

async fn create_backing_file(
    save_path: &Path,
    file_name: &str,
    size: u64,
) -> std::io::Result<()> {
    tokio::fs::create_dir_all(save_path).await?;
    let file = tokio::fs::File::create(save_path.join(file_name)).await?;
    file.set_len(size).await?;
    Ok(())
}

#[async_trait::async_trait]
impl SwarmClient for SimSwarmClient {
    async fn start(&self, config: &SwarmConfig) -> Result<(), SwarmError> {
        self.state.lock().started = true;
        let _ = self.alert_tx.send(Alert::ListenSucceeded {
            endpoint: format!("0.0.0.0:{}", config.listen_port),
            kind: ListenKind::Tcp,
        });
        Ok(())
    }

    async fn stop(&self) -> Result<(), SwarmError> {
        let mut state = self.state.lock();
        state.started = false;
        state.torrents.clear();
        Ok(())
    }

    async fn add_torrent(&self, magnet_link: &str, save_dir: &Path) -> Result<(), SwarmError> {
        let parsed = magnet::parse(magnet_link).map_err(|e| SwarmError::InvalidMagnet {
            reason: e.to_string(),
        })?;
        let info_hash = parsed.info_hash;
        let handle = SwarmHandle::new(info_hash);

        {
            let mut state = self.state.lock();
            if !state.started {
                return Err(SwarmError::NotStarted);
            }
            if state.torrents.contains_key(&info_hash) {
                // Duplicate add: acknowledge and carry on, like a real session.
                let _ = self.alert_tx.send(Alert::AddTorrent { handle });
                return Ok(());
            }
            let name = parsed
                .display_name
                .unwrap_or_else(|| format!("Torrent_{info_hash}"));
            state.torrents.insert(
                info_hash,
                SimTorrent {
                    name,
                    save_path: save_dir.to_path_buf(),
                    layout: None,
                    paused: false,
                    pieces: Vec::new(),
                    priorities: Vec::new(),
                    deadlines: HashMap::new(),
                    deadline_clears: 0,
                },
            );
        }

        let _ = self.alert_tx.send(Alert::TorrentAdded { handle });
        if let Some(seed) = self.synthetic {
            self.spawn_synthetic(info_hash, seed);
        }
        Ok(())
    }

    async fn remove_torrent(
        &self,
        handle: SwarmHandle,
        delete_files: bool,
    ) -> Result<(), SwarmError> {
        let info_hash = handle.info_hash();
        let removed = self
            .state
            .lock()
            .torrents
            .remove(&info_hash)
            .ok_or(SwarmError::UnknownTorrent { info_hash })?;

        let _ = self.alert_tx.send(Alert::TorrentRemoved { info_hash });

        if delete_files {
            let mut failed = false;
            if let Some(layout) = &removed.layout {
                for entry in &layout.files {
                    let path = removed.save_path.join(&entry.path);
                    match std::fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(_) => failed = true,
                    }
                }
            }
            let alert = if failed {
                Alert::TorrentDeleteFailed { info_hash }
            } else {
                Alert::TorrentDeleted { info_hash }
            };
            let _ = self.alert_tx.send(alert);
        }
        Ok(())
    }

    async fn pause(&self, handle: SwarmHandle) -> Result<(), SwarmError> {
        let info_hash = handle.info_hash();
        {
            let mut state = self.state.lock();
            let torrent = state
                .torrents
                .get_mut(&info_hash)
                .ok_or(SwarmError::UnknownTorrent { info_hash })?;
            torrent.paused = true;
        }
        let _ = self.alert_tx.send(Alert::TorrentPaused { handle });
        Ok(())
    }

    async fn resume(&self, handle: SwarmHandle) -> Result<(), SwarmError> {
        let info_hash = handle.info_hash();
        {
            let mut state = self.state.lock();
            let torrent = state
                .torrents
                .get_mut(&info_hash)
                .ok_or(SwarmError::UnknownTorrent { info_hash })?;
            torrent.paused = false;
        }
        let _ = self.alert_tx.send(Alert::TorrentResumed { handle });
        Ok(())
    }

    fn have_piece(&self, handle: SwarmHandle, piece: u32) -> bool {
        self.state
            .lock()
            .torrents
            .get(&handle.info_hash())
            .and_then(|t| t.pieces.get(piece as usize).copied())
            .unwrap_or(false)
    }

    fn piece_priority(&self, handle: SwarmHandle, piece: u32) -> u8 {
        self.state
            .lock()
            .torrents
            .get(&handle.info_hash())
            .and_then(|t| t.priorities.get(piece as usize).copied())
            .unwrap_or(DEFAULT_PRIORITY)
    }

    fn set_piece_priority(&self, handle: SwarmHandle, piece: u32, priority: u8) {
        let mut state = self.state.lock();
        if let Some(torrent) = state.torrents.get_mut(&handle.info_hash())
            && let Some(slot) = torrent.priorities.get_mut(piece as usize)
        {
            *slot = priority.min(7);
        }
    }

    fn set_piece_deadline(&self, handle: SwarmHandle, piece: u32, deadline: Duration, _flags: u32) {
        let mut state = self.state.lock();
        if let Some(torrent) = state.torrents.get_mut(&handle.info_hash()) {
            torrent.deadlines.insert(piece, deadline);
        }
    }

    fn clear_piece_deadlines(&self, handle: SwarmHandle) {
        let mut state = self.state.lock();
        if let Some(torrent) = state.torrents.get_mut(&handle.info_hash()) {
            torrent.deadlines.clear();
            torrent.deadline_clears += 1;
        }
    }

    fn torrent_files(&self, handle: SwarmHandle) -> Option<TorrentLayout> {
        self.state
            .lock()
            .torrents
            .get(&handle.info_hash())
            .and_then(|t| t.layout.clone())
    }

    fn status(&self, handle: SwarmHandle) -> Option<TorrentStatus> {
        let state = self.state.lock();
        let torrent = state.torrents.get(&handle.info_hash())?;
        Some(TorrentStatus {
            name: torrent.name.clone(),
            save_path: torrent.save_path.clone(),
            state: torrent.state(),
            paused: torrent.paused,
            progress: torrent.progress(),
            download_rate: 0,
            upload_rate: 0,
            num_seeds: 0,
            num_complete: 0,
            num_peers: 0,
            num_incomplete: 0,
        })
    }

    async fn next_alert(&self, timeout: Duration) -> Option<Alert> {
        let mut rx = self.alert_rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }
}
