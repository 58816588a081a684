//! Per-file projection over a torrent: piece math, look-ahead scheduling and
//! the blocking read/seek gate.
//!
//! A `FileView` translates byte positions in one file into piece indices of
//! the surrounding torrent and never returns a byte before its piece is
//! locally complete. Sequential reads push a wide high-priority window ahead
//! of the read head; seeks are treated as user scrubs and lay a deadline
//! ladder front-loading the target piece.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

use crate::analytics::EventSink;
use crate::coordinator::ConnectionInfo;
use crate::swarm::{FileEntry, SwarmClient, SwarmHandle, TorrentLayout};

/// Cumulative bytes after which a torrent counts as actually being served.
const SERVED_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Fixed ratio of total pieces forming the running look-ahead window.
const RUNNING_WINDOW_RATIO: f32 = 0.005;

/// Deadline for the header window and the final piece.
const INITIAL_DEADLINE: Duration = Duration::from_secs(10);

/// First rung of the seek deadline ladder, in milliseconds.
const LADDER_BASE_MS: u64 = 3000;

/// Per-piece increment of the seek deadline ladder, in milliseconds.
const LADDER_STEP_MS: u64 = 1000;

/// Piece deadlines carry no special engine flags.
const DEADLINE_NO_FLAGS: u32 = 0;

/// Background priority for pieces behind the read head.
const PRIORITY_BACKGROUND: u8 = 1;

/// Top priority for the sequential look-ahead window.
const PRIORITY_URGENT: u8 = 7;

/// Interval for piece-availability and file-existence polls.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Which look-ahead window to size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookAhead {
    /// Startup window, sized by the per-torrent look-ahead ratio.
    Initial,
    /// Steady-state window, fixed at 0.5% of the file's pieces.
    Running,
}

/// Errors from file view operations.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Underlying file I/O failed.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// The wait for a piece was cancelled by shutdown.
    #[error("stream aborted")]
    Aborted,

    /// Read or seek issued before `open`.
    #[error("file is not open")]
    NotOpen,
}

/// Shared context a view needs from its owning torrent.
#[derive(Clone)]
pub(crate) struct ViewContext {
    pub(crate) swarm: Arc<dyn SwarmClient>,
    pub(crate) handle: SwarmHandle,
    pub(crate) connection: Arc<ConnectionInfo>,
    pub(crate) events: EventSink,
    pub(crate) analytics_tag: String,
    pub(crate) shutdown: CancellationToken,
}

/// Seekable, piece-gated reader over one file of a torrent.
///
/// Reader state (`open`/`read`/`seek`) is single-owner: obtain an
/// independent view per reader with [`FileView::detach`]. Scheduling
/// operations are idempotent and safe to repeat.
pub struct FileView {
    ctx: ViewContext,
    path: PathBuf,
    size: u64,
    offset: u64,
    piece_length: u32,
    start_piece: u32,
    end_piece: u32,
    total_pieces: u32,
    look_ahead_ratio: f32,
    file: Option<File>,
    position: u64,
    bytes_read: u64,
}

impl FileView {
    pub(crate) fn new(
        ctx: ViewContext,
        entry: FileEntry,
        layout: &TorrentLayout,
        look_ahead_ratio: f32,
    ) -> Self {
        let piece_length = layout.piece_length;
        let start_piece = (entry.offset / u64::from(piece_length)) as u32;
        // A file ending exactly on a piece boundary would index one piece
        // past the last; clamp to the torrent's piece range.
        let end_piece = (((entry.offset + entry.size) / u64::from(piece_length)) as u32)
            .min(layout.num_pieces.saturating_sub(1));
        let total_pieces = end_piece - start_piece + 1;

        Self {
            ctx,
            path: entry.path,
            size: entry.size,
            offset: entry.offset,
            piece_length,
            start_piece,
            end_piece,
            total_pieces,
            look_ahead_ratio,
            file: None,
            position: 0,
            bytes_read: 0,
        }
    }

    /// Path of the file, relative to the torrent save directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// First piece overlapping this file.
    pub fn start_piece(&self) -> u32 {
        self.start_piece
    }

    /// Last piece overlapping this file.
    pub fn end_piece(&self) -> u32 {
        self.end_piece
    }

    /// Number of pieces overlapping this file.
    pub fn total_pieces(&self) -> u32 {
        self.total_pieces
    }

    /// Returns an independent, unopened view of the same file.
    ///
    /// The clone shares scheduling state (swarm handle, connection info)
    /// but owns its own file handle and position, so each reader task can
    /// hold one without serializing against the others' positions.
    pub fn detach(&self) -> FileView {
        FileView {
            ctx: self.ctx.clone(),
            path: self.path.clone(),
            size: self.size,
            offset: self.offset,
            piece_length: self.piece_length,
            start_piece: self.start_piece,
            end_piece: self.end_piece,
            total_pieces: self.total_pieces,
            look_ahead_ratio: self.look_ahead_ratio,
            file: None,
            position: 0,
            bytes_read: 0,
        }
    }

    /// Piece index covering the given byte offset within this file.
    pub fn piece_index_of(&self, offset: u64) -> u32 {
        ((self.offset + offset) / u64::from(self.piece_length)) as u32
    }

    fn piece_covering(&self, offset: u64) -> u32 {
        self.piece_index_of(offset).min(self.end_piece)
    }

    /// Size of a look-ahead window in pieces.
    pub fn look_ahead(&self, mode: LookAhead) -> u32 {
        let ratio = match mode {
            LookAhead::Initial => self.look_ahead_ratio,
            LookAhead::Running => RUNNING_WINDOW_RATIO,
        };
        (self.total_pieces as f32 * ratio) as u32
    }

    /// Stages the pieces a player needs before playback can start.
    ///
    /// Lays a 10 s deadline on the initial window and on the final piece;
    /// media containers typically keep their index at one end or the other.
    /// Idempotent.
    pub fn set_initial_priority(&self) {
        let window_end = (self.start_piece + self.look_ahead(LookAhead::Initial)).min(self.end_piece);
        for piece in self.start_piece..=window_end {
            self.ctx.swarm.set_piece_deadline(
                self.ctx.handle,
                piece,
                INITIAL_DEADLINE,
                DEADLINE_NO_FLAGS,
            );
        }
        self.ctx.swarm.set_piece_deadline(
            self.ctx.handle,
            self.end_piece,
            INITIAL_DEADLINE,
            DEADLINE_NO_FLAGS,
        );
    }

    /// Whether the initial window and the final piece are locally complete.
    pub fn is_video_ready(&self) -> bool {
        let window_end = (self.start_piece + self.look_ahead(LookAhead::Initial)).min(self.end_piece);
        for piece in self.start_piece..=window_end {
            if !self.ctx.swarm.have_piece(self.ctx.handle, piece) {
                return false;
            }
        }
        self.ctx.swarm.have_piece(self.ctx.handle, self.end_piece)
    }

    /// Number of this file's pieces that are locally complete.
    pub fn complete_pieces(&self) -> u32 {
        (self.start_piece..=self.end_piece)
            .filter(|piece| self.ctx.swarm.have_piece(self.ctx.handle, *piece))
            .count() as u32
    }

    /// Progress map in rows of 100 pieces: `*` for complete pieces, the
    /// current priority digit otherwise.
    pub fn piece_map(&self) -> Vec<String> {
        let rows = self.total_pieces.div_ceil(100);
        let mut map = vec![String::new(); rows as usize];
        for piece in self.start_piece..=self.end_piece {
            let row = ((piece - self.start_piece) / 100) as usize;
            if self.ctx.swarm.have_piece(self.ctx.handle, piece) {
                map[row].push('*');
            } else {
                let priority = self.ctx.swarm.piece_priority(self.ctx.handle, piece);
                map[row].push(char::from_digit(u32::from(priority), 10).unwrap_or('?'));
            }
        }
        map
    }

    /// Opens the backing file, waiting for the engine to create it.
    ///
    /// The engine only creates the file once metadata arrives and storage is
    /// allocated, so this polls for existence every 100 ms.
    ///
    /// # Errors
    /// - [`StreamError::Aborted`] - shutdown while waiting for the file
    /// - [`StreamError::Io`] - the file exists but could not be opened
    pub async fn open(&mut self, save_dir: &Path) -> Result<(), StreamError> {
        if self.file.is_some() {
            return Ok(());
        }
        let full_path = save_dir.join(&self.path);

        loop {
            match tokio::fs::try_exists(&full_path).await {
                Ok(true) => break,
                Ok(false) => {}
                // Transient; treat like absence and retry.
                Err(e) => tracing::debug!(
                    "existence check failed for {}: {e}",
                    full_path.display()
                ),
            }
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => return Err(StreamError::Aborted),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }

        self.file = Some(File::open(&full_path).await?);
        self.position = 0;
        self.bytes_read = 0;
        Ok(())
    }

    /// Reads into `buf`, blocking until each needed piece is local.
    ///
    /// Fills the buffer in chunks of at most one piece length, gating every
    /// chunk on the piece covering its end. Returns the bytes read; 0 at end
    /// of file.
    ///
    /// # Errors
    /// - [`StreamError::NotOpen`] - `open` has not succeeded
    /// - [`StreamError::Aborted`] - shutdown while waiting for a piece
    /// - [`StreamError::Io`] - underlying read failed
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        if self.file.is_none() {
            return Err(StreamError::NotOpen);
        }

        let mut total = 0usize;
        while total < buf.len() {
            if self.position >= self.size {
                break;
            }
            let want = (buf.len() - total).min(self.piece_length as usize);
            let gate = self.piece_covering(self.position + want as u64);
            self.wait_for_piece(gate, false).await?;

            let file = self.file.as_mut().ok_or(StreamError::NotOpen)?;
            let read = file.read(&mut buf[total..total + want]).await.map_err(|e| {
                tracing::warn!(
                    "read of {want} bytes at {} in {} failed: {e}",
                    self.position,
                    self.path.display()
                );
                e
            })?;
            if read == 0 {
                break;
            }
            total += read;
            self.position += read as u64;
        }

        self.note_bytes_served(total);
        Ok(total)
    }

    /// Seeks to a new position, blocking until its piece is local.
    ///
    /// A seek represents a user scrub, so the gate runs time-critically:
    /// outstanding deadlines are cleared and a fresh ladder is laid from the
    /// target piece.
    ///
    /// # Errors
    /// - [`StreamError::NotOpen`] - `open` has not succeeded
    /// - [`StreamError::Aborted`] - shutdown while waiting for the piece
    /// - [`StreamError::Io`] - invalid target or underlying seek failed
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64, StreamError> {
        if self.file.is_none() {
            return Err(StreamError::NotOpen);
        }
        let target = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(delta) => self
                .position
                .checked_add_signed(delta)
                .ok_or_else(seek_out_of_range)?,
            SeekFrom::End(delta) => self.size.checked_add_signed(delta).ok_or_else(seek_out_of_range)?,
        };

        let gate = self.piece_covering(target);
        self.wait_for_piece(gate, true).await?;

        let file = self.file.as_mut().ok_or(StreamError::NotOpen)?;
        let reached = file.seek(SeekFrom::Start(target)).await?;
        if reached != target {
            tracing::warn!(
                "seek in {} reached {reached}, wanted {target}",
                self.path.display()
            );
        }
        self.position = reached;
        Ok(reached)
    }

    /// Blocks until `piece` is locally complete, scheduling it first.
    ///
    /// Priority writes are only hints; correctness relies on the engine
    /// eventually completing the piece, observed through the 100 ms poll.
    async fn wait_for_piece(&self, piece: u32, time_critical: bool) -> Result<(), StreamError> {
        let swarm = &self.ctx.swarm;
        let handle = self.ctx.handle;
        if swarm.have_piece(handle, piece) {
            return Ok(());
        }

        let running = self.look_ahead(LookAhead::Running);
        if time_critical {
            swarm.clear_piece_deadlines(handle);
            for i in 0..=running {
                let target = piece + i;
                if target > self.end_piece {
                    break;
                }
                swarm.set_piece_deadline(
                    handle,
                    target,
                    Duration::from_millis(LADDER_BASE_MS + u64::from(i) * LADDER_STEP_MS),
                    DEADLINE_NO_FLAGS,
                );
            }
        } else {
            // Everything before the final piece drops to background; the
            // final piece keeps its staged deadline.
            for i in self.start_piece..self.end_piece {
                swarm.set_piece_priority(handle, i, PRIORITY_BACKGROUND);
            }
            for i in 0..=running * 4 {
                let target = piece + i;
                if target > self.end_piece {
                    break;
                }
                swarm.set_piece_priority(handle, target, PRIORITY_URGENT);
            }
        }
        self.set_initial_priority();

        loop {
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => return Err(StreamError::Aborted),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
            if swarm.have_piece(handle, piece) {
                return Ok(());
            }
        }
    }

    fn note_bytes_served(&mut self, read: usize) {
        self.bytes_read += read as u64;
        if self.bytes_read > SERVED_THRESHOLD && self.ctx.connection.mark_served() {
            let name = self.torrent_name();
            tracing::info!("serving {name}");
            self.ctx.events.track(
                "Serving",
                self.ctx.handle.info_hash(),
                &name,
                &self.ctx.analytics_tag,
            );
        }
    }

    fn torrent_name(&self) -> String {
        self.ctx
            .swarm
            .status(self.ctx.handle)
            .map(|status| status.name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.ctx.handle.info_hash().to_string())
    }
}

fn seek_out_of_range() -> StreamError {
    StreamError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        "seek target out of range",
    ))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;
    use crate::config::SwarmConfig;
    use crate::swarm::sim::SimSwarmClient;
    use crate::swarm::{InfoHash, TorrentLayout};

    struct Fixture {
        swarm: Arc<SimSwarmClient>,
        info_hash: InfoHash,
        view: FileView,
    }

    async fn fixture(
        num_pieces: u32,
        piece_length: u32,
        file_offset: u64,
        file_size: u64,
        look_ahead_ratio: f32,
    ) -> Fixture {
        let swarm = Arc::new(SimSwarmClient::new());
        swarm.start(&SwarmConfig::default()).await.unwrap();

        let info_hash = InfoHash::new([7u8; 20]);
        let magnet = format!("magnet:?xt=urn:btih:{info_hash}&dn=fixture");
        swarm.add_torrent(&magnet, Path::new(".")).await.unwrap();

        let entry = FileEntry {
            path: PathBuf::from("video.mp4"),
            size: file_size,
            offset: file_offset,
        };
        let layout = TorrentLayout {
            piece_length,
            num_pieces,
            files: vec![entry.clone()],
        };
        swarm.install_metadata(info_hash, layout.clone()).unwrap();

        let (connection, _signal_rx) = ConnectionInfo::channel();
        let ctx = ViewContext {
            swarm: swarm.clone() as Arc<dyn SwarmClient>,
            handle: SwarmHandle::new(info_hash),
            connection,
            events: EventSink::disabled(),
            analytics_tag: String::new(),
            shutdown: CancellationToken::new(),
        };
        let view = FileView::new(ctx, entry, &layout, look_ahead_ratio);
        Fixture {
            swarm,
            info_hash,
            view,
        }
    }

    fn write_backing_file(dir: &TempDir, name: &str, size: usize) -> Vec<u8> {
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        let mut file = std::fs::File::create(dir.path().join(name)).unwrap();
        file.write_all(&data).unwrap();
        data
    }

    const MIB: u64 = 1024 * 1024;

    #[tokio::test]
    async fn piece_math_maps_offsets_to_pieces() {
        let f = fixture(200, MIB as u32, 0, 200 * MIB, 0.05).await;

        assert_eq!(f.view.piece_index_of(0), 0);
        assert_eq!(f.view.piece_index_of(MIB - 1), 0);
        assert_eq!(f.view.piece_index_of(MIB), 1);
        assert_eq!(f.view.piece_index_of(150 * MIB), 150);
        assert_eq!(f.view.start_piece(), 0);
        // offset + size lands exactly on a boundary: clamped to the last piece.
        assert_eq!(f.view.end_piece(), 199);
        assert_eq!(f.view.total_pieces(), 200);
    }

    #[tokio::test]
    async fn piece_math_respects_file_offset() {
        // File starts 1.5 pieces into the torrent payload.
        let piece_length = 64 * 1024u32;
        let offset = u64::from(piece_length) * 3 / 2;
        let size = u64::from(piece_length) * 4;
        let f = fixture(8, piece_length, offset, size, 0.1).await;

        assert_eq!(f.view.start_piece(), 1);
        assert_eq!(f.view.piece_index_of(0), 1);
        assert_eq!(
            f.view.end_piece(),
            ((offset + size) / u64::from(piece_length)) as u32
        );
    }

    #[tokio::test]
    async fn look_ahead_windows_truncate() {
        let f = fixture(200, MIB as u32, 0, 200 * MIB, 0.05).await;

        assert_eq!(f.view.look_ahead(LookAhead::Initial), 10);
        assert_eq!(f.view.look_ahead(LookAhead::Running), 1);
    }

    #[tokio::test]
    async fn initial_priority_stages_window_and_final_piece() {
        let f = fixture(200, MIB as u32, 0, 200 * MIB, 0.05).await;

        f.view.set_initial_priority();

        let deadlines = f.swarm.deadlines(f.info_hash);
        // Window pieces 0..=10 plus the final piece.
        assert_eq!(deadlines.len(), 12);
        for piece in 0..=10u32 {
            assert_eq!(deadlines.get(&piece), Some(&Duration::from_secs(10)));
        }
        assert_eq!(deadlines.get(&199), Some(&Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn initial_priority_is_idempotent() {
        let f = fixture(200, MIB as u32, 0, 200 * MIB, 0.05).await;

        f.view.set_initial_priority();
        let once = f.swarm.deadlines(f.info_hash);
        f.view.set_initial_priority();
        f.view.set_initial_priority();
        let thrice = f.swarm.deadlines(f.info_hash);

        assert_eq!(once, thrice);
    }

    #[tokio::test]
    async fn video_ready_needs_window_and_final_piece() {
        let f = fixture(100, MIB as u32, 0, 100 * MIB, 0.05).await;
        assert!(!f.view.is_video_ready());

        for piece in 0..=5 {
            f.swarm.complete_piece(f.info_hash, piece).unwrap();
        }
        // Window complete, final piece still missing.
        assert!(!f.view.is_video_ready());

        f.swarm.complete_piece(f.info_hash, 99).unwrap();
        assert!(f.view.is_video_ready());
    }

    #[tokio::test]
    async fn read_returns_file_contents() {
        let piece_length = 16 * 1024u32;
        let size = u64::from(piece_length) * 8;
        let mut f = fixture(8, piece_length, 0, size, 0.25).await;
        f.swarm.complete_all(f.info_hash).unwrap();

        let dir = TempDir::new().unwrap();
        let data = write_backing_file(&dir, "video.mp4", size as usize);

        f.view.open(dir.path()).await.unwrap();
        let mut buf = vec![0u8; 4096];
        let read = f.view.read(&mut buf).await.unwrap();

        assert_eq!(read, 4096);
        assert_eq!(&buf[..], &data[..4096]);

        // Reads continue from the position and hit EOF cleanly.
        let mut rest = vec![0u8; size as usize];
        let read = f.view.read(&mut rest).await.unwrap();
        assert_eq!(read, size as usize - 4096);
        let read = f.view.read(&mut rest).await.unwrap();
        assert_eq!(read, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_read_widens_priority_window() {
        let piece_length = 16 * 1024u32;
        let size = u64::from(piece_length) * 400;
        let mut f = fixture(400, piece_length, 0, size, 0.01).await;

        let dir = TempDir::new().unwrap();
        write_backing_file(&dir, "video.mp4", size as usize);
        f.view.open(dir.path()).await.unwrap();

        let swarm = f.swarm.clone();
        let info_hash = f.info_hash;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            swarm.complete_piece(info_hash, 0).unwrap();
        });

        let mut buf = vec![0u8; 4096];
        f.view.read(&mut buf).await.unwrap();

        // Running window is 400 * 0.005 = 2 pieces; the sequential branch
        // raises a 4x window from the read head and backgrounds the rest.
        let handle = SwarmHandle::new(f.info_hash);
        for piece in 0..=8u32 {
            assert_eq!(f.swarm.piece_priority(handle, piece), 7, "piece {piece}");
        }
        assert_eq!(f.swarm.piece_priority(handle, 9), 1);
        assert_eq!(f.swarm.piece_priority(handle, 350), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn seek_clears_deadlines_and_lays_ladder() {
        let piece_length = MIB as u32;
        let size = 200 * MIB;
        let mut f = fixture(200, piece_length, 0, size, 0.05).await;

        let dir = TempDir::new().unwrap();
        let file = std::fs::File::create(dir.path().join("video.mp4")).unwrap();
        file.set_len(size).unwrap();
        f.view.open(dir.path()).await.unwrap();

        let swarm = f.swarm.clone();
        let info_hash = f.info_hash;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            swarm.complete_piece(info_hash, 150).unwrap();
        });

        let reached = f.view.seek(SeekFrom::Start(150 * MIB)).await.unwrap();
        assert_eq!(reached, 150 * MIB);

        assert_eq!(f.swarm.deadline_clears(f.info_hash), 1);
        // Running window is 1, so the ladder covers pieces 150 and 151.
        // Piece 150 completed (its deadline is consumed); 151 keeps the rung.
        assert_eq!(
            f.swarm.deadline_of(f.info_hash, 151),
            Some(Duration::from_millis(4000))
        );
        // The header/trailer stage is re-applied after the ladder.
        assert_eq!(
            f.swarm.deadline_of(f.info_hash, 0),
            Some(Duration::from_secs(10))
        );
        assert_eq!(
            f.swarm.deadline_of(f.info_hash, 199),
            Some(Duration::from_secs(10))
        );
    }

    #[tokio::test]
    async fn read_before_open_fails() {
        let mut f = fixture(8, 16 * 1024, 0, 8 * 16 * 1024, 0.1).await;
        let mut buf = [0u8; 16];
        assert!(matches!(
            f.view.read(&mut buf).await,
            Err(StreamError::NotOpen)
        ));
        assert!(matches!(
            f.view.seek(SeekFrom::Start(0)).await,
            Err(StreamError::NotOpen)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_blocked_reader() {
        let piece_length = 16 * 1024u32;
        let size = u64::from(piece_length) * 8;
        let mut f = fixture(8, piece_length, 0, size, 0.1).await;

        let dir = TempDir::new().unwrap();
        write_backing_file(&dir, "video.mp4", size as usize);
        f.view.open(dir.path()).await.unwrap();

        let token = f.view.ctx.shutdown.clone();
        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            f.view.read(&mut buf).await
        });

        tokio::time::sleep(Duration::from_millis(350)).await;
        token.cancel();

        let result = reader.await.unwrap();
        assert!(matches!(result, Err(StreamError::Aborted)));
    }

    #[tokio::test]
    async fn served_flag_flips_once_past_threshold() {
        let piece_length = MIB as u32;
        let size = 12 * MIB;
        let mut f = fixture(12, piece_length, 0, size, 0.1).await;
        f.swarm.complete_all(f.info_hash).unwrap();

        let dir = TempDir::new().unwrap();
        write_backing_file(&dir, "video.mp4", size as usize);
        f.view.open(dir.path()).await.unwrap();

        assert!(!f.view.ctx.connection.is_served());
        let mut buf = vec![0u8; size as usize];
        let read = f.view.read(&mut buf).await.unwrap();
        assert_eq!(read, size as usize);
        assert!(f.view.ctx.connection.is_served());

        // Monotonic: a fresh detached reader cannot unserve the torrent.
        assert!(!f.view.ctx.connection.mark_served());
        assert!(f.view.ctx.connection.is_served());
    }

    #[tokio::test]
    async fn detach_resets_reader_state() {
        let piece_length = 16 * 1024u32;
        let size = u64::from(piece_length) * 4;
        let mut f = fixture(4, piece_length, 0, size, 0.25).await;
        f.swarm.complete_all(f.info_hash).unwrap();

        let dir = TempDir::new().unwrap();
        write_backing_file(&dir, "video.mp4", size as usize);
        f.view.open(dir.path()).await.unwrap();
        let mut buf = vec![0u8; 1024];
        f.view.read(&mut buf).await.unwrap();

        let detached = f.view.detach();
        assert!(detached.file.is_none());
        assert_eq!(detached.position, 0);
        assert_eq!(detached.bytes_read, 0);
        assert_eq!(detached.size(), f.view.size());
    }
}
