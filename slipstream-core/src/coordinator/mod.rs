//! Process-singleton registry of torrents.
//!
//! The [`Coordinator`] owns the swarm client and every piece of per-torrent
//! state the HTTP layer touches: the record registry, pending add
//! parameters, and the rendezvous for removal completion. Registry entries
//! are created and destroyed only by the alert dispatcher, so a record
//! exists exactly while its swarm handle is live.

mod alerts;
mod lifecycle;
mod record;

pub use record::{ConnectionInfo, ConnectionSummary, FileSummary, TorrentRecord, TorrentSummary};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::analytics::EventSink;
use crate::config::SlipstreamConfig;
use crate::swarm::{InfoHash, SwarmClient, SwarmError, SwarmHandle};

/// Errors from coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// The swarm engine rejected an operation.
    #[error("swarm error")]
    Swarm(#[from] SwarmError),

    /// No live torrent with that identifier.
    #[error("torrent {info_hash} is not registered")]
    TorrentNotFound {
        /// Identifier the operation was issued for.
        info_hash: InfoHash,
    },

    /// A removal was submitted but its completion alert never arrived.
    #[error("removal of {info_hash} was interrupted")]
    RemovalInterrupted {
        /// Identifier of the torrent being removed.
        info_hash: InfoHash,
    },
}

/// Parameters recorded with an add request, consumed when the engine
/// acknowledges the torrent.
#[derive(Clone)]
pub(crate) struct TorrentParams {
    pub(crate) look_ahead: f32,
    pub(crate) analytics_tag: String,
    pub(crate) save_dir: PathBuf,
}

/// Oneshot senders completing a removal rendezvous.
#[derive(Default)]
pub(crate) struct RemovalWaiters {
    pub(crate) removed: Option<oneshot::Sender<()>>,
    pub(crate) deleted: Option<oneshot::Sender<bool>>,
}

pub(crate) struct CoordinatorInner {
    pub(crate) swarm: Arc<dyn SwarmClient>,
    pub(crate) config: SlipstreamConfig,
    pub(crate) events: EventSink,
    pub(crate) torrents: RwLock<HashMap<InfoHash, Arc<TorrentRecord>>>,
    pub(crate) params: Mutex<HashMap<InfoHash, TorrentParams>>,
    pub(crate) removal_waiters: Mutex<HashMap<InfoHash, RemovalWaiters>>,
    /// Cancels blocked readers and lifecycle watchers on shutdown.
    pub(crate) shutdown: CancellationToken,
    /// Stops the alert dispatcher; cancelled only after all torrents are
    /// removed, since removal completion flows through the dispatcher.
    pub(crate) dispatcher_stop: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl CoordinatorInner {
    pub(crate) fn torrent(&self, info_hash: &InfoHash) -> Option<Arc<TorrentRecord>> {
        self.torrents.read().get(info_hash).cloned()
    }

    /// Removes a torrent and waits for the engine to confirm.
    ///
    /// Three-step rendezvous: submit the removal, await `TorrentRemoved`,
    /// and when payload deletion was requested await
    /// `TorrentDeleted`/`TorrentDeleteFailed`. Delete failures are logged,
    /// not propagated; removal already succeeded from the caller's view.
    pub(crate) async fn remove_torrent(&self, handle: SwarmHandle) -> Result<(), CoordinatorError> {
        let info_hash = handle.info_hash();
        let delete_files = !self.config.lifecycle.keep_files;

        let (removed_tx, removed_rx) = oneshot::channel();
        let (deleted_tx, deleted_rx) = oneshot::channel();
        self.removal_waiters.lock().insert(
            info_hash,
            RemovalWaiters {
                removed: Some(removed_tx),
                deleted: Some(deleted_tx),
            },
        );

        let result = self
            .remove_rendezvous(handle, delete_files, removed_rx, deleted_rx)
            .await;
        self.removal_waiters.lock().remove(&info_hash);
        result
    }

    async fn remove_rendezvous(
        &self,
        handle: SwarmHandle,
        delete_files: bool,
        removed_rx: oneshot::Receiver<()>,
        deleted_rx: oneshot::Receiver<bool>,
    ) -> Result<(), CoordinatorError> {
        let info_hash = handle.info_hash();
        self.swarm.remove_torrent(handle, delete_files).await?;

        removed_rx
            .await
            .map_err(|_| CoordinatorError::RemovalInterrupted { info_hash })?;

        if delete_files {
            match deleted_rx.await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!("payload files of {info_hash} could not be deleted");
                }
                Err(_) => return Err(CoordinatorError::RemovalInterrupted { info_hash }),
            }
        }
        Ok(())
    }
}

/// Entry point for everything above the swarm engine.
///
/// Cheap to clone; all clones share the same registry and swarm client.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

impl Coordinator {
    /// Creates a coordinator over the given swarm client.
    pub fn new(
        swarm: Arc<dyn SwarmClient>,
        config: SlipstreamConfig,
        events: EventSink,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                swarm,
                config,
                events,
                torrents: RwLock::new(HashMap::new()),
                params: Mutex::new(HashMap::new()),
                removal_waiters: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                dispatcher_stop: CancellationToken::new(),
                dispatcher: Mutex::new(None),
            }),
        }
    }

    /// The configuration this coordinator runs with.
    pub fn config(&self) -> &SlipstreamConfig {
        &self.inner.config
    }

    /// Token cancelled when shutdown is triggered.
    ///
    /// Readers blocked in piece waits observe it, as does the HTTP server's
    /// graceful drain.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Triggers shutdown: aborts blocked readers and lifecycle watchers.
    pub fn trigger_shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Starts the swarm session and the alert dispatcher.
    ///
    /// # Errors
    /// Propagates swarm session start failures.
    pub async fn start(&self) -> Result<(), CoordinatorError> {
        self.inner.swarm.start(&self.inner.config.swarm).await?;
        let task = tokio::spawn(alerts::run(self.inner.clone()));
        *self.inner.dispatcher.lock() = Some(task);
        Ok(())
    }

    /// Removes every torrent, stops the dispatcher and the swarm session.
    ///
    /// # Errors
    /// Propagates swarm session stop failures; per-torrent removal failures
    /// are logged and do not abort the shutdown.
    pub async fn stop(&self) -> Result<(), CoordinatorError> {
        let handles: Vec<SwarmHandle> = self
            .inner
            .torrents
            .read()
            .values()
            .map(|record| record.handle())
            .collect();
        for handle in handles {
            if let Err(e) = self.inner.remove_torrent(handle).await {
                tracing::warn!(
                    "removal of {} during shutdown failed: {e}",
                    handle.info_hash()
                );
            }
        }

        self.inner.dispatcher_stop.cancel();
        let task = self.inner.dispatcher.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.inner.swarm.stop().await?;
        Ok(())
    }

    /// Submits an asynchronous add for a magnet link.
    ///
    /// Look-ahead ratio and analytics tag are recorded keyed by info-hash
    /// (first request wins) and picked up when the engine acknowledges the
    /// torrent. Safe to call repeatedly while a client polls.
    ///
    /// # Errors
    /// Propagates swarm submission failures.
    pub async fn add_torrent(
        &self,
        magnet_link: &str,
        save_dir: &Path,
        info_hash: InfoHash,
        look_ahead: f32,
        analytics_tag: &str,
    ) -> Result<(), CoordinatorError> {
        self.inner
            .params
            .lock()
            .entry(info_hash)
            .or_insert_with(|| TorrentParams {
                look_ahead,
                analytics_tag: analytics_tag.to_string(),
                save_dir: save_dir.to_path_buf(),
            });
        self.inner.swarm.add_torrent(magnet_link, save_dir).await?;
        Ok(())
    }

    /// Looks up a live torrent record.
    pub fn torrent(&self, info_hash: InfoHash) -> Option<Arc<TorrentRecord>> {
        self.inner.torrent(&info_hash)
    }

    /// Snapshot of all live torrent records.
    pub fn torrents(&self) -> Vec<Arc<TorrentRecord>> {
        self.inner.torrents.read().values().cloned().collect()
    }

    /// Removes a torrent and waits for the engine to confirm.
    ///
    /// # Errors
    /// - [`CoordinatorError::TorrentNotFound`] - unknown identifier
    /// - [`CoordinatorError::RemovalInterrupted`] - dispatcher stopped
    ///   before the completion alerts arrived
    pub async fn remove_torrent(&self, info_hash: InfoHash) -> Result<(), CoordinatorError> {
        let record = self
            .inner
            .torrent(&info_hash)
            .ok_or(CoordinatorError::TorrentNotFound { info_hash })?;
        self.inner.remove_torrent(record.handle()).await
    }

    /// Signals one more active connection on a torrent.
    ///
    /// # Errors
    /// Returns [`CoordinatorError::TorrentNotFound`] for unknown torrents.
    pub async fn add_connection(&self, info_hash: InfoHash) -> Result<(), CoordinatorError> {
        self.signal(info_hash, 1).await
    }

    /// Signals one less active connection on a torrent.
    ///
    /// # Errors
    /// Returns [`CoordinatorError::TorrentNotFound`] for unknown torrents.
    pub async fn remove_connection(&self, info_hash: InfoHash) -> Result<(), CoordinatorError> {
        self.signal(info_hash, -1).await
    }

    /// Registers a connection and returns a guard that unregisters it on
    /// drop. The guard is what HTTP handlers thread through their response
    /// bodies so the count follows the actual stream lifetime.
    ///
    /// # Errors
    /// Returns [`CoordinatorError::TorrentNotFound`] for unknown torrents.
    pub async fn register_connection(
        &self,
        info_hash: InfoHash,
    ) -> Result<ConnectionGuard, CoordinatorError> {
        let record = self
            .inner
            .torrent(&info_hash)
            .ok_or(CoordinatorError::TorrentNotFound { info_hash })?;
        let signal = record.connection().signal().clone();
        signal
            .send(1)
            .await
            .map_err(|_| CoordinatorError::TorrentNotFound { info_hash })?;
        Ok(ConnectionGuard { signal, info_hash })
    }

    async fn signal(&self, info_hash: InfoHash, delta: i32) -> Result<(), CoordinatorError> {
        let record = self
            .inner
            .torrent(&info_hash)
            .ok_or(CoordinatorError::TorrentNotFound { info_hash })?;
        record
            .connection()
            .signal()
            .send(delta)
            .await
            .map_err(|_| CoordinatorError::TorrentNotFound { info_hash })
    }
}

/// RAII connection registration; sends the balancing `-1` when dropped.
pub struct ConnectionGuard {
    signal: mpsc::Sender<i32>,
    info_hash: InfoHash,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.signal.try_send(-1).is_err() {
            tracing::warn!(
                "connection release for {} not delivered",
                self.info_hash
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::swarm::sim::SimSwarmClient;

    fn test_hash(byte: u8) -> InfoHash {
        InfoHash::new([byte; 20])
    }

    fn magnet_for(info_hash: InfoHash) -> String {
        format!("magnet:?xt=urn:btih:{info_hash}&dn=test+stream")
    }

    async fn started_coordinator() -> (Coordinator, Arc<SimSwarmClient>) {
        let swarm = Arc::new(SimSwarmClient::new());
        let coordinator = Coordinator::new(
            swarm.clone() as Arc<dyn SwarmClient>,
            SlipstreamConfig::default(),
            EventSink::disabled(),
        );
        coordinator.start().await.unwrap();
        (coordinator, swarm)
    }

    /// Polls `condition` while letting the (paused) clock advance.
    async fn wait_until<F: Fn() -> bool>(condition: F, what: &str) {
        for _ in 0..10_000 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test(start_paused = true)]
    async fn added_alert_creates_registry_entry() {
        let (coordinator, _swarm) = started_coordinator().await;
        let info_hash = test_hash(1);

        coordinator
            .add_torrent(&magnet_for(info_hash), Path::new("."), info_hash, 0.05, "tag")
            .await
            .unwrap();

        let c = coordinator.clone();
        wait_until(|| c.torrent(info_hash).is_some(), "registry entry").await;

        let record = coordinator.torrent(info_hash).unwrap();
        assert_eq!(record.info_hash(), info_hash);
        assert_eq!(record.look_ahead_ratio(), 0.05);
        assert_eq!(record.analytics_tag(), "tag");
        assert!(!record.has_metadata());
    }

    #[tokio::test(start_paused = true)]
    async fn first_add_params_win() {
        let (coordinator, _swarm) = started_coordinator().await;
        let info_hash = test_hash(2);
        let magnet = magnet_for(info_hash);

        coordinator
            .add_torrent(&magnet, Path::new("."), info_hash, 0.1, "first")
            .await
            .unwrap();
        coordinator
            .add_torrent(&magnet, Path::new("."), info_hash, 0.9, "second")
            .await
            .unwrap();

        let c = coordinator.clone();
        wait_until(|| c.torrent(info_hash).is_some(), "registry entry").await;

        let record = coordinator.torrent(info_hash).unwrap();
        assert_eq!(record.look_ahead_ratio(), 0.1);
        assert_eq!(record.analytics_tag(), "first");
    }

    #[tokio::test(start_paused = true)]
    async fn balanced_connections_return_to_zero() {
        let (coordinator, _swarm) = started_coordinator().await;
        let info_hash = test_hash(3);

        coordinator
            .add_torrent(&magnet_for(info_hash), Path::new("."), info_hash, 0.05, "")
            .await
            .unwrap();
        let c = coordinator.clone();
        wait_until(|| c.torrent(info_hash).is_some(), "registry entry").await;

        for _ in 0..3 {
            coordinator.add_connection(info_hash).await.unwrap();
        }
        let record = coordinator.torrent(info_hash).unwrap();
        let conn = record.connection().clone();
        wait_until(|| conn.active_count() == 3, "count to reach 3").await;

        for _ in 0..3 {
            coordinator.remove_connection(info_hash).await.unwrap();
        }
        let conn = record.connection().clone();
        wait_until(|| conn.active_count() == 0, "count to return to 0").await;
    }

    #[tokio::test(start_paused = true)]
    async fn idle_torrent_pauses_then_resumes_on_new_connection() {
        let (coordinator, swarm) = started_coordinator().await;
        let info_hash = test_hash(4);

        coordinator
            .add_torrent(&magnet_for(info_hash), Path::new("."), info_hash, 0.05, "")
            .await
            .unwrap();
        let c = coordinator.clone();
        wait_until(|| c.torrent(info_hash).is_some(), "registry entry").await;

        // One connection comes and goes.
        coordinator.add_connection(info_hash).await.unwrap();
        coordinator.remove_connection(info_hash).await.unwrap();

        let record = coordinator.torrent(info_hash).unwrap();
        let conn = record.connection().clone();
        wait_until(|| conn.is_paused(), "pause after idle timeout").await;
        assert!(swarm.is_paused(info_hash));

        // A new connection within the removal window resumes the torrent.
        coordinator.add_connection(info_hash).await.unwrap();
        let conn = record.connection().clone();
        wait_until(|| !conn.is_paused(), "resume on new connection").await;
        assert!(!swarm.is_paused(info_hash));

        // Long after the removal window, the torrent is still there.
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(coordinator.torrent(info_hash).is_some());
        assert!(swarm.contains(info_hash));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_torrent_is_removed_after_both_timeouts() {
        let (coordinator, swarm) = started_coordinator().await;
        let info_hash = test_hash(5);

        coordinator
            .add_torrent(&magnet_for(info_hash), Path::new("."), info_hash, 0.05, "")
            .await
            .unwrap();
        let c = coordinator.clone();
        wait_until(|| c.torrent(info_hash).is_some(), "registry entry").await;

        coordinator.add_connection(info_hash).await.unwrap();
        coordinator.remove_connection(info_hash).await.unwrap();

        let c = coordinator.clone();
        wait_until(|| c.torrent(info_hash).is_none(), "registry entry to disappear").await;
        assert!(!swarm.contains(info_hash));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_removal_completes_rendezvous() {
        let (coordinator, swarm) = started_coordinator().await;
        let info_hash = test_hash(6);

        coordinator
            .add_torrent(&magnet_for(info_hash), Path::new("."), info_hash, 0.05, "")
            .await
            .unwrap();
        let c = coordinator.clone();
        wait_until(|| c.torrent(info_hash).is_some(), "registry entry").await;

        coordinator.remove_torrent(info_hash).await.unwrap();

        assert!(coordinator.torrent(info_hash).is_none());
        assert!(!swarm.contains(info_hash));
        assert!(coordinator.inner.removal_waiters.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_drains_the_registry() {
        let (coordinator, swarm) = started_coordinator().await;
        let first = test_hash(7);
        let second = test_hash(8);

        for info_hash in [first, second] {
            coordinator
                .add_torrent(&magnet_for(info_hash), Path::new("."), info_hash, 0.05, "")
                .await
                .unwrap();
        }
        let c = coordinator.clone();
        wait_until(
            || c.torrent(first).is_some() && c.torrent(second).is_some(),
            "both registry entries",
        )
        .await;

        coordinator.stop().await.unwrap();

        assert!(coordinator.torrents().is_empty());
        assert!(!swarm.contains(first));
        assert!(!swarm.contains(second));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_pause_alerts_change_state_once() {
        let (coordinator, swarm) = started_coordinator().await;
        let info_hash = test_hash(10);
        let handle = SwarmHandle::new(info_hash);

        coordinator
            .add_torrent(&magnet_for(info_hash), Path::new("."), info_hash, 0.05, "")
            .await
            .unwrap();
        let c = coordinator.clone();
        wait_until(|| c.torrent(info_hash).is_some(), "registry entry").await;
        let record = coordinator.torrent(info_hash).unwrap();

        // Engines may re-announce the paused state; the flag flips once.
        swarm.push_alert(crate::swarm::Alert::TorrentPaused { handle });
        swarm.push_alert(crate::swarm::Alert::TorrentPaused { handle });
        let conn = record.connection().clone();
        wait_until(|| conn.is_paused(), "paused flag").await;

        swarm.push_alert(crate::swarm::Alert::TorrentResumed { handle });
        let conn = record.connection().clone();
        wait_until(|| !conn.is_paused(), "resumed flag").await;
    }

    #[tokio::test(start_paused = true)]
    async fn connection_guard_releases_on_drop() {
        let (coordinator, _swarm) = started_coordinator().await;
        let info_hash = test_hash(9);

        coordinator
            .add_torrent(&magnet_for(info_hash), Path::new("."), info_hash, 0.05, "")
            .await
            .unwrap();
        let c = coordinator.clone();
        wait_until(|| c.torrent(info_hash).is_some(), "registry entry").await;

        let record = coordinator.torrent(info_hash).unwrap();
        let conn = record.connection().clone();

        let guard = coordinator.register_connection(info_hash).await.unwrap();
        let check = conn.clone();
        wait_until(|| check.active_count() == 1, "count to reach 1").await;

        drop(guard);
        let check = conn.clone();
        wait_until(|| check.active_count() == 0, "count to return to 0").await;
    }
}
