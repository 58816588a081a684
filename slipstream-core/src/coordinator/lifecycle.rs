//! Per-torrent inactivity watcher.
//!
//! One task per torrent owns a three-state machine driven by a single
//! `select!` over the connection signal channel and an absolute-deadline
//! timer. Because one task owns both inputs, a resume signal arriving while
//! a removal is armed cancels it atomically; there is no window in which
//! both can win.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::CoordinatorInner;
use super::record::TorrentRecord;

#[derive(Clone, Copy)]
enum WatchState {
    /// At least one connection is streaming; no timers run.
    Active,
    /// Idle; pause fires at the deadline unless a connection arrives.
    PauseArmed(Instant),
    /// Paused and still idle; removal fires at the deadline unless a
    /// connection arrives, which resumes instead.
    RemoveArmed(Instant),
}

pub(crate) struct LifecycleWatcher {
    inner: Arc<CoordinatorInner>,
    record: Arc<TorrentRecord>,
    signal_rx: mpsc::Receiver<i32>,
}

impl LifecycleWatcher {
    pub(crate) fn spawn(
        inner: Arc<CoordinatorInner>,
        record: Arc<TorrentRecord>,
        signal_rx: mpsc::Receiver<i32>,
    ) {
        let watcher = Self {
            inner,
            record,
            signal_rx,
        };
        tokio::spawn(watcher.run());
    }

    async fn run(mut self) {
        let info_hash = self.record.info_hash();
        let pause_after = self.inner.config.lifecycle.inactivity_pause_timeout;
        let remove_after = self.inner.config.lifecycle.inactivity_remove_timeout;

        let mut count: u32 = 0;
        // A fresh torrent has no connections yet, so it starts idle.
        let mut state = WatchState::PauseArmed(Instant::now() + pause_after);

        loop {
            match state {
                WatchState::Active => {
                    tokio::select! {
                        _ = self.inner.shutdown.cancelled() => return,
                        delta = self.signal_rx.recv() => {
                            let Some(delta) = delta else { return };
                            count = self.apply(count, delta);
                            if count == 0 {
                                state = WatchState::PauseArmed(Instant::now() + pause_after);
                            }
                        }
                    }
                }
                WatchState::PauseArmed(deadline) => {
                    tokio::select! {
                        _ = self.inner.shutdown.cancelled() => return,
                        delta = self.signal_rx.recv() => {
                            let Some(delta) = delta else { return };
                            count = self.apply(count, delta);
                            if count > 0 {
                                // Not paused yet; nothing to resume.
                                state = WatchState::Active;
                            }
                        }
                        _ = tokio::time::sleep_until(deadline) => {
                            tracing::debug!("pausing idle torrent {info_hash}");
                            if let Err(e) = self.inner.swarm.pause(self.record.handle()).await {
                                tracing::warn!("pause of {info_hash} failed: {e}");
                            }
                            state = WatchState::RemoveArmed(Instant::now() + remove_after);
                        }
                    }
                }
                WatchState::RemoveArmed(deadline) => {
                    tokio::select! {
                        _ = self.inner.shutdown.cancelled() => return,
                        delta = self.signal_rx.recv() => {
                            let Some(delta) = delta else { return };
                            count = self.apply(count, delta);
                            if count > 0 {
                                if let Err(e) = self.inner.swarm.resume(self.record.handle()).await {
                                    tracing::warn!("resume of {info_hash} failed: {e}");
                                }
                                state = WatchState::Active;
                            }
                        }
                        _ = tokio::time::sleep_until(deadline) => {
                            tracing::debug!("removing idle torrent {info_hash}");
                            if let Err(e) = self.inner.remove_torrent(self.record.handle()).await {
                                tracing::warn!("removal of idle torrent {info_hash} failed: {e}");
                            }
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Applies a signed connection delta, clamping at zero, and mirrors the
    /// result for readers.
    fn apply(&self, count: u32, delta: i32) -> u32 {
        let next = if delta >= 0 {
            count.saturating_add(delta as u32)
        } else {
            count.saturating_sub(delta.unsigned_abs())
        };
        self.record.connection().set_active(next);
        next
    }
}
