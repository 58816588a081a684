//! Alert dispatcher: folds the swarm engine's event stream into registry
//! and lifecycle state.
//!
//! A single long-running task consumes alerts in production order, so every
//! registry mutation caused by alerts is serialized here.

use std::sync::Arc;
use std::time::Duration;

use super::lifecycle::LifecycleWatcher;
use super::record::{ConnectionInfo, TorrentRecord};
use super::{CoordinatorInner, TorrentParams};
use crate::streaming::{FileView, ViewContext};
use crate::swarm::{Alert, InfoHash, ListenKind, SwarmHandle};

/// How long one `next_alert` poll waits before looping.
const ALERT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

pub(crate) async fn run(inner: Arc<CoordinatorInner>) {
    tracing::debug!("alert dispatcher started");
    loop {
        tokio::select! {
            _ = inner.dispatcher_stop.cancelled() => break,
            alert = inner.swarm.next_alert(ALERT_POLL_TIMEOUT) => {
                if let Some(alert) = alert {
                    dispatch(&inner, alert);
                }
            }
        }
    }
    tracing::debug!("alert dispatcher stopped");
}

fn dispatch(inner: &Arc<CoordinatorInner>, alert: Alert) {
    match alert {
        Alert::TorrentAdded { handle } => on_torrent_added(inner, handle),
        Alert::MetadataReceived { handle } => on_metadata_received(inner, handle),
        Alert::TorrentPaused { handle } => on_pause_state(inner, handle, true),
        Alert::TorrentResumed { handle } => on_pause_state(inner, handle, false),
        Alert::TorrentFinished { handle } => on_torrent_finished(inner, handle),
        Alert::TorrentRemoved { info_hash } => on_torrent_removed(inner, info_hash),
        Alert::TorrentDeleted { info_hash } => on_torrent_deleted(inner, info_hash, true),
        Alert::TorrentDeleteFailed { info_hash } => on_torrent_deleted(inner, info_hash, false),
        Alert::ListenSucceeded { endpoint, kind } => {
            // SSL listeners and the IPv6 wildcard duplicate are noise.
            if kind != ListenKind::TcpSsl && !endpoint.contains("[::]") {
                tracing::info!("swarm listening on {endpoint}");
            }
        }
        Alert::AddTorrent { .. }
        | Alert::TorrentChecked { .. }
        | Alert::StateChanged { .. }
        | Alert::HashFailed { .. }
        | Alert::CacheFlushed { .. }
        | Alert::ExternalIp { .. }
        | Alert::PortmapError { .. }
        | Alert::TrackerError { .. }
        | Alert::UdpError { .. } => {}
        Alert::Other { what, message } => tracing::debug!("{what}: {message}"),
    }
}

fn on_torrent_added(inner: &Arc<CoordinatorInner>, handle: SwarmHandle) {
    let info_hash = handle.info_hash();
    if inner.torrent(&info_hash).is_some() {
        return;
    }

    let params = inner
        .params
        .lock()
        .get(&info_hash)
        .cloned()
        .unwrap_or_else(|| TorrentParams {
            look_ahead: inner.config.lifecycle.default_look_ahead,
            analytics_tag: String::new(),
            save_dir: inner.config.storage.download_dir.clone(),
        });

    let (connection, signal_rx) = ConnectionInfo::channel();
    let record = Arc::new(TorrentRecord::new(
        inner.swarm.clone(),
        handle,
        params.save_dir,
        params.look_ahead,
        params.analytics_tag,
        connection,
    ));
    inner.torrents.write().insert(info_hash, record.clone());
    LifecycleWatcher::spawn(inner.clone(), record.clone(), signal_rx);

    let name = torrent_name(inner, handle);
    tracing::info!("added {name}");
    inner
        .events
        .track("Added", info_hash, &name, record.analytics_tag());
}

fn on_metadata_received(inner: &Arc<CoordinatorInner>, handle: SwarmHandle) {
    let info_hash = handle.info_hash();
    let Some(record) = inner.torrent(&info_hash) else {
        return;
    };
    let Some(layout) = inner.swarm.torrent_files(handle) else {
        return;
    };

    let ctx = ViewContext {
        swarm: inner.swarm.clone(),
        handle,
        connection: record.connection().clone(),
        events: inner.events.clone(),
        analytics_tag: record.analytics_tag().to_string(),
        shutdown: inner.shutdown.clone(),
    };
    let views: Vec<FileView> = layout
        .files
        .iter()
        .cloned()
        .map(|entry| FileView::new(ctx.clone(), entry, &layout, record.look_ahead_ratio()))
        .collect();
    for view in &views {
        view.set_initial_priority();
    }
    record.set_files(views);

    let name = torrent_name(inner, handle);
    tracing::info!("metadata received for {name}");
    inner
        .events
        .track("Metadata received", info_hash, &name, record.analytics_tag());
}

fn on_pause_state(inner: &Arc<CoordinatorInner>, handle: SwarmHandle, paused: bool) {
    let Some(record) = inner.torrent(&handle.info_hash()) else {
        return;
    };
    // The engine re-announces the flag freely; only log real transitions.
    if record.connection().set_paused(paused) {
        let name = torrent_name(inner, handle);
        if paused {
            tracing::info!("paused {name}");
        } else {
            tracing::info!("resumed {name}");
        }
    }
}

fn on_torrent_finished(inner: &Arc<CoordinatorInner>, handle: SwarmHandle) {
    let info_hash = handle.info_hash();
    let Some(record) = inner.torrent(&info_hash) else {
        return;
    };
    let name = torrent_name(inner, handle);
    tracing::info!("finished {name}");
    inner
        .events
        .track("Finished", info_hash, &name, record.analytics_tag());
}

fn on_torrent_removed(inner: &Arc<CoordinatorInner>, info_hash: InfoHash) {
    let record = inner.torrents.write().remove(&info_hash);
    let tag = record
        .map(|r| r.analytics_tag().to_string())
        .unwrap_or_default();
    inner.params.lock().remove(&info_hash);

    let name = torrent_name(inner, SwarmHandle::new(info_hash));
    tracing::info!("removed {name}");
    inner.events.track("Removed", info_hash, &name, &tag);

    if let Some(waiters) = inner.removal_waiters.lock().get_mut(&info_hash)
        && let Some(tx) = waiters.removed.take()
    {
        let _ = tx.send(());
    }
}

fn on_torrent_deleted(inner: &Arc<CoordinatorInner>, info_hash: InfoHash, success: bool) {
    if success {
        tracing::info!("deleted payload of {info_hash}");
    } else {
        tracing::warn!("payload delete failed for {info_hash}");
    }

    if let Some(waiters) = inner.removal_waiters.lock().get_mut(&info_hash)
        && let Some(tx) = waiters.deleted.take()
    {
        let _ = tx.send(success);
    }
}

/// Engine-reported name, falling back to the hex hash before metadata or
/// after removal.
fn torrent_name(inner: &Arc<CoordinatorInner>, handle: SwarmHandle) -> String {
    inner
        .swarm
        .status(handle)
        .map(|status| status.name)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| handle.info_hash().to_string())
}
