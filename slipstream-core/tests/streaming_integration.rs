//! End-to-end streaming scenarios against the in-process swarm engine:
//! magnet add through alert dispatch, metadata staging, gated reads and
//! scrub scheduling.

use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;

use slipstream_core::config::SlipstreamConfig;
use slipstream_core::swarm::sim::SimSwarmClient;
use slipstream_core::swarm::{FileEntry, SwarmClient, TorrentLayout};
use slipstream_core::{Coordinator, EventSink, InfoHash};
use tempfile::TempDir;

const MIB: u64 = 1024 * 1024;

struct Scenario {
    coordinator: Coordinator,
    swarm: Arc<SimSwarmClient>,
    info_hash: InfoHash,
    dir: TempDir,
}

/// Adds a 200 MiB single-file torrent with 1 MiB pieces and waits until the
/// dispatcher has built its file views.
async fn streaming_scenario(look_ahead: f32) -> Scenario {
    let dir = TempDir::new().unwrap();
    let mut config = SlipstreamConfig::default();
    config.storage.download_dir = dir.path().to_path_buf();

    let swarm = Arc::new(SimSwarmClient::new());
    let coordinator = Coordinator::new(
        swarm.clone() as Arc<dyn SwarmClient>,
        config,
        EventSink::disabled(),
    );
    coordinator.start().await.unwrap();

    let info_hash = InfoHash::new([0xAA; 20]);
    let magnet = format!("magnet:?xt=urn:btih:{info_hash}&dn=feature+film");
    coordinator
        .add_torrent(&magnet, dir.path(), info_hash, look_ahead, "")
        .await
        .unwrap();
    wait_until(|| coordinator.torrent(info_hash).is_some(), "registry entry").await;

    let size = 200 * MIB;
    swarm
        .install_metadata(
            info_hash,
            TorrentLayout {
                piece_length: MIB as u32,
                num_pieces: 200,
                files: vec![FileEntry {
                    path: "feature film.mp4".into(),
                    size,
                    offset: 0,
                }],
            },
        )
        .unwrap();
    wait_until(
        || {
            coordinator
                .torrent(info_hash)
                .is_some_and(|record| record.has_metadata())
        },
        "file views",
    )
    .await;

    // The engine allocates the payload file once metadata arrives.
    let file = std::fs::File::create(dir.path().join("feature film.mp4")).unwrap();
    file.set_len(size).unwrap();

    Scenario {
        coordinator,
        swarm,
        info_hash,
        dir,
    }
}

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
async fn metadata_arrival_stages_initial_window() {
    let s = streaming_scenario(0.05).await;

    // 200 pieces at ratio 0.05: pieces 0..=10 and the final piece carry the
    // 10 second staging deadline.
    for piece in 0..=10u32 {
        assert_eq!(
            s.swarm.deadline_of(s.info_hash, piece),
            Some(Duration::from_secs(10)),
            "piece {piece}"
        );
    }
    assert_eq!(
        s.swarm.deadline_of(s.info_hash, 199),
        Some(Duration::from_secs(10))
    );
    assert_eq!(s.swarm.deadline_of(s.info_hash, 11), None);

    let record = s.coordinator.torrent(s.info_hash).unwrap();
    let view = record.largest_file().unwrap();
    assert_eq!(view.total_pieces(), 200);
    assert!(!view.is_video_ready());
}

#[tokio::test(start_paused = true)]
async fn gated_read_returns_once_piece_arrives() {
    let s = streaming_scenario(0.05).await;
    let record = s.coordinator.torrent(s.info_hash).unwrap();

    let mut view = record.largest_file().unwrap();
    view.open(s.dir.path()).await.unwrap();

    let swarm = s.swarm.clone();
    let info_hash = s.info_hash;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        swarm.complete_piece(info_hash, 0).unwrap();
    });

    let mut buf = vec![0u8; 4096];
    let read = view.read(&mut buf).await.unwrap();
    assert_eq!(read, 4096);
}

#[tokio::test(start_paused = true)]
async fn crossing_the_served_threshold_marks_the_torrent() {
    let s = streaming_scenario(0.05).await;
    let record = s.coordinator.torrent(s.info_hash).unwrap();
    s.swarm.complete_all(s.info_hash).unwrap();

    let mut view = record.largest_file().unwrap();
    view.open(s.dir.path()).await.unwrap();

    assert!(!record.connection().is_served());
    let mut buf = vec![0u8; MIB as usize];
    let mut delivered = 0u64;
    while delivered <= 10 * MIB {
        delivered += view.read(&mut buf).await.unwrap() as u64;
    }
    assert!(record.connection().is_served());

    let summary = record.summary().unwrap();
    assert!(summary.connection_info.served);
}

#[tokio::test(start_paused = true)]
async fn scrub_lays_deadline_ladder_from_target_piece() {
    let s = streaming_scenario(0.05).await;
    let record = s.coordinator.torrent(s.info_hash).unwrap();

    let mut view = record.largest_file().unwrap();
    view.open(s.dir.path()).await.unwrap();

    let swarm = s.swarm.clone();
    let info_hash = s.info_hash;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        swarm.complete_piece(info_hash, 150).unwrap();
    });

    let clears_before = s.swarm.deadline_clears(s.info_hash);
    let reached = view.seek(SeekFrom::Start(150 * MIB)).await.unwrap();
    assert_eq!(reached, 150 * MIB);

    assert_eq!(s.swarm.deadline_clears(s.info_hash), clears_before + 1);
    // Running window of a 200-piece file is 1 piece: rungs at 150 (3 s,
    // consumed on completion) and 151 (4 s).
    assert_eq!(
        s.swarm.deadline_of(s.info_hash, 151),
        Some(Duration::from_millis(4000))
    );
    // Header and trailer staging is re-applied afterwards.
    assert_eq!(
        s.swarm.deadline_of(s.info_hash, 0),
        Some(Duration::from_secs(10))
    );
    assert_eq!(
        s.swarm.deadline_of(s.info_hash, 199),
        Some(Duration::from_secs(10))
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_aborts_a_blocked_reader() {
    let s = streaming_scenario(0.05).await;
    let record = s.coordinator.torrent(s.info_hash).unwrap();

    let mut view = record.largest_file().unwrap();
    view.open(s.dir.path()).await.unwrap();

    let reader = tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        view.read(&mut buf).await
    });

    tokio::time::sleep(Duration::from_millis(400)).await;
    s.coordinator.trigger_shutdown();

    let result = reader.await.unwrap();
    assert!(result.is_err(), "blocked read must abort on shutdown");
}
