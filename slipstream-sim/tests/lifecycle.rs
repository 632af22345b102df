//! Session lifecycle scenarios: magnet resolution, caching, resume and
//! shutdown behavior.

mod common;

use bytes::Bytes;
use common::{init_tracing, pattern, seed_torrent_file, test_config};
use slipstream_core::{AccessError, NextBlock, TorrentAccess};
use slipstream_sim::{SeededTorrent, SimConfig, SimulatedSession};

fn read_one_block(access: &TorrentAccess<SimulatedSession>) {
    let mut retries = 0;
    loop {
        match access.read_next_block() {
            NextBlock::Block(_) => return,
            NextBlock::EndOfStream => panic!("premature end of stream"),
            NextBlock::Retry => {
                retries += 1;
                assert!(retries < 100, "stream stalled");
            }
        }
    }
}

fn movie_pack() -> SeededTorrent {
    SeededTorrent::multi_file(
        "pack",
        &[
            ("sample.mkv", Bytes::from(pattern(300_000))),
            ("movie.mkv", Bytes::from(pattern(700_000))),
            ("info.nfo", Bytes::from(pattern(1_000))),
        ],
        65_536,
    )
}

#[test]
fn test_magnet_cold_start_caches_metadata_and_browses() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let seeded = movie_pack();
    let session = SimulatedSession::new();
    session.register(seeded.clone());

    let access = TorrentAccess::open(
        &seeded.magnet_uri(),
        test_config(root.path(), -1),
        session.clone(),
    )
    .unwrap();

    assert_eq!(session.metadata_transfer_count(), 1);

    let hash = seeded.info.info_hash();
    let cached = root.path().join("cache").join(format!("{hash}.torrent"));
    assert!(cached.exists(), "torrent body must land in the cache");
    assert_eq!(
        access.location(),
        format!("torrent://{}", cached.display())
    );

    // the transient metadata torrent is gone from the engine
    assert!(!session.has_torrent(hash));

    // files enumerate largest-first, each selecting its original index
    let playlist = access.playlist().unwrap();
    let names: Vec<&str> = playlist.iter().map(|item| item.name.as_str()).collect();
    assert_eq!(names, ["movie.mkv", "sample.mkv", "info.nfo"]);
    assert_eq!(playlist[0].option, "torrent-file-index=1");
    assert_eq!(playlist[1].option, "torrent-file-index=0");
    assert_eq!(playlist[2].option, "torrent-file-index=2");
    assert!(playlist
        .iter()
        .all(|item| item.uri == access.location()));
}

#[test]
fn test_warm_start_skips_the_metadata_transfer() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let seeded = movie_pack();

    {
        let session = SimulatedSession::new();
        session.register(seeded.clone());
        let access = TorrentAccess::open(
            &seeded.magnet_uri(),
            test_config(root.path(), -1),
            session,
        )
        .unwrap();
        access.close();
    }

    let session = SimulatedSession::new();
    session.register(seeded.clone());
    let access = TorrentAccess::open(
        &seeded.magnet_uri(),
        test_config(root.path(), -1),
        session.clone(),
    )
    .unwrap();

    assert_eq!(
        session.metadata_transfer_count(),
        0,
        "second open must resolve the magnet from the cache"
    );
    assert!(access.location().starts_with("torrent://"));
}

#[test]
fn test_shutdown_with_keep_files_persists_everything() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let payload = pattern(256 * 1024);
    let seeded = SeededTorrent::single_file("movie.mkv", payload.clone(), 65_536);
    let session = SimulatedSession::new();
    session.register(seeded.clone());

    let access = TorrentAccess::open(
        &seeded.magnet_uri(),
        test_config(root.path(), 0),
        session.clone(),
    )
    .unwrap();
    read_one_block(&access);
    drop(access);

    let hash = seeded.info.info_hash();
    let cache = root.path().join("cache");
    assert!(cache.join(format!("{hash}.torrent")).exists());
    assert!(cache.join(format!("{hash}.resume")).exists());
    assert!(cache.join("dht_state.dat").exists());

    let downloaded = root.path().join("downloads").join("movie.mkv");
    assert_eq!(std::fs::read(downloaded).unwrap(), payload);

    assert!(session.is_paused());
    assert!(!session.has_torrent(hash));
}

#[test]
fn test_shutdown_without_keep_files_cleans_up() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let payload = pattern(256 * 1024);
    let seeded = SeededTorrent::single_file("movie.mkv", payload, 65_536);
    let session = SimulatedSession::new();
    session.register(seeded.clone());

    let mut config = test_config(root.path(), 0);
    config.keep_files = false;
    let access =
        TorrentAccess::open(&seeded.magnet_uri(), config, session.clone()).unwrap();
    read_one_block(&access);
    drop(access);

    let hash = seeded.info.info_hash();
    let cache = root.path().join("cache");
    assert!(!cache.join(format!("{hash}.torrent")).exists());
    assert!(!cache.join(format!("{hash}.resume")).exists());
    assert!(!root.path().join("downloads").join("movie.mkv").exists());
}

#[test]
fn test_streaming_applies_the_engine_tuning() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let seeded = SeededTorrent::single_file("movie.mkv", pattern(128 * 1024), 65_536);
    let session = SimulatedSession::new();
    session.register(seeded.clone());
    let torrent_path = seed_torrent_file(root.path(), &seeded);

    let mut config = test_config(root.path(), 0);
    config.upload_rate_limit = 100;
    config.download_rate_limit = 300;
    let _access = TorrentAccess::open(
        torrent_path.to_str().unwrap(),
        config,
        session.clone(),
    )
    .unwrap();

    let settings = session.applied_settings().expect("settings applied");
    assert_eq!(settings.user_agent, "slipstream/0.1.0 libtorrent/1.2.19");
    assert_eq!(settings.upload_rate_limit, 100 * 1024);
    assert_eq!(settings.download_rate_limit, 300 * 1024);
    assert_eq!(settings.active_downloads, 1);
    assert_eq!(settings.torrent_connect_boost, settings.num_want / 10);

    let routers = session.dht_routers();
    assert_eq!(routers.len(), 3);
    assert_eq!(routers[0], ("router.bittorrent.com".to_string(), 6881));
    assert!(session.dht_started());
    assert!(session.sequential_download(seeded.info.info_hash()));
}

#[test]
fn test_resume_data_feeds_the_next_session() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let seeded = SeededTorrent::single_file("movie.mkv", pattern(256 * 1024), 65_536);

    {
        let session = SimulatedSession::new();
        session.register(seeded.clone());
        let access = TorrentAccess::open(
            &seeded.magnet_uri(),
            test_config(root.path(), 0),
            session,
        )
        .unwrap();
        read_one_block(&access);
    }

    let session = SimulatedSession::new();
    session.register(seeded.clone());
    let _access = TorrentAccess::open(
        &seeded.magnet_uri(),
        test_config(root.path(), 0),
        session.clone(),
    )
    .unwrap();

    assert!(
        session.last_resume_data().is_some(),
        "cached resume blob must be handed back to the engine"
    );
}

#[test]
fn test_rejected_add_fails_open() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let seeded = SeededTorrent::single_file("movie.mkv", pattern(64 * 1024), 16 * 1024);
    let torrent_path = seed_torrent_file(root.path(), &seeded);

    let session = SimulatedSession::with_config(SimConfig {
        reject_adds: Some("session limit reached".to_string()),
        ..SimConfig::default()
    });
    let result = TorrentAccess::open(
        torrent_path.to_str().unwrap(),
        test_config(root.path(), 0),
        session,
    );
    assert!(matches!(result, Err(AccessError::AddTorrentFailed { .. })));

    // the same rejection during a magnet open surfaces as MetadataFailed
    let session = SimulatedSession::with_config(SimConfig {
        reject_adds: Some("session limit reached".to_string()),
        ..SimConfig::default()
    });
    let result = TorrentAccess::open(
        &seeded.magnet_uri(),
        test_config(root.path(), -1),
        session,
    );
    assert!(matches!(result, Err(AccessError::MetadataFailed { .. })));
}

#[test]
fn test_out_of_range_file_index_fails_open() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let seeded = SeededTorrent::single_file("movie.mkv", pattern(64 * 1024), 16 * 1024);
    let session = SimulatedSession::new();
    session.register(seeded.clone());
    let torrent_path = seed_torrent_file(root.path(), &seeded);

    let result = TorrentAccess::open(
        torrent_path.to_str().unwrap(),
        test_config(root.path(), 3),
        session.clone(),
    );
    assert!(matches!(
        result,
        Err(AccessError::InvalidFileIndex { index: 3, count: 1 })
    ));
    // the failed open removed the torrent again
    assert!(!session.has_torrent(seeded.info.info_hash()));
}

#[test]
fn test_missing_download_dir_fails_open() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let seeded = SeededTorrent::single_file("movie.mkv", pattern(64 * 1024), 16 * 1024);
    let torrent_path = seed_torrent_file(root.path(), &seeded);

    let mut config = test_config(root.path(), 0);
    config.download_dir = None;
    let result = TorrentAccess::open(
        torrent_path.to_str().unwrap(),
        config,
        SimulatedSession::new(),
    );
    assert!(matches!(result, Err(AccessError::NoDownloadDir)));
}
