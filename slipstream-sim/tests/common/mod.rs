//! Shared fixtures for the integration scenarios.

use std::fs;
use std::path::{Path, PathBuf};

use slipstream_core::AccessConfig;
use slipstream_sim::SeededTorrent;

/// Access configuration rooted in a scratch directory.
pub fn test_config(root: &Path, file_index: i64) -> AccessConfig {
    AccessConfig {
        file_index,
        download_dir: Some(root.join("downloads")),
        cache_dir: Some(root.join("cache")),
        ..AccessConfig::default()
    }
}

/// Installs a test-friendly tracing subscriber, once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Deterministic non-repeating payload bytes.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Writes the seeded torrent's body next to the scratch root and
/// returns its path, for file-based opens.
pub fn seed_torrent_file(root: &Path, seeded: &SeededTorrent) -> PathBuf {
    let path = root.join(format!("{}.torrent", seeded.info.name()));
    fs::write(&path, seeded.torrent_body().unwrap()).unwrap();
    path
}
