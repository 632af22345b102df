//! Configuration for the torrent access layer.
//!
//! Two layers live here: [`AccessConfig`], the handful of values the
//! host player exposes through name-based variable lookup, and
//! [`SessionSettings`], the tuning block pushed into the engine when a
//! streaming download starts. All tuned constants are defined here
//! rather than scattered through the code.

use std::path::PathBuf;

/// Host variable name for the selected file index.
pub const KEY_FILE_INDEX: &str = "torrent-file-index";
/// Host variable name for the download directory.
pub const KEY_DOWNLOAD_DIR: &str = "download-dir";
/// Host variable name for the cache directory.
pub const KEY_CACHE_DIR: &str = "cache-dir";
/// Host variable name for the keep-files switch.
pub const KEY_KEEP_FILES: &str = "keep-files";
/// Host variable name for the upload rate limit in kB/s.
pub const KEY_UPLOAD_RATE: &str = "upload-rate-limit";
/// Host variable name for the download rate limit in kB/s.
pub const KEY_DOWNLOAD_RATE: &str = "download-rate-limit";
/// Host variable name for the share ratio limit.
pub const KEY_SHARE_RATIO: &str = "share-ratio-limit";

/// Bootstrap routers used to seed the DHT routing table.
pub const DHT_ROUTERS: [(&str, u16); 3] = [
    ("router.bittorrent.com", 6881),
    ("router.utorrent.com", 6881),
    ("router.bitcomet.com", 6881),
];

/// Name-based variable lookup provided by the host player.
///
/// Each getter returns `None` when the host has no value for the name,
/// letting [`AccessConfig::from_source`] fall back to defaults.
pub trait ConfigSource {
    /// Looks up an integer variable.
    fn integer(&self, name: &str) -> Option<i64>;
    /// Looks up a boolean variable.
    fn boolean(&self, name: &str) -> Option<bool>;
    /// Looks up a floating-point variable.
    fn float(&self, name: &str) -> Option<f64>;
    /// Looks up a path variable.
    fn path(&self, name: &str) -> Option<PathBuf>;
}

/// Consumer-facing configuration for one access instance.
#[derive(Debug, Clone)]
pub struct AccessConfig {
    /// 0-based index of the file to stream; negative values select
    /// playlist browsing instead.
    pub file_index: i64,
    /// Save path for downloaded data. `None` fails `open` with
    /// `NoDownloadDir`; the host is expected to supply its platform
    /// download directory.
    pub download_dir: Option<PathBuf>,
    /// Directory for persisted torrent bodies, resume blobs and DHT
    /// state. `None` disables persistence.
    pub cache_dir: Option<PathBuf>,
    /// Keep downloaded files and resume data on shutdown.
    pub keep_files: bool,
    /// Upload rate limit in kB/s, 0 for unlimited.
    pub upload_rate_limit: i64,
    /// Download rate limit in kB/s, 0 for unlimited.
    pub download_rate_limit: i64,
    /// Seed until this share ratio is reached.
    pub share_ratio_limit: f64,
    /// Host application name announced to peers.
    pub host_name: String,
    /// Host application version announced to peers.
    pub host_version: String,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            file_index: -1,
            download_dir: None,
            cache_dir: None,
            keep_files: true,
            upload_rate_limit: 0,
            download_rate_limit: 0,
            share_ratio_limit: 2.0,
            host_name: "slipstream".to_string(),
            host_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl AccessConfig {
    /// Reads the configuration surface from the host player's variable
    /// lookup, applying defaults for anything the host leaves unset.
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        let defaults = Self::default();
        Self {
            file_index: source.integer(KEY_FILE_INDEX).unwrap_or(defaults.file_index),
            download_dir: source.path(KEY_DOWNLOAD_DIR),
            cache_dir: source.path(KEY_CACHE_DIR),
            keep_files: source.boolean(KEY_KEEP_FILES).unwrap_or(defaults.keep_files),
            upload_rate_limit: source
                .integer(KEY_UPLOAD_RATE)
                .unwrap_or(defaults.upload_rate_limit),
            download_rate_limit: source
                .integer(KEY_DOWNLOAD_RATE)
                .unwrap_or(defaults.download_rate_limit),
            share_ratio_limit: source
                .float(KEY_SHARE_RATIO)
                .unwrap_or(defaults.share_ratio_limit),
            ..defaults
        }
    }
}

/// Engine tuning applied when a streaming download starts.
///
/// The defaults bias the engine toward a single actively streamed
/// torrent: one download slot, aggressive announces, no initial
/// rarest-first phase, and a small disk queue so pieces reach the
/// consumer quickly.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Simultaneous downloads the engine schedules.
    pub active_downloads: i32,
    /// Simultaneous seeds the engine schedules.
    pub active_seeds: i32,
    /// Announce to every tracker tier rather than the first reachable.
    pub announce_to_all_trackers: bool,
    /// Use the DHT only when trackers fail.
    pub use_dht_as_fallback: bool,
    /// Pieces to pick at random before switching to rarest-first; 0
    /// keeps picking strictly by priority from the start.
    pub initial_picker_threshold: i32,
    /// Skip access-time updates on storage files.
    pub no_atime_storage: bool,
    /// Accept resume data whose file set is incomplete.
    pub no_recheck_incomplete_resume: bool,
    /// Upper bound on bytes queued for disk writes.
    pub max_queued_disk_bytes: i32,
    /// Engine disk cache size, -1 for the engine default.
    pub cache_size: i32,
    /// Upper bound on the session peer list.
    pub max_peerlist_size: i32,
    /// Peers requested per tracker announce.
    pub num_want: i32,
    /// Connection attempts burst for a freshly added torrent.
    pub torrent_connect_boost: i32,
    /// Stop seeding past this upload/download ratio.
    pub share_ratio_limit: f32,
    /// Upload rate limit in bytes per second, 0 for unlimited.
    pub upload_rate_limit: i64,
    /// Download rate limit in bytes per second, 0 for unlimited.
    pub download_rate_limit: i64,
    /// User agent announced to peers and trackers.
    pub user_agent: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let num_want = 200;
        Self {
            active_downloads: 1,
            active_seeds: 1,
            announce_to_all_trackers: true,
            use_dht_as_fallback: false,
            initial_picker_threshold: 0,
            no_atime_storage: true,
            no_recheck_incomplete_resume: true,
            max_queued_disk_bytes: 2 * 1024 * 1024,
            cache_size: -1,
            max_peerlist_size: 3000,
            num_want,
            torrent_connect_boost: num_want / 10,
            share_ratio_limit: 2.0,
            upload_rate_limit: 0,
            download_rate_limit: 0,
            user_agent: String::new(),
        }
    }
}

impl SessionSettings {
    /// Builds the settings block for a streaming session from the host
    /// configuration and the engine's version string.
    pub fn streaming(config: &AccessConfig, engine_version: &str) -> Self {
        Self {
            share_ratio_limit: config.share_ratio_limit as f32,
            upload_rate_limit: config.upload_rate_limit * 1024,
            download_rate_limit: config.download_rate_limit * 1024,
            user_agent: format!(
                "{}/{} libtorrent/{engine_version}",
                config.host_name, config.host_version
            ),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    struct MapSource {
        integers: HashMap<&'static str, i64>,
        booleans: HashMap<&'static str, bool>,
        floats: HashMap<&'static str, f64>,
        paths: HashMap<&'static str, PathBuf>,
    }

    impl ConfigSource for MapSource {
        fn integer(&self, name: &str) -> Option<i64> {
            self.integers.get(name).copied()
        }
        fn boolean(&self, name: &str) -> Option<bool> {
            self.booleans.get(name).copied()
        }
        fn float(&self, name: &str) -> Option<f64> {
            self.floats.get(name).copied()
        }
        fn path(&self, name: &str) -> Option<PathBuf> {
            self.paths.get(name).cloned()
        }
    }

    #[test]
    fn test_defaults_select_playlist_mode() {
        let config = AccessConfig::from_source(&MapSource::default());
        assert_eq!(config.file_index, -1);
        assert!(config.keep_files);
        assert_eq!(config.upload_rate_limit, 0);
        assert_eq!(config.share_ratio_limit, 2.0);
        assert!(config.download_dir.is_none());
    }

    #[test]
    fn test_host_values_override_defaults() {
        let mut source = MapSource::default();
        source.integers.insert(KEY_FILE_INDEX, 2);
        source.integers.insert(KEY_DOWNLOAD_RATE, 300);
        source.booleans.insert(KEY_KEEP_FILES, false);
        source.floats.insert(KEY_SHARE_RATIO, 1.5);
        source.paths.insert(KEY_DOWNLOAD_DIR, PathBuf::from("/dl"));

        let config = AccessConfig::from_source(&source);
        assert_eq!(config.file_index, 2);
        assert_eq!(config.download_rate_limit, 300);
        assert!(!config.keep_files);
        assert_eq!(config.share_ratio_limit, 1.5);
        assert_eq!(config.download_dir.as_deref(), Some("/dl".as_ref()));
    }

    #[test]
    fn test_streaming_settings_scale_rate_limits() {
        let config = AccessConfig {
            upload_rate_limit: 100,
            download_rate_limit: 300,
            share_ratio_limit: 1.5,
            ..AccessConfig::default()
        };
        let settings = SessionSettings::streaming(&config, "1.2.19");

        assert_eq!(settings.upload_rate_limit, 100 * 1024);
        assert_eq!(settings.download_rate_limit, 300 * 1024);
        assert_eq!(settings.share_ratio_limit, 1.5);
        assert_eq!(settings.user_agent, "slipstream/0.1.0 libtorrent/1.2.19");
        assert_eq!(settings.torrent_connect_boost, settings.num_want / 10);
        assert_eq!(settings.active_downloads, 1);
        assert_eq!(settings.max_queued_disk_bytes, 2 * 1024 * 1024);
    }
}
