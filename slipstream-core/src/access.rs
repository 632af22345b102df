//! The consumer-facing access lifecycle.
//!
//! A [`TorrentAccess`] is created when the player opens a location,
//! either enumerates the torrent's files as a playlist or streams one
//! selected file, and tears the session down on drop: resume data and
//! DHT state are persisted, the torrent is removed (optionally deleting
//! its files), and the driver thread is joined.

use std::fs;
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};

use crate::cache::{self, CacheStore};
use crate::config::{AccessConfig, SessionSettings, DHT_ROUTERS};
use crate::engine::{
    AddTorrentParams, AlertMask, TorrentHandle, TorrentInfo, TorrentSession,
};
use crate::session::{drive, PumpMode, SessionContext, RESUME_WAIT};
use crate::streaming::NextBlock;
use crate::{metadata, uri, AccessError, Result};

/// Player-facing capability answers for this access type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Playback can be paused.
    pub can_pause: bool,
    /// Seeking is supported.
    pub can_seek: bool,
    /// Seeks are not instantaneous; the swarm must catch up.
    pub can_fast_seek: bool,
    /// The consumer controls the pace of delivery.
    pub can_control_pace: bool,
}

/// One entry of the browse playlist built from a torrent's file table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistItem {
    /// File path within the torrent, used as the display name.
    pub name: String,
    /// Location to open for this entry (the shared public URI).
    pub uri: String,
    /// Input option selecting the file, `torrent-file-index=<i>`.
    pub option: String,
    /// File size in bytes.
    pub length: u64,
}

/// A torrent opened for browsing or streaming.
///
/// The type parameter is the engine session; production code binds a
/// real BitTorrent engine, the test suite binds the deterministic
/// simulator from `slipstream-sim`.
pub struct TorrentAccess<S: TorrentSession> {
    ctx: Arc<SessionContext<S>>,
    config: AccessConfig,
    params: AddTorrentParams,
    location: String,
    handle: Option<S::Handle>,
    driver: Option<thread::JoinHandle<()>>,
    closed: bool,
}

impl<S: TorrentSession> TorrentAccess<S> {
    /// Opens a location for this session.
    ///
    /// Parses the location, resolves magnet metadata (from cache or
    /// swarm), and starts the streaming download of the configured
    /// file, unless the configuration selects playlist mode.
    ///
    /// # Errors
    /// Everything in [`AccessError`] except `OutOfMemory` mid-stream;
    /// any error tears down the partially constructed instance.
    pub fn open(location: &str, config: AccessConfig, session: S) -> Result<Self> {
        let mut params = uri::parse_location(location)?;

        let download_dir = config.download_dir.clone().ok_or(AccessError::NoDownloadDir)?;
        fs::create_dir_all(&download_dir).map_err(|_| AccessError::NoDownloadDir)?;
        params.save_path = download_dir;

        session.set_alert_mask(AlertMask::STATUS | AlertMask::STORAGE | AlertMask::PIECE_PROGRESS);
        let cache = CacheStore::new(config.cache_dir.clone());
        let ctx = Arc::new(SessionContext::new(session, cache, params.info_hash));

        let mut public = location.to_string();
        if params.torrent_info.is_none() {
            let cached = metadata::fetch_metadata(&ctx, &mut params)?;
            public = uri::cached_uri(&cached);
        } else if !public.starts_with(uri::TORRENT_SCHEME) {
            // Plain file paths are promoted to the torrent:// scheme.
            public = format!("{}{public}", uri::TORRENT_SCHEME);
        }

        let mut access = Self {
            ctx,
            config,
            params,
            location: public,
            handle: None,
            driver: None,
            closed: false,
        };
        if access.config.file_index >= 0 {
            let file_index = u32::try_from(access.config.file_index).map_err(|_| {
                AccessError::InvalidFileIndex {
                    index: access.config.file_index as u64,
                    count: access.file_count(),
                }
            })?;
            access.start_download(file_index)?;
        } else {
            info!(files = access.file_count(), "opened in playlist mode");
        }
        Ok(access)
    }

    fn file_count(&self) -> usize {
        self.params
            .torrent_info
            .as_ref()
            .map_or(0, |info| info.files().len())
    }

    fn start_download(&mut self, file_index: u32) -> Result<()> {
        let info = self
            .params
            .torrent_info
            .clone()
            .ok_or_else(|| AccessError::MetadataFailed {
                reason: "download started without metadata".to_string(),
            })?;

        let settings = SessionSettings::streaming(&self.config, self.ctx.session.version());
        self.ctx.session.apply_settings(&settings);
        if let Some(state) = self.ctx.cache.load(cache::DHT_STATE_FILE) {
            self.ctx.session.load_state(&state);
        }
        self.ctx.session.start_dht();
        for (host, port) in DHT_ROUTERS {
            self.ctx.session.add_dht_router(host, port);
        }

        self.params.resume_data = self
            .ctx
            .cache
            .load(&cache::resume_file_name(&self.ctx.info_hash));

        let handle = self
            .ctx
            .session
            .add_torrent(&self.params)
            .map_err(|err| AccessError::AddTorrentFailed {
                reason: err.to_string(),
            })?;
        handle.set_sequential_download(true);

        let attached = self
            .ctx
            .controller
            .attach(handle.clone(), info, file_index)
            .and_then(|()| self.ctx.controller.select_pieces(0));
        if let Err(err) = attached {
            self.ctx.session.remove_torrent(handle, false);
            return Err(err);
        }

        let driver_ctx = Arc::clone(&self.ctx);
        let driver = thread::Builder::new()
            .name("slipstream-session".to_string())
            .spawn(move || drive(&driver_ctx, PumpMode::Background));
        let driver = match driver {
            Ok(driver) => driver,
            Err(err) => {
                self.ctx.session.remove_torrent(handle, false);
                return Err(err.into());
            }
        };

        self.handle = Some(handle);
        self.driver = Some(driver);
        info!(file = file_index, "streaming download started");
        Ok(())
    }

    /// Delivers the next block of the selected file; see
    /// [`PieceController::read_next_block`](crate::streaming::PieceController::read_next_block).
    pub fn read_next_block(&self) -> NextBlock {
        self.ctx.controller.read_next_block()
    }

    /// Seeks the stream to a byte offset within the selected file by
    /// rebuilding piece priorities and the delivery queue.
    ///
    /// # Errors
    /// - [`AccessError::OutOfMemory`] when queue storage cannot be
    ///   reserved.
    pub fn seek(&self, file_offset: u64) -> Result<()> {
        debug!(file_offset, "seek requested");
        self.ctx.controller.select_pieces(file_offset)
    }

    /// Enumerates the torrent's files as playlist entries, largest
    /// first. Available once metadata is present, regardless of mode.
    ///
    /// # Errors
    /// - [`AccessError::MetadataFailed`] when no metadata is available.
    pub fn playlist(&self) -> Result<Vec<PlaylistItem>> {
        let info = self
            .params
            .torrent_info
            .as_ref()
            .ok_or_else(|| AccessError::MetadataFailed {
                reason: "no metadata to browse".to_string(),
            })?;
        Ok(build_playlist(info, &self.location))
    }

    /// The public location URI; after a metadata fetch this always
    /// points at the cached `.torrent` body.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Metadata of the opened torrent, once known.
    pub fn torrent_info(&self) -> Option<&Arc<TorrentInfo>> {
        self.params.torrent_info.as_ref()
    }

    /// Capability answers for the host player's control queries.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            can_pause: true,
            can_seek: true,
            can_fast_seek: false,
            can_control_pace: true,
        }
    }

    /// Pause-state changes are accepted and ignored; the pull loop
    /// simply stops asking for blocks.
    pub fn set_pause_state(&self, _paused: bool) {}

    /// Seekpoint changes are accepted and ignored at this layer.
    pub fn set_seekpoint(&self, _seekpoint: u64) {}

    /// Closes the access, persisting resume data and DHT state and
    /// joining the driver. Equivalent to dropping.
    pub fn close(self) {}

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let Some(handle) = self.handle.take() else {
            return;
        };
        debug!(state = %handle.status().state, "closing torrent access");

        // Two-phase shutdown: issue the resume flush, save DHT state in
        // parallel, wait for the resume alert, then pause, remove and
        // join. Reordering these steps can lose resume data.
        if self.config.keep_files {
            handle.save_resume_data();
        }
        let dht_ctx = Arc::clone(&self.ctx);
        let dht_saver = thread::Builder::new()
            .name("slipstream-dht-save".to_string())
            .spawn(move || {
                if let Some(state) = dht_ctx.session.save_dht_state() {
                    dht_ctx.cache.save(cache::DHT_STATE_FILE, &state);
                }
            })
            .ok();
        if self.config.keep_files && !self.ctx.resume_gate.wait(RESUME_WAIT) {
            warn!("engine did not flush resume data in time");
        }

        self.ctx.session.pause();
        self.ctx
            .session
            .remove_torrent(handle, !self.config.keep_files);

        self.ctx.request_stop();
        if let Some(driver) = self.driver.take() {
            if driver.join().is_err() {
                warn!("session driver panicked");
            }
        }
        if let Some(saver) = dht_saver {
            let _ = saver.join();
        }

        if !self.config.keep_files {
            self.ctx
                .cache
                .delete(&cache::torrent_file_name(&self.ctx.info_hash));
            self.ctx
                .cache
                .delete(&cache::resume_file_name(&self.ctx.info_hash));
        }
        info!("torrent access closed");
    }
}

impl<S: TorrentSession> Drop for TorrentAccess<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn build_playlist(info: &TorrentInfo, uri: &str) -> Vec<PlaylistItem> {
    let mut items: Vec<PlaylistItem> = info
        .files()
        .iter()
        .enumerate()
        .map(|(index, file)| PlaylistItem {
            name: file.path.clone(),
            uri: uri.to_string(),
            option: format!("{}={index}", crate::config::KEY_FILE_INDEX),
            length: file.length,
        })
        .collect();
    // Largest first; sort_by is stable so equal sizes keep file order.
    items.sort_by(|a, b| b.length.cmp(&a.length));
    items
}
