//! Contract required from the torrent engine.
//!
//! The core never speaks the peer wire protocol itself; it drives an
//! opaque engine through the [`TorrentSession`] and [`TorrentHandle`]
//! traits and consumes its event stream as [`Alert`] values. The free
//! functions and value types here are the engine-library half of the
//! contract: magnet parsing, torrent metadata, and the parameter block
//! handed to `add_torrent`.

pub mod alert;
pub mod info;
pub mod magnet;

use std::fmt;
use std::ops::BitOr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use alert::{Alert, TorrentState};
pub use info::{FileEntry, FileSlice, TorrentInfo};
pub use magnet::{parse_magnet_uri, MagnetDescriptor};

use crate::config::SessionSettings;

/// Errors produced by the engine contract layer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A magnet URI was syntactically invalid or lacked an info hash.
    #[error("invalid magnet link: {reason}")]
    InvalidMagnet {
        /// What the magnet parser objected to.
        reason: String,
    },

    /// A torrent body could not be decoded into usable metadata.
    #[error("invalid torrent file: {reason}")]
    InvalidTorrentFile {
        /// What the bencode layer objected to.
        reason: String,
    },

    /// The engine refused the add-torrent parameters.
    #[error("torrent rejected: {reason}")]
    AddRejected {
        /// The engine's rejection reason.
        reason: String,
    },

    /// I/O failure while reading a torrent file from disk.
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

/// SHA-1 hash identifying a unique torrent.
///
/// 20-byte hash of the info dictionary; the identity key for cache
/// entries and for engine lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates an `InfoHash` from a 20-byte SHA-1 digest.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Parses a 40-character hex string, as found in magnet URIs.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 40 {
            return None;
        }
        let mut hash = [0u8; 20];
        for (i, chunk) in hex.as_bytes().chunks_exact(2).enumerate() {
            let pair = std::str::from_utf8(chunk).ok()?;
            hash[i] = u8::from_str_radix(pair, 16).ok()?;
        }
        Some(Self(hash))
    }

    /// Returns a reference to the underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Zero-based index of a piece within a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceIndex(u32);

impl PieceIndex {
    /// Creates a `PieceIndex` from a zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying index.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Download priority of a single piece.
///
/// Only the two extremes matter to the streaming controller: pieces of
/// the selected file suffix are pinned to [`PiecePriority::TOP`],
/// everything else is dropped to [`PiecePriority::SKIP`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PiecePriority(u8);

impl PiecePriority {
    /// Piece is not downloaded at all.
    pub const SKIP: PiecePriority = PiecePriority(0);
    /// Maximum priority level.
    pub const TOP: PiecePriority = PiecePriority(7);

    /// Creates a priority, clamped to the engine's 0..=7 range.
    pub fn new(level: u8) -> Self {
        Self(level.min(7))
    }

    /// Returns the numeric priority level.
    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Whether the engine will download the piece at all.
    pub fn is_wanted(self) -> bool {
        self.0 > 0
    }
}

/// Alert delivery categories, combined with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertMask(u32);

impl AlertMask {
    /// No alerts at all.
    pub const NONE: AlertMask = AlertMask(0);
    /// Torrent status transitions and metadata arrival.
    pub const STATUS: AlertMask = AlertMask(1);
    /// Disk-side events: piece reads and resume data.
    pub const STORAGE: AlertMask = AlertMask(1 << 1);
    /// Per-piece completion progress.
    pub const PIECE_PROGRESS: AlertMask = AlertMask(1 << 2);

    /// Whether every category in `other` is enabled in `self`.
    pub fn contains(self, other: AlertMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AlertMask {
    type Output = AlertMask;

    fn bitor(self, rhs: AlertMask) -> AlertMask {
        AlertMask(self.0 | rhs.0)
    }
}

/// Flags accompanying a piece-deadline request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeadlineFlags {
    /// Ask the engine to raise a [`Alert::ReadPiece`] once the piece has
    /// been verified and read into memory.
    pub alert_when_available: bool,
}

impl DeadlineFlags {
    /// The alert-on-available request used by the streaming controller.
    pub const ALERT_WHEN_AVAILABLE: DeadlineFlags = DeadlineFlags {
        alert_when_available: true,
    };
}

/// How the engine lays files out on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StorageMode {
    /// Preallocate the full file up front. Required for streaming so
    /// byte offsets are stable from the first piece.
    #[default]
    Allocate,
    /// Sparse files, grown as pieces arrive.
    Sparse,
}

/// Parameter block consumed by [`TorrentSession::add_torrent`].
///
/// Produced by the URI parser; the metadata fetcher grafts
/// `torrent_info` in for magnet inputs before the download starts.
#[derive(Debug, Clone)]
pub struct AddTorrentParams {
    /// Identity of the torrent.
    pub info_hash: InfoHash,
    /// Display name, when the source carried one.
    pub name: Option<String>,
    /// Announce URLs collected from the source.
    pub trackers: Vec<String>,
    /// Full metadata; absent for magnet inputs until fetched.
    pub torrent_info: Option<Arc<TorrentInfo>>,
    /// Engine-defined resume blob from a previous session.
    pub resume_data: Option<Vec<u8>>,
    /// Directory downloaded data is stored under.
    pub save_path: PathBuf,
    /// On-disk allocation strategy.
    pub storage_mode: StorageMode,
}

impl AddTorrentParams {
    /// Builds parameters from a parsed magnet descriptor. The torrent
    /// info stays empty until the metadata fetcher fills it.
    pub fn from_magnet(magnet: MagnetDescriptor) -> Self {
        Self {
            info_hash: magnet.info_hash,
            name: magnet.display_name,
            trackers: magnet.trackers,
            torrent_info: None,
            resume_data: None,
            save_path: PathBuf::new(),
            storage_mode: StorageMode::Allocate,
        }
    }

    /// Builds parameters from fully parsed torrent metadata.
    pub fn from_info(info: TorrentInfo) -> Self {
        Self {
            info_hash: info.info_hash(),
            name: Some(info.name().to_string()),
            trackers: info.trackers().to_vec(),
            torrent_info: Some(Arc::new(info)),
            resume_data: None,
            save_path: PathBuf::new(),
            storage_mode: StorageMode::Allocate,
        }
    }
}

/// Point-in-time status snapshot of a running torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TorrentStatus {
    /// Current lifecycle state.
    pub state: TorrentState,
}

/// Session-level operations the core requires from the engine.
///
/// Implementations are expected to synchronize internally; the core
/// calls into the session concurrently from the consumer thread and the
/// session driver.
pub trait TorrentSession: Send + Sync + 'static {
    /// Handle type for torrents added to this session.
    type Handle: TorrentHandle;

    /// Registers a torrent and starts engine-side processing.
    ///
    /// # Errors
    /// - [`EngineError::AddRejected`] when the parameters are unusable.
    fn add_torrent(&self, params: &AddTorrentParams) -> Result<Self::Handle, EngineError>;

    /// Removes a torrent, optionally deleting its downloaded files.
    fn remove_torrent(&self, handle: Self::Handle, delete_files: bool);

    /// Restricts which alert categories the engine produces.
    fn set_alert_mask(&self, mask: AlertMask);

    /// Blocks until an alert is queued or the timeout elapses. Returns
    /// whether at least one alert is available.
    fn wait_for_alert(&self, timeout: Duration) -> bool;

    /// Drains the queued alerts in delivery order.
    fn pop_alerts(&self) -> Vec<Alert>;

    /// Snapshots the DHT routing state as an opaque bencoded blob.
    fn save_dht_state(&self) -> Option<Vec<u8>>;

    /// Restores session state previously produced by
    /// [`TorrentSession::save_dht_state`]. Malformed blobs are ignored.
    fn load_state(&self, state: &[u8]);

    /// Starts the DHT subsystem.
    fn start_dht(&self);

    /// Adds a bootstrap router for trackerless peer discovery.
    fn add_dht_router(&self, host: &str, port: u16);

    /// Applies the streaming-tuned settings block.
    fn apply_settings(&self, settings: &SessionSettings);

    /// Pauses all engine activity.
    fn pause(&self);

    /// Arms the metadata-transfer extension used to resolve magnets.
    fn enable_metadata_exchange(&self);

    /// Engine version string, used for the user-agent announced to
    /// peers.
    fn version(&self) -> &str;
}

/// Per-torrent operations the core requires from the engine.
pub trait TorrentHandle: Clone + Send + Sync + 'static {
    /// Snapshots the torrent's current status.
    fn status(&self) -> TorrentStatus;

    /// Returns the torrent's metadata once the engine has it. For
    /// magnet-added torrents this is `None` until metadata transfer
    /// completes.
    fn torrent_info(&self) -> Option<Arc<TorrentInfo>>;

    /// Sets the download priority of one piece.
    fn set_piece_priority(&self, piece: PieceIndex, priority: PiecePriority);

    /// Requests a piece by deadline; with
    /// [`DeadlineFlags::ALERT_WHEN_AVAILABLE`] the engine answers with a
    /// [`Alert::ReadPiece`] as soon as the piece is verified.
    fn set_piece_deadline(&self, piece: PieceIndex, deadline: Duration, flags: DeadlineFlags);

    /// Asks the engine to read a verified piece back from disk,
    /// answered with a [`Alert::ReadPiece`].
    fn read_piece(&self, piece: PieceIndex);

    /// Toggles strictly sequential piece picking.
    fn set_sequential_download(&self, sequential: bool);

    /// Asks the engine to flush and emit a [`Alert::SaveResumeData`].
    fn save_resume_data(&self);
}
