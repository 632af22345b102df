//! Slipstream Core - BitTorrent swarms as seekable byte streams

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![warn(clippy::too_many_lines)]
//!
//! This crate adapts a BitTorrent engine to the pull model of a streaming
//! media player. The player asks for the next block of the selected file
//! (with occasional seeks); the engine downloads pieces from peers in
//! whatever order the swarm allows. The piece controller in [`streaming`]
//! reconciles the two, delivering blocks in strictly increasing file
//! order with bounded memory and at-most-once delivery.
//!
//! The engine itself is an external collaborator behind the traits in
//! [`engine`]; a deterministic in-memory implementation lives in the
//! `slipstream-sim` crate and backs the integration test suite.

pub mod access;
pub mod cache;
pub mod config;
pub mod engine;
pub mod streaming;

mod metadata;
mod session;
mod uri;

// Re-export the main types for convenient access
pub use access::{Capabilities, PlaylistItem, TorrentAccess};
pub use config::{AccessConfig, ConfigSource, SessionSettings};
pub use engine::{
    AddTorrentParams, Alert, AlertMask, EngineError, InfoHash, PieceIndex, PiecePriority,
    TorrentHandle, TorrentInfo, TorrentSession, TorrentState,
};
pub use streaming::{NextBlock, StreamBlock};

/// Errors surfaced across the consumer-facing API.
///
/// Open-time failures tear down the partially constructed access
/// instance; nothing in this enum is ever produced while streaming, where
/// problems surface as retries or a genuine end of stream instead.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// The location string could not be parsed as a magnet URI or
    /// torrent file.
    #[error("invalid location URI: {reason}")]
    InvalidUri {
        /// What the parser objected to.
        reason: String,
    },

    /// No usable save path was configured for downloaded data.
    #[error("no usable download directory")]
    NoDownloadDir,

    /// Magnet metadata could not be obtained from the swarm or cached.
    #[error("metadata acquisition failed: {reason}")]
    MetadataFailed {
        /// Why the metadata never materialized.
        reason: String,
    },

    /// The engine rejected the add-torrent parameters at download start.
    #[error("engine rejected torrent: {reason}")]
    AddTorrentFailed {
        /// The engine's rejection reason.
        reason: String,
    },

    /// The selected file index does not exist in the torrent.
    #[error("file index {index} out of range for torrent with {count} files")]
    InvalidFileIndex {
        /// The rejected 0-based index.
        index: u64,
        /// Number of files the torrent actually has.
        count: usize,
    },

    /// Allocator exhaustion while preparing the stream, surfaced
    /// distinctly so the host player can react.
    #[error("allocation failed while preparing the stream")]
    OutOfMemory,

    /// Host-level I/O failure during open (thread spawn, directory
    /// creation).
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using [`AccessError`] as the error type.
pub type Result<T> = std::result::Result<T, AccessError>;
