//! Event stream produced by the torrent engine.

use std::fmt;

use bytes::Bytes;

use super::{AlertMask, PieceIndex};

/// Lifecycle state of a torrent inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentState {
    /// Waiting for a checking slot.
    QueuedForChecking,
    /// Resolving a magnet link into metadata.
    DownloadingMetadata,
    /// Validating a resume blob against on-disk data.
    CheckingResumeData,
    /// Actively downloading payload pieces.
    Downloading,
    /// All wanted pieces downloaded.
    Finished,
    /// Complete and uploading to peers.
    Seeding,
    /// Preallocating storage.
    Allocating,
    /// Hashing existing files on disk.
    CheckingFiles,
}

impl TorrentState {
    /// Whether the consumer may pull blocks in this state.
    pub fn is_readable(self) -> bool {
        matches!(
            self,
            TorrentState::Downloading | TorrentState::Finished | TorrentState::Seeding
        )
    }
}

impl fmt::Display for TorrentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TorrentState::QueuedForChecking => "queued for checking",
            TorrentState::DownloadingMetadata => "downloading metadata",
            TorrentState::CheckingResumeData => "resuming",
            TorrentState::Downloading => "downloading",
            TorrentState::Finished => "finished",
            TorrentState::Seeding => "seeding",
            TorrentState::Allocating => "allocating space",
            TorrentState::CheckingFiles => "checking files",
        };
        f.write_str(label)
    }
}

/// A single event popped from the engine's alert queue.
///
/// The session driver dispatches these with a plain `match`; each
/// variant carries everything its handler needs.
#[derive(Debug, Clone)]
pub enum Alert {
    /// The torrent moved to a new lifecycle state.
    StateChanged {
        /// The state just entered.
        state: TorrentState,
    },
    /// A piece finished downloading and passed its hash check.
    PieceFinished {
        /// The completed piece.
        piece: PieceIndex,
    },
    /// Answer to a deadline or read request. `buffer` holds the whole
    /// verified piece, or `None` when the disk read failed and the
    /// request should be reissued.
    ReadPiece {
        /// The piece that was read.
        piece: PieceIndex,
        /// Full piece contents, absent on read error.
        buffer: Option<Bytes>,
    },
    /// Answer to a resume-data flush. `resume_data` is absent when the
    /// engine could not produce a blob.
    SaveResumeData {
        /// Engine-defined bencoded resume blob.
        resume_data: Option<Vec<u8>>,
    },
    /// Metadata for a magnet-added torrent is now available.
    MetadataReceived,
}

impl Alert {
    /// The delivery category this alert belongs to, for mask filtering.
    pub fn category(&self) -> AlertMask {
        match self {
            Alert::StateChanged { .. } | Alert::MetadataReceived => AlertMask::STATUS,
            Alert::PieceFinished { .. } => AlertMask::PIECE_PROGRESS,
            Alert::ReadPiece { .. } | Alert::SaveResumeData { .. } => AlertMask::STORAGE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readable_states() {
        assert!(TorrentState::Downloading.is_readable());
        assert!(TorrentState::Finished.is_readable());
        assert!(TorrentState::Seeding.is_readable());
        assert!(!TorrentState::DownloadingMetadata.is_readable());
        assert!(!TorrentState::CheckingFiles.is_readable());
    }

    #[test]
    fn test_alert_categories() {
        let status = Alert::StateChanged {
            state: TorrentState::Downloading,
        };
        assert_eq!(status.category(), AlertMask::STATUS);

        let storage = Alert::ReadPiece {
            piece: PieceIndex::new(3),
            buffer: None,
        };
        assert_eq!(storage.category(), AlertMask::STORAGE);
    }
}
