//! The prioritized queue of pieces awaiting delivery.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::engine::PieceIndex;

/// One queued piece of the selected file.
///
/// `offset` and `length` describe the subrange of the piece the consumer
/// will actually receive: the first in-range piece starts mid-piece
/// after a seek, the last is truncated at the file's final byte. Once
/// `data` is present it is exactly `length` bytes long.
#[derive(Debug, Clone)]
pub struct Piece {
    /// The piece's index within the torrent.
    pub id: PieceIndex,
    /// Byte offset within the piece where the user-visible data starts.
    pub offset: u32,
    /// Number of bytes of this piece the consumer receives.
    pub length: u32,
    /// Whether a deadline request has been posted for this piece, as
    /// opposed to it being merely enqueued.
    pub requested: bool,
    /// The assembled block, filled by the session driver.
    pub data: Option<Bytes>,
}

/// Mutex-guarded FIFO of [`Piece`] entries, strictly increasing by id.
///
/// The condvar is signalled when the head's data becomes available and
/// when the queue transitions between empty and non-empty. Rebuilt from
/// scratch on every seek; stale buffers are discarded with it.
pub(crate) struct PieceQueue {
    pub(crate) pieces: Mutex<VecDeque<Piece>>,
    pub(crate) cond: Condvar,
}

impl PieceQueue {
    pub(crate) fn new() -> Self {
        Self {
            pieces: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
        }
    }
}
