//! Piece selection, prioritization and block delivery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::queue::{Piece, PieceQueue};
use crate::engine::{
    DeadlineFlags, PieceIndex, PiecePriority, TorrentHandle, TorrentInfo, TorrentState,
};
use crate::{AccessError, Result};

/// How long one `read_next_block` call waits for the torrent to become
/// readable before telling the caller to retry.
pub const STATE_WAIT: Duration = Duration::from_millis(500);

/// How long one `read_next_block` call waits for the head piece's data
/// before telling the caller to retry.
pub const BLOCK_WAIT: Duration = Duration::from_millis(500);

/// A block of file data handed to the consumer.
///
/// Always a contiguous subrange of one piece; ownership of `data` is
/// exclusive and transfers to the consumer with the move out of the
/// queue.
#[derive(Debug, Clone)]
pub struct StreamBlock {
    /// The piece the block was cut from.
    pub piece: PieceIndex,
    /// Byte offset of the block within that piece.
    pub offset: u32,
    /// The block's bytes.
    pub data: Bytes,
}

impl StreamBlock {
    /// Block length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the block is empty. Delivered blocks never are.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Outcome of one `read_next_block` call.
#[derive(Debug, Clone)]
pub enum NextBlock {
    /// The next block of the selected file, in strictly increasing
    /// file-offset order.
    Block(StreamBlock),
    /// Nothing was ready within the wait bounds; the caller should poll
    /// again. Spurious retries are expected and keep the consumer
    /// responsive to shutdown.
    Retry,
    /// The queue is exhausted; the selected range has been fully
    /// delivered.
    EndOfStream,
}

/// Torrent lifecycle state as observed by the consumer.
///
/// Written only by the session driver; `read_next_block` blocks on it
/// until the torrent is readable.
pub(crate) struct Status {
    state: Mutex<TorrentState>,
    cond: Condvar,
}

impl Status {
    fn new() -> Self {
        Self {
            state: Mutex::new(TorrentState::QueuedForChecking),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn set(&self, next: TorrentState) {
        let mut state = self.state.lock();
        *state = next;
        self.cond.notify_all();
    }

    /// Waits up to `timeout` for a readable state. Returns whether the
    /// torrent is readable now.
    pub(crate) fn wait_readable(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.is_readable() {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return state.is_readable();
            }
        }
        true
    }
}

struct SelectedFile {
    index: u32,
    length: u64,
}

/// The central state machine reconciling the pulling consumer with the
/// engine's piece events.
///
/// All methods take `&self`; the two-lock model (status, queue) makes
/// the controller safe to share between the consumer thread and the
/// session driver.
pub struct PieceController<H: TorrentHandle> {
    handle: RwLock<Option<H>>,
    info: RwLock<Option<Arc<TorrentInfo>>>,
    selected: RwLock<Option<SelectedFile>>,
    queue: PieceQueue,
    status: Status,
}

impl<H: TorrentHandle> PieceController<H> {
    pub(crate) fn new() -> Self {
        Self {
            handle: RwLock::new(None),
            info: RwLock::new(None),
            selected: RwLock::new(None),
            queue: PieceQueue::new(),
            status: Status::new(),
        }
    }

    pub(crate) fn status(&self) -> &Status {
        &self.status
    }

    /// Binds the controller to a running torrent and selects the file
    /// to stream.
    ///
    /// # Errors
    /// - [`AccessError::InvalidFileIndex`] when the index is past the
    ///   end of the torrent's file table.
    pub(crate) fn attach(
        &self,
        handle: H,
        info: Arc<TorrentInfo>,
        file_index: u32,
    ) -> Result<()> {
        let count = info.files().len();
        let Some(file) = info.files().get(file_index as usize) else {
            return Err(AccessError::InvalidFileIndex {
                index: u64::from(file_index),
                count,
            });
        };
        *self.selected.write() = Some(SelectedFile {
            index: file_index,
            length: file.length,
        });
        *self.info.write() = Some(info);
        *self.handle.write() = Some(handle);
        Ok(())
    }

    /// Recomputes piece interest for the selected file starting at
    /// `file_offset` and rebuilds the delivery queue.
    ///
    /// Every piece intersecting the file's suffix is pinned to top
    /// priority and enqueued with its subrange; everything else is
    /// skipped. Safe to call repeatedly; later calls override earlier
    /// priorities and discard any buffered data. The queue lock is held
    /// for the whole rebuild so the fill path never observes a
    /// half-built queue.
    ///
    /// # Errors
    /// - [`AccessError::OutOfMemory`] when queue storage cannot be
    ///   reserved.
    pub fn select_pieces(&self, file_offset: u64) -> Result<()> {
        let handle_guard = self.handle.read();
        let info_guard = self.info.read();
        let selected_guard = self.selected.read();
        let (Some(handle), Some(info), Some(selected)) = (
            handle_guard.as_ref(),
            info_guard.as_ref(),
            selected_guard.as_ref(),
        ) else {
            trace!("select_pieces before attach, nothing to do");
            return Ok(());
        };

        let offset = file_offset.min(selected.length);
        let remaining = selected.length - offset;
        let nominal = u64::from(info.piece_length());
        let num_pieces = info.num_pieces();

        let mut pieces = self.queue.pieces.lock();
        pieces.clear();

        if remaining == 0 {
            for index in 0..num_pieces {
                handle.set_piece_priority(PieceIndex::new(index), PiecePriority::SKIP);
            }
            self.queue.cond.notify_all();
            debug!(offset, "selected past file end, queue left empty");
            return Ok(());
        }

        let Some(slice) = info.map_file(selected.index, offset, remaining) else {
            warn!(file = selected.index, "selected file vanished from file map");
            return Ok(());
        };
        let covered = (slice.start + slice.length).div_ceil(nominal) as u32;
        let first = slice.piece.as_u32();
        let last = first + covered - 1;

        pieces
            .try_reserve(covered as usize)
            .map_err(|_| AccessError::OutOfMemory)?;

        let mut left = slice.length;
        for index in 0..num_pieces {
            let piece = PieceIndex::new(index);
            if index < first || index > last {
                handle.set_piece_priority(piece, PiecePriority::SKIP);
                continue;
            }
            let piece_offset = if index == first { slice.start as u32 } else { 0 };
            let length = left.min(nominal - u64::from(piece_offset)) as u32;
            handle.set_piece_priority(piece, PiecePriority::TOP);
            pieces.push_back(Piece {
                id: piece,
                offset: piece_offset,
                length,
                requested: false,
                data: None,
            });
            left -= u64::from(length);
        }
        self.queue.cond.notify_all();
        debug!(offset, queued = pieces.len(), "rebuilt piece queue");
        Ok(())
    }

    /// Delivers the next block of the selected file, in order.
    ///
    /// Waits up to [`STATE_WAIT`] for the torrent to become readable and
    /// up to [`BLOCK_WAIT`] for the head piece's data; either timeout
    /// yields [`NextBlock::Retry`] so the caller stays responsive to
    /// shutdown and control queries. An empty queue past the state gate
    /// is the end of the stream.
    pub fn read_next_block(&self) -> NextBlock {
        if !self.status.wait_readable(STATE_WAIT) {
            return NextBlock::Retry;
        }
        let handle = self.handle.read().clone();
        let Some(handle) = handle else {
            return NextBlock::Retry;
        };

        let mut pieces = self.queue.pieces.lock();
        let Some(head) = pieces.front_mut() else {
            return NextBlock::EndOfStream;
        };
        if !head.requested && head.data.is_none() {
            head.requested = true;
            let id = head.id;
            // The deadline request may block inside the engine; issue it
            // with the queue unlocked.
            drop(pieces);
            handle.set_piece_deadline(id, Duration::ZERO, DeadlineFlags::ALERT_WHEN_AVAILABLE);
            pieces = self.queue.pieces.lock();
        }

        let deadline = Instant::now() + BLOCK_WAIT;
        loop {
            match pieces.front() {
                None => return NextBlock::EndOfStream,
                Some(head) if head.data.is_some() => break,
                Some(_) => {}
            }
            if self.queue.cond.wait_until(&mut pieces, deadline).timed_out() {
                match pieces.front() {
                    None => return NextBlock::EndOfStream,
                    Some(head) if head.data.is_some() => break,
                    Some(_) => return NextBlock::Retry,
                }
            }
        }

        let Some(head) = pieces.pop_front() else {
            return NextBlock::EndOfStream;
        };
        let Some(data) = head.data else {
            return NextBlock::Retry;
        };
        NextBlock::Block(StreamBlock {
            piece: head.id,
            offset: head.offset,
            data,
        })
    }

    /// Fill path, invoked by the session driver for every `ReadPiece`
    /// event.
    ///
    /// A missing buffer is a transient disk error and the read is
    /// reissued. Events for pieces no longer queued (after a seek) are
    /// dropped; events for already-filled pieces are ignored, making the
    /// fill idempotent. Otherwise exactly the mapped subrange is copied
    /// into a freshly allocated block the queue entry exclusively owns.
    pub fn handle_read_piece(&self, piece: PieceIndex, buffer: Option<Bytes>) {
        let Some(buffer) = buffer else {
            debug!(piece = piece.as_u32(), "piece read failed, reissuing");
            self.reissue_read(piece);
            return;
        };

        let mut pieces = self.queue.pieces.lock();
        let Some(entry) = pieces.iter_mut().find(|entry| entry.id == piece) else {
            trace!(piece = piece.as_u32(), "dropping event for unwanted piece");
            return;
        };
        if entry.data.is_some() {
            return;
        }

        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        debug_assert!(
            buffer.len() >= end,
            "piece buffer shorter than mapped subrange"
        );
        if buffer.len() < end {
            warn!(piece = piece.as_u32(), "short piece buffer, reissuing read");
            drop(pieces);
            self.reissue_read(piece);
            return;
        }

        entry.data = Some(Bytes::copy_from_slice(&buffer[start..end]));
        let head_filled = pieces.front().is_some_and(|head| head.id == piece);
        if head_filled {
            self.queue.cond.notify_all();
        }
    }

    fn reissue_read(&self, piece: PieceIndex) {
        if let Some(handle) = self.handle.read().as_ref() {
            handle.read_piece(piece);
        }
    }
}
