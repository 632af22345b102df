//! The piece-streaming controller.
//!
//! Bridges the player's pull loop and the engine's event stream: the
//! consumer thread calls [`PieceController::read_next_block`] and
//! [`PieceController::select_pieces`], while the session driver feeds
//! verified pieces in through the fill path. Delivery is in strictly
//! increasing file order, one contiguous subrange of one piece per
//! block.

mod controller;
mod queue;

pub use controller::{NextBlock, PieceController, StreamBlock, BLOCK_WAIT, STATE_WAIT};
pub use queue::Piece;
