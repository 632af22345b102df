//! Streaming scenarios: linear reads, seeks, and read-error recovery.

mod common;

use common::{init_tracing, pattern, seed_torrent_file, test_config};
use slipstream_core::{NextBlock, PiecePriority, StreamBlock, TorrentAccess};
use slipstream_sim::{SeededTorrent, SimulatedSession};

const PIECE_LEN: u32 = 262_144; // 256 KiB
const MIB: usize = 1024 * 1024;

fn next_block(access: &TorrentAccess<SimulatedSession>) -> Option<StreamBlock> {
    let mut retries = 0;
    loop {
        match access.read_next_block() {
            NextBlock::Block(block) => return Some(block),
            NextBlock::EndOfStream => return None,
            NextBlock::Retry => {
                retries += 1;
                assert!(retries < 100, "stream stalled");
            }
        }
    }
}

#[test]
fn test_linear_read_reassembles_the_file() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let payload = pattern(10 * MIB);
    let seeded = SeededTorrent::single_file("movie.mkv", payload.clone(), PIECE_LEN);
    let session = SimulatedSession::new();
    session.register(seeded.clone());
    let torrent_path = seed_torrent_file(root.path(), &seeded);

    let access = TorrentAccess::open(
        torrent_path.to_str().unwrap(),
        test_config(root.path(), 0),
        session,
    )
    .unwrap();

    let mut assembled = Vec::with_capacity(payload.len());
    let mut blocks = 0u32;
    let mut last_piece = None;
    while let Some(block) = next_block(&access) {
        if let Some(last) = last_piece {
            assert!(block.piece.as_u32() > last, "blocks out of order");
        }
        last_piece = Some(block.piece.as_u32());
        blocks += 1;
        assembled.extend_from_slice(&block.data);
    }

    assert_eq!(blocks, 40, "10 MiB at 256 KiB pieces is 40 blocks");
    assert_eq!(assembled, payload);
}

#[test]
fn test_mid_file_seek_restarts_at_the_target_byte() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let payload = pattern(10 * MIB);
    let seeded = SeededTorrent::single_file("movie.mkv", payload.clone(), PIECE_LEN);
    let session = SimulatedSession::new();
    session.register(seeded.clone());
    let torrent_path = seed_torrent_file(root.path(), &seeded);

    let access = TorrentAccess::open(
        torrent_path.to_str().unwrap(),
        test_config(root.path(), 0),
        session.clone(),
    )
    .unwrap();

    let mut consumed = 0;
    while consumed < MIB {
        consumed += next_block(&access).expect("payload left to read").len();
    }

    let target = 5 * MIB;
    access.seek(target as u64).unwrap();

    let boundary = target / PIECE_LEN as usize;
    let priorities = session.piece_priorities(seeded.info.info_hash()).unwrap();
    assert_eq!(priorities.len(), 40);
    for (piece, priority) in priorities.iter().enumerate() {
        if piece < boundary {
            assert!(!priority.is_wanted(), "piece {piece} should be skipped");
        } else {
            assert_eq!(*priority, PiecePriority::TOP, "piece {piece} should be wanted");
        }
    }

    let block = next_block(&access).expect("stream continues after seek");
    assert_eq!(block.piece.as_u32() as usize, boundary);
    assert_eq!(&block.data[..], &payload[target..target + block.len()]);
}

#[test]
fn test_failed_piece_read_is_reissued_exactly_once() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let payload = pattern(64 * 1024);
    let seeded = SeededTorrent::single_file("clip.bin", payload.clone(), 16 * 1024);
    let session = SimulatedSession::new();
    session.register(seeded.clone());
    session.fail_next_read(0);
    let torrent_path = seed_torrent_file(root.path(), &seeded);

    let access = TorrentAccess::open(
        torrent_path.to_str().unwrap(),
        test_config(root.path(), 0),
        session.clone(),
    )
    .unwrap();

    let mut assembled = Vec::new();
    while let Some(block) = next_block(&access) {
        assembled.extend_from_slice(&block.data);
    }
    assert_eq!(assembled, payload);

    // one reissued read for the injected failure, nothing else
    assert_eq!(session.read_requests(), vec![0]);
    // and still at most one deadline per queued piece
    assert_eq!(session.deadline_requests(), vec![0, 1, 2, 3]);
}

#[test]
fn test_seek_to_the_file_end_reports_end_of_stream() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let payload = pattern(64 * 1024);
    let seeded = SeededTorrent::single_file("clip.bin", payload, 16 * 1024);
    let session = SimulatedSession::new();
    session.register(seeded.clone());
    let torrent_path = seed_torrent_file(root.path(), &seeded);

    let access = TorrentAccess::open(
        torrent_path.to_str().unwrap(),
        test_config(root.path(), 0),
        session,
    )
    .unwrap();

    access.seek(seeded.info.total_length()).unwrap();
    assert!(next_block(&access).is_none());
}

#[test]
fn test_reading_resumes_after_spurious_retries() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let payload = pattern(32 * 1024);
    let seeded = SeededTorrent::single_file("clip.bin", payload.clone(), 16 * 1024);
    let session = SimulatedSession::new();
    session.register(seeded.clone());
    let torrent_path = seed_torrent_file(root.path(), &seeded);

    let access = TorrentAccess::open(
        torrent_path.to_str().unwrap(),
        test_config(root.path(), 0),
        session,
    )
    .unwrap();

    // Interleave control queries with the pull loop the way a player
    // does; retries must never skip or duplicate a block.
    let caps = access.capabilities();
    assert!(caps.can_pause && caps.can_seek && caps.can_control_pace);
    assert!(!caps.can_fast_seek);
    access.set_pause_state(true);
    access.set_pause_state(false);

    let first = next_block(&access).unwrap();
    let second = next_block(&access).unwrap();
    assert_eq!(first.piece.as_u32(), 0);
    assert_eq!(second.piece.as_u32(), 1);
    assert_eq!(
        [&first.data[..], &second.data[..]].concat(),
        payload
    );
    assert!(next_block(&access).is_none());
}
