//! The simulated engine session.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use serde_bytes::ByteBuf;
use tracing::debug;

use slipstream_core::engine::{
    AddTorrentParams, Alert, AlertMask, DeadlineFlags, EngineError, InfoHash, PieceIndex,
    PiecePriority, TorrentHandle, TorrentInfo, TorrentSession, TorrentState, TorrentStatus,
};
use slipstream_core::SessionSettings;

use crate::content::SeededTorrent;

/// Tuning knobs for the simulated engine.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Version string reported to the access layer.
    pub engine_version: String,
    /// Answer magnet adds with metadata for registered content.
    pub resolve_magnets: bool,
    /// Produce a resume blob when asked to flush.
    pub produce_resume_data: bool,
    /// Reject every add-torrent call with this reason.
    pub reject_adds: Option<String>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            engine_version: "1.2.19".to_string(),
            resolve_magnets: true,
            produce_resume_data: true,
            reject_adds: None,
        }
    }
}

struct ActiveTorrent {
    info: Option<Arc<TorrentInfo>>,
    payload: Option<Bytes>,
    state: TorrentState,
    priorities: Vec<PiecePriority>,
    sequential: bool,
    written: Option<PathBuf>,
}

struct SimShared {
    config: SimConfig,
    alerts: Mutex<VecDeque<Alert>>,
    alerts_cond: Condvar,
    mask: Mutex<AlertMask>,
    registry: Mutex<HashMap<InfoHash, SeededTorrent>>,
    active: Mutex<HashMap<InfoHash, ActiveTorrent>>,
    settings: Mutex<Option<SessionSettings>>,
    routers: Mutex<Vec<(String, u16)>>,
    loaded_state: Mutex<Option<Vec<u8>>>,
    last_resume_data: Mutex<Option<Vec<u8>>>,
    dht_started: AtomicBool,
    paused: AtomicBool,
    metadata_exchange: AtomicBool,
    metadata_transfers: AtomicUsize,
    failed_reads: Mutex<Vec<u32>>,
    read_requests: Mutex<Vec<u32>>,
    deadline_requests: Mutex<Vec<u32>>,
}

impl SimShared {
    fn push_alert(&self, alert: Alert) {
        if !self.mask.lock().contains(alert.category()) {
            return;
        }
        self.alerts.lock().push_back(alert);
        self.alerts_cond.notify_all();
    }

    /// Answers a piece request from the registered payload, honouring
    /// single-shot failure injection.
    fn deliver_piece(&self, info_hash: InfoHash, piece: PieceIndex) {
        {
            let mut failed = self.failed_reads.lock();
            if let Some(position) = failed.iter().position(|p| *p == piece.as_u32()) {
                failed.remove(position);
                debug!(piece = piece.as_u32(), "injecting piece read failure");
                self.push_alert(Alert::ReadPiece {
                    piece,
                    buffer: None,
                });
                return;
            }
        }

        let buffer = {
            let active = self.active.lock();
            let Some(torrent) = active.get(&info_hash) else {
                return;
            };
            let (Some(info), Some(payload)) = (torrent.info.as_ref(), torrent.payload.as_ref())
            else {
                return;
            };
            let start = u64::from(piece.as_u32()) * u64::from(info.piece_length());
            let size = u64::from(info.piece_size(piece));
            if start + size > payload.len() as u64 {
                return;
            }
            payload.slice(start as usize..(start + size) as usize)
        };
        self.push_alert(Alert::PieceFinished { piece });
        self.push_alert(Alert::ReadPiece {
            piece,
            buffer: Some(buffer),
        });
    }
}

/// Deterministic in-memory implementation of the engine contract.
///
/// Cloning is cheap and shares all state, so tests can keep a clone for
/// assertions after handing the session to the access layer.
#[derive(Clone)]
pub struct SimulatedSession {
    shared: Arc<SimShared>,
}

impl Default for SimulatedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSession {
    /// Creates a simulator with default configuration.
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    /// Creates a simulator with explicit configuration.
    pub fn with_config(config: SimConfig) -> Self {
        Self {
            shared: Arc::new(SimShared {
                config,
                alerts: Mutex::new(VecDeque::new()),
                alerts_cond: Condvar::new(),
                mask: Mutex::new(
                    AlertMask::STATUS | AlertMask::STORAGE | AlertMask::PIECE_PROGRESS,
                ),
                registry: Mutex::new(HashMap::new()),
                active: Mutex::new(HashMap::new()),
                settings: Mutex::new(None),
                routers: Mutex::new(Vec::new()),
                loaded_state: Mutex::new(None),
                last_resume_data: Mutex::new(None),
                dht_started: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                metadata_exchange: AtomicBool::new(false),
                metadata_transfers: AtomicUsize::new(0),
                failed_reads: Mutex::new(Vec::new()),
                read_requests: Mutex::new(Vec::new()),
                deadline_requests: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Registers content the simulated swarm can serve, both as a
    /// metadata source for magnets and as the payload behind piece
    /// reads.
    pub fn register(&self, seeded: SeededTorrent) {
        self.shared
            .registry
            .lock()
            .insert(seeded.info.info_hash(), seeded);
    }

    /// Makes the next read of `piece` fail with an empty buffer.
    pub fn fail_next_read(&self, piece: u32) {
        self.shared.failed_reads.lock().push(piece);
    }

    /// How many magnet metadata transfers actually ran.
    pub fn metadata_transfer_count(&self) -> usize {
        self.shared.metadata_transfers.load(Ordering::Acquire)
    }

    /// Every `read_piece` call, in order.
    pub fn read_requests(&self) -> Vec<u32> {
        self.shared.read_requests.lock().clone()
    }

    /// Every `set_piece_deadline` call, in order.
    pub fn deadline_requests(&self) -> Vec<u32> {
        self.shared.deadline_requests.lock().clone()
    }

    /// Current per-piece priorities of an active torrent.
    pub fn piece_priorities(&self, info_hash: InfoHash) -> Option<Vec<PiecePriority>> {
        self.shared
            .active
            .lock()
            .get(&info_hash)
            .map(|torrent| torrent.priorities.clone())
    }

    /// The settings block last applied to the session.
    pub fn applied_settings(&self) -> Option<SessionSettings> {
        self.shared.settings.lock().clone()
    }

    /// Bootstrap routers added so far.
    pub fn dht_routers(&self) -> Vec<(String, u16)> {
        self.shared.routers.lock().clone()
    }

    /// Whether the DHT was started.
    pub fn dht_started(&self) -> bool {
        self.shared.dht_started.load(Ordering::Acquire)
    }

    /// The state blob last loaded into the session.
    pub fn loaded_state(&self) -> Option<Vec<u8>> {
        self.shared.loaded_state.lock().clone()
    }

    /// The resume blob carried by the most recent add-torrent call.
    pub fn last_resume_data(&self) -> Option<Vec<u8>> {
        self.shared.last_resume_data.lock().clone()
    }

    /// Whether the session was paused.
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Whether sequential download was requested for a torrent.
    pub fn sequential_download(&self, info_hash: InfoHash) -> bool {
        self.shared
            .active
            .lock()
            .get(&info_hash)
            .is_some_and(|torrent| torrent.sequential)
    }

    /// Whether a torrent is currently active in the session.
    pub fn has_torrent(&self, info_hash: InfoHash) -> bool {
        self.shared.active.lock().contains_key(&info_hash)
    }
}

impl TorrentSession for SimulatedSession {
    type Handle = SimulatedHandle;

    fn add_torrent(&self, params: &AddTorrentParams) -> Result<SimulatedHandle, EngineError> {
        if let Some(reason) = &self.shared.config.reject_adds {
            return Err(EngineError::AddRejected {
                reason: reason.clone(),
            });
        }
        let info_hash = params.info_hash;
        *self.shared.last_resume_data.lock() = params.resume_data.clone();

        match params.torrent_info.clone() {
            Some(info) => {
                let payload = self
                    .shared
                    .registry
                    .lock()
                    .get(&info_hash)
                    .map(|seeded| seeded.payload.clone());
                let written = payload
                    .as_ref()
                    .and_then(|payload| write_payload(&params.save_path, &info, payload).ok());
                let states = if params.resume_data.is_some() {
                    [TorrentState::CheckingResumeData, TorrentState::Downloading]
                } else {
                    [TorrentState::CheckingFiles, TorrentState::Downloading]
                };
                let priorities = vec![PiecePriority::new(4); info.num_pieces() as usize];
                self.shared.active.lock().insert(
                    info_hash,
                    ActiveTorrent {
                        info: Some(info),
                        payload,
                        state: states[1],
                        priorities,
                        sequential: false,
                        written,
                    },
                );
                for state in states {
                    self.shared.push_alert(Alert::StateChanged { state });
                }
            }
            None => {
                self.shared.active.lock().insert(
                    info_hash,
                    ActiveTorrent {
                        info: None,
                        payload: None,
                        state: TorrentState::DownloadingMetadata,
                        priorities: Vec::new(),
                        sequential: false,
                        written: None,
                    },
                );
                self.shared.push_alert(Alert::StateChanged {
                    state: TorrentState::DownloadingMetadata,
                });
                let armed = self.shared.metadata_exchange.load(Ordering::Acquire);
                if armed && self.shared.config.resolve_magnets {
                    let seeded_info = self
                        .shared
                        .registry
                        .lock()
                        .get(&info_hash)
                        .map(|seeded| seeded.info.clone());
                    if let Some(info) = seeded_info {
                        self.shared
                            .metadata_transfers
                            .fetch_add(1, Ordering::AcqRel);
                        if let Some(torrent) = self.shared.active.lock().get_mut(&info_hash) {
                            torrent.info = Some(info);
                        }
                        self.shared.push_alert(Alert::MetadataReceived);
                    }
                }
            }
        }

        Ok(SimulatedHandle {
            shared: Arc::clone(&self.shared),
            info_hash,
        })
    }

    fn remove_torrent(&self, handle: SimulatedHandle, delete_files: bool) {
        let removed = self.shared.active.lock().remove(&handle.info_hash);
        if !delete_files {
            return;
        }
        if let Some(root) = removed.and_then(|torrent| torrent.written) {
            let result = if root.is_dir() {
                fs::remove_dir_all(&root)
            } else {
                fs::remove_file(&root)
            };
            if let Err(err) = result {
                debug!(%err, root = %root.display(), "failed to delete simulated payload");
            }
        }
    }

    fn set_alert_mask(&self, mask: AlertMask) {
        *self.shared.mask.lock() = mask;
    }

    fn wait_for_alert(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut alerts = self.shared.alerts.lock();
        while alerts.is_empty() {
            if self
                .shared
                .alerts_cond
                .wait_until(&mut alerts, deadline)
                .timed_out()
            {
                return !alerts.is_empty();
            }
        }
        true
    }

    fn pop_alerts(&self) -> Vec<Alert> {
        self.shared.alerts.lock().drain(..).collect()
    }

    fn save_dht_state(&self) -> Option<Vec<u8>> {
        #[derive(Serialize)]
        struct DhtState {
            #[serde(rename = "node-id")]
            node_id: ByteBuf,
            routers: i64,
        }
        let state = DhtState {
            node_id: ByteBuf::from(vec![0xda; 20]),
            routers: self.shared.routers.lock().len() as i64,
        };
        serde_bencode::ser::to_bytes(&state).ok()
    }

    fn load_state(&self, state: &[u8]) {
        *self.shared.loaded_state.lock() = Some(state.to_vec());
    }

    fn start_dht(&self) {
        self.shared.dht_started.store(true, Ordering::Release);
    }

    fn add_dht_router(&self, host: &str, port: u16) {
        self.shared.routers.lock().push((host.to_string(), port));
    }

    fn apply_settings(&self, settings: &SessionSettings) {
        *self.shared.settings.lock() = Some(settings.clone());
    }

    fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    fn enable_metadata_exchange(&self) {
        self.shared.metadata_exchange.store(true, Ordering::Release);
    }

    fn version(&self) -> &str {
        &self.shared.config.engine_version
    }
}

/// Handle onto one simulated torrent.
#[derive(Clone)]
pub struct SimulatedHandle {
    shared: Arc<SimShared>,
    info_hash: InfoHash,
}

impl TorrentHandle for SimulatedHandle {
    fn status(&self) -> TorrentStatus {
        let state = self
            .shared
            .active
            .lock()
            .get(&self.info_hash)
            .map_or(TorrentState::QueuedForChecking, |torrent| torrent.state);
        TorrentStatus { state }
    }

    fn torrent_info(&self) -> Option<Arc<TorrentInfo>> {
        self.shared.active.lock().get(&self.info_hash)?.info.clone()
    }

    fn set_piece_priority(&self, piece: PieceIndex, priority: PiecePriority) {
        if let Some(torrent) = self.shared.active.lock().get_mut(&self.info_hash) {
            let index = piece.as_u32() as usize;
            if torrent.priorities.len() <= index {
                torrent.priorities.resize(index + 1, PiecePriority::new(4));
            }
            torrent.priorities[index] = priority;
        }
    }

    fn set_piece_deadline(&self, piece: PieceIndex, _deadline: Duration, flags: DeadlineFlags) {
        self.shared.deadline_requests.lock().push(piece.as_u32());
        if flags.alert_when_available {
            self.shared.deliver_piece(self.info_hash, piece);
        }
    }

    fn read_piece(&self, piece: PieceIndex) {
        self.shared.read_requests.lock().push(piece.as_u32());
        self.shared.deliver_piece(self.info_hash, piece);
    }

    fn set_sequential_download(&self, sequential: bool) {
        if let Some(torrent) = self.shared.active.lock().get_mut(&self.info_hash) {
            torrent.sequential = sequential;
        }
    }

    fn save_resume_data(&self) {
        let resume_data = self
            .shared
            .config
            .produce_resume_data
            .then(|| resume_blob(self.info_hash));
        self.shared.push_alert(Alert::SaveResumeData { resume_data });
    }
}

fn resume_blob(info_hash: InfoHash) -> Vec<u8> {
    #[derive(Serialize)]
    struct ResumeBlob {
        #[serde(rename = "info-hash")]
        info_hash: ByteBuf,
        version: i64,
    }
    let blob = ResumeBlob {
        info_hash: ByteBuf::from(info_hash.as_bytes().to_vec()),
        version: 1,
    };
    serde_bencode::ser::to_bytes(&blob).unwrap_or_default()
}

/// Materializes the payload under the save path the way an allocating
/// storage would: single-file torrents as one file named after the
/// torrent, multi-file torrents as a directory tree. Returns the root
/// that `remove_torrent(delete_files)` should delete.
fn write_payload(
    save_path: &std::path::Path,
    info: &TorrentInfo,
    payload: &Bytes,
) -> io::Result<PathBuf> {
    fs::create_dir_all(save_path)?;
    let root = save_path.join(info.name());
    let files = info.files();
    if files.len() == 1 && files[0].path == info.name() {
        fs::write(&root, payload)?;
        return Ok(root);
    }
    for file in files {
        let path = root.join(&file.path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let start = file.offset as usize;
        let end = start + file.length as usize;
        fs::write(&path, &payload[start..end])?;
    }
    Ok(root)
}
