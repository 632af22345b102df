//! The session driver: the single worker pumping the engine's event
//! stream.
//!
//! Every alert funnels through [`dispatch`], a plain match over the
//! alert variants; each arm is a small function of the event and the
//! shared session state. The same pump serves two callers: the
//! background driver thread spawned at download start, and the metadata
//! fetcher, which runs it synchronously on the consumer thread until
//! metadata arrives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::cache::{self, CacheStore};
use crate::engine::{Alert, InfoHash, TorrentSession};
use crate::streaming::PieceController;

/// How long one pump iteration waits for an alert before rechecking the
/// stop flag.
pub(crate) const ALERT_POLL: Duration = Duration::from_secs(1);

/// Upper bound on the shutdown wait for the engine's resume-data flush.
pub(crate) const RESUME_WAIT: Duration = Duration::from_secs(10);

/// One-shot latch the shutdown path waits on for the resume-data alert.
pub(crate) struct Gate {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self {
            done: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn signal(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cond.notify_all();
    }

    /// Waits up to `timeout` for the signal. Returns whether it came.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            if self.cond.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }
}

/// State shared between the consumer thread and the session driver.
pub(crate) struct SessionContext<S: TorrentSession> {
    pub(crate) session: S,
    pub(crate) controller: PieceController<S::Handle>,
    pub(crate) cache: CacheStore,
    pub(crate) info_hash: InfoHash,
    pub(crate) stop: AtomicBool,
    pub(crate) resume_gate: Gate,
}

impl<S: TorrentSession> SessionContext<S> {
    pub(crate) fn new(session: S, cache: CacheStore, info_hash: InfoHash) -> Self {
        Self {
            session,
            controller: PieceController::new(),
            cache,
            info_hash,
            stop: AtomicBool::new(false),
            resume_gate: Gate::new(),
        }
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub(crate) fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// What the pump should do after one alert.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Continue,
    MetadataReady,
}

/// Which caller is running the pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpMode {
    /// The background driver thread; runs until the stop flag is set.
    Background,
    /// The synchronous metadata fetch; additionally returns as soon as
    /// metadata arrives.
    UntilMetadata,
}

/// Pumps the engine's alert stream until stopped (or, in
/// [`PumpMode::UntilMetadata`], until metadata arrives).
pub(crate) fn drive<S: TorrentSession>(ctx: &SessionContext<S>, mode: PumpMode) {
    while !ctx.stopped() {
        if !ctx.session.wait_for_alert(ALERT_POLL) {
            continue;
        }
        for alert in ctx.session.pop_alerts() {
            let outcome = dispatch(ctx, alert);
            if outcome == Outcome::MetadataReady && mode == PumpMode::UntilMetadata {
                return;
            }
        }
    }
    debug!("session driver stopped");
}

fn dispatch<S: TorrentSession>(ctx: &SessionContext<S>, alert: Alert) -> Outcome {
    match alert {
        Alert::StateChanged { state } => {
            info!(%state, "torrent state changed");
            ctx.controller.status().set(state);
            Outcome::Continue
        }
        Alert::PieceFinished { piece } => {
            debug!(piece = piece.as_u32(), "piece finished");
            Outcome::Continue
        }
        Alert::ReadPiece { piece, buffer } => {
            ctx.controller.handle_read_piece(piece, buffer);
            Outcome::Continue
        }
        Alert::SaveResumeData { resume_data } => {
            match resume_data {
                Some(blob) => {
                    let name = cache::resume_file_name(&ctx.info_hash);
                    if ctx.cache.save(&name, &blob).is_none() {
                        warn!("resume data not persisted");
                    }
                }
                None => warn!("engine produced no resume data"),
            }
            ctx.resume_gate.signal();
            Outcome::Continue
        }
        Alert::MetadataReceived => {
            info!("torrent metadata received");
            Outcome::MetadataReady
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_gate_times_out_without_signal() {
        let gate = Gate::new();
        assert!(!gate.wait(Duration::from_millis(10)));
    }

    #[test]
    fn test_gate_sees_signal_from_other_thread() {
        let gate = Gate::new();
        thread::scope(|scope| {
            scope.spawn(|| {
                thread::sleep(Duration::from_millis(20));
                gate.signal();
            });
            assert!(gate.wait(Duration::from_secs(2)));
        });
    }

    #[test]
    fn test_gate_signal_is_sticky() {
        let gate = Gate::new();
        gate.signal();
        assert!(gate.wait(Duration::from_millis(1)));
    }
}
