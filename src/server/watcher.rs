//! Polling file watcher.
//!
//! One thread samples the open file's (length, prefix fingerprint) pair at
//! a fixed cadence and drives the session's incremental reindex. Observed
//! changes become `LinesAdded` / `FileTruncated` records posted into the
//! dispatcher's inbox; the dispatcher remains the only writer on the
//! response stream. Watcher I/O failures degrade to `Info` records and
//! leave the session alive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::query::parse::parse_rows;
use crate::server::protocol::Response;
use crate::server::Inbound;
use crate::session::{FileChange, Session};

/// Sampling cadence.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Granularity at which a sleeping watcher notices shutdown.
const SHUTDOWN_SLICE: Duration = Duration::from_millis(100);

/// Handle to the running watcher thread.
pub struct WatcherHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Signal the watcher to stop and wait for it to exit.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn the watcher over the shared session slot.
///
/// The thread ticks for the dispatcher's whole lifetime; a session swap
/// (new `OpenFile`) needs no restart because every tick re-reads the slot.
pub fn spawn(state: Arc<RwLock<Option<Session>>>, inbox: SyncSender<Inbound>) -> WatcherHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&shutdown);

    let thread = std::thread::spawn(move || loop {
        let mut slept = Duration::ZERO;
        while slept < POLL_INTERVAL {
            if stop_flag.load(Ordering::SeqCst) {
                return;
            }
            std::thread::sleep(SHUTDOWN_SLICE);
            slept += SHUTDOWN_SLICE;
        }

        let event = {
            let Ok(mut guard) = state.write() else {
                return;
            };
            let Some(session) = guard.as_mut() else {
                continue;
            };
            match session.refresh() {
                Ok(None) => continue,
                Ok(Some(change)) => change_to_response(session, change),
                Err(err) => Response::Info {
                    message: format!("watcher: {err}"),
                },
            }
        };

        if inbox.send(Inbound::Event(event)).is_err() {
            // Dispatcher is gone.
            return;
        }
    });

    WatcherHandle {
        shutdown,
        thread: Some(thread),
    }
}

/// Render a classified change as the record the client sees. New lines are
/// column-split under the session's current parse spec.
fn change_to_response(session: &Session, change: FileChange) -> Response {
    match change {
        FileChange::Truncated { line_count } => Response::FileTruncated { line_count },
        FileChange::Appended {
            old_line_count,
            new_line_count,
            new_lines,
        } => {
            let parsed = parse_rows(session.parse_spec(), &new_lines, old_line_count);
            Response::LinesAdded {
                old_line_count,
                new_line_count,
                new_lines: parsed.rows,
            }
        }
    }
}
