//! Parallel full-file regex search.
//!
//! The byte view is cut into one partition per core, each boundary snapped
//! forward to a line start so no line straddles two partitions. Scoped
//! worker threads stream their lines in batches; the calling thread acts as
//! the aggregator, polling a shared byte counter to emit throttled progress.
//!
//! Matches are merged in partition order, so the final list is sorted by
//! `(line_number, column, start_index)` and truncating it to the cap always
//! keeps the first matches of the file. A worker may stop early once every
//! earlier partition has finished and the cap is collectively reached:
//! nothing it finds after that point can survive the merge.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use regex::Regex;

use crate::error::EngineError;
use crate::server::protocol::SearchMatch;
use crate::session::Session;

/// Hard cap on reported matches.
pub const MATCH_CAP: usize = 1000;

/// Lines per worker batch; batches bound the granularity of cap checks,
/// error polling, and progress accounting.
const BATCH_LINES: u64 = 2048;

/// How often the aggregator checks worker state.
const PROGRESS_POLL: Duration = Duration::from_millis(10);

/// Minimum time between two progress events; caps the rate at 10/s.
const PROGRESS_MIN_GAP: Duration = Duration::from_millis(100);

/// Minimum percent step between two progress events.
const PROGRESS_STEP: u8 = 5;

/// The terminal record of a search.
#[derive(Debug)]
pub struct SearchOutcome {
    pub matches: Vec<SearchMatch>,
    pub total_matches: u32,
    pub search_complete: bool,
}

/// Cross-worker coordination state.
struct SearchState {
    bytes_scanned: AtomicU64,
    /// Per-partition match counts, valid once the matching `done` flag is set.
    counts: Box<[AtomicUsize]>,
    done: Box<[AtomicBool]>,
    /// First I/O failure; every worker aborts at its next batch boundary.
    failure: Mutex<Option<EngineError>>,
}

impl SearchState {
    fn new(partitions: usize) -> Self {
        SearchState {
            bytes_scanned: AtomicU64::new(0),
            counts: (0..partitions).map(|_| AtomicUsize::new(0)).collect(),
            done: (0..partitions).map(|_| AtomicBool::new(false)).collect(),
            failure: Mutex::new(None),
        }
    }

    fn failed(&self) -> bool {
        self.failure.lock().map(|g| g.is_some()).unwrap_or(true)
    }

    fn park_failure(&self, err: EngineError) {
        if let Ok(mut slot) = self.failure.lock() {
            slot.get_or_insert(err);
        }
    }

    /// Whether partition `part` can stop scanning: its own list is full, or
    /// every earlier partition has finished and their matches plus its own
    /// already cover the cap, so anything further would be truncated away.
    fn saturated(&self, part: usize, local: usize) -> bool {
        if local >= MATCH_CAP {
            return true;
        }
        let mut covered = local;
        for j in 0..part {
            if !self.done[j].load(Ordering::Acquire) {
                return false;
            }
            covered += self.counts[j].load(Ordering::Acquire);
            if covered >= MATCH_CAP {
                return true;
            }
        }
        false
    }
}

/// Scan the whole file for `pattern`.
///
/// `on_progress` runs on the calling thread between worker polls; the
/// dispatcher uses it to emit `Progress` records and to flush watcher
/// events. It is always called with 100 once scanning ends.
pub fn run_search(
    session: &Session,
    pattern: &str,
    on_progress: &mut dyn FnMut(u8),
) -> Result<SearchOutcome, EngineError> {
    let regex = Regex::new(pattern)?;

    let total_bytes = session.source().len();
    let cuts = partition_lines(session, worker_count());
    let partitions = cuts.len() - 1;
    let state = SearchState::new(partitions);

    let joined: Vec<Vec<SearchMatch>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..partitions)
            .map(|part| {
                let range = (cuts[part], cuts[part + 1]);
                let state = &state;
                let regex = &regex;
                scope.spawn(move || scan_partition(session, regex, state, part, range))
            })
            .collect();

        let mut last_percent = 0u8;
        let mut last_emit = std::time::Instant::now();
        loop {
            let finished = handles.iter().all(|h| h.is_finished());

            let scanned = state.bytes_scanned.load(Ordering::Relaxed);
            let percent = if total_bytes == 0 {
                99
            } else {
                ((scanned * 100 / total_bytes) as u8).min(99)
            };
            if percent >= last_percent.saturating_add(PROGRESS_STEP)
                && last_emit.elapsed() >= PROGRESS_MIN_GAP
            {
                last_percent = percent;
                last_emit = std::time::Instant::now();
                on_progress(percent);
            }

            if finished {
                break;
            }
            std::thread::sleep(PROGRESS_POLL);
        }

        handles
            .into_iter()
            .map(|h| h.join().expect("search worker panicked"))
            .collect()
    });

    on_progress(100);

    if let Ok(mut slot) = state.failure.lock() {
        if let Some(err) = slot.take() {
            return Err(err);
        }
    }

    let mut matches: Vec<SearchMatch> = joined.into_iter().flatten().collect();
    let capped = matches.len() >= MATCH_CAP;
    matches.truncate(MATCH_CAP);

    Ok(SearchOutcome {
        total_matches: matches.len() as u32,
        search_complete: !capped,
        matches,
    })
}

fn worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Cut the byte view into `p` ranges of roughly equal size, each boundary
/// snapped forward to the next line start. Returns `p + 1` line numbers;
/// partitions may be empty for tiny files.
fn partition_lines(session: &Session, p: usize) -> Vec<u64> {
    let index = session.index();
    let total_bytes = session.source().len();
    let line_count = index.line_count();

    let mut cuts = Vec::with_capacity(p + 1);
    cuts.push(0u64);
    for k in 1..p {
        let raw = total_bytes * k as u64 / p as u64;
        let snapped = index.first_line_at_or_after(raw);
        let floor = *cuts.last().expect("cuts is never empty");
        cuts.push(snapped.clamp(floor, line_count));
    }
    cuts.push(line_count);
    cuts
}

fn scan_partition(
    session: &Session,
    regex: &Regex,
    state: &SearchState,
    part: usize,
    (start_line, end_line): (u64, u64),
) -> Vec<SearchMatch> {
    let spec = session.parse_spec();
    let mut matches: Vec<SearchMatch> = Vec::new();

    let mut line = start_line;
    'scan: while line < end_line {
        if state.failed() || state.saturated(part, matches.len()) {
            break;
        }

        let batch_end = (line + BATCH_LINES).min(end_line);
        let lines = match session.read_lines(line, batch_end) {
            Ok(lines) => lines,
            Err(err) => {
                state.park_failure(err);
                break;
            }
        };

        for (i, text) in lines.iter().enumerate() {
            let line_number = line + i as u64;
            let split = spec.and_then(|s| s.split(text));
            match split {
                Some(columns) => {
                    for (col, column) in columns.iter().enumerate() {
                        scan_column(regex, column, line_number, col as u32, &mut matches);
                    }
                }
                // No spec, or the spec did not match: the whole line is
                // column 0.
                None => scan_column(regex, text, line_number, 0, &mut matches),
            }
            if matches.len() >= MATCH_CAP {
                break 'scan;
            }
        }

        let (lo, hi) = session.index().bounds(line, batch_end);
        state.bytes_scanned.fetch_add(hi - lo, Ordering::Relaxed);
        line = batch_end;
    }

    state.counts[part].store(matches.len(), Ordering::Release);
    state.done[part].store(true, Ordering::Release);
    matches
}

fn scan_column(
    regex: &Regex,
    column: &str,
    line_number: u64,
    col: u32,
    matches: &mut Vec<SearchMatch>,
) {
    for found in regex.find_iter(column) {
        matches.push(SearchMatch {
            line_number,
            column: col,
            start_index: found.start() as u32,
            end_index: found.end() as u32,
        });
        if matches.len() >= MATCH_CAP {
            return;
        }
    }
}
