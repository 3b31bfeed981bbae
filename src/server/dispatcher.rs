//! The protocol dispatcher.
//!
//! Reads one command per input line, executes it against the session, and
//! writes one response per line. Commands are strictly serialized; a Search
//! occupies the dispatcher until it terminates, and commands arriving in
//! the meantime are deferred, not dropped. Watcher events ride the same
//! inbox and are flushed between responses (and between Progress records
//! while a Search runs).

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::sync::mpsc::{Receiver, SyncSender, TryRecvError};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Context, Result};

use crate::error::EngineError;
use crate::query::formats::LogFormat;
use crate::query::parse::ParseSpec;
use crate::query::{chunk, search};
use crate::server::protocol::{parse_command, write_record, Command, Response};
use crate::server::watcher::{self, WatcherHandle};
use crate::server::{Inbound, INBOX_CAPACITY};
use crate::session::Session;
use crate::source::encoding::probe;

pub struct Dispatcher<W: Write> {
    out: W,
    state: Arc<RwLock<Option<Session>>>,
    // Declared before `watcher` so the inbox closes first on drop: a
    // producer blocked on a full queue then fails its send and can observe
    // the watcher shutdown flag.
    rx: Receiver<Inbound>,
    tx: SyncSender<Inbound>,
    watcher: Option<WatcherHandle>,
    /// Commands that arrived while a Search occupied the dispatcher.
    deferred: VecDeque<String>,
    input_done: bool,
}

impl<W: Write> Dispatcher<W> {
    /// Run the engine over a pair of byte streams until the input ends.
    pub fn run<R: Read + Send + 'static>(input: R, out: W) -> Result<()> {
        let (tx, rx) = std::sync::mpsc::sync_channel(INBOX_CAPACITY);

        let reader_tx = tx.clone();
        std::thread::spawn(move || {
            let reader = BufReader::new(input);
            for line in reader.lines() {
                let Ok(line) = line else { break };
                if reader_tx.send(Inbound::Command(line)).is_err() {
                    return;
                }
            }
            let _ = reader_tx.send(Inbound::InputClosed);
        });

        let mut dispatcher = Dispatcher {
            out,
            state: Arc::new(RwLock::new(None)),
            rx,
            tx,
            watcher: None,
            deferred: VecDeque::new(),
            input_done: false,
        };
        dispatcher.event_loop()
    }

    fn event_loop(&mut self) -> Result<()> {
        loop {
            let item = if let Some(line) = self.deferred.pop_front() {
                Inbound::Command(line)
            } else if self.input_done {
                break;
            } else {
                match self.rx.recv() {
                    Ok(item) => item,
                    Err(_) => break,
                }
            };

            match item {
                Inbound::Command(line) => self.handle_line(&line)?,
                Inbound::Event(event) => self.write(&event)?,
                Inbound::InputClosed => self.input_done = true,
            }
        }
        Ok(())
    }

    fn handle_line(&mut self, line: &str) -> Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }
        let response = match parse_command(line) {
            Ok(command) => self.execute(command)?,
            Err(err) => Response::from_error(err),
        };
        self.write(&response)
    }

    fn execute(&mut self, command: Command) -> Result<Response> {
        match command {
            Command::GetFileEncoding { path } => Ok(match probe(Path::new(&path)) {
                Ok(probed) => Response::Encoding {
                    encoding: probed.encoding,
                    is_supported: probed.is_supported,
                },
                Err(err) => Response::from_error(err),
            }),
            Command::OpenFile { path } => self.open_file(&path),
            Command::GetParsingInformation => Ok(self.with_session(|session| {
                session
                    .detect_format()
                    .map(|log_format| Response::ParsingInformation { log_format })
            })),
            Command::ParseFile {
                log_format,
                pattern,
                nbr_columns,
            } => Ok(self.parse_file(log_format, pattern, nbr_columns)),
            Command::GetChunk {
                start_line,
                end_line,
            } => Ok(self.get_chunk(start_line, end_line)),
            Command::Search { pattern } => self.search(&pattern),
        }
    }

    /// Build the new session first, swap it in only on success: a failed
    /// OpenFile leaves the previous session (and its watcher) untouched.
    fn open_file(&mut self, path: &str) -> Result<Response> {
        let session = match Session::open(Path::new(path)) {
            Ok(session) => session,
            Err(err) => return Ok(Response::from_error(err)),
        };

        if session.utf8_fallback() {
            self.write(&Response::Info {
                message: format!(
                    "encoding {} is not supported, the file will be read as UTF-8",
                    session.encoding()
                ),
            })?;
        }

        let line_count = session.line_count();
        {
            let mut guard = self
                .state
                .write()
                .map_err(|_| anyhow!("session lock poisoned"))?;
            *guard = Some(session);
        }

        // The watcher outlives individual sessions: each tick re-reads the
        // slot, so a session swap needs no restart.
        if self.watcher.is_none() {
            self.watcher = Some(watcher::spawn(Arc::clone(&self.state), self.tx.clone()));
        }

        Ok(Response::FileOpened { line_count })
    }

    fn parse_file(
        &mut self,
        log_format: LogFormat,
        pattern: Option<String>,
        nbr_columns: Option<u32>,
    ) -> Response {
        let Ok(mut guard) = self.state.write() else {
            return Response::from_error(EngineError::Internal("session lock poisoned".into()));
        };
        let Some(session) = guard.as_mut() else {
            return Response::from_error(EngineError::NoSessionOpen);
        };

        match ParseSpec::resolve(
            log_format,
            pattern.as_deref(),
            nbr_columns.map(|n| n as usize),
        ) {
            Ok(spec) => {
                session.set_parse_spec(spec);
                Response::ParsingInformation { log_format }
            }
            Err(err) => Response::from_error(err),
        }
    }

    fn get_chunk(&mut self, start_line: u64, end_line: u64) -> Response {
        self.with_session(|session| {
            let chunk = chunk::get_chunk(session, start_line, end_line)?;
            if let Some(summary) = &chunk.summary {
                stderr_info(summary);
            }
            Ok(Response::Chunk {
                data: chunk.rows,
                start_line: chunk.start_line,
                end_line: chunk.end_line,
            })
        })
    }

    /// A Search holds shared access to the session for its whole duration;
    /// the progress callback runs here on the dispatcher thread, flushing
    /// watcher events and deferring newly arrived commands.
    fn search(&mut self, pattern: &str) -> Result<Response> {
        let state = Arc::clone(&self.state);
        let Ok(guard) = state.read() else {
            return Ok(Response::from_error(EngineError::Internal(
                "session lock poisoned".into(),
            )));
        };
        let Some(session) = guard.as_ref() else {
            return Ok(Response::from_error(EngineError::NoSessionOpen));
        };

        let mut sink_err: Option<anyhow::Error> = None;
        let result = search::run_search(session, pattern, &mut |percent| {
            if sink_err.is_some() {
                return;
            }
            if let Err(err) = self.progress_tick(percent) {
                sink_err = Some(err);
            }
        });
        drop(guard);

        if let Some(err) = sink_err {
            return Err(err);
        }

        Ok(match result {
            Ok(outcome) => Response::SearchResults {
                matches: outcome.matches,
                total_matches: outcome.total_matches,
                search_complete: outcome.search_complete,
            },
            Err(err) => Response::from_error(err),
        })
    }

    fn progress_tick(&mut self, percent: u8) -> Result<()> {
        self.flush_inbox()?;
        self.write(&Response::Progress { percent })
    }

    /// Drain the inbox without blocking: events are written immediately,
    /// commands are deferred until the current Search finishes.
    fn flush_inbox(&mut self) -> Result<()> {
        loop {
            match self.rx.try_recv() {
                Ok(Inbound::Event(event)) => self.write(&event)?,
                Ok(Inbound::Command(line)) => self.deferred.push_back(line),
                Ok(Inbound::InputClosed) => self.input_done = true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }

    fn with_session(
        &self,
        f: impl FnOnce(&Session) -> Result<Response, EngineError>,
    ) -> Response {
        let Ok(guard) = self.state.read() else {
            return Response::from_error(EngineError::Internal("session lock poisoned".into()));
        };
        match guard.as_ref() {
            None => Response::from_error(EngineError::NoSessionOpen),
            Some(session) => f(session).unwrap_or_else(Response::from_error),
        }
    }

    fn write(&mut self, response: &Response) -> Result<()> {
        write_record(&mut self.out, response).context("writing response record")
    }
}

/// Diagnostics share the response framing but travel on stderr, so they
/// never interleave with command replies.
fn stderr_info(message: &str) {
    let record = Response::Info {
        message: message.to_string(),
    };
    if let Ok(json) = serde_json::to_string(&record) {
        eprintln!("{json}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::path::PathBuf;

    fn fixture(name: &str, bytes: &[u8]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("logscope_dispatch_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    /// Feed a full command script, collect every output record.
    fn drive(script: &str) -> Vec<Response> {
        let input = std::io::Cursor::new(script.to_string().into_bytes());
        let mut out: Vec<u8> = Vec::new();
        Dispatcher::run(input, &mut out).unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_session_commands_require_open_file() {
        let responses = drive(
            "{\"GetChunk\":{\"start_line\":0,\"end_line\":5}}\n\
             {\"Search\":{\"pattern\":\"x\"}}\n\
             \"GetParsingInformation\"\n",
        );
        assert_eq!(responses.len(), 3);
        for response in responses {
            match response {
                Response::Error { message } => {
                    assert!(message.starts_with("NoSessionOpen:"), "{message}")
                }
                other => panic!("expected Error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_malformed_command() {
        let responses = drive("this is not json\n");
        match &responses[0] {
            Response::Error { message } => assert!(message.starts_with("MalformedCommand:")),
            other => panic!("expected Error, got {:?}", other),
        }
    }

    #[test]
    fn test_open_then_chunk() {
        let path = fixture("flow.log", b"a\nbb\nccc");
        let script = format!(
            "{{\"OpenFile\":{{\"path\":{}}}}}\n{{\"GetChunk\":{{\"start_line\":0,\"end_line\":3}}}}\n",
            serde_json::to_string(path.to_str().unwrap()).unwrap()
        );
        let responses = drive(&script);

        assert_eq!(responses[0], Response::FileOpened { line_count: 3 });
        assert_eq!(
            responses[1],
            Response::Chunk {
                data: vec![
                    vec!["a".to_string()],
                    vec!["bb".to_string()],
                    vec!["ccc".to_string()]
                ],
                start_line: 0,
                end_line: 3,
            }
        );
    }

    #[test]
    fn test_open_failure_keeps_previous_session() {
        let path = fixture("keep.log", b"one\ntwo\n");
        let script = format!(
            "{{\"OpenFile\":{{\"path\":{}}}}}\n\
             {{\"OpenFile\":{{\"path\":\"/nonexistent/logscope/nope.log\"}}}}\n\
             {{\"GetChunk\":{{\"start_line\":0,\"end_line\":2}}}}\n",
            serde_json::to_string(path.to_str().unwrap()).unwrap()
        );
        let responses = drive(&script);

        assert_eq!(responses[0], Response::FileOpened { line_count: 2 });
        assert!(matches!(responses[1], Response::Error { .. }));
        // The first session still answers.
        assert!(matches!(responses[2], Response::Chunk { .. }));
    }

    #[test]
    fn test_relative_path_rejected() {
        let responses = drive("{\"OpenFile\":{\"path\":\"relative.log\"}}\n");
        match &responses[0] {
            Response::Error { message } => assert!(message.starts_with("PathNotAbsolute:")),
            other => panic!("expected Error, got {:?}", other),
        }
    }

    #[test]
    fn test_search_emits_results_after_progress() {
        let path = fixture("searchable.log", b"error one\nfine\nerror two\n");
        let script = format!(
            "{{\"OpenFile\":{{\"path\":{}}}}}\n{{\"Search\":{{\"pattern\":\"error\"}}}}\n",
            serde_json::to_string(path.to_str().unwrap()).unwrap()
        );
        let responses = drive(&script);

        assert_eq!(responses[0], Response::FileOpened { line_count: 3 });
        let mut saw_results = false;
        let mut last_percent = 0u8;
        for response in &responses[1..] {
            match response {
                Response::Progress { percent } => {
                    assert!(!saw_results, "progress after results");
                    assert!(*percent >= last_percent);
                    last_percent = *percent;
                }
                Response::SearchResults {
                    matches,
                    total_matches,
                    search_complete,
                } => {
                    saw_results = true;
                    assert_eq!(*total_matches, 2);
                    assert!(*search_complete);
                    assert_eq!(matches[0].line_number, 0);
                    assert_eq!(matches[1].line_number, 2);
                }
                other => panic!("unexpected record {:?}", other),
            }
        }
        assert!(saw_results);
    }

    #[test]
    fn test_invalid_search_pattern() {
        let path = fixture("badpat.log", b"x\n");
        let script = format!(
            "{{\"OpenFile\":{{\"path\":{}}}}}\n{{\"Search\":{{\"pattern\":\"(\"}}}}\n",
            serde_json::to_string(path.to_str().unwrap()).unwrap()
        );
        let responses = drive(&script);
        match responses.last().unwrap() {
            Response::Error { message } => assert!(message.starts_with("InvalidRegex:")),
            other => panic!("expected Error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_then_chunk_scenario() {
        let path = fixture("parsed.log", b"1.2.3.4 - - [t] \"req\" 200 5\n");
        let pattern = r#"(\d{1,3}(?:\.\d{1,3}){3}) - - \[(.*?)\] "(.*?)" (\d{3}) (\d+|-)"#;
        let script = format!(
            "{}\n{}\n{}\n",
            serde_json::to_string(&Command::OpenFile {
                path: path.to_str().unwrap().to_string()
            })
            .unwrap(),
            serde_json::to_string(&Command::ParseFile {
                log_format: LogFormat::Other,
                pattern: Some(pattern.to_string()),
                nbr_columns: Some(5),
            })
            .unwrap(),
            serde_json::to_string(&Command::GetChunk {
                start_line: 0,
                end_line: 1
            })
            .unwrap(),
        );
        let responses = drive(&script);

        assert_eq!(responses[0], Response::FileOpened { line_count: 1 });
        assert_eq!(
            responses[1],
            Response::ParsingInformation {
                log_format: LogFormat::Other
            }
        );
        assert_eq!(
            responses[2],
            Response::Chunk {
                data: vec![vec![
                    "1.2.3.4".to_string(),
                    "t".to_string(),
                    "req".to_string(),
                    "200".to_string(),
                    "5".to_string()
                ]],
                start_line: 0,
                end_line: 1,
            }
        );
    }

    #[test]
    fn test_parse_file_column_mismatch_leaves_spec() {
        let path = fixture("mismatch.log", b"10 ok\n");
        let open = serde_json::to_string(&Command::OpenFile {
            path: path.to_str().unwrap().to_string(),
        })
        .unwrap();
        let good = serde_json::to_string(&Command::ParseFile {
            log_format: LogFormat::Other,
            pattern: Some(r"^(\d+) (\w+)$".to_string()),
            nbr_columns: Some(2),
        })
        .unwrap();
        let bad = serde_json::to_string(&Command::ParseFile {
            log_format: LogFormat::Other,
            pattern: Some(r"^(\d+) (\w+)$".to_string()),
            nbr_columns: Some(7),
        })
        .unwrap();
        let chunk = serde_json::to_string(&Command::GetChunk {
            start_line: 0,
            end_line: 1,
        })
        .unwrap();

        let responses = drive(&format!("{open}\n{good}\n{bad}\n{chunk}\n"));
        assert!(matches!(responses[1], Response::ParsingInformation { .. }));
        match &responses[2] {
            Response::Error { message } => {
                assert!(message.starts_with("ColumnCountMismatch:"))
            }
            other => panic!("expected Error, got {:?}", other),
        }
        // The previously installed spec still applies.
        assert_eq!(
            responses[3],
            Response::Chunk {
                data: vec![vec!["10".to_string(), "ok".to_string()]],
                start_line: 0,
                end_line: 1,
            }
        );
    }

    #[test]
    fn test_get_parsing_information_detects() {
        let path = fixture(
            "detect.log",
            br#"1.2.3.4 - - [t1] "GET /a" 200 10
5.6.7.8 - - [t2] "GET /b" 404 -
"#,
        );
        let script = format!(
            "{{\"OpenFile\":{{\"path\":{}}}}}\n\"GetParsingInformation\"\n",
            serde_json::to_string(path.to_str().unwrap()).unwrap()
        );
        let responses = drive(&script);
        assert_eq!(
            responses[1],
            Response::ParsingInformation {
                log_format: LogFormat::NCSACombined
            }
        );
    }

    #[test]
    fn test_get_file_encoding_without_session() {
        let path = fixture("enc.log", b"plain ascii\n");
        let script = format!(
            "{{\"GetFileEncoding\":{{\"path\":{}}}}}\n",
            serde_json::to_string(path.to_str().unwrap()).unwrap()
        );
        let responses = drive(&script);
        assert_eq!(
            responses[0],
            Response::Encoding {
                encoding: "ASCII".to_string(),
                is_supported: true,
            }
        );
    }

    #[test]
    fn test_blank_lines_ignored() {
        let responses = drive("\n\n   \n");
        assert!(responses.is_empty());
    }
}
