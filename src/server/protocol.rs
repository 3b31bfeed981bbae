//! Protocol messages for the host-engine byte streams.
//!
//! Newline-delimited JSON in both directions: one record per line, each
//! record a single-key object whose key names the command or response
//! variant. serde's externally-tagged enum representation produces exactly
//! that shape.

use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::error::EngineError;
use crate::query::formats::LogFormat;

/// A command from the host. Exactly one arrives per input line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Probe a file's encoding. Needs no open session.
    GetFileEncoding { path: String },

    /// Open (or re-open) a file, replacing any prior session.
    OpenFile { path: String },

    /// Guess the log format family from the head of the open file.
    GetParsingInformation,

    /// Install a column extractor: a named format's built-in pattern, or a
    /// caller-supplied pattern with an optional expected column count.
    ParseFile {
        log_format: LogFormat,
        #[serde(default)]
        pattern: Option<String>,
        #[serde(default)]
        nbr_columns: Option<u32>,
    },

    /// Read the line range `[start_line, end_line)`.
    GetChunk { start_line: u64, end_line: u64 },

    /// Scan the whole file for a regex.
    Search { pattern: String },
}

/// A record on the response stream: command replies plus unsolicited
/// watcher events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Encoding {
        encoding: String,
        is_supported: bool,
    },
    FileOpened {
        line_count: u64,
    },
    ParsingInformation {
        log_format: LogFormat,
    },
    Chunk {
        data: Vec<Vec<String>>,
        start_line: u64,
        end_line: u64,
    },
    Progress {
        percent: u8,
    },
    SearchResults {
        matches: Vec<SearchMatch>,
        total_matches: u32,
        search_complete: bool,
    },
    FileTruncated {
        line_count: u64,
    },
    LinesAdded {
        old_line_count: u64,
        new_line_count: u64,
        new_lines: Vec<Vec<String>>,
    },
    Info {
        message: String,
    },
    Error {
        message: String,
    },
}

impl Response {
    /// Shorthand for an `Error` record carrying an engine error.
    pub fn from_error(err: EngineError) -> Self {
        Response::Error {
            message: err.to_string(),
        }
    }
}

/// One located search hit. Indices are byte offsets into the column
/// string's UTF-8 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub line_number: u64,
    pub column: u32,
    pub start_index: u32,
    pub end_index: u32,
}

/// Parse one input line into a command.
pub fn parse_command(line: &str) -> Result<Command, EngineError> {
    serde_json::from_str(line).map_err(|err| EngineError::MalformedCommand(err.to_string()))
}

/// Write one record as a single line and flush, so a record is never
/// interleaved with another writer's bytes.
pub fn write_record<W: Write>(writer: &mut W, record: &Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *writer, record)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    writer.write_all(b"\n")?;
    writer.flush()
}
