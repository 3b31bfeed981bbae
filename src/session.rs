//! The session: the engine's bound state for the one currently-open file.
//!
//! A session exclusively owns the byte source, the line index, the installed
//! parse spec, and the watcher bookkeeping (last raw length + prefix
//! fingerprint). `OpenFile` replaces the whole value; nothing survives
//! across sessions.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::error::EngineError;
use crate::index::LineIndex;
use crate::query::formats::{self, LogFormat};
use crate::query::parse::ParseSpec;
use crate::source::encoding::{probe, DecodeMode};
use crate::source::{ByteSource, Fingerprint};

/// How many head lines format detection samples from.
const DETECT_WINDOW: u64 = 64;

/// What a watcher tick observed about the file.
#[derive(Debug)]
pub enum FileChange {
    /// The file grew in place; the index was extended incrementally.
    Appended {
        old_line_count: u64,
        new_line_count: u64,
        /// The newly indexed lines, decoded but not yet column-split.
        new_lines: Vec<String>,
    },
    /// The file shrank or its head changed; the index was rebuilt.
    Truncated { line_count: u64 },
}

pub struct Session {
    path: PathBuf,
    encoding: String,
    /// Set when the probe reported an unsupported encoding and the session
    /// fell back to reading the bytes as UTF-8.
    utf8_fallback: bool,
    source: ByteSource,
    index: LineIndex,
    parse: Option<ParseSpec>,
    fingerprint: Fingerprint,
}

impl Session {
    /// Probe, map, and index the file at `path`.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let probed = probe(path)?;
        let utf8_fallback = !probed.is_supported;
        let mode = if utf8_fallback {
            DecodeMode::Direct
        } else {
            probed.decode_mode()
        };

        let source = ByteSource::open(path, mode).map_err(EngineError::Io)?;
        let index = LineIndex::build(source.view());
        let fingerprint =
            Fingerprint::sample(path, source.raw_len()).map_err(EngineError::Io)?;

        Ok(Session {
            path: path.to_path_buf(),
            encoding: probed.encoding,
            utf8_fallback,
            source,
            index,
            parse: None,
            fingerprint,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn utf8_fallback(&self) -> bool {
        self.utf8_fallback
    }

    pub fn line_count(&self) -> u64 {
        self.index.line_count()
    }

    pub fn index(&self) -> &LineIndex {
        &self.index
    }

    pub fn source(&self) -> &ByteSource {
        &self.source
    }

    pub fn parse_spec(&self) -> Option<&ParseSpec> {
        self.parse.as_ref()
    }

    /// Install (or clear) the column extractor. Copy-on-replace: readers
    /// that captured the previous spec keep using their snapshot.
    pub fn set_parse_spec(&mut self, spec: Option<ParseSpec>) {
        self.parse = spec;
    }

    /// Decode the lines in the clamped range `[start, end)`.
    ///
    /// Trailing `\n` / `\r\n` are stripped, bytes decode as UTF-8 with
    /// replacement, and a leading BOM on the first line is dropped.
    pub fn read_lines(&self, start: u64, end: u64) -> Result<Vec<String>, EngineError> {
        let mut lines = Vec::with_capacity((end - start) as usize);
        for i in start..end {
            let (lo, hi) = self.index.line_range(i);
            let mut bytes = self.source.slice(lo, hi).map_err(EngineError::Io)?;
            if bytes.last() == Some(&b'\n') {
                bytes = &bytes[..bytes.len() - 1];
            }
            if bytes.last() == Some(&b'\r') {
                bytes = &bytes[..bytes.len() - 1];
            }
            let mut line = String::from_utf8_lossy(bytes).into_owned();
            if i == 0 && line.starts_with('\u{FEFF}') {
                line = line.trim_start_matches('\u{FEFF}').to_string();
            }
            lines.push(line);
        }
        Ok(lines)
    }

    /// Guess the log family from the head of the file. Pure: installs
    /// nothing.
    pub fn detect_format(&self) -> Result<LogFormat, EngineError> {
        let end = self.line_count().min(DETECT_WINDOW);
        let sample = self.read_lines(0, end)?;
        Ok(formats::detect_format(&sample))
    }

    /// One watcher tick: classify the current (length, fingerprint) pair
    /// against the last observed one and update the index accordingly.
    pub fn refresh(&mut self) -> Result<Option<FileChange>, EngineError> {
        let raw_len = std::fs::metadata(&self.path)
            .with_context(|| format!("reading metadata of {}", self.path.display()))
            .map_err(EngineError::Io)?
            .len();

        let head_intact = self.fingerprint.matches(&self.path).map_err(EngineError::Io)?;

        if raw_len == self.source.raw_len() && head_intact {
            return Ok(None);
        }

        if raw_len > self.source.raw_len() && head_intact {
            return self.extend_to(raw_len).map(Some);
        }

        // Shrunk, or the head was rewritten underneath us: start over.
        self.rebuild()?;
        Ok(Some(FileChange::Truncated {
            line_count: self.index.line_count(),
        }))
    }

    fn extend_to(&mut self, raw_len: u64) -> Result<FileChange, EngineError> {
        let old_line_count = self.index.line_count();
        let old_len = self.source.len();

        self.source.grow(raw_len).map_err(EngineError::Io)?;
        self.index.extend(self.source.view(), old_len);

        if !self.fingerprint.saturated() {
            self.fingerprint =
                Fingerprint::sample(&self.path, raw_len).map_err(EngineError::Io)?;
        }

        let new_line_count = self.index.line_count();
        let new_lines = self.read_lines(old_line_count, new_line_count)?;

        Ok(FileChange::Appended {
            old_line_count,
            new_line_count,
            new_lines,
        })
    }

    /// Full rebuild after a truncate or rotation. The encoding is probed
    /// again: a rotated file may not share its predecessor's encoding.
    fn rebuild(&mut self) -> Result<(), EngineError> {
        let probed = probe(&self.path)?;
        self.utf8_fallback = !probed.is_supported;
        let mode = if self.utf8_fallback {
            DecodeMode::Direct
        } else {
            probed.decode_mode()
        };
        self.encoding = probed.encoding;

        self.source = ByteSource::open(&self.path, mode).map_err(EngineError::Io)?;
        self.index = LineIndex::build(self.source.view());
        self.fingerprint =
            Fingerprint::sample(&self.path, self.source.raw_len()).map_err(EngineError::Io)?;
        Ok(())
    }
}
