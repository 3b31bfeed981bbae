//! Line-range extraction.

use crate::error::EngineError;
use crate::query::parse::parse_rows;
use crate::session::Session;

/// A materialised line range, ready to serialise.
#[derive(Debug)]
pub struct Chunk {
    /// One column tuple per line.
    pub rows: Vec<Vec<String>>,
    /// The effective (clamped) interval.
    pub start_line: u64,
    pub end_line: u64,
    /// Parse fallback summary, when any line missed the installed spec.
    pub summary: Option<String>,
}

/// Read `[start_line, end_line)` and split it into column tuples.
///
/// `end_line` past the file is clamped silently; a `start_line` at or past
/// the end yields an empty chunk. Purely a read: no session state changes.
pub fn get_chunk(session: &Session, start_line: u64, end_line: u64) -> Result<Chunk, EngineError> {
    if start_line > end_line {
        return Err(EngineError::MalformedCommand(format!(
            "start_line ({start_line}) is greater than end_line ({end_line})"
        )));
    }

    let Some((start, end)) = session.index().clamp(start_line, end_line) else {
        return Ok(Chunk {
            rows: Vec::new(),
            start_line,
            end_line: start_line,
            summary: None,
        });
    };

    let lines = session.read_lines(start, end)?;
    let parsed = parse_rows(session.parse_spec(), &lines, start);

    Ok(Chunk {
        start_line: start,
        end_line: start + parsed.rows.len() as u64,
        summary: parsed.summary(),
        rows: parsed.rows,
    })
}
