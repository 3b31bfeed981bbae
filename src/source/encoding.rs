//! Encoding probe.
//!
//! Inspects the first few kilobytes of a file and maps it onto a small set
//! of canonical labels. The probe is pure: it touches no session state and
//! may be called for any path at any time.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use encoding_rs::Encoding;

use crate::error::EngineError;

/// How many bytes the probe samples from the head of the file.
const PROBE_LEN: usize = 8 * 1024;

/// Fraction of zero bytes on one parity that flags BOM-less UTF-16,
/// expressed as a percentage of the sampled code-unit pairs.
const UTF16_ZERO_PERCENT: usize = 40;

/// How the rest of the engine must treat the file's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Newlines are single 0x0A bytes; slices decode as UTF-8 (lossily).
    Direct,
    Utf16Le,
    Utf16Be,
}

/// Probe outcome: a canonical label plus whether the engine supports it
/// natively. Unsupported files are still openable; they are read as UTF-8
/// and the client is expected to warn the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub encoding: String,
    pub is_supported: bool,
}

impl Probe {
    /// The decode mode a session should use for this probe result.
    pub fn decode_mode(&self) -> DecodeMode {
        if self.encoding.eq_ignore_ascii_case("utf-16le") {
            DecodeMode::Utf16Le
        } else if self.encoding.eq_ignore_ascii_case("utf-16be") {
            DecodeMode::Utf16Be
        } else {
            DecodeMode::Direct
        }
    }
}

/// Detect the encoding of the file at `path`.
///
/// Detection rules, in order: BOM match, zero-byte parity heuristic for
/// BOM-less UTF-16, valid-UTF-8 scan (plain ASCII reported as such), and
/// ISO-8859-1 as the fallback for arbitrary byte soup.
pub fn probe(path: &Path) -> Result<Probe, EngineError> {
    if !path.is_absolute() {
        return Err(EngineError::PathNotAbsolute(path.to_path_buf()));
    }

    let mut file = File::open(path)
        .with_context(|| format!("opening {}", path.display()))
        .map_err(EngineError::Io)?;

    let mut head = vec![0u8; PROBE_LEN];
    let mut filled = 0;
    while filled < head.len() {
        let n = file
            .read(&mut head[filled..])
            .with_context(|| format!("reading probe prefix of {}", path.display()))
            .map_err(EngineError::Io)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    head.truncate(filled);

    let label = classify(&head);
    Ok(Probe {
        is_supported: label_is_supported(label),
        encoding: label.to_string(),
    })
}

/// Classify a byte prefix into a canonical label.
fn classify(head: &[u8]) -> &'static str {
    if head.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return "UTF-8";
    }
    if head.starts_with(&[0xFF, 0xFE]) {
        return "UTF-16LE";
    }
    if head.starts_with(&[0xFE, 0xFF]) {
        return "UTF-16BE";
    }

    if let Some(label) = sniff_utf16(head) {
        return label;
    }

    match std::str::from_utf8(head) {
        Ok(text) => {
            if text.is_ascii() {
                "ASCII"
            } else {
                "UTF-8"
            }
        }
        Err(err) => {
            // A multi-byte sequence cut off by the probe window still counts
            // as UTF-8 when everything before the cut decodes cleanly.
            if err.error_len().is_none() && head.len() - err.valid_up_to() < 4 {
                "UTF-8"
            } else {
                "ISO-8859-1"
            }
        }
    }
}

/// BOM-less UTF-16 heuristic: text stored as UTF-16 has a NUL in one half
/// of nearly every code unit, so a heavy zero-byte skew on a single parity
/// gives the variant away.
fn sniff_utf16(head: &[u8]) -> Option<&'static str> {
    let pairs = head.len() / 2;
    if pairs < 8 {
        return None;
    }

    let mut even_zeros = 0usize;
    let mut odd_zeros = 0usize;
    for (i, &b) in head[..pairs * 2].iter().enumerate() {
        if b == 0 {
            if i % 2 == 0 {
                even_zeros += 1;
            } else {
                odd_zeros += 1;
            }
        }
    }

    let threshold = pairs * UTF16_ZERO_PERCENT / 100;
    if even_zeros > threshold && even_zeros > odd_zeros * 4 {
        // High bytes first: 'a' is 0x00 0x61.
        Some("UTF-16BE")
    } else if odd_zeros > threshold && odd_zeros > even_zeros * 4 {
        Some("UTF-16LE")
    } else {
        None
    }
}

/// A label is supported when the engine can hand out a canonical
/// newline-per-0x0A byte view for it: any ASCII-compatible encoding
/// directly, and the UTF-16 variants through the transcoded shadow.
fn label_is_supported(label: &str) -> bool {
    if ["UTF-16LE", "UTF-16BE", "UTF-16"]
        .iter()
        .any(|s| s.eq_ignore_ascii_case(label))
    {
        return true;
    }
    Encoding::for_label(label.as_bytes()).is_some_and(|enc| enc.is_ascii_compatible())
}
