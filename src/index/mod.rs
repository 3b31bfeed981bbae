//! The line index: a monotonically growing vector of byte offsets.
//!
//! `offsets[0] = 0`, every interior entry is the byte offset immediately
//! after a newline, and the final entry always equals the view length (an
//! EOF sentinel is appended when the view does not end in a newline). Line
//! `i` occupies `[offsets[i], offsets[i+1])` minus its trailing newline, and
//! `line_count = offsets.len() - 1`.
//!
//! This is the only structure that is always resident: 8 bytes per line.

use memchr::memchr_iter;
use rayon::prelude::*;

/// Chunk size for the parallel initial scan. Large enough that per-chunk
/// overhead vanishes, small enough to spread a few hundred MB across cores.
const SCAN_CHUNK: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct LineIndex {
    offsets: Vec<u64>,
    /// Whether the final entry is an EOF sentinel rather than a
    /// newline-derived offset. Appends replace the sentinel.
    sentinel: bool,
}

impl LineIndex {
    /// Full scan of the canonical byte view.
    pub fn build(view: &[u8]) -> Self {
        let mut offsets = vec![0u64];

        if view.len() <= SCAN_CHUNK {
            offsets.extend(memchr_iter(b'\n', view).map(|pos| pos as u64 + 1));
        } else {
            let per_chunk: Vec<Vec<u64>> = view
                .par_chunks(SCAN_CHUNK)
                .enumerate()
                .map(|(i, chunk)| {
                    let base = (i * SCAN_CHUNK) as u64;
                    memchr_iter(b'\n', chunk)
                        .map(|pos| base + pos as u64 + 1)
                        .collect()
                })
                .collect();
            for part in per_chunk {
                offsets.extend(part);
            }
        }

        let mut index = LineIndex {
            offsets,
            sentinel: false,
        };
        index.finalize(view.len() as u64);
        index
    }

    /// Scan only the appended suffix `view[old_len..]`.
    ///
    /// The previous EOF sentinel (if any) is dropped first: bytes appended
    /// after a file that did not end in a newline extend its last line.
    pub fn extend(&mut self, view: &[u8], old_len: u64) {
        debug_assert!(view.len() as u64 >= old_len);

        if self.sentinel {
            self.offsets.pop();
            self.sentinel = false;
        }

        let tail = &view[old_len as usize..];
        self.offsets
            .extend(memchr_iter(b'\n', tail).map(|pos| old_len + pos as u64 + 1));

        self.finalize(view.len() as u64);
    }

    fn finalize(&mut self, len: u64) {
        if self.offsets.last() != Some(&len) {
            self.offsets.push(len);
            self.sentinel = true;
        } else {
            self.sentinel = false;
        }
    }

    pub fn line_count(&self) -> u64 {
        (self.offsets.len() - 1) as u64
    }

    /// Byte range of line `i`, trailing newline included.
    pub fn line_range(&self, i: u64) -> (u64, u64) {
        (self.offsets[i as usize], self.offsets[i as usize + 1])
    }

    /// Byte range covering the clamped line range `[start, end)`.
    pub fn bounds(&self, start: u64, end: u64) -> (u64, u64) {
        (self.offsets[start as usize], self.offsets[end as usize])
    }

    /// Clamp a requested `[start, end)` line range to the current count.
    /// Returns `None` when the range starts at or past the end.
    pub fn clamp(&self, start: u64, end: u64) -> Option<(u64, u64)> {
        let count = self.line_count();
        if start >= count {
            return None;
        }
        Some((start, end.min(count)))
    }

    /// Index of the first line starting at or after `byte`, in `[0, line_count]`.
    /// Used to snap search partition boundaries to line starts.
    pub fn first_line_at_or_after(&self, byte: u64) -> u64 {
        let starts = &self.offsets[..self.offsets.len() - 1];
        starts.partition_point(|&off| off < byte) as u64
    }

    #[cfg(test)]
    pub(crate) fn offsets(&self) -> &[u64] {
        &self.offsets
    }
}
