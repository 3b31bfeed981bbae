//! Random-access byte view over the open file.
//!
//! Downstream components (line index, chunk reads, search) never see the
//! file's native encoding. [`ByteSource`] hands out a canonical byte view in
//! which a line break is always a single `0x0A`:
//!
//! - ASCII-compatible encodings map the file directly with `memmap2`.
//! - UTF-16 LE/BE is transcoded into a UTF-8 shadow spilled to a temp file,
//!   and every offset downstream is a shadow offset.

pub mod encoding;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use memmap2::Mmap;

use self::encoding::DecodeMode;

/// Buffer size for streaming transcodes.
const TRANSCODE_CHUNK: usize = 64 * 1024;

/// UTF-16 shadow bookkeeping.
struct Shadow {
    /// Anonymous temp file holding the UTF-8 rendition.
    file: File,
    encoding: &'static encoding_rs::Encoding,
}

/// The canonical byte view of one file.
pub struct ByteSource {
    path: PathBuf,
    shadow: Option<Shadow>,
    /// Map over the file itself (direct) or the shadow (UTF-16).
    /// `None` while the view is empty; zero-length maps are not portable.
    map: Option<Mmap>,
    /// Canonical view length in bytes.
    len: u64,
    /// On-disk length of the underlying file at the last sync.
    raw_len: u64,
}

impl ByteSource {
    /// Open `path` and materialise the canonical view for `mode`.
    pub fn open(path: &Path, mode: DecodeMode) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let raw_len = file
            .metadata()
            .with_context(|| format!("reading metadata of {}", path.display()))?
            .len();

        let mut source = ByteSource {
            path: path.to_path_buf(),
            shadow: None,
            map: None,
            len: 0,
            raw_len: 0,
        };

        match mode {
            DecodeMode::Direct => {
                source.map = map_nonempty(&file, raw_len)?;
                // The map's length is authoritative: the file may have moved
                // on between the metadata read and the mapping.
                let len = source.map.as_ref().map_or(0, |m| m.len() as u64);
                source.len = len;
                source.raw_len = len;
            }
            DecodeMode::Utf16Le | DecodeMode::Utf16Be => {
                let shadow_file = tempfile::tempfile().context("creating UTF-8 shadow file")?;
                let enc = match mode {
                    DecodeMode::Utf16Le => encoding_rs::UTF_16LE,
                    _ => encoding_rs::UTF_16BE,
                };
                source.shadow = Some(Shadow {
                    file: shadow_file,
                    encoding: enc,
                });
                source.transcode_from(file, 0, raw_len, true)?;
            }
        }

        Ok(source)
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// On-disk length of the underlying file at the last sync.
    pub fn raw_len(&self) -> u64 {
        self.raw_len
    }

    /// The whole canonical view.
    pub fn view(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    /// The canonical bytes in `[lo, hi)`.
    pub fn slice(&self, lo: u64, hi: u64) -> Result<&[u8]> {
        if lo > hi || hi > self.len {
            bail!(
                "byte range [{lo}, {hi}) out of bounds for view of {} bytes",
                self.len
            );
        }
        Ok(&self.view()[lo as usize..hi as usize])
    }

    /// Resynchronise with a file that has grown to `new_raw_len` bytes.
    /// Returns the new canonical length.
    pub fn grow(&mut self, new_raw_len: u64) -> Result<u64> {
        let file =
            File::open(&self.path).with_context(|| format!("reopening {}", self.path.display()))?;

        if self.shadow.is_some() {
            // Restart from an even raw offset so a code unit is never split.
            let resume = self.raw_len & !1;
            self.transcode_from(file, resume, new_raw_len, false)?;
        } else {
            self.map = map_nonempty(&file, new_raw_len)?;
            let len = self.map.as_ref().map_or(0, |m| m.len() as u64);
            self.len = len;
            self.raw_len = len;
        }

        Ok(self.len)
    }

    /// Stream-transcode `raw[from..to)` into the shadow and remap it.
    fn transcode_from(&mut self, mut file: File, from: u64, to: u64, strip_bom: bool) -> Result<()> {
        let shadow = self
            .shadow
            .as_mut()
            .expect("transcode_from requires a shadow");

        if from > 0 {
            file.seek(SeekFrom::Start(from))
                .context("seeking past transcoded prefix")?;
        }
        shadow
            .file
            .seek(SeekFrom::End(0))
            .context("seeking to shadow tail")?;

        let mut decoder = if strip_bom {
            shadow.encoding.new_decoder_with_bom_removal()
        } else {
            shadow.encoding.new_decoder_without_bom_handling()
        };

        let mut raw = vec![0u8; TRANSCODE_CHUNK];
        let mut decoded = String::with_capacity(TRANSCODE_CHUNK);
        let mut remaining = to.saturating_sub(from);

        loop {
            let want = remaining.min(TRANSCODE_CHUNK as u64) as usize;
            let got = if want == 0 {
                0
            } else {
                file.read(&mut raw[..want]).context("reading source file")?
            };
            remaining -= got as u64;
            let last = got == 0;

            let mut consumed = 0;
            loop {
                decoded.clear();
                let (result, read, _had_errors) =
                    decoder.decode_to_string(&raw[consumed..got], &mut decoded, last);
                consumed += read;
                shadow
                    .file
                    .write_all(decoded.as_bytes())
                    .context("writing UTF-8 shadow")?;
                match result {
                    encoding_rs::CoderResult::InputEmpty => break,
                    encoding_rs::CoderResult::OutputFull => continue,
                }
            }

            if last {
                break;
            }
        }

        shadow.file.flush().context("flushing UTF-8 shadow")?;
        let shadow_len = shadow
            .file
            .metadata()
            .context("reading shadow metadata")?
            .len();
        self.map = map_nonempty(&shadow.file, shadow_len)?;
        self.len = shadow_len;
        self.raw_len = to;
        Ok(())
    }
}

/// Map a file unless it is empty; zero-length mappings fail on most platforms.
fn map_nonempty(file: &File, len: u64) -> Result<Option<Mmap>> {
    if len == 0 {
        return Ok(None);
    }
    let map = unsafe { Mmap::map(file) }.context("memory-mapping file")?;
    Ok(Some(map))
}

/// A short digest of the file's head, used to tell appends apart from
/// rotations. The sampled length is remembered so the same prefix span is
/// re-digested after the file grows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    sampled: u64,
    digest: blake3::Hash,
}

impl Fingerprint {
    /// Upper bound on how much of the head is digested.
    pub const MAX_SAMPLE: u64 = 64 * 1024;

    /// Digest the first `min(file_len, MAX_SAMPLE)` bytes of `path`.
    pub fn sample(path: &Path, file_len: u64) -> Result<Self> {
        let sampled = file_len.min(Self::MAX_SAMPLE);
        let digest = digest_prefix(path, sampled)?;
        Ok(Fingerprint { sampled, digest })
    }

    /// The number of bytes this fingerprint covers.
    pub fn sampled(&self) -> u64 {
        self.sampled
    }

    /// Whether the fingerprint can still grow with the file.
    pub fn saturated(&self) -> bool {
        self.sampled >= Self::MAX_SAMPLE
    }

    /// Re-digest the same prefix span and compare. A file now shorter than
    /// the sampled span cannot match.
    pub fn matches(&self, path: &Path) -> Result<bool> {
        let len = std::fs::metadata(path)
            .with_context(|| format!("reading metadata of {}", path.display()))?
            .len();
        if len < self.sampled {
            return Ok(false);
        }
        Ok(digest_prefix(path, self.sampled)? == self.digest)
    }
}

fn digest_prefix(path: &Path, n: u64) -> Result<blake3::Hash> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut hasher = blake3::Hasher::new();
    let mut taken = file.take(n);
    std::io::copy(&mut taken, &mut hasher)
        .with_context(|| format!("digesting head of {}", path.display()))?;
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn fixture(name: &str, bytes: &[u8]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("logscope_source_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn test_direct_view() {
        let path = fixture("direct.log", b"alpha\nbeta\n");
        let src = ByteSource::open(&path, DecodeMode::Direct).unwrap();
        assert_eq!(src.len(), 11);
        assert_eq!(src.view(), b"alpha\nbeta\n");
        assert_eq!(src.slice(6, 10).unwrap(), b"beta");
    }

    #[test]
    fn test_empty_file() {
        let path = fixture("empty.log", b"");
        let src = ByteSource::open(&path, DecodeMode::Direct).unwrap();
        assert!(src.is_empty());
        assert_eq!(src.view(), b"");
        assert_eq!(src.slice(0, 0).unwrap(), b"");
    }

    #[test]
    fn test_slice_bounds() {
        let path = fixture("bounds.log", b"0123456789");
        let src = ByteSource::open(&path, DecodeMode::Direct).unwrap();
        assert!(src.slice(4, 11).is_err());
        assert!(src.slice(7, 3).is_err());
    }

    #[test]
    fn test_utf16le_shadow() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "one\ntwo\n".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let path = fixture("le.log", &bytes);
        let src = ByteSource::open(&path, DecodeMode::Utf16Le).unwrap();
        // BOM stripped; the shadow is plain UTF-8.
        assert_eq!(src.view(), b"one\ntwo\n");
        assert_eq!(src.raw_len(), bytes.len() as u64);
    }

    #[test]
    fn test_utf16be_shadow_non_ascii() {
        let mut bytes = Vec::new();
        for unit in "héllo\n".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        let path = fixture("be.log", &bytes);
        let src = ByteSource::open(&path, DecodeMode::Utf16Be).unwrap();
        assert_eq!(src.view(), "héllo\n".as_bytes());
    }

    #[test]
    fn test_grow_direct() {
        let path = fixture("grow.log", b"first\n");
        let mut src = ByteSource::open(&path, DecodeMode::Direct).unwrap();
        assert_eq!(src.len(), 6);

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"second\n").unwrap();
        drop(f);

        assert_eq!(src.grow(13).unwrap(), 13);
        assert_eq!(src.view(), b"first\nsecond\n");
    }

    #[test]
    fn test_grow_utf16_shadow() {
        let mut bytes = Vec::new();
        for unit in "aa\n".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let path = fixture("grow16.log", &bytes);
        let mut src = ByteSource::open(&path, DecodeMode::Utf16Le).unwrap();
        assert_eq!(src.view(), b"aa\n");

        let mut appended = Vec::new();
        for unit in "bb\n".encode_utf16() {
            appended.extend_from_slice(&unit.to_le_bytes());
        }
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&appended).unwrap();
        drop(f);

        let new_raw = (bytes.len() + appended.len()) as u64;
        assert_eq!(src.grow(new_raw).unwrap(), 6);
        assert_eq!(src.view(), b"aa\nbb\n");
        assert_eq!(src.raw_len(), new_raw);
    }

    #[test]
    fn test_fingerprint_append_vs_rewrite() {
        let path = fixture("fp.log", b"stable prefix content\n");
        let fp = Fingerprint::sample(&path, 22).unwrap();
        assert!(fp.matches(&path).unwrap());

        // Append: same prefix, still matches.
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"tail\n").unwrap();
        drop(f);
        assert!(fp.matches(&path).unwrap());

        // Rewrite in place: prefix differs.
        std::fs::write(&path, b"Rotated prefix content!\nmore\n").unwrap();
        assert!(!fp.matches(&path).unwrap());

        // Shrink below the sampled span: cannot match.
        std::fs::write(&path, b"tiny").unwrap();
        assert!(!fp.matches(&path).unwrap());
    }
}
