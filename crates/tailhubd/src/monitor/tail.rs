//! Byte-level tail primitives: line assembly, file identity, reading.

use std::fs::{File, Metadata};
use std::io::{self, Read, Seek, SeekFrom};

/// Backward scan chunk used when looking for the last N lines.
const BACKFILL_CHUNK: usize = 8 * 1024;

/// Bytes remembered from just before the cursor.
pub const FINGERPRINT_BYTES: usize = 32;

// ============================================================================
// Line Assembly
// ============================================================================

/// Splits a byte stream into lines, carrying unterminated bytes between reads.
///
/// Splitting happens on raw bytes before UTF-8 decoding, so a multi-byte
/// character cut across two reads is decoded intact.
#[derive(Debug)]
pub struct LineAssembler {
    partial: Vec<u8>,
    max_line_bytes: usize,
    skip_to_newline: bool,
}

impl LineAssembler {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            partial: Vec::new(),
            max_line_bytes: max_line_bytes.max(1),
            skip_to_newline: false,
        }
    }

    /// Feeds bytes and returns every line they complete.
    ///
    /// A trailing `\r` is stripped. An unterminated run reaching
    /// `max_line_bytes` is flushed as a line of its own.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = bytes;

        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = tail.get(1..).unwrap_or_default();

            if self.skip_to_newline {
                self.skip_to_newline = false;
                self.partial.clear();
                continue;
            }
            self.partial.extend_from_slice(head);
            lines.push(self.take_line());
        }

        if !self.skip_to_newline {
            self.partial.extend_from_slice(rest);
            if self.partial.len() >= self.max_line_bytes {
                lines.push(self.take_line());
            }
        }

        lines
    }

    /// Drops everything up to the next newline. Used when reading starts
    /// in the middle of a line.
    pub fn skip_to_newline(&mut self) {
        self.partial.clear();
        self.skip_to_newline = true;
    }

    /// Forgets carried bytes.
    pub fn reset(&mut self) {
        self.partial.clear();
        self.skip_to_newline = false;
    }

    /// Bytes waiting for a newline.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    fn take_line(&mut self) -> String {
        if self.partial.last() == Some(&b'\r') {
            self.partial.pop();
        }
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        line
    }
}

// ============================================================================
// File Identity
// ============================================================================

#[cfg(unix)]
type IdentityKey = (u64, u64);

#[cfg(not(unix))]
type IdentityKey = Option<std::time::SystemTime>;

/// Distinguishes two files that have lived under the same name.
///
/// `(device, inode)` on unix, creation time elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity(IdentityKey);

impl FileIdentity {
    #[cfg(unix)]
    pub fn of(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self((meta.dev(), meta.ino()))
    }

    #[cfg(not(unix))]
    pub fn of(meta: &Metadata) -> Self {
        Self(meta.created().ok())
    }
}

// ============================================================================
// Reading
// ============================================================================

/// Reads up to `max_bytes` starting at `offset`.
///
/// Returns fewer bytes at end of file, none when nothing was appended.
pub fn read_chunk(file: &mut File, offset: u64, max_bytes: usize) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(max_bytes.min(64 * 1024));
    file.by_ref().take(max_bytes as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Reads the bytes that end at `cursor`, at most [`FINGERPRINT_BYTES`].
///
/// Comparing them against what was read before tells an append apart from a
/// truncate-and-rewrite that already grew past the cursor.
pub fn read_fingerprint(file: &mut File, cursor: u64) -> io::Result<Vec<u8>> {
    let start = cursor.saturating_sub(FINGERPRINT_BYTES as u64);
    read_chunk(file, start, (cursor - start) as usize)
}

/// Keeps the last [`FINGERPRINT_BYTES`] of `fingerprint` followed by `bytes`.
pub fn extend_fingerprint(fingerprint: &mut Vec<u8>, bytes: &[u8]) {
    let keep = bytes.len().min(FINGERPRINT_BYTES);
    fingerprint.extend_from_slice(&bytes[bytes.len() - keep..]);
    let excess = fingerprint.len().saturating_sub(FINGERPRINT_BYTES);
    fingerprint.drain(..excess);
}

/// Finds where the last `lines` complete lines of a `len`-byte file begin.
///
/// An unterminated final line is not counted. Scans backwards at most
/// `max_bytes`. Returns the start offset and whether it falls inside a
/// line, in which case the caller should discard bytes up to the first
/// newline.
pub fn backfill_start(
    file: &mut File,
    len: u64,
    lines: usize,
    max_bytes: u64,
) -> io::Result<(u64, bool)> {
    if lines == 0 || len == 0 {
        return Ok((len, false));
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    // an unterminated tail is not a line, so one more newline is needed
    let wanted = if last[0] == b'\n' { lines } else { lines + 1 };

    let floor = len.saturating_sub(max_bytes);
    let mut pos = len;
    let mut seen = 0usize;
    let mut buf = vec![0u8; BACKFILL_CHUNK];

    while pos > floor {
        let chunk = (pos - floor).min(BACKFILL_CHUNK as u64) as usize;
        pos -= chunk as u64;

        let Some(slice) = buf.get_mut(..chunk) else {
            break;
        };
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(slice)?;

        for (i, byte) in slice.iter().enumerate().rev() {
            if *byte != b'\n' {
                continue;
            }
            let at = pos + i as u64;
            // terminator of the final line
            if at + 1 == len {
                continue;
            }
            seen += 1;
            if seen == wanted {
                return Ok((at + 1, false));
            }
        }
    }

    Ok((floor, floor > 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file_with(content: &[u8]) -> (tempfile::NamedTempFile, File) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(content).unwrap();
        tmp.flush().unwrap();
        let file = File::open(tmp.path()).unwrap();
        (tmp, file)
    }

    #[test]
    fn test_partial_line_is_carried() {
        let mut asm = LineAssembler::new(1024);
        assert_eq!(asm.push(b"line1\nline"), vec!["line1"]);
        assert_eq!(asm.pending(), 4);
        assert!(asm.push(b"2").is_empty());
        assert_eq!(asm.push(b"\n"), vec!["line2"]);
        assert_eq!(asm.pending(), 0);
    }

    #[test]
    fn test_crlf_and_empty_lines() {
        let mut asm = LineAssembler::new(1024);
        assert_eq!(asm.push(b"a\r\n\nb\r\n"), vec!["a", "", "b"]);
    }

    #[test]
    fn test_utf8_split_across_reads() {
        let mut asm = LineAssembler::new(1024);
        let text = "héllo\n".as_bytes();
        let (first, second) = text.split_at(2);
        assert!(asm.push(first).is_empty());
        assert_eq!(asm.push(second), vec!["héllo"]);
    }

    #[test]
    fn test_overlong_run_is_flushed() {
        let mut asm = LineAssembler::new(4);
        assert_eq!(asm.push(b"abcdef"), vec!["abcdef"]);
        assert_eq!(asm.push(b"gh\n"), vec!["gh"]);
    }

    #[test]
    fn test_skip_to_newline() {
        let mut asm = LineAssembler::new(1024);
        asm.skip_to_newline();
        assert_eq!(asm.push(b"tail of old\nfresh\n"), vec!["fresh"]);
    }

    #[test]
    fn test_backfill_start_finds_last_lines() {
        let (_tmp, mut file) = file_with(b"one\ntwo\nthree\nfour\n");
        let (start, mid_line) = backfill_start(&mut file, 19, 2, 1024).unwrap();
        assert!(!mid_line);
        let bytes = read_chunk(&mut file, start, 1024).unwrap();
        assert_eq!(bytes, b"three\nfour\n");
    }

    #[test]
    fn test_backfill_start_whole_file_when_short() {
        let (_tmp, mut file) = file_with(b"one\ntwo\n");
        assert_eq!(backfill_start(&mut file, 8, 10, 1024).unwrap(), (0, false));
    }

    #[test]
    fn test_backfill_start_respects_byte_cap() {
        let (_tmp, mut file) = file_with(b"aaaaaaaaaa\nbbbb\n");
        let (start, mid_line) = backfill_start(&mut file, 16, 5, 8).unwrap();
        assert_eq!(start, 8);
        assert!(mid_line);
    }

    #[test]
    fn test_backfill_start_ignores_unterminated_tail() {
        let (_tmp, mut file) = file_with(b"a\nb\nc");
        let (start, mid_line) = backfill_start(&mut file, 5, 2, 1024).unwrap();
        assert_eq!((start, mid_line), (0, false));

        let mut asm = LineAssembler::new(1024);
        let bytes = read_chunk(&mut file, start, 1024).unwrap();
        assert_eq!(asm.push(&bytes), vec!["a", "b"]);
        assert_eq!(asm.pending(), 1);
    }

    #[test]
    fn test_backfill_start_unterminated_one_line() {
        let (_tmp, mut file) = file_with(b"one\ntwo\nthr");
        let (start, _) = backfill_start(&mut file, 11, 1, 1024).unwrap();
        assert_eq!(start, 4);
    }

    #[test]
    fn test_fingerprint_tracks_bytes_before_cursor() {
        let (tmp, mut file) = file_with(b"old-1\nold-2\nold-3\n");
        let mut fingerprint = Vec::new();
        extend_fingerprint(&mut fingerprint, b"old-1\nold-2\n");
        extend_fingerprint(&mut fingerprint, b"old-3\n");
        assert_eq!(read_fingerprint(&mut file, 18).unwrap(), fingerprint);

        std::fs::write(tmp.path(), b"a rewritten file that is longer than before\n").unwrap();
        assert_ne!(read_fingerprint(&mut file, 18).unwrap(), fingerprint);
    }

    #[test]
    fn test_fingerprint_is_bounded() {
        let mut fingerprint = Vec::new();
        extend_fingerprint(&mut fingerprint, &[b'x'; 100]);
        extend_fingerprint(&mut fingerprint, b"end");
        assert_eq!(fingerprint.len(), FINGERPRINT_BYTES);
        assert!(fingerprint.ends_with(b"xend"));
    }

    #[test]
    fn test_identity_changes_on_replace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.log");
        std::fs::write(&path, b"a").unwrap();
        let before = FileIdentity::of(&std::fs::metadata(&path).unwrap());
        let other = dir.path().join("y.log");
        std::fs::write(&other, b"b").unwrap();
        std::fs::rename(&other, &path).unwrap();
        let after = FileIdentity::of(&std::fs::metadata(&path).unwrap());
        assert_ne!(before, after);
    }
}
