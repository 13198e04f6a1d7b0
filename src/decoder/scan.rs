//! Streaming mbox scanner.
//!
//! Walks an mbox file line by line with a large buffer and reports every
//! message as `(offset, raw_bytes)`. Never loads the whole file. Tolerant of
//! mixed line endings, a leading UTF-8 BOM, `From ` lines without a preceding
//! blank line, and oversized messages (truncated with a warning).

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{ArchiveError, Result};

/// Size of the internal read buffer.
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default maximum message size in bytes (256 MB).
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

const BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Sequential scanner over one mbox file.
pub struct MboxScanner {
    path: PathBuf,
    max_message_size: usize,
}

impl MboxScanner {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Scan the file, calling `on_message(offset, length, raw)` for each message.
    ///
    /// `length` is the full on-disk length, `raw` may be shorter when the
    /// message exceeded the size cap. Returns the number of messages found.
    pub fn scan(&self, on_message: &mut dyn FnMut(u64, u64, &[u8])) -> Result<u64> {
        let file = File::open(&self.path).map_err(|e| ArchiveError::io(&self.path, e))?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        let mut count: u64 = 0;
        let mut offset: u64 = 0;
        let mut message_start: Option<u64> = None;
        let mut message_buf: Vec<u8> = Vec::with_capacity(64 * 1024);
        let mut prev_line_was_empty = true;
        let mut truncated = false;
        let mut line_buf: Vec<u8> = Vec::with_capacity(4096);

        loop {
            line_buf.clear();
            let line_len = {
                let buf = reader
                    .fill_buf()
                    .map_err(|e| ArchiveError::io(&self.path, e))?;
                if buf.is_empty() {
                    break;
                }
                let consume = buf
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(buf.len(), |pos| pos + 1);
                line_buf.extend_from_slice(&buf[..consume]);
                reader.consume(consume);
                consume as u64
            };

            if is_separator(&line_buf, offset == 0) {
                if !prev_line_was_empty && message_start.is_some() {
                    warn!(
                        offset,
                        "Found 'From ' separator without preceding blank line"
                    );
                }
                if let Some(start) = message_start {
                    on_message(start, offset - start, &message_buf);
                    count += 1;
                }
                message_start = Some(offset);
                message_buf.clear();
                truncated = false;
                message_buf.extend_from_slice(&line_buf);
            } else if message_start.is_none() {
                // Content before the first separator
                if !is_blank_line(&line_buf) {
                    return Err(ArchiveError::ParseError {
                        offset,
                        reason: "content before the first 'From ' separator".into(),
                    });
                }
            } else if message_buf.len() + line_buf.len() <= self.max_message_size {
                message_buf.extend_from_slice(&line_buf);
            } else if !truncated {
                warn!(
                    offset = message_start.unwrap_or_default(),
                    max_size = self.max_message_size,
                    "Message exceeds maximum size, truncating body"
                );
                truncated = true;
            }

            prev_line_was_empty = is_blank_line(&line_buf);
            offset += line_len;
        }

        if let Some(start) = message_start {
            on_message(start, offset - start, &message_buf);
            count += 1;
        }

        Ok(count)
    }
}

/// Check that a file looks like an mbox: empty, or starting with a `From ` line.
pub fn looks_like_mbox(path: &Path) -> Result<bool> {
    let mut file = File::open(path).map_err(|e| ArchiveError::io(path, e))?;
    let mut head = [0u8; 8];
    let mut filled = 0;
    while filled < head.len() {
        let n = file
            .read(&mut head[filled..])
            .map_err(|e| ArchiveError::io(path, e))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    let head = &head[..filled];
    let head = head.strip_prefix(BOM).unwrap_or(head);
    Ok(head.is_empty() || head.starts_with(b"From "))
}

/// Split a raw mbox message into its `From ` envelope line and the message proper.
pub fn split_envelope(raw: &[u8]) -> (&[u8], &[u8]) {
    let data = raw.strip_prefix(BOM).unwrap_or(raw);
    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return (&data[..pos + 1], &data[pos + 1..]);
        }
        return (data, &[]);
    }
    (&[], data)
}

fn is_separator(line: &[u8], at_start: bool) -> bool {
    let line = if at_start {
        line.strip_prefix(BOM).unwrap_or(line)
    } else {
        line
    };
    line.starts_with(b"From ")
}

fn is_blank_line(line: &[u8]) -> bool {
    line.iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b' ' || b == b'\t')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(content: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content).unwrap();
        f.flush().unwrap();
        f
    }

    fn collect(path: &Path) -> Vec<(u64, u64, Vec<u8>)> {
        let mut out = Vec::new();
        MboxScanner::new(path)
            .scan(&mut |offset, length, raw| out.push((offset, length, raw.to_vec())))
            .unwrap();
        out
    }

    #[test]
    fn test_scan_two_messages() {
        let content = b"From a@x Thu Jan  4 10:00:00 2024\nSubject: one\n\nbody\n\nFrom b@x Thu Jan  4 11:00:00 2024\nSubject: two\n\nbody two\n";
        let f = write_tmp(content);
        let messages = collect(f.path());
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, 0);
        assert_eq!(messages[1].0, messages[0].1);
        assert_eq!(messages[0].1 + messages[1].1, content.len() as u64);
        assert!(messages[1].2.starts_with(b"From b@x"));
    }

    #[test]
    fn test_escaped_from_is_not_separator() {
        let content = b"From a@x Thu Jan  4 10:00:00 2024\nSubject: one\n\n>From the body\n";
        let f = write_tmp(content);
        assert_eq!(collect(f.path()).len(), 1);
    }

    #[test]
    fn test_bom_before_first_separator() {
        let mut content = BOM.to_vec();
        content.extend_from_slice(b"From a@x Thu Jan  4 10:00:00 2024\nSubject: one\n\nbody\n");
        let f = write_tmp(&content);
        assert_eq!(collect(f.path()).len(), 1);
        assert!(looks_like_mbox(f.path()).unwrap());
    }

    #[test]
    fn test_empty_file() {
        let f = write_tmp(b"");
        assert!(collect(f.path()).is_empty());
        assert!(looks_like_mbox(f.path()).unwrap());
    }

    #[test]
    fn test_not_mbox() {
        let f = write_tmp(b"%PDF-1.4\n");
        assert!(!looks_like_mbox(f.path()).unwrap());
    }

    #[test]
    fn test_oversized_message_truncated() {
        let content = b"From a@x Thu Jan  4 10:00:00 2024\nSubject: one\n\n0123456789\n0123456789\n";
        let f = write_tmp(content);
        let mut seen = Vec::new();
        MboxScanner::new(f.path())
            .with_max_message_size(50)
            .scan(&mut |_, length, raw| seen.push((length, raw.len())))
            .unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, content.len() as u64);
        assert!(seen[0].1 <= 50);
    }

    #[test]
    fn test_split_envelope() {
        let (envelope, message) = split_envelope(b"From a@x Thu\nSubject: x\n\nbody");
        assert_eq!(envelope, b"From a@x Thu\n");
        assert!(message.starts_with(b"Subject:"));

        let (envelope, message) = split_envelope(b"Subject: x\n\nbody");
        assert!(envelope.is_empty());
        assert!(message.starts_with(b"Subject:"));
    }
}
