//! Message index for mbox archives: construction, validation, and persistence.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ HEADER (128 bytes, fixed)            │
//! │  magic: [u8; 8] = b"MVAULTX\0"       │
//! │  version: u32                        │
//! │  flags: u32                          │
//! │  message_count: u64                  │
//! │  mbox_file_size: u64                 │
//! │  mbox_modified_time: i64             │
//! │  sha256_first_4kb: [u8; 32]          │
//! │  (padding to 128 bytes)              │
//! ├──────────────────────────────────────┤
//! │ ENTRIES (variable)                   │
//! │  bincode-serialized Vec<IndexEntry>  │
//! └──────────────────────────────────────┘
//! ```

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::decoder::headers::HeaderBlock;
use crate::decoder::scan::{self, MboxScanner};
use crate::decoder::ItemKind;
use crate::error::{ArchiveError, Result};

/// Magic bytes identifying a mailvault index file.
pub const MAGIC: &[u8; 8] = b"MVAULTX\0";

/// Current index format version.
pub const VERSION: u32 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 128;

/// Size of the SHA-256 hash prefix used for integrity checking.
pub const HASH_PREFIX_LEN: usize = 4096;

/// Serializable index header.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct IndexHeader {
    pub magic: [u8; 8],
    pub version: u32,
    /// Reserved.
    pub flags: u32,
    pub message_count: u64,
    /// Size of the mbox file when the index was built.
    pub mbox_file_size: u64,
    /// Modification time of the mbox file (Unix seconds).
    pub mbox_modified_time: i64,
    pub sha256_first_4kb: [u8; 32],
}

impl IndexHeader {
    /// Validate that the header matches the current format.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.magic != *MAGIC {
            return Err("Invalid magic bytes".into());
        }
        if self.version != VERSION {
            return Err(format!(
                "Incompatible version: expected {VERSION}, found {}",
                self.version
            ));
        }
        Ok(())
    }
}

/// Attachment listed inside a message.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AttachmentEntry {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
}

/// Everything the decoder needs to know about one message without re-reading it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IndexEntry {
    /// Byte offset of the `From ` separator line.
    pub offset: u64,
    /// On-disk length including the separator line.
    pub length: u64,
    /// Position within the mbox (0, 1, 2, …).
    pub sequence: u64,
    pub kind: ItemKind,
    pub subject: String,
    pub sender: String,
    pub date: Option<DateTime<Utc>>,
    pub deleted: bool,
    /// Folder path from the first label; empty for top-level messages.
    pub folder: Vec<String>,
    pub attachments: Vec<AttachmentEntry>,
}

impl IndexEntry {
    /// Classify one raw mbox message (separator line included).
    pub fn from_raw(offset: u64, length: u64, sequence: u64, raw: &[u8]) -> Self {
        let (_, message) = scan::split_envelope(raw);

        let Some(headers) = HeaderBlock::parse(message) else {
            debug!(offset, "Message has no header block, classifying as unknown");
            return Self {
                offset,
                length,
                sequence,
                kind: ItemKind::Unknown,
                subject: String::new(),
                sender: String::new(),
                date: None,
                deleted: false,
                folder: Vec::new(),
                attachments: Vec::new(),
            };
        };

        let kind = if headers.is_vcard() {
            ItemKind::Contact
        } else {
            ItemKind::Message
        };

        let parsed = MessageParser::default().parse(message);
        let subject = parsed
            .as_ref()
            .and_then(|m| m.subject().map(String::from))
            .or_else(|| headers.get("subject").map(String::from))
            .unwrap_or_default();

        let attachments = match (&parsed, kind) {
            (Some(msg), ItemKind::Message) => list_attachments(msg),
            _ => Vec::new(),
        };

        Self {
            offset,
            length,
            sequence,
            kind,
            subject,
            sender: headers.sender(),
            date: headers.date(),
            deleted: headers.is_deleted(),
            folder: headers.label_path(),
            attachments,
        }
    }
}

fn list_attachments(msg: &mail_parser::Message<'_>) -> Vec<AttachmentEntry> {
    msg.attachments()
        .enumerate()
        .map(|(idx, part)| {
            let filename = part
                .attachment_name()
                .map(String::from)
                .unwrap_or_else(|| format!("attachment_{}", idx + 1));
            let content_type = part
                .content_type()
                .map(|ct| match ct.subtype() {
                    Some(sub) => format!("{}/{}", ct.ctype(), sub),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".to_string());
            AttachmentEntry {
                filename,
                content_type,
                size: part.contents().len() as u64,
            }
        })
        .collect()
}

/// Build (or load) the index for an mbox file.
///
/// With `persist`, a valid sidecar index is reused and a fresh one is written
/// after scanning; `cache_dir` holds the sidecar when the mbox directory is not
/// writable. A sidecar whose header is valid but whose entries cannot be
/// decoded is reported as [`ArchiveError::InvalidIndex`].
pub fn build_index(
    mbox_path: &Path,
    persist: bool,
    max_message_size: usize,
    cache_dir: &Path,
) -> Result<Vec<IndexEntry>> {
    if persist {
        if let Some(entries) = load_index(mbox_path, cache_dir)? {
            debug!(
                path = %mbox_path.display(),
                count = entries.len(),
                "Loaded existing index"
            );
            return Ok(entries);
        }
    }

    info!(path = %mbox_path.display(), "Building index");

    let mut entries: Vec<IndexEntry> = Vec::new();
    MboxScanner::new(mbox_path)
        .with_max_message_size(max_message_size)
        .scan(&mut |offset, length, raw| {
            let sequence = entries.len() as u64;
            entries.push(IndexEntry::from_raw(offset, length, sequence, raw));
        })?;

    if persist {
        if let Err(e) = write_index(mbox_path, cache_dir, &entries) {
            warn!(error = %e, "Could not write index file; continuing without persistence");
        }
    }

    Ok(entries)
}

/// Attempt to load an existing index. Returns `None` if it is missing or stale.
pub fn load_index(mbox_path: &Path, cache_dir: &Path) -> Result<Option<Vec<IndexEntry>>> {
    let idx_path = index_path_for(mbox_path);
    if idx_path.is_file() {
        return load_index_from_file(&idx_path, mbox_path);
    }
    let cache_path = cache_index_path_for(mbox_path, cache_dir);
    if cache_path.is_file() {
        return load_index_from_file(&cache_path, mbox_path);
    }
    Ok(None)
}

fn load_index_from_file(idx_path: &Path, mbox_path: &Path) -> Result<Option<Vec<IndexEntry>>> {
    let data = std::fs::read(idx_path).map_err(|e| ArchiveError::io(idx_path, e))?;

    if data.len() < HEADER_SIZE {
        debug!("Index file too small");
        return Ok(None);
    }

    let header: IndexHeader =
        bincode::deserialize(&data[..HEADER_SIZE]).map_err(|e| ArchiveError::InvalidIndex {
            path: idx_path.to_path_buf(),
            reason: format!("Header deserialization failed: {e}"),
        })?;

    if let Err(reason) = header.validate() {
        debug!(reason = %reason, "Index header invalid");
        return Ok(None);
    }

    let (size, mtime) = mbox_fingerprint(mbox_path)?;
    if header.mbox_file_size != size {
        debug!("Mbox file size changed");
        return Ok(None);
    }
    if header.mbox_modified_time != mtime {
        debug!("Mbox modification time changed");
        return Ok(None);
    }
    if header.sha256_first_4kb != sha256_first_n(mbox_path, HASH_PREFIX_LEN)? {
        debug!("Mbox content hash changed");
        return Ok(None);
    }

    let entries: Vec<IndexEntry> =
        bincode::deserialize(&data[HEADER_SIZE..]).map_err(|e| ArchiveError::InvalidIndex {
            path: idx_path.to_path_buf(),
            reason: format!("Entry deserialization failed: {e}"),
        })?;

    if entries.len() as u64 != header.message_count {
        return Err(ArchiveError::InvalidIndex {
            path: idx_path.to_path_buf(),
            reason: format!(
                "Header announces {} messages, found {}",
                header.message_count,
                entries.len()
            ),
        });
    }

    Ok(Some(entries))
}

/// Write the index next to the mbox, falling back to the cache directory.
pub fn write_index(mbox_path: &Path, cache_dir: &Path, entries: &[IndexEntry]) -> Result<()> {
    let (size, mtime) = mbox_fingerprint(mbox_path)?;
    let header = IndexHeader {
        magic: *MAGIC,
        version: VERSION,
        flags: 0,
        message_count: entries.len() as u64,
        mbox_file_size: size,
        mbox_modified_time: mtime,
        sha256_first_4kb: sha256_first_n(mbox_path, HASH_PREFIX_LEN)?,
    };

    let encode_err = |e: bincode::Error| ArchiveError::InvalidIndex {
        path: index_path_for(mbox_path),
        reason: format!("Serialization failed: {e}"),
    };
    let header_bytes = bincode::serialize(&header).map_err(encode_err)?;
    let entries_bytes = bincode::serialize(entries).map_err(encode_err)?;

    let mut padded_header = vec![0u8; HEADER_SIZE];
    let copy_len = header_bytes.len().min(HEADER_SIZE);
    padded_header[..copy_len].copy_from_slice(&header_bytes[..copy_len]);

    let idx_path = index_path_for(mbox_path);
    match write_index_to_file(&idx_path, &padded_header, &entries_bytes) {
        Ok(()) => {
            info!(path = %idx_path.display(), "Index written");
            return Ok(());
        }
        Err(e) => {
            debug!(error = %e, "Cannot write index next to mbox, trying cache dir");
        }
    }

    let cache_path = cache_index_path_for(mbox_path, cache_dir);
    if let Some(parent) = cache_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ArchiveError::io(parent, e))?;
    }
    write_index_to_file(&cache_path, &padded_header, &entries_bytes)?;
    info!(path = %cache_path.display(), "Index written to cache");
    Ok(())
}

fn write_index_to_file(path: &Path, header: &[u8], entries: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| ArchiveError::io(path, e))?;
    file.write_all(header).map_err(|e| ArchiveError::io(path, e))?;
    file.write_all(entries).map_err(|e| ArchiveError::io(path, e))?;
    file.flush().map_err(|e| ArchiveError::io(path, e))?;
    Ok(())
}

/// Size and modification time (Unix seconds) of the mbox.
fn mbox_fingerprint(mbox_path: &Path) -> Result<(u64, i64)> {
    let meta = std::fs::metadata(mbox_path).map_err(|e| ArchiveError::io(mbox_path, e))?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok((meta.len(), mtime))
}

/// SHA-256 of the first `n` bytes of a file.
fn sha256_first_n(path: &Path, n: usize) -> Result<[u8; 32]> {
    let file = File::open(path).map_err(|e| ArchiveError::io(path, e))?;
    let mut buf = Vec::with_capacity(n);
    file.take(n as u64)
        .read_to_end(&mut buf)
        .map_err(|e| ArchiveError::io(path, e))?;
    let mut hasher = Sha256::new();
    hasher.update(&buf);
    Ok(hasher.finalize().into())
}

/// Primary index path: hidden file next to the mbox.
///
/// Example: `/data/mail.mbox` → `/data/.mail.mbox.mailvault.idx`
pub fn index_path_for(mbox_path: &Path) -> PathBuf {
    let filename = mbox_path.file_name().unwrap_or_default().to_string_lossy();
    mbox_path.with_file_name(format!(".{filename}.mailvault.idx"))
}

/// Fallback index path inside the cache directory.
///
/// Example: `~/.cache/mailvault/<sha256_of_path>.idx`
pub fn cache_index_path_for(mbox_path: &Path, cache_dir: &Path) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(mbox_path.to_string_lossy().as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    cache_dir.join(format!("{hash}.idx"))
}
