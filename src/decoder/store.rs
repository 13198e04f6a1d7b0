//! Random-access message store: reads raw messages by offset with LRU caching.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;
use tracing::debug;

use crate::decoder::index::IndexEntry;
use crate::error::{ArchiveError, Result};

/// Default number of raw messages kept in the cache.
pub const DEFAULT_CACHE_SIZE: usize = 16;

/// Reads raw messages from an mbox using index offsets.
///
/// Exporting a message and then each of its attachments touches the same
/// bytes several times in a row; the cache keeps those reads off the disk.
pub struct MessageStore {
    path: PathBuf,
    file: File,
    cache: LruCache<u64, Vec<u8>>,
}

impl MessageStore {
    pub fn open(path: impl AsRef<Path>, cache_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| ArchiveError::io(&path, e))?;
        let cache_size = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            path,
            file,
            cache: LruCache::new(cache_size),
        })
    }

    /// Raw bytes of a message, separator line included.
    pub fn raw_message(&mut self, entry: &IndexEntry) -> Result<&[u8]> {
        if !self.cache.contains(&entry.offset) {
            let raw = self.read_raw(entry)?;
            self.cache.put(entry.offset, raw);
        }
        self.cache
            .get(&entry.offset)
            .map(Vec::as_slice)
            .ok_or(ArchiveError::Payload {
                item: entry.sequence,
                reason: "message evicted from cache".into(),
            })
    }

    fn read_raw(&mut self, entry: &IndexEntry) -> Result<Vec<u8>> {
        debug!(
            offset = entry.offset,
            length = entry.length,
            "Reading message from mbox"
        );
        self.file
            .seek(SeekFrom::Start(entry.offset))
            .map_err(|e| ArchiveError::io(&self.path, e))?;
        let mut buf = vec![0u8; entry.length as usize];
        self.file
            .read_exact(&mut buf)
            .map_err(|e| ArchiveError::io(&self.path, e))?;
        Ok(buf)
    }
}
