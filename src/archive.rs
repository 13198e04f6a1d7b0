//! Archive handles: open an archive, list its records, release it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::decoder::{ArchiveDecoder, DecoderSession, ItemId, ItemInfo, ItemKind, MboxDecoder};
use crate::error::{ArchiveError, ErrorCode, Result};
use crate::record::Record;

/// The decoder session as shared between a handle and its records.
pub(crate) type SessionCell = Mutex<Box<dyn DecoderSession>>;

/// An open (or failed-to-open) archive.
///
/// Construction never fails: open and index-load failures are recorded in
/// [`error_code`](Self::error_code) and [`last_error`](Self::last_error), and
/// the handle can still be inspected and destroyed.
pub struct Archive {
    path: PathBuf,
    session: Option<Arc<SessionCell>>,
    error: ErrorCode,
    message: Option<String>,
    released: bool,
}

impl Archive {
    /// Open an mbox archive with default decoder options.
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self::open_with(&MboxDecoder::default(), path)
    }

    /// Open `path` with any decoder.
    pub fn open_with(decoder: &dyn ArchiveDecoder, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();

        let mut session = match decoder.open(&path) {
            Ok(session) => session,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to open archive");
                return Self::failed(path, ErrorCode::Open, &e);
            }
        };

        if let Err(e) = session.load_index() {
            warn!(path = %path.display(), error = %e, "Failed to load archive index");
            return Self::failed(path, ErrorCode::IndexLoad, &e);
        }

        info!(path = %path.display(), "Archive opened");
        Self {
            path,
            session: Some(Arc::new(Mutex::new(session))),
            error: ErrorCode::NoError,
            message: None,
            released: false,
        }
    }

    fn failed(path: PathBuf, error: ErrorCode, cause: &ArchiveError) -> Self {
        Self {
            path,
            session: None,
            error,
            message: Some(cause.to_string()),
            released: false,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        self.error
    }

    /// Diagnostic message, present only when the error code is not `NO_ERROR`.
    pub fn last_error(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the handle holds a usable session.
    pub fn is_open(&self) -> bool {
        !self.released && self.session.is_some()
    }

    /// Enumerate every item in pre-order (each item before its children).
    ///
    /// Unclassifiable items are listed with
    /// [`ErrorCode::UnknownRecord`] instead of being dropped. A handle whose
    /// open failed lists nothing. Every call returns fresh records.
    pub fn list(&self) -> Result<Vec<Record>> {
        if self.released {
            return Err(ArchiveError::AlreadyReleased("archive"));
        }
        let Some(shared) = &self.session else {
            return Ok(Vec::new());
        };
        let session = shared.lock().map_err(|_| ArchiveError::Poisoned)?;

        let mut stack: Vec<(ItemId, usize)> = match session.children(None) {
            Ok(roots) => roots.into_iter().rev().map(|id| (id, 0)).collect(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot read top-level items");
                Vec::new()
            }
        };

        let mut records = Vec::new();
        while let Some((id, depth)) = stack.pop() {
            let (info, code) = match session.item(id) {
                Ok(info) if info.kind == ItemKind::Unknown => (info, ErrorCode::UnknownRecord),
                Ok(info) => (info, ErrorCode::NoError),
                Err(e) => {
                    warn!(item = id, error = %e, "Cannot read item metadata");
                    let info = ItemInfo {
                        id,
                        ..ItemInfo::default()
                    };
                    (info, ErrorCode::UnknownRecord)
                }
            };

            if code.is_ok() {
                match session.children(Some(id)) {
                    Ok(children) => {
                        stack.extend(children.into_iter().rev().map(|c| (c, depth + 1)));
                    }
                    Err(e) => warn!(item = id, error = %e, "Cannot read child items"),
                }
            }

            let index = records.len();
            records.push(Record::new(info, depth, index, Arc::downgrade(shared), code));
        }

        debug!(path = %self.path.display(), records = records.len(), "Archive listed");
        Ok(records)
    }

    /// Release the decoder session. Fails when called a second time.
    ///
    /// Records listed from this handle stay valid objects, but exporting them
    /// fails with [`ArchiveError::HandleReleased`].
    pub fn destroy(&mut self) -> Result<()> {
        if self.released {
            return Err(ArchiveError::AlreadyReleased("archive"));
        }
        self.released = true;
        self.session = None;
        debug!(path = %self.path.display(), "Archive released");
        Ok(())
    }
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.path)
            .field("error", &self.error)
            .field("message", &self.message)
            .field("open", &self.is_open())
            .finish()
    }
}
