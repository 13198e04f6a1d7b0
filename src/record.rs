//! Records: one enumerated archive item plus export state.

use std::path::{Path, PathBuf};
use std::sync::Weak;

use tracing::{debug, warn};

use crate::archive::SessionCell;
use crate::decoder::{ItemId, ItemInfo, ItemKind};
use crate::error::{ArchiveError, ErrorCode, Result};
use crate::export::Exporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Uninitialized,
    Live,
    Destroyed,
}

/// One item of an archive listing.
///
/// Records produced by [`Archive::list`](crate::archive::Archive::list) refer
/// to the handle's decoder session without owning it. Once the handle is
/// released, exporting a record fails with [`ArchiveError::HandleReleased`].
///
/// `Record::default()` is an uninitialized record: it has no item and cannot
/// be exported or destroyed.
#[derive(Debug, Default)]
pub struct Record {
    info: ItemInfo,
    depth: usize,
    index: usize,
    session: Weak<SessionCell>,
    error: ErrorCode,
    renaming: Option<PathBuf>,
    state: State,
}

impl Record {
    pub(crate) fn new(
        info: ItemInfo,
        depth: usize,
        index: usize,
        session: Weak<SessionCell>,
        error: ErrorCode,
    ) -> Self {
        Self {
            info,
            depth,
            index,
            session,
            error,
            renaming: None,
            state: State::Live,
        }
    }

    pub fn id(&self) -> ItemId {
        self.info.id
    }

    pub fn parent(&self) -> Option<ItemId> {
        self.info.parent
    }

    pub fn kind(&self) -> ItemKind {
        self.info.kind
    }

    /// Decoder default name.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &ItemInfo {
        &self.info
    }

    /// Nesting level, 0 for top-level items.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Position in the listing that produced this record.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_deleted(&self) -> bool {
        self.info.deleted
    }

    pub fn size(&self) -> u64 {
        self.info.size
    }

    /// Status of the last export, or of classification for unknown items.
    pub fn error_code(&self) -> ErrorCode {
        self.error
    }

    /// Folder-like records export as a directory.
    pub fn is_container(&self) -> bool {
        self.info.kind == ItemKind::Folder
    }

    pub fn is_live(&self) -> bool {
        self.state == State::Live
    }

    /// Override the output path of the next export. Last call wins.
    pub fn set_renaming(&mut self, path: impl Into<PathBuf>) {
        self.renaming = Some(path.into());
    }

    pub fn renaming(&self) -> Option<&Path> {
        self.renaming.as_deref()
    }

    /// Export this record with `exporter`.
    ///
    /// Conversion failures are stored in the record's error slot and reported
    /// as `Ok(0)`, so a batch export keeps going. `Err` is returned only for
    /// lifecycle misuse: a destroyed record or exporter, or a released handle.
    pub fn export(&mut self, exporter: &Exporter) -> Result<u64> {
        self.ensure_live()?;
        exporter.ensure_live()?;
        let shared = self.session.upgrade().ok_or(ArchiveError::HandleReleased)?;

        let target = self
            .renaming
            .clone()
            .unwrap_or_else(|| exporter.default_target(&self.info));

        let outcome = {
            let mut session = shared.lock().map_err(|_| ArchiveError::Poisoned)?;
            exporter.convert(&mut **session, self.info.id, &target)
        };

        match outcome {
            Ok(conversion) => {
                self.error = ErrorCode::NoError;
                debug!(
                    index = self.index,
                    target = %target.display(),
                    ?conversion,
                    "Record exported"
                );
                Ok(conversion.bytes())
            }
            Err(e) => match e.code() {
                Some(code) => {
                    warn!(
                        index = self.index,
                        name = %self.info.name,
                        code = %code,
                        error = %e,
                        "Record export failed"
                    );
                    self.error = code;
                    Ok(0)
                }
                None => Err(e),
            },
        }
    }

    /// Release this record. Fails on an uninitialized or already destroyed record.
    pub fn destroy(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.state = State::Destroyed;
        self.session = Weak::new();
        Ok(())
    }

    fn ensure_live(&self) -> Result<()> {
        match self.state {
            State::Live => Ok(()),
            State::Uninitialized => Err(ArchiveError::NotInitialized("record")),
            State::Destroyed => Err(ArchiveError::AlreadyReleased("record")),
        }
    }
}

/// Destroy every record, continuing past failures.
///
/// Fails with [`ArchiveError::ReleaseFailed`] when at least one record could
/// not be destroyed.
pub fn destroy_list(records: &mut [Record]) -> Result<()> {
    let total = records.len();
    let failed = records
        .iter_mut()
        .map(Record::destroy)
        .filter(|r| r.is_err())
        .count();
    if failed > 0 {
        warn!(failed, total, "Some records could not be released");
        return Err(ArchiveError::ReleaseFailed { failed, total });
    }
    Ok(())
}
