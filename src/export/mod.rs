//! Export pipeline: converts archive items into files and directories.
//!
//! An [`Exporter`] owns validated [`ExportSettings`] and turns one item at a
//! time into output. Folders become directories, leaf items become files;
//! everything in between (filtering, name capping, mbox framing, vCard
//! extraction, line endings, collisions) is decided by the settings.

pub mod encode;
pub mod naming;
pub mod options;

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::decoder::{DecoderSession, ItemId, ItemInfo, ItemKind};
use crate::error::{ArchiveError, Result};

pub use options::{
    CollisionMode, ConfigError, ContactMode, DeletedMode, ExportConf, ExportMode, ExportSettings,
    OutputMode,
};

use encode::{apply_line_endings, extract_vcard, mbox_entry};
use naming::{default_file_name, fit_file_name, sanitize_filename_part, unique_path};

/// Name of the concatenated mailbox written inside a folder in mbox mode.
pub const FOLDER_MBOX_NAME: &str = "mbox";

/// Longest sanitized attachment file name.
const MAX_ATTACHMENT_NAME_LEN: usize = 200;

/// Why an item produced no output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Marked deleted and deleted items are excluded.
    Deleted,
    /// A contact while contacts are skipped.
    Contact,
}

/// Outcome of a successful conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Written { bytes: u64, files: u64 },
    Skipped(SkipReason),
}

impl Conversion {
    /// Bytes written, 0 for skipped items.
    pub fn bytes(&self) -> u64 {
        match self {
            Self::Written { bytes, .. } => *bytes,
            Self::Skipped(_) => 0,
        }
    }

    pub fn files(&self) -> u64 {
        match self {
            Self::Written { files, .. } => *files,
            Self::Skipped(_) => 0,
        }
    }

    fn absorb(&mut self, other: Conversion) {
        if let (
            Self::Written { bytes, files },
            Self::Written {
                bytes: b,
                files: f,
            },
        ) = (self, other)
        {
            *bytes += b;
            *files += f;
        }
    }
}

/// Converts items into output files according to validated settings.
///
/// An exporter remembers which item each written path belongs to. A path
/// already written for one item is never overwritten for another one, so
/// items sharing a default name (two `image001.png` attachments) both
/// survive; the later one gets a `_N` suffix.
#[derive(Debug)]
pub struct Exporter {
    settings: ExportSettings,
    claims: Mutex<HashMap<PathBuf, ItemId>>,
    released: bool,
}

impl Exporter {
    /// Validate `conf` and build an exporter. Any invalid field rejects the
    /// whole configuration.
    pub fn new(conf: &ExportConf) -> std::result::Result<Self, ConfigError> {
        let settings = ExportSettings::validate(conf).inspect_err(|e| {
            warn!(error = %e, "Rejected export configuration");
        })?;
        debug!(?settings, "Exporter created");
        Ok(Self {
            settings,
            claims: Mutex::new(HashMap::new()),
            released: false,
        })
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    pub fn is_live(&self) -> bool {
        !self.released
    }

    /// Release the exporter. Fails when called a second time.
    pub fn destroy(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.released = true;
        debug!("Exporter released");
        Ok(())
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.released {
            Err(ArchiveError::AlreadyReleased("exporter"))
        } else {
            Ok(())
        }
    }

    /// Output extension of an item, `None` for folders and unknown items.
    pub fn natural_extension(&self, info: &ItemInfo) -> Option<String> {
        match info.kind {
            ItemKind::Folder | ItemKind::Unknown => None,
            ItemKind::Contact if self.settings.contact_mode == ContactMode::Vcard => {
                Some("vcf".to_string())
            }
            ItemKind::Message | ItemKind::Contact => Some(self.message_extension().to_string()),
            ItemKind::Attachment => Some(
                Path::new(&info.name)
                    .extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| "bin".to_string()),
            ),
        }
    }

    fn message_extension(&self) -> &'static str {
        match self.settings.mode {
            ExportMode::Separate => "eml",
            ExportMode::Mbox => "mbox",
        }
    }

    /// Target used when a record has no rename: the default name under the
    /// output directory.
    pub fn default_target(&self, info: &ItemInfo) -> PathBuf {
        self.settings.output_dir.join(self.file_name_for(info))
    }

    /// Convert item `id` of `session` into `target`.
    ///
    /// Folders are written as a directory at `target`, everything else as a
    /// single file. Errors carry an [`ErrorCode`](crate::error::ErrorCode)
    /// through [`ArchiveError::code`].
    ///
    /// A folder export attempts every child. When some child fails (an
    /// unknown item, an unwritable file) the folder reports the first such
    /// error, even though its other children were written.
    pub fn convert(
        &self,
        session: &mut dyn DecoderSession,
        id: ItemId,
        target: &Path,
    ) -> Result<Conversion> {
        self.ensure_live()?;
        let info = session.item(id)?;
        self.convert_item(session, &info, target)
    }

    fn convert_item(
        &self,
        session: &mut dyn DecoderSession,
        info: &ItemInfo,
        target: &Path,
    ) -> Result<Conversion> {
        match info.kind {
            ItemKind::Folder => return self.convert_container(session, info, target),
            ItemKind::Unknown => return Err(ArchiveError::UnknownItem(info.id)),
            _ => {}
        }

        if let Some(ext) = self.natural_extension(info) {
            if !self.settings.accepts(&ext) {
                return Err(ArchiveError::Unsupported(format!(
                    "extension '{ext}' is not accepted"
                )));
            }
        }

        let target = self.fit(target)?;
        if let Some(reason) = self.skip_reason(info) {
            debug!(item = info.id, ?reason, "Item skipped");
            return Ok(Conversion::Skipped(reason));
        }

        let data = self.encode(session, info)?;
        self.write_file(info.id, &target, &data)
    }

    fn convert_container(
        &self,
        session: &mut dyn DecoderSession,
        info: &ItemInfo,
        target: &Path,
    ) -> Result<Conversion> {
        if info.deleted && self.settings.deleted_mode == DeletedMode::Exclude {
            debug!(item = info.id, "Deleted folder skipped");
            return Ok(Conversion::Skipped(SkipReason::Deleted));
        }

        let dir = self.create_dir(info.id, &self.fit(target)?)?;
        let mut total = Conversion::Written { bytes: 0, files: 0 };
        let mut first_error: Option<ArchiveError> = None;
        let mut folder_mbox: Vec<u8> = Vec::new();

        for child_id in session.children(Some(info.id))? {
            let child = match session.item(child_id) {
                Ok(child) => child,
                Err(e) => {
                    warn!(item = child_id, error = %e, "Cannot read child item");
                    first_error.get_or_insert(e);
                    continue;
                }
            };

            if child.kind != ItemKind::Folder {
                if let Some(ext) = self.natural_extension(&child) {
                    if !self.settings.accepts(&ext) {
                        debug!(item = child.id, extension = %ext, "Child filtered out");
                        continue;
                    }
                }
            }

            let result = if self.joins_folder_mbox(&child) {
                self.append_to_mbox(session, &child, &mut folder_mbox)
            } else {
                let child_target = dir.join(self.file_name_for(&child));
                self.convert_item(session, &child, &child_target)
            };

            match result {
                Ok(conversion) => total.absorb(conversion),
                Err(e) => {
                    warn!(item = child.id, name = %child.name, error = %e, "Child export failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        if !folder_mbox.is_empty() {
            let data = apply_line_endings(&folder_mbox, self.settings.output_mode);
            match self.write_file(info.id, &dir.join(FOLDER_MBOX_NAME), &data) {
                Ok(conversion) => total.absorb(conversion),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    /// In mbox mode, messages (and contacts exported as messages) of a
    /// folder share one mailbox file.
    fn joins_folder_mbox(&self, child: &ItemInfo) -> bool {
        self.settings.mode == ExportMode::Mbox
            && match child.kind {
                ItemKind::Message => true,
                ItemKind::Contact => self.settings.contact_mode != ContactMode::Vcard,
                _ => false,
            }
    }

    fn append_to_mbox(
        &self,
        session: &mut dyn DecoderSession,
        child: &ItemInfo,
        folder_mbox: &mut Vec<u8>,
    ) -> Result<Conversion> {
        if let Some(reason) = self.skip_reason(child) {
            return Ok(Conversion::Skipped(reason));
        }
        let payload = session.read_payload(child.id)?;
        folder_mbox.extend_from_slice(&mbox_entry(&child.sender, child.date, &payload));
        // Counted when the folder mailbox is written
        Ok(Conversion::Written { bytes: 0, files: 0 })
    }

    fn skip_reason(&self, info: &ItemInfo) -> Option<SkipReason> {
        if info.deleted && self.settings.deleted_mode == DeletedMode::Exclude {
            return Some(SkipReason::Deleted);
        }
        if info.kind == ItemKind::Contact && self.settings.contact_mode == ContactMode::Skip {
            return Some(SkipReason::Contact);
        }
        None
    }

    /// Serialize a leaf item's payload.
    fn encode(&self, session: &mut dyn DecoderSession, info: &ItemInfo) -> Result<Vec<u8>> {
        let payload = session.read_payload(info.id)?;
        let text = match info.kind {
            // Attachments are binary and written untouched
            ItemKind::Attachment => return Ok(payload),
            ItemKind::Contact if self.settings.contact_mode == ContactMode::Vcard => {
                extract_vcard(&payload).ok_or_else(|| ArchiveError::Payload {
                    item: info.id,
                    reason: "contact has no vCard body".into(),
                })?
            }
            _ if self.settings.mode == ExportMode::Mbox => {
                mbox_entry(&info.sender, info.date, &payload)
            }
            _ => payload,
        };
        Ok(apply_line_endings(&text, self.settings.output_mode).into_owned())
    }

    fn file_name_for(&self, info: &ItemInfo) -> String {
        match info.kind {
            ItemKind::Attachment => sanitize_filename_part(&info.name, MAX_ATTACHMENT_NAME_LEN),
            _ => default_file_name(&info.name, self.natural_extension(info).as_deref()),
        }
    }

    fn fit(&self, target: &Path) -> Result<PathBuf> {
        fit_file_name(target, self.settings.file_name_len).ok_or_else(|| self.too_long(target))
    }

    fn too_long(&self, target: &Path) -> ArchiveError {
        ArchiveError::Unsupported(format!(
            "'{}' does not fit in {} characters",
            target.display(),
            self.settings.file_name_len
        ))
    }

    /// Pick the path item `id` is written to and record it as taken.
    ///
    /// `rename` always picks a fresh path; `overwrite` reuses `target` unless
    /// this exporter already wrote it for another item.
    fn claim(&self, id: ItemId, target: &Path) -> Result<PathBuf> {
        let mut claims = self.claims.lock().map_err(|_| ArchiveError::Poisoned)?;
        let taken = claims.get(target).is_some_and(|&owner| owner != id);
        let path = if taken || self.settings.collision == CollisionMode::Rename {
            unique_path(target, self.settings.file_name_len)
                .ok_or_else(|| self.too_long(target))?
        } else {
            target.to_path_buf()
        };
        if taken {
            debug!(item = id, path = %path.display(), "Target taken by another item, renamed");
        }
        claims.insert(path.clone(), id);
        Ok(path)
    }

    /// Create the directory for a folder. An existing directory is reused
    /// under `overwrite`; the parent must already exist.
    fn create_dir(&self, id: ItemId, target: &Path) -> Result<PathBuf> {
        let dir = self.claim(id, target)?;
        match std::fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists && dir.is_dir() => {}
            Err(e) => return Err(ArchiveError::io(&dir, e)),
        }
        debug!(path = %dir.display(), "Created folder directory");
        Ok(dir)
    }

    fn write_file(&self, id: ItemId, target: &Path, data: &[u8]) -> Result<Conversion> {
        let path = self.claim(id, target)?;
        std::fs::write(&path, data).map_err(|e| ArchiveError::io(&path, e))?;
        debug!(path = %path.display(), bytes = data.len(), "Wrote export file");
        Ok(Conversion::Written {
            bytes: data.len() as u64,
            files: 1,
        })
    }
}
