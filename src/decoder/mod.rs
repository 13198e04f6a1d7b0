//! Archive decoders: the byte-level collaborators behind an [`Archive`](crate::archive::Archive).
//!
//! A decoder opens a byte source and hands back a [`DecoderSession`], which
//! exposes the archive as a tree of opaque items with payload and metadata
//! accessors. Everything above this module is decoder-agnostic.

pub mod headers;
pub mod index;
pub mod mbox;
pub mod memory;
pub mod scan;
pub mod store;

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::Result;

pub use mbox::MboxDecoder;
pub use memory::MemoryArchive;

/// Identifier of an item inside one open session.
pub type ItemId = u64;

/// Kind tag reported by the decoder for each item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum ItemKind {
    Folder,
    Message,
    Attachment,
    Contact,
    /// The decoder could not classify the item.
    #[default]
    Unknown,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::Message => "message",
            Self::Attachment => "attachment",
            Self::Contact => "contact",
            Self::Unknown => "unknown",
        }
    }
}

/// Metadata describing one item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemInfo {
    pub id: ItemId,
    /// Containing item, `None` for top-level items.
    pub parent: Option<ItemId>,
    pub kind: ItemKind,
    /// Decoder-derived default name (folder name, subject, attachment file name).
    pub name: String,
    /// Marked deleted inside the archive.
    pub deleted: bool,
    /// Payload size in bytes as known to the decoder (0 for folders).
    pub size: u64,
    /// Sender address for messages, empty when unknown.
    pub sender: String,
    pub date: Option<DateTime<Utc>>,
}

/// Opens byte sources.
pub trait ArchiveDecoder {
    /// Open the archive at `path`. Fails when the source cannot be opened
    /// or is not an archive this decoder understands.
    fn open(&self, path: &Path) -> Result<Box<dyn DecoderSession>>;
}

/// One open archive.
///
/// Implementations are not required to be internally synchronized; the
/// archive handle serializes access.
pub trait DecoderSession: Send {
    /// Load the archive's index structures. Must succeed before any other call.
    fn load_index(&mut self) -> Result<()>;

    /// Children of `parent` in archive order; `None` lists the top-level items.
    fn children(&self, parent: Option<ItemId>) -> Result<Vec<ItemId>>;

    /// Metadata of one item.
    fn item(&self, id: ItemId) -> Result<ItemInfo>;

    /// Raw payload bytes of one item (empty for folders).
    fn read_payload(&mut self, id: ItemId) -> Result<Vec<u8>>;

    /// Default output name of one item.
    fn default_name(&self, id: ItemId) -> Result<String> {
        Ok(self.item(id)?.name)
    }
}
