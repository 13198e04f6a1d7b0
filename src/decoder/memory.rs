//! In-memory archives.
//!
//! A [`MemoryArchive`] is built item by item and then opened like any other
//! archive. Useful for embedding the export pipeline in tools that already
//! hold their data, and for exercising failure paths (open and index-load
//! failures can be injected).

use std::path::Path;

use crate::decoder::{ArchiveDecoder, DecoderSession, ItemId, ItemInfo, ItemKind};
use crate::error::{ArchiveError, Result};

#[derive(Debug, Clone)]
struct MemoryItem {
    info: ItemInfo,
    children: Vec<ItemId>,
    payload: Vec<u8>,
}

/// An item tree held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    items: Vec<MemoryItem>,
    roots: Vec<ItemId>,
    open_failure: Option<String>,
    index_failure: Option<String>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item of any kind and return its id.
    ///
    /// # Panics
    /// When `parent` is not an id returned by this archive.
    pub fn add_item(
        &mut self,
        parent: Option<ItemId>,
        kind: ItemKind,
        name: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> ItemId {
        let id = self.items.len() as ItemId;
        let payload = payload.into();
        let info = ItemInfo {
            id,
            parent,
            kind,
            name: name.into(),
            size: payload.len() as u64,
            ..ItemInfo::default()
        };
        match parent {
            Some(p) => self.items[p as usize].children.push(id),
            None => self.roots.push(id),
        }
        self.items.push(MemoryItem {
            info,
            children: Vec::new(),
            payload,
        });
        id
    }

    pub fn add_folder(&mut self, parent: Option<ItemId>, name: impl Into<String>) -> ItemId {
        self.add_item(parent, ItemKind::Folder, name, Vec::new())
    }

    pub fn add_message(
        &mut self,
        parent: Option<ItemId>,
        name: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> ItemId {
        self.add_item(parent, ItemKind::Message, name, payload)
    }

    pub fn add_contact(
        &mut self,
        parent: Option<ItemId>,
        name: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> ItemId {
        self.add_item(parent, ItemKind::Contact, name, payload)
    }

    pub fn add_attachment(
        &mut self,
        message: ItemId,
        filename: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> ItemId {
        self.add_item(Some(message), ItemKind::Attachment, filename, payload)
    }

    /// Flag an item as deleted.
    pub fn mark_deleted(&mut self, id: ItemId) {
        if let Some(item) = self.items.get_mut(id as usize) {
            item.info.deleted = true;
        }
    }

    /// Make every `open` fail with `reason`.
    pub fn fail_open(mut self, reason: impl Into<String>) -> Self {
        self.open_failure = Some(reason.into());
        self
    }

    /// Make every index load fail with `reason`.
    pub fn fail_index(mut self, reason: impl Into<String>) -> Self {
        self.index_failure = Some(reason.into());
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl ArchiveDecoder for MemoryArchive {
    fn open(&self, path: &Path) -> Result<Box<dyn DecoderSession>> {
        if let Some(reason) = &self.open_failure {
            return Err(ArchiveError::io(path, std::io::Error::other(reason.clone())));
        }
        Ok(Box::new(MemorySession {
            archive: self.clone(),
            path: path.to_path_buf(),
            loaded: false,
        }))
    }
}

struct MemorySession {
    archive: MemoryArchive,
    path: std::path::PathBuf,
    loaded: bool,
}

impl MemorySession {
    fn get(&self, id: ItemId) -> Result<&MemoryItem> {
        if !self.loaded {
            return Err(ArchiveError::InvalidIndex {
                path: self.path.clone(),
                reason: "index not loaded".into(),
            });
        }
        self.archive
            .items
            .get(id as usize)
            .ok_or(ArchiveError::UnknownItem(id))
    }
}

impl DecoderSession for MemorySession {
    fn load_index(&mut self) -> Result<()> {
        if let Some(reason) = &self.archive.index_failure {
            return Err(ArchiveError::InvalidIndex {
                path: self.path.clone(),
                reason: reason.clone(),
            });
        }
        self.loaded = true;
        Ok(())
    }

    fn children(&self, parent: Option<ItemId>) -> Result<Vec<ItemId>> {
        match parent {
            Some(id) => Ok(self.get(id)?.children.clone()),
            None if self.loaded => Ok(self.archive.roots.clone()),
            None => Err(ArchiveError::InvalidIndex {
                path: self.path.clone(),
                reason: "index not loaded".into(),
            }),
        }
    }

    fn item(&self, id: ItemId) -> Result<ItemInfo> {
        Ok(self.get(id)?.info.clone())
    }

    fn read_payload(&mut self, id: ItemId) -> Result<Vec<u8>> {
        Ok(self.get(id)?.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_open() {
        let mut archive = MemoryArchive::new();
        let inbox = archive.add_folder(None, "Inbox");
        let msg = archive.add_message(Some(inbox), "hello", b"Subject: hi\n\nbody".to_vec());
        archive.add_attachment(msg, "a.txt", b"text".to_vec());
        archive.mark_deleted(msg);
        assert_eq!(archive.len(), 3);

        let mut session = archive.open(Path::new("memory")).unwrap();
        session.load_index().unwrap();
        assert_eq!(session.children(None).unwrap(), vec![inbox]);
        assert_eq!(session.children(Some(inbox)).unwrap(), vec![msg]);

        let info = session.item(msg).unwrap();
        assert!(info.deleted);
        assert_eq!(info.parent, Some(inbox));
        assert_eq!(session.default_name(msg).unwrap(), "hello");
        assert_eq!(session.read_payload(msg).unwrap(), b"Subject: hi\n\nbody");
        assert!(matches!(session.item(99), Err(ArchiveError::UnknownItem(99))));
    }

    #[test]
    fn test_injected_failures() {
        let failing = MemoryArchive::new().fail_open("disk gone");
        assert!(failing.open(Path::new("x")).is_err());

        let corrupt = MemoryArchive::new().fail_index("bad btree");
        let mut session = corrupt.open(Path::new("x")).unwrap();
        assert!(matches!(
            session.load_index(),
            Err(ArchiveError::InvalidIndex { .. })
        ));
    }
}
