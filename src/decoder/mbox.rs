//! Mbox archives (Gmail Takeout, Thunderbird) as an item tree.
//!
//! Layout of the tree:
//! - the first `X-Gmail-Labels` label of a message selects its folder,
//!   `/` separating nesting levels; unlabelled messages are top-level;
//! - folders appear in order of first use, messages in file order;
//! - attachments are children of their message;
//! - `text/vcard` messages are contacts, messages without a header block are
//!   unknown items.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use mail_parser::MessageParser;
use tracing::debug;

use crate::config::{self, Config};
use crate::decoder::index::{self, IndexEntry};
use crate::decoder::scan::{self, MAX_MESSAGE_SIZE};
use crate::decoder::store::{MessageStore, DEFAULT_CACHE_SIZE};
use crate::decoder::{ArchiveDecoder, DecoderSession, ItemId, ItemInfo, ItemKind};
use crate::error::{ArchiveError, Result};

/// Opens mbox files.
#[derive(Debug, Clone)]
pub struct MboxDecoder {
    persist_index: bool,
    cache_size: usize,
    max_message_size: usize,
    cache_dir: PathBuf,
}

impl Default for MboxDecoder {
    fn default() -> Self {
        Self {
            persist_index: true,
            cache_size: DEFAULT_CACHE_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
            cache_dir: config::default_cache_dir(),
        }
    }
}

impl MboxDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder options from `[archive]`, sidecar fallback in the configured
    /// cache directory.
    pub fn from_config(config: &Config) -> Self {
        Self {
            persist_index: config.archive.persist_index,
            cache_size: config.archive.cache_size,
            max_message_size: config.archive.max_message_size,
            cache_dir: config::cache_dir(config),
        }
    }

    /// Reuse and write the sidecar index (default: on).
    pub fn persist_index(mut self, persist: bool) -> Self {
        self.persist_index = persist;
        self
    }

    pub fn cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Where the sidecar index goes when it cannot sit next to the mbox.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }
}

impl ArchiveDecoder for MboxDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn DecoderSession>> {
        let meta = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ArchiveError::FileNotFound(path.to_path_buf())
            } else {
                ArchiveError::io(path, e)
            }
        })?;
        if !meta.is_file() || !scan::looks_like_mbox(path)? {
            return Err(ArchiveError::NotAnArchive(path.to_path_buf()));
        }

        let store = MessageStore::open(path, self.cache_size)?;
        Ok(Box::new(MboxSession {
            path: path.to_path_buf(),
            options: self.clone(),
            store,
            entries: Vec::new(),
            tree: None,
        }))
    }
}

enum Source {
    Folder,
    Message(usize),
    Attachment { message: usize, index: usize },
}

struct Node {
    info: ItemInfo,
    children: Vec<ItemId>,
    source: Source,
}

#[derive(Default)]
struct Tree {
    nodes: Vec<Node>,
    roots: Vec<ItemId>,
}

impl Tree {
    fn build(entries: &[IndexEntry]) -> Self {
        let mut tree = Self::default();
        let mut folders: HashMap<Vec<String>, ItemId> = HashMap::new();

        for (idx, entry) in entries.iter().enumerate() {
            let parent = tree.ensure_folder(&entry.folder, &mut folders);
            let message = tree.push(
                parent,
                ItemInfo {
                    kind: entry.kind,
                    name: message_name(entry),
                    deleted: entry.deleted,
                    size: entry.length,
                    sender: entry.sender.clone(),
                    date: entry.date,
                    ..ItemInfo::default()
                },
                Source::Message(idx),
            );

            for (index, att) in entry.attachments.iter().enumerate() {
                tree.push(
                    Some(message),
                    ItemInfo {
                        kind: ItemKind::Attachment,
                        name: att.filename.clone(),
                        deleted: entry.deleted,
                        size: att.size,
                        sender: entry.sender.clone(),
                        date: entry.date,
                        ..ItemInfo::default()
                    },
                    Source::Attachment {
                        message: idx,
                        index,
                    },
                );
            }
        }
        tree
    }

    /// Return the innermost folder for `path`, creating missing levels.
    fn ensure_folder(
        &mut self,
        path: &[String],
        folders: &mut HashMap<Vec<String>, ItemId>,
    ) -> Option<ItemId> {
        let mut parent = None;
        for depth in 1..=path.len() {
            let key = path[..depth].to_vec();
            let id = match folders.get(&key) {
                Some(&id) => id,
                None => {
                    let info = ItemInfo {
                        kind: ItemKind::Folder,
                        name: path[depth - 1].clone(),
                        ..ItemInfo::default()
                    };
                    let id = self.push(parent, info, Source::Folder);
                    folders.insert(key, id);
                    id
                }
            };
            parent = Some(id);
        }
        parent
    }

    fn push(&mut self, parent: Option<ItemId>, mut info: ItemInfo, source: Source) -> ItemId {
        let id = self.nodes.len() as ItemId;
        info.id = id;
        info.parent = parent;
        self.nodes.push(Node {
            info,
            children: Vec::new(),
            source,
        });
        match parent {
            Some(p) => self.nodes[p as usize].children.push(id),
            None => self.roots.push(id),
        }
        id
    }
}

fn message_name(entry: &IndexEntry) -> String {
    let label = match entry.kind {
        ItemKind::Unknown => "unknown",
        _ if !entry.subject.trim().is_empty() => entry.subject.trim(),
        ItemKind::Contact => "contact",
        _ => "no subject",
    };
    format!("{:05}_{}", entry.sequence + 1, label)
}

/// One open mbox.
pub struct MboxSession {
    path: PathBuf,
    options: MboxDecoder,
    store: MessageStore,
    entries: Vec<IndexEntry>,
    tree: Option<Tree>,
}

impl MboxSession {
    fn tree(&self) -> Result<&Tree> {
        self.tree.as_ref().ok_or_else(|| ArchiveError::InvalidIndex {
            path: self.path.clone(),
            reason: "index not loaded".into(),
        })
    }

    fn node(&self, id: ItemId) -> Result<&Node> {
        self.tree()?
            .nodes
            .get(id as usize)
            .ok_or(ArchiveError::UnknownItem(id))
    }
}

impl DecoderSession for MboxSession {
    fn load_index(&mut self) -> Result<()> {
        let entries = index::build_index(
            &self.path,
            self.options.persist_index,
            self.options.max_message_size,
            &self.options.cache_dir,
        )?;
        let tree = Tree::build(&entries);
        debug!(
            path = %self.path.display(),
            messages = entries.len(),
            items = tree.nodes.len(),
            "Mbox item tree built"
        );
        self.entries = entries;
        self.tree = Some(tree);
        Ok(())
    }

    fn children(&self, parent: Option<ItemId>) -> Result<Vec<ItemId>> {
        match parent {
            None => Ok(self.tree()?.roots.clone()),
            Some(id) => Ok(self.node(id)?.children.clone()),
        }
    }

    fn item(&self, id: ItemId) -> Result<ItemInfo> {
        Ok(self.node(id)?.info.clone())
    }

    fn read_payload(&mut self, id: ItemId) -> Result<Vec<u8>> {
        let (message, attachment) = match self.node(id)?.source {
            Source::Folder => return Ok(Vec::new()),
            Source::Message(message) => (message, None),
            Source::Attachment { message, index } => (message, Some(index)),
        };

        let entry = self
            .entries
            .get(message)
            .ok_or(ArchiveError::UnknownItem(id))?;
        let raw = self.store.raw_message(entry)?;
        let (_, body) = scan::split_envelope(raw);

        let Some(index) = attachment else {
            return Ok(body.to_vec());
        };

        let parsed = MessageParser::default().parse(body).ok_or_else(|| {
            ArchiveError::MimeError("Failed to parse message for attachment extraction".into())
        })?;
        parsed
            .attachments()
            .nth(index)
            .map(|part| part.contents().to_vec())
            .ok_or_else(|| {
                ArchiveError::MimeError(format!(
                    "Attachment {} not found in message {}",
                    index + 1,
                    entry.sequence + 1
                ))
            })
    }
}
