//! `mailvault`: access and export of personal mail archives.
//!
//! An [`Archive`] opens a byte source through an
//! [`ArchiveDecoder`](decoder::ArchiveDecoder), lists its items as flat
//! [`Record`]s, and each record can be exported to a file (or a directory,
//! for folders) by an [`Exporter`] built from an [`ExportConf`].

pub mod archive;
pub mod config;
pub mod decoder;
pub mod error;
pub mod export;
pub mod record;

pub use archive::Archive;
pub use error::{ArchiveError, ErrorCode};
pub use export::{ConfigError, Conversion, ExportConf, Exporter};
pub use record::{destroy_list, Record};
