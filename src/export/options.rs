//! Export configuration: the raw [`ExportConf`] and its validated form.
//!
//! `ExportConf` is plain data (strings and integers) so it can come from a
//! TOML file or the command line. [`ExportSettings::validate`] turns it into
//! typed settings; any single invalid field rejects the whole configuration.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest accepted `file_name_len`.
pub const MIN_FILE_NAME_LEN: i64 = 1;

/// Default cap on generated file names, in characters.
pub const DEFAULT_FILE_NAME_LEN: i64 = 255;

/// Overall conversion strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    /// One file per leaf record, a directory per folder.
    Separate,
    /// Messages in mbox framing; a folder holds one concatenated `mbox` file.
    Mbox,
}

/// Line-ending variant of textual output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Bytes exactly as stored in the archive.
    Native,
    /// LF line endings.
    Unix,
    /// CRLF line endings.
    Dos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactMode {
    /// Exported like any other message.
    Normal,
    /// The vCard body alone, as a `.vcf` file.
    Vcard,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletedMode {
    Include,
    Exclude,
}

/// What happens when the target file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionMode {
    Overwrite,
    /// Append `_1`, `_2`, … before the extension.
    Rename,
}

impl ExportMode {
    const VALUES: &'static [(&'static str, Self)] =
        &[("separate", Self::Separate), ("mbox", Self::Mbox)];
}

impl OutputMode {
    const VALUES: &'static [(&'static str, Self)] = &[
        ("native", Self::Native),
        ("unix", Self::Unix),
        ("dos", Self::Dos),
    ];
}

impl ContactMode {
    const VALUES: &'static [(&'static str, Self)] = &[
        ("normal", Self::Normal),
        ("vcard", Self::Vcard),
        ("skip", Self::Skip),
    ];
}

impl DeletedMode {
    const VALUES: &'static [(&'static str, Self)] =
        &[("include", Self::Include), ("exclude", Self::Exclude)];
}

impl CollisionMode {
    const VALUES: &'static [(&'static str, Self)] =
        &[("overwrite", Self::Overwrite), ("rename", Self::Rename)];
}

/// Why a configuration was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid {field} '{value}' (expected one of: {expected})")]
    InvalidValue {
        field: &'static str,
        value: String,
        expected: String,
    },

    #[error("Invalid file_name_len {0} (must be at least {MIN_FILE_NAME_LEN})")]
    FileNameLen(i64),

    #[error("Invalid extension '{0}' in acceptable_extensions")]
    InvalidExtension(String),
}

/// Raw export configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConf {
    /// "separate" or "mbox".
    pub mode: String,
    /// "native", "unix" or "dos".
    pub output_mode: String,
    /// "normal", "vcard" or "skip".
    pub contact_mode: String,
    /// "include" or "exclude".
    pub deleted_mode: String,
    /// Maximum characters in a generated file name.
    pub file_name_len: i64,
    /// Extensions to export; empty or `"*"` accepts everything.
    pub acceptable_extensions: Vec<String>,
    /// "overwrite" or "rename".
    pub collision: String,
    /// Base directory for records without a rename target.
    pub output_dir: Option<PathBuf>,
}

impl Default for ExportConf {
    fn default() -> Self {
        Self {
            mode: "separate".to_string(),
            output_mode: "native".to_string(),
            contact_mode: "normal".to_string(),
            deleted_mode: "include".to_string(),
            file_name_len: DEFAULT_FILE_NAME_LEN,
            acceptable_extensions: Vec::new(),
            collision: "overwrite".to_string(),
            output_dir: None,
        }
    }
}

/// Validated, typed export settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSettings {
    pub mode: ExportMode,
    pub output_mode: OutputMode,
    pub contact_mode: ContactMode,
    pub deleted_mode: DeletedMode,
    pub file_name_len: usize,
    /// `None` accepts every extension.
    pub extensions: Option<BTreeSet<String>>,
    pub collision: CollisionMode,
    pub output_dir: PathBuf,
}

impl ExportSettings {
    pub fn validate(conf: &ExportConf) -> Result<Self, ConfigError> {
        let mode = parse_value("mode", &conf.mode, ExportMode::VALUES)?;
        let output_mode = parse_value("output_mode", &conf.output_mode, OutputMode::VALUES)?;
        let contact_mode = parse_value("contact_mode", &conf.contact_mode, ContactMode::VALUES)?;
        let deleted_mode = parse_value("deleted_mode", &conf.deleted_mode, DeletedMode::VALUES)?;
        let collision = parse_value("collision", &conf.collision, CollisionMode::VALUES)?;

        if conf.file_name_len < MIN_FILE_NAME_LEN {
            return Err(ConfigError::FileNameLen(conf.file_name_len));
        }
        let file_name_len =
            usize::try_from(conf.file_name_len).map_err(|_| ConfigError::FileNameLen(conf.file_name_len))?;

        Ok(Self {
            mode,
            output_mode,
            contact_mode,
            deleted_mode,
            file_name_len,
            extensions: parse_extensions(&conf.acceptable_extensions)?,
            collision,
            output_dir: conf.output_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
        })
    }

    /// Whether a record with this natural extension may be exported.
    pub fn accepts(&self, extension: &str) -> bool {
        match &self.extensions {
            None => true,
            Some(set) => set.contains(&normalize_extension(extension)),
        }
    }
}

fn parse_value<T: Copy>(
    field: &'static str,
    value: &str,
    table: &[(&'static str, T)],
) -> Result<T, ConfigError> {
    let wanted = value.trim().to_lowercase();
    table
        .iter()
        .find(|(name, _)| *name == wanted)
        .map(|(_, v)| *v)
        .ok_or_else(|| ConfigError::InvalidValue {
            field,
            value: value.to_string(),
            expected: table
                .iter()
                .map(|(name, _)| *name)
                .collect::<Vec<_>>()
                .join(", "),
        })
}

fn parse_extensions(raw: &[String]) -> Result<Option<BTreeSet<String>>, ConfigError> {
    let mut set = BTreeSet::new();
    for ext in raw {
        let normalized = normalize_extension(ext);
        if normalized == "*" {
            return Ok(None);
        }
        if normalized.is_empty() || normalized.contains(['/', '\\']) {
            return Err(ConfigError::InvalidExtension(ext.clone()));
        }
        set.insert(normalized);
    }
    Ok(if set.is_empty() { None } else { Some(set) })
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let settings = ExportSettings::validate(&ExportConf::default()).unwrap();
        assert_eq!(settings.mode, ExportMode::Separate);
        assert_eq!(settings.output_mode, OutputMode::Native);
        assert_eq!(settings.contact_mode, ContactMode::Normal);
        assert_eq!(settings.deleted_mode, DeletedMode::Include);
        assert_eq!(settings.collision, CollisionMode::Overwrite);
        assert_eq!(settings.file_name_len, 255);
        assert!(settings.extensions.is_none());
        assert!(settings.accepts("anything"));
    }

    #[test]
    fn test_values_are_case_insensitive() {
        let conf = ExportConf {
            mode: "MBOX".into(),
            contact_mode: " VCard ".into(),
            ..ExportConf::default()
        };
        let settings = ExportSettings::validate(&conf).unwrap();
        assert_eq!(settings.mode, ExportMode::Mbox);
        assert_eq!(settings.contact_mode, ContactMode::Vcard);
    }

    #[test]
    fn test_each_invalid_field_rejects() {
        let cases: Vec<(&str, ExportConf)> = vec![
            ("mode", ExportConf { mode: "5".into(), ..ExportConf::default() }),
            ("output_mode", ExportConf { output_mode: "5".into(), ..ExportConf::default() }),
            ("contact_mode", ExportConf { contact_mode: "5".into(), ..ExportConf::default() }),
            ("deleted_mode", ExportConf { deleted_mode: "5".into(), ..ExportConf::default() }),
            ("collision", ExportConf { collision: "5".into(), ..ExportConf::default() }),
        ];
        for (field, conf) in cases {
            match ExportSettings::validate(&conf) {
                Err(ConfigError::InvalidValue { field: f, .. }) => assert_eq!(f, field),
                other => panic!("expected {field} to be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_file_name_len_bounds() {
        for len in [-2, 0] {
            let conf = ExportConf {
                file_name_len: len,
                ..ExportConf::default()
            };
            assert_eq!(
                ExportSettings::validate(&conf),
                Err(ConfigError::FileNameLen(len))
            );
        }
        let conf = ExportConf {
            file_name_len: 1,
            ..ExportConf::default()
        };
        assert!(ExportSettings::validate(&conf).is_ok());
    }

    #[test]
    fn test_extensions() {
        let conf = ExportConf {
            acceptable_extensions: vec![".EML".into(), "vcf".into()],
            ..ExportConf::default()
        };
        let settings = ExportSettings::validate(&conf).unwrap();
        assert!(settings.accepts("eml"));
        assert!(settings.accepts("VCF"));
        assert!(!settings.accepts("pdf"));

        let wildcard = ExportConf {
            acceptable_extensions: vec!["eml".into(), "*".into()],
            ..ExportConf::default()
        };
        assert!(ExportSettings::validate(&wildcard).unwrap().accepts("pdf"));

        let bad = ExportConf {
            acceptable_extensions: vec!["a/b".into()],
            ..ExportConf::default()
        };
        assert!(matches!(
            ExportSettings::validate(&bad),
            Err(ConfigError::InvalidExtension(_))
        ));
    }
}
