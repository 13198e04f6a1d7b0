//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILVAULT_CONFIG` (environment variable)
//! 2. `~/.config/mailvault/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailvault\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::decoder::scan::MAX_MESSAGE_SIZE;
use crate::decoder::store::DEFAULT_CACHE_SIZE;
use crate::export::ExportConf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// How archives are opened and read.
    pub archive: ArchiveConfig,
    /// Export defaults, overridable from the command line.
    pub export: ExportConf,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override cache directory for sidecar indexes and logs.
    pub cache_dir: Option<PathBuf>,
}

/// Archive decoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Reuse and write the sidecar index next to the mbox.
    pub persist_index: bool,
    /// Number of raw messages kept in the read cache.
    pub cache_size: usize,
    /// Maximum message size in bytes (default: 268435456 = 256 MB).
    pub max_message_size: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            cache_dir: None,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            persist_index: true,
            cache_size: DEFAULT_CACHE_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    match config_file_path() {
        Some(path) if path.exists() => load_config_from(&path),
        _ => Config::default(),
    }
}

/// Load configuration from `path`, falling back to defaults on error.
pub fn load_config_from(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<Config>(&contents) {
            Ok(cfg) => {
                tracing::info!(path = %path.display(), "Loaded config");
                cfg
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to parse config, using defaults"
                );
                Config::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to read config file, using defaults"
            );
            Config::default()
        }
    }
}

/// Save configuration to the standard location.
pub fn save_config(config: &Config) -> anyhow::Result<PathBuf> {
    let path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;
    save_config_to(config, &path)?;
    Ok(path)
}

/// Save configuration as TOML at `path`, creating parent directories.
pub fn save_config_to(config: &Config, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(())
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILVAULT_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mailvault").join("config.toml"))
}

/// Return the cache directory for sidecar indexes, logs, etc.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    default_cache_dir()
}

/// Cache directory when no configuration is at hand.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailvault")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("mailvault.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.general.log_level, "warn");
        assert!(cfg.archive.persist_index);
        assert_eq!(cfg.archive.cache_size, DEFAULT_CACHE_SIZE);
        assert_eq!(cfg.export, ExportConf::default());
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let mut cfg = Config::default();
        cfg.export.mode = "mbox".into();
        cfg.export.acceptable_extensions = vec!["eml".into()];
        cfg.export.output_dir = Some(PathBuf::from("/tmp/out"));

        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.export, cfg.export);
        assert_eq!(parsed.archive.max_message_size, cfg.archive.max_message_size);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[archive]
persist_index = false

[export]
contact_mode = "vcard"
file_name_len = 64
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert!(!cfg.archive.persist_index);
        assert_eq!(cfg.export.contact_mode, "vcard");
        assert_eq!(cfg.export.file_name_len, 64);
        // Other fields use defaults
        assert_eq!(cfg.export.mode, "separate");
        assert_eq!(cfg.general.log_level, "warn");
        assert_eq!(cfg.archive.cache_size, DEFAULT_CACHE_SIZE);
    }

    #[test]
    fn test_log_file_in_cache_dir() {
        let mut cfg = Config::default();
        cfg.general.cache_dir = Some(PathBuf::from("/var/cache/mv"));
        assert_eq!(cache_dir(&cfg), PathBuf::from("/var/cache/mv"));
        assert_eq!(
            log_file_path(&cfg),
            PathBuf::from("/var/cache/mv/mailvault.log")
        );
    }

    #[test]
    fn test_save_and_load_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.general.cache_dir = Some(tmp.path().join("cache"));
        cfg.export.collision = "rename".into();
        save_config_to(&cfg, &path).unwrap();

        let loaded = load_config_from(&path);
        assert_eq!(loaded.general.cache_dir, cfg.general.cache_dir);
        assert_eq!(loaded.export, cfg.export);
    }

    #[test]
    fn test_broken_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[general\nlog_level = ").unwrap();
        assert_eq!(load_config_from(&path).general.log_level, "warn");
    }
}
