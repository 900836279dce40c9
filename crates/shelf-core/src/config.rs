//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/shelf/config.toml)
//! 3. Environment variables (SHELF_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::display::DisplayMode;
use crate::storage::{FileStore, MetadataStore, SqliteStore, StorageResult};

/// Environment variable prefix
const ENV_PREFIX: &str = "SHELF";

/// Id of the built-in vault rooted at the base directory
pub const BASE_VAULT_ID: &str = "library";

/// Extensions recognized as books when none are configured
pub const DEFAULT_EXTENSIONS: &[&str] = &["pdf", "epub", "mobi", "azw3", "djvu", "txt"];

/// One configured vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    pub id: String,
    /// Root directory; `@` prefix is relative to `base_dir`, `~/` to home
    #[serde(default)]
    pub path: String,
    /// Display name; defaults to the root directory's name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Which metadata store backend to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Sqlite,
    Files,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreKind::Sqlite => "sqlite",
            StoreKind::Files => "files",
        })
    }
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(StoreKind::Sqlite),
            "files" | "file" => Ok(StoreKind::Files),
            other => Err(format!("unknown store '{}' (expected sqlite or files)", other)),
        }
    }
}

/// Display tree settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeConfig {
    #[serde(default)]
    pub mode: DisplayMode,
    #[serde(default = "default_true")]
    pub ascending: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            mode: DisplayMode::default(),
            ascending: true,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage (record database or record files)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base directory; root of the built-in vault and of `@` vault paths
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Whether the base directory is itself scanned as vault `library`
    #[serde(default = "default_true")]
    pub include_base_vault: bool,

    /// File extensions treated as books
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Metadata store backend
    #[serde(default)]
    pub store: StoreKind,

    /// Vault shown by default
    #[serde(default)]
    pub current_vault: Option<String>,

    /// Log file path (optional, defaults to stderr)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    #[serde(default)]
    pub tree: TreeConfig,

    #[serde(default)]
    pub vaults: Vec<VaultConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            base_dir: default_base_dir(),
            include_base_vault: true,
            extensions: default_extensions(),
            store: StoreKind::default(),
            current_vault: None,
            log_file: None,
            tree: TreeConfig::default(),
            vaults: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (SHELF_DATA_DIR, SHELF_BASE_DIR, ...)
    /// 2. Config file (~/.config/shelf/config.toml or SHELF_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load from the `--config` path when given, else the default location
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_BASE_DIR", ENV_PREFIX)) {
            self.base_dir = PathBuf::from(val);
        }

        // Empty string clears it
        if let Ok(val) = std::env::var(format!("{}_CURRENT_VAULT", ENV_PREFIX)) {
            self.current_vault = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_LOG_FILE", ENV_PREFIX)) {
            self.log_file = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with SHELF_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shelf")
            .join("config.toml")
    }

    /// Get the path to the SQLite record database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("shelf.db")
    }

    /// Open the configured metadata store
    pub fn open_store(&self) -> StorageResult<Box<dyn MetadataStore>> {
        Ok(match self.store {
            StoreKind::Sqlite => Box::new(SqliteStore::open(&self.sqlite_path())?),
            StoreKind::Files => Box::new(FileStore::new(&self.data_dir)),
        })
    }

    /// Resolve a configured vault path to an absolute directory
    pub fn resolve_root(&self, raw: &str) -> PathBuf {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix('@') {
            return self.base_dir.join(rest.trim_start_matches(['/', '\\']));
        }
        if let Some(rest) = raw.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(raw)
    }

    /// All vaults in scan order: the built-in base vault first (when
    /// enabled), then the configured ones
    pub fn vaults(&self) -> Vec<VaultConfig> {
        let mut out = Vec::with_capacity(self.vaults.len() + 1);
        if self.include_base_vault {
            out.push(VaultConfig {
                id: BASE_VAULT_ID.to_string(),
                path: "@".to_string(),
                name: None,
            });
        }
        out.extend(self.vaults.iter().cloned());
        out
    }

    /// Vault shown by default: `current_vault`, else the first one
    pub fn current_vault_id(&self) -> Option<String> {
        self.current_vault
            .clone()
            .or_else(|| self.vaults().first().map(|v| v.id.clone()))
    }

    /// Add a vault; ids must be unique
    pub fn add_vault(&mut self, id: &str, path: &str, name: Option<String>) -> Result<()> {
        if self.vaults().iter().any(|v| v.id == id) {
            bail!("Vault '{}' already exists", id);
        }
        self.vaults.push(VaultConfig {
            id: id.to_string(),
            path: path.to_string(),
            name,
        });
        Ok(())
    }

    /// Remove a configured vault, returning whether it existed
    pub fn remove_vault(&mut self, id: &str) -> bool {
        let before = self.vaults.len();
        self.vaults.retain(|v| v.id != id);
        if self.current_vault.as_deref() == Some(id) {
            self.current_vault = None;
        }
        self.vaults.len() != before
    }

    /// Set a scalar value by key (as used by `config set`)
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let cleared = value.is_empty() || value == "none";
        match key {
            "data_dir" => self.data_dir = value.into(),
            "base_dir" => self.base_dir = value.into(),
            "include_base_vault" => {
                self.include_base_vault = value
                    .parse()
                    .context("Invalid value for include_base_vault. Use 'true' or 'false'.")?;
            }
            "extensions" => {
                self.extensions = value
                    .split(',')
                    .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                    .filter(|e| !e.is_empty())
                    .collect();
            }
            "store" => self.store = value.parse().map_err(anyhow::Error::msg)?,
            "current_vault" => {
                self.current_vault = if cleared { None } else { Some(value.to_string()) };
            }
            "log_file" => {
                self.log_file = if cleared { None } else { Some(value.into()) };
            }
            "tree.mode" => self.tree.mode = value.parse().map_err(anyhow::Error::msg)?,
            "tree.ascending" => {
                self.tree.ascending = value
                    .parse()
                    .context("Invalid value for tree.ascending. Use 'true' or 'false'.")?;
            }
            _ => {
                bail!(
                    "Unknown configuration key: '{}'\n\
                     Valid keys: data_dir, base_dir, include_base_vault, extensions, store, \
                     current_vault, log_file, tree.mode, tree.ascending",
                    key
                );
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shelf")
}

/// Get the default base directory
fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Books")
}
