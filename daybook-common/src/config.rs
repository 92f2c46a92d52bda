//! Configuration loading and root folder resolution
//!
//! Missing or unreadable TOML files never abort startup: a warning is logged and
//! compiled defaults are used instead.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "DAYBOOK_ROOT";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "daybook.db";

/// Config file name inside the root folder
pub const CONFIG_FILE: &str = "daybook.toml";

/// Logging section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset (e.g. "info", "daybook_engine=debug")
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `[llm]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// "dry_run" (default) or "real"
    pub mode: Option<String>,
    /// Minimum spacing between outbound calls
    pub min_delay_ms: Option<u64>,
}

/// `[budget]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSection {
    pub max_usd_per_run: Option<f64>,
    pub max_usd_per_day: Option<f64>,
}

/// `[engine]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub lock_stale_after_secs: Option<u64>,
    pub classify_page_size: Option<u32>,
    pub checkpoint_every_atoms: Option<u64>,
    pub checkpoint_interval_ms: Option<u64>,
    pub summarize_max_output_tokens: Option<u32>,
}

/// One `[pricing."provider/model"]` override, USD per million tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingOverride {
    pub input: f64,
    pub output: f64,
    #[serde(default)]
    pub cached_input: Option<f64>,
}

/// Parsed `daybook.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub llm: LlmSection,
    pub budget: BudgetSection,
    pub engine: EngineSection,
    /// Provider id → API key
    pub api_keys: BTreeMap<String, String>,
    /// "provider/model" → rates
    pub pricing: BTreeMap<String, PricingOverride>,
}

impl TomlConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }
}

/// Load a TOML config file, falling back to defaults when it is absent or invalid
pub fn load_toml_config(path: &Path) -> TomlConfig {
    if !path.exists() {
        debug!("No config file at {}, using defaults", path.display());
        return TomlConfig::default();
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Failed to read config {}: {} (using defaults)", path.display(), e);
            return TomlConfig::default();
        }
    };

    match TomlConfig::from_toml_str(&content) {
        Ok(config) => config,
        Err(e) => {
            warn!("{} in {} (using defaults)", e, path.display());
            TomlConfig::default()
        }
    }
}

/// Per-user config location (~/.config/daybook/config.toml on Linux)
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("daybook").join("config.toml"))
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("daybook"))
        .unwrap_or_else(|| PathBuf::from("./daybook_data"))
}

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. `DAYBOOK_ROOT` environment variable
/// 3. `root_folder` in the user TOML config
/// 4. OS-dependent default
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
    user_config: Option<TomlConfig>,
}

impl RootFolderResolver {
    pub fn new(cli_arg: Option<PathBuf>) -> Self {
        let user_config = user_config_path().map(|p| load_toml_config(&p));
        Self {
            cli_arg,
            user_config,
        }
    }

    /// Resolver with an explicit user config (tests)
    pub fn with_user_config(cli_arg: Option<PathBuf>, user_config: Option<TomlConfig>) -> Self {
        Self {
            cli_arg,
            user_config,
        }
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = self.user_config.as_ref().and_then(|c| c.root_folder.clone()) {
            return path;
        }

        default_root_folder()
    }
}

/// Root folder layout helpers
pub struct RootFolder {
    path: PathBuf,
}

impl RootFolder {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Create the root folder if it does not exist yet
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn database_path(&self) -> PathBuf {
        self.path.join(DATABASE_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.path.join(CONFIG_FILE)
    }

    /// Root-local config if present, otherwise the per-user config
    pub fn load_config(&self) -> TomlConfig {
        let local = self.config_path();
        if local.exists() {
            return load_toml_config(&local);
        }
        user_config_path()
            .map(|p| load_toml_config(&p))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_full_config() {
        let config = TomlConfig::from_toml_str(
            r#"
            root_folder = "/tmp/daybook"

            [logging]
            level = "debug"

            [llm]
            mode = "real"
            min_delay_ms = 250

            [budget]
            max_usd_per_run = 1.5

            [api_keys]
            openai = "sk-test"

            [pricing."openai/gpt-test"]
            input = 1.0
            output = 2.0
            "#,
        )
        .unwrap();

        assert_eq!(config.root_folder, Some(PathBuf::from("/tmp/daybook")));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.llm.mode.as_deref(), Some("real"));
        assert_eq!(config.llm.min_delay_ms, Some(250));
        assert_eq!(config.budget.max_usd_per_run, Some(1.5));
        assert_eq!(config.budget.max_usd_per_day, None);
        assert_eq!(config.api_keys.get("openai").map(String::as_str), Some("sk-test"));
        assert_eq!(config.pricing["openai/gpt-test"].output, 2.0);
        assert_eq!(config.pricing["openai/gpt-test"].cached_input, None);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = TomlConfig::from_toml_str("").unwrap();
        assert_eq!(config, TomlConfig::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let err = TomlConfig::from_toml_str("llm = 5").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = load_toml_config(&temp_dir.path().join("absent.toml"));
        assert_eq!(config, TomlConfig::default());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("daybook.toml");
        std::fs::write(&path, "[[[ not toml").unwrap();
        assert_eq!(load_toml_config(&path), TomlConfig::default());
    }

    #[test]
    #[serial]
    fn test_resolver_cli_arg_wins() {
        std::env::set_var(ROOT_FOLDER_ENV, "/from/env");
        let resolver = RootFolderResolver::with_user_config(Some(PathBuf::from("/from/cli")), None);
        assert_eq!(resolver.resolve(), PathBuf::from("/from/cli"));
        std::env::remove_var(ROOT_FOLDER_ENV);
    }

    #[test]
    #[serial]
    fn test_resolver_env_beats_toml() {
        std::env::set_var(ROOT_FOLDER_ENV, "/from/env");
        let toml = TomlConfig {
            root_folder: Some(PathBuf::from("/from/toml")),
            ..Default::default()
        };
        let resolver = RootFolderResolver::with_user_config(None, Some(toml));
        assert_eq!(resolver.resolve(), PathBuf::from("/from/env"));
        std::env::remove_var(ROOT_FOLDER_ENV);
    }

    #[test]
    #[serial]
    fn test_resolver_toml_then_default() {
        std::env::remove_var(ROOT_FOLDER_ENV);
        let toml = TomlConfig {
            root_folder: Some(PathBuf::from("/from/toml")),
            ..Default::default()
        };
        let resolver = RootFolderResolver::with_user_config(None, Some(toml));
        assert_eq!(resolver.resolve(), PathBuf::from("/from/toml"));

        let resolver = RootFolderResolver::with_user_config(None, None);
        assert_eq!(resolver.resolve(), default_root_folder());
    }

    #[test]
    fn test_root_folder_paths() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let root = RootFolder::new(temp_dir.path().join("nested"));
        root.ensure_directory_exists().unwrap();
        assert!(root.path().exists());
        assert!(root.database_path().ends_with(DATABASE_FILE));
        assert!(root.config_path().ends_with(CONFIG_FILE));
    }
}
