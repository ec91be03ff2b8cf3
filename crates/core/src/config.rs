//! Configuration management
//!
//! Configuration lives in a TOML file at `$NB_CONFIG_DIR/config.toml`, or
//! `<config dir>/nimbus/config.toml` when the variable is unset. A missing
//! file yields the defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "NB_CONFIG_DIR";

const CONFIG_FILE: &str = "config.toml";
const CONFIG_VERSION: &str = "1";

/// Named connection profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,

    /// Region; the SDK default chain is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Endpoint override (e.g. a local emulator)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Static access key; the SDK default chain is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,

    /// Use path-style addressing for object storage
    #[serde(default)]
    pub force_path_style: bool,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
            force_path_style: false,
        }
    }

    /// Check the profile is internally consistent
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("Profile name cannot be empty".to_string()));
        }
        if let Some(endpoint) = &self.endpoint {
            let url = url::Url::parse(endpoint)
                .map_err(|e| Error::Config(format!("Invalid endpoint '{endpoint}': {e}")))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(Error::Config(format!(
                    "Endpoint '{endpoint}' must use http or https"
                )));
            }
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(Error::Config(
                "Access key and secret key must be set together".to_string(),
            ));
        }
        Ok(())
    }
}

/// Retry policy with exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
        }
    }
}

/// Limits and retry policy for batch mutations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum write operations per table batch request
    pub table_chunk_size: usize,
    /// Maximum object versions per delete request
    pub delete_chunk_size: usize,
    /// Re-submissions of unprocessed items per chunk
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl BatchConfig {
    /// Provider maximum for a table batch write request
    pub const TABLE_CHUNK_LIMIT: usize = 25;
    /// Provider maximum for a multi-object delete request
    pub const DELETE_CHUNK_LIMIT: usize = 1000;

    pub fn validate(&self) -> Result<()> {
        if self.table_chunk_size == 0 || self.table_chunk_size > Self::TABLE_CHUNK_LIMIT {
            return Err(Error::Config(format!(
                "table_chunk_size must be between 1 and {}",
                Self::TABLE_CHUNK_LIMIT
            )));
        }
        if self.delete_chunk_size == 0 || self.delete_chunk_size > Self::DELETE_CHUNK_LIMIT {
            return Err(Error::Config(format!(
                "delete_chunk_size must be between 1 and {}",
                Self::DELETE_CHUNK_LIMIT
            )));
        }
        Ok(())
    }

    /// Backoff policy for re-submissions
    pub fn backoff(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retries + 1,
            initial_backoff_ms: self.initial_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            table_chunk_size: Self::TABLE_CHUNK_LIMIT,
            delete_chunk_size: Self::DELETE_CHUNK_LIMIT,
            max_retries: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2000,
        }
    }
}

/// Root configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,

    /// Profile used when none is named on the command line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,

    #[serde(default)]
    pub profiles: Vec<Profile>,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            default_profile: None,
            profiles: Vec::new(),
            batch: BatchConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.version != CONFIG_VERSION {
            return Err(Error::Config(format!(
                "Unsupported config version '{}'",
                self.version
            )));
        }
        self.batch.validate()?;
        for profile in &self.profiles {
            profile.validate()?;
        }
        Ok(())
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Profile named `name`, else the default profile, else an empty profile
    /// that defers everything to the SDK default chain
    pub fn resolve_profile(&self, name: Option<&str>) -> Result<Profile> {
        match name.or(self.default_profile.as_deref()) {
            Some(name) => self
                .profile(name)
                .cloned()
                .ok_or_else(|| Error::Config(format!("Profile '{name}' not found"))),
            None => Ok(Profile::new("default")),
        }
    }
}

/// Loads and saves the configuration file
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    /// Manager for the default configuration location
    pub fn new() -> Result<Self> {
        let dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .ok_or_else(|| Error::Config("Cannot determine config directory".to_string()))?
                .join("nimbus"),
        };
        Ok(Self::with_dir(dir))
    }

    /// Manager for a configuration file inside `dir`
    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(CONFIG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Config> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "Config file not found, using defaults");
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(&self.path)?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config: &Config) -> Result<()> {
        config.validate()?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(config)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

/// Profile CRUD on top of the configuration file
#[derive(Debug, Clone)]
pub struct ProfileManager {
    config: ConfigManager,
}

impl ProfileManager {
    pub fn new() -> Result<Self> {
        Ok(Self {
            config: ConfigManager::new()?,
        })
    }

    pub fn with_config(config: ConfigManager) -> Self {
        Self { config }
    }

    /// Add or replace a profile; the first profile becomes the default
    pub fn set(&self, profile: Profile) -> Result<()> {
        profile.validate()?;
        let mut config = self.config.load()?;
        if config.default_profile.is_none() {
            config.default_profile = Some(profile.name.clone());
        }
        match config.profiles.iter_mut().find(|p| p.name == profile.name) {
            Some(existing) => *existing = profile,
            None => config.profiles.push(profile),
        }
        self.config.save(&config)
    }

    pub fn list(&self) -> Result<Vec<Profile>> {
        Ok(self.config.load()?.profiles)
    }

    pub fn get(&self, name: &str) -> Result<Profile> {
        self.config
            .load()?
            .profile(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Profile '{name}'")))
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let mut config = self.config.load()?;
        let before = config.profiles.len();
        config.profiles.retain(|p| p.name != name);
        if config.profiles.len() == before {
            return Err(Error::NotFound(format!("Profile '{name}'")));
        }
        if config.default_profile.as_deref() == Some(name) {
            config.default_profile = config.profiles.first().map(|p| p.name.clone());
        }
        self.config.save(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> (TempDir, ProfileManager) {
        let dir = TempDir::new().unwrap();
        let manager = ProfileManager::with_config(ConfigManager::with_dir(dir.path()));
        (dir, manager)
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ConfigManager::with_dir(dir.path()).load().unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.batch.table_chunk_size, 25);
        assert_eq!(config.batch.delete_chunk_size, 1000);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_dir(dir.path());

        let mut config = Config::default();
        let mut profile = Profile::new("local");
        profile.region = Some("ap-southeast-1".to_string());
        profile.endpoint = Some("http://localhost:4566".to_string());
        config.profiles.push(profile);
        config.batch.max_retries = 5;

        manager.save(&config).unwrap();
        assert_eq!(manager.load().unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "default_profile = \"dev\"\n\n[[profiles]]\nname = \"dev\"\nregion = \"us-east-2\"\n",
        )
        .unwrap();

        let config = ConfigManager::with_dir(dir.path()).load().unwrap();
        assert_eq!(config.retry, RetryConfig::default());
        let profile = config.resolve_profile(None).unwrap();
        assert_eq!(profile.region.as_deref(), Some("us-east-2"));
    }

    #[test]
    fn test_invalid_batch_limits_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[batch]\ntable_chunk_size = 100\ndelete_chunk_size = 1000\nmax_retries = 3\ninitial_backoff_ms = 1\nmax_backoff_ms = 2\n",
        )
        .unwrap();

        let result = ConfigManager::with_dir(dir.path()).load();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_profile_validation() {
        let mut profile = Profile::new("bad");
        profile.endpoint = Some("not a url".to_string());
        assert!(profile.validate().is_err());

        let mut profile = Profile::new("half");
        profile.access_key = Some("AKIA".to_string());
        assert!(profile.validate().is_err());

        assert!(Profile::new("").validate().is_err());
        assert!(Profile::new("ok").validate().is_ok());
    }

    #[test]
    fn test_profile_manager_crud() {
        let (_dir, manager) = manager();
        assert!(manager.list().unwrap().is_empty());

        manager.set(Profile::new("first")).unwrap();
        manager.set(Profile::new("second")).unwrap();
        assert_eq!(manager.list().unwrap().len(), 2);
        assert_eq!(manager.get("second").unwrap().name, "second");

        manager.remove("first").unwrap();
        assert!(matches!(manager.get("first"), Err(Error::NotFound(_))));
        assert!(matches!(manager.remove("first"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_default_profile_follows_removal() {
        let dir = TempDir::new().unwrap();
        let config = ConfigManager::with_dir(dir.path());
        let manager = ProfileManager::with_config(config.clone());

        manager.set(Profile::new("a")).unwrap();
        manager.set(Profile::new("b")).unwrap();
        assert_eq!(config.load().unwrap().default_profile.as_deref(), Some("a"));

        manager.remove("a").unwrap();
        assert_eq!(config.load().unwrap().default_profile.as_deref(), Some("b"));
    }

    #[test]
    fn test_resolve_unknown_profile() {
        let config = Config::default();
        assert!(config.resolve_profile(Some("missing")).is_err());
        assert_eq!(config.resolve_profile(None).unwrap().name, "default");
    }
}
