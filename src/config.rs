use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use phonenumber::country;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::phone::PhoneMatcher;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Region (ISO 3166 country code) used for phone numbers without country code, e.g. `US`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_region: Option<String>,
    #[serde(default)]
    pub sqlite: SqliteConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    #[serde(default = "SqliteConfig::default_db_url")]
    pub url: Url,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            url: Self::default_db_url(),
        }
    }
}

impl SqliteConfig {
    fn default_db_url() -> Url {
        let path = data_dir().join("payreq.sqlite");
        format!("sqlite://{}", path.display())
            .parse()
            .expect("invalid default sqlite path")
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Seconds to wait for a sent SMS; 0 waits until stopped
    #[serde(default = "WatchConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

impl WatchConfig {
    fn default_timeout_secs() -> u64 {
        300
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Config {
    /// Tries to load configuration from one of the default locations:
    ///
    /// 1. $XDG_CONFIG_HOME/payreq/payreq.toml
    /// 2. $XDG_CONFIG_HOME/payreq.toml
    /// 3. $HOME/.payreq.toml
    ///
    /// If no config is found returns `None`.
    pub fn load_installed() -> anyhow::Result<Option<Self>> {
        installed_config().map(Self::load).transpose()
    }

    /// Saves a new config file in case it does not exist.
    pub fn save_new(&self) -> anyhow::Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("could not find default config directory"))?;
        let config_file = config_dir.join("payreq/payreq.toml");
        self.save_new_at(&config_file)?;
        Ok(config_file)
    }

    pub fn save_new_at(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        // check that config won't be overridden
        if path.as_ref().exists() {
            bail!(
                "will not override config file at: {}",
                path.as_ref().display()
            );
        }
        self.save(path)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config at: {}", path.display()))?;
        let config: Self = toml::de::from_str(&content)?;
        // fail early on typos in the region
        config.region()?;
        Ok(config)
    }

    fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = toml::ser::to_string(self)?;
        let parent_dir = path
            .parent()
            .ok_or_else(|| anyhow!("invalid config path {}: no parent dir", path.display()))?;
        fs::create_dir_all(parent_dir)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn region(&self) -> anyhow::Result<Option<country::Id>> {
        self.default_region
            .as_deref()
            .map(|region| {
                region
                    .to_ascii_uppercase()
                    .parse::<country::Id>()
                    .map_err(|_| anyhow!("invalid default region: {region}"))
            })
            .transpose()
    }

    pub fn phone_matcher(&self) -> anyhow::Result<PhoneMatcher> {
        Ok(PhoneMatcher::new(self.region()?))
    }
}

/// Get the location of the first found default config file paths
/// according to the following order:
///
/// 1. $XDG_CONFIG_HOME/payreq/payreq.toml
/// 2. $XDG_CONFIG_HOME/payreq.toml
/// 3. $HOME/.payreq.toml
fn installed_config() -> Option<PathBuf> {
    let config_dir = dirs::config_dir()?;
    let config_file = config_dir.join("payreq/payreq.toml");
    if config_file.exists() {
        return Some(config_file);
    }

    let config_file = config_dir.join("payreq.toml");
    if config_file.exists() {
        return Some(config_file);
    }

    let home_dir = dirs::home_dir()?;
    let config_file = home_dir.join(".payreq.toml");
    if config_file.exists() {
        return Some(config_file);
    }

    None
}

pub(crate) fn data_dir() -> PathBuf {
    let data_dir =
        dirs::data_dir().expect("data directory not found, $XDG_DATA_HOME and $HOME are unset?");
    data_dir.join("payreq")
}
