//! Configuration loading for the huginn binary.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.huginn/config.toml` (user)
//! 3. `/etc/huginn/config.toml` (system)
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.huginn/secrets.toml` (user, must be 0600)
//! 2. `/etc/huginn/secrets.toml` (system, must be 0600)
//!
//! Every secret falls back to an environment variable.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bot::BotConfig;
use crate::cache::PersistConfig;
use crate::irc::IrcConfig;
use crate::{HuginnError, IdentityConfig, ReconnectConfig, Result};

/// Bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub irc: IrcSection,
    #[serde(default)]
    pub lastfm: LastFmSection,
    #[serde(default)]
    pub commands: CommandsSection,
    #[serde(default)]
    pub identity: IdentitySection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub nicks: NicksSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

/// Server connection.
#[derive(Debug, Clone, Deserialize)]
pub struct IrcSection {
    /// `host` or `host:port` (port defaults to 6667).
    pub server: String,
    #[serde(default = "default_nick")]
    pub nick: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub realname: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_nick() -> String {
    "Lastfm_bot".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

/// Last.fm web service.
#[derive(Debug, Clone, Deserialize)]
pub struct LastFmSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LastFmSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String {
    crate::lastfm::DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandsSection {
    /// Command prefix (default: ".").
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for CommandsSection {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

fn default_prefix() -> String {
    ".".to_string()
}

/// NickServ identity checks.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentitySection {
    /// Disable on networks without NickServ, such as EFNet (default: true).
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default = "default_identity_timeout")]
    pub timeout_secs: u64,
}

impl Default for IdentitySection {
    fn default() -> Self {
        Self {
            required: true,
            timeout_secs: default_identity_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_identity_timeout() -> u64 {
    10
}

/// Response cache persistence.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// Snapshot file. Without one the cache lives in memory only.
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_save_interval")]
    pub save_interval_secs: u64,
    #[serde(default = "default_save_debounce")]
    pub save_debounce_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            file: None,
            save_interval_secs: default_save_interval(),
            save_debounce_secs: default_save_debounce(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_save_interval() -> u64 {
    120
}

fn default_save_debounce() -> u64 {
    10
}

fn default_sweep_interval() -> u64 {
    600
}

/// Concurrency limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsSection {
    /// Concurrent enrichment calls to Last.fm (default: 6).
    #[serde(default = "default_concurrency")]
    pub enrichment_concurrency: usize,
    /// Concurrent reports during `wp` (default: 6).
    #[serde(default = "default_concurrency")]
    pub wp_concurrency: usize,
    #[serde(default = "default_who_timeout")]
    pub who_timeout_secs: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            enrichment_concurrency: default_concurrency(),
            wp_concurrency: default_concurrency(),
            who_timeout_secs: default_who_timeout(),
        }
    }
}

fn default_concurrency() -> usize {
    crate::fanout::DEFAULT_CAPACITY
}

fn default_who_timeout() -> u64 {
    30
}

/// Nick map persistence.
#[derive(Debug, Clone, Deserialize)]
pub struct NicksSection {
    /// Whether to persist associations (default: true).
    #[serde(default = "default_true")]
    pub save: bool,
    /// JSON file; defaults to `<server host>.nicks.json`.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for NicksSection {
    fn default() -> Self {
        Self {
            save: true,
            file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectSection {
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
    #[serde(default = "default_backoff_unit")]
    pub backoff_unit_secs: u64,
    #[serde(default = "default_max_exponent")]
    pub max_exponent: u32,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            base_delay_secs: default_base_delay(),
            backoff_unit_secs: default_backoff_unit(),
            max_exponent: default_max_exponent(),
        }
    }
}

fn default_base_delay() -> u64 {
    10
}

fn default_backoff_unit() -> u64 {
    1
}

fn default_max_exponent() -> u32 {
    6
}

/// Secrets (passwords and API keys).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub lastfm: Option<LastFmSecrets>,
    #[serde(default)]
    pub irc: Option<IrcSecrets>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LastFmSecrets {
    pub api_key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IrcSecrets {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub nickserv_password: Option<String>,
}

const LASTFM_API_KEY_ENV: &str = "LASTFM_API_KEY";
const IRC_PASSWORD_ENV: &str = "IRC_PASSWORD";
const NICKSERV_PASSWORD_ENV: &str = "NICKSERV_PASSWORD";

impl Config {
    /// Load configuration from the standard locations.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        let content = fs::read_to_string(&path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::parse(&content)
            .map_err(|e| HuginnError::Configuration(format!("Invalid config file {path:?}: {e}")))
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| HuginnError::Configuration(e.to_string()))?;
        if config.irc.server.trim().is_empty() {
            return Err(HuginnError::Configuration("irc.server is empty".into()));
        }
        if config.irc.nick.trim().is_empty() {
            return Err(HuginnError::Configuration("irc.nick is empty".into()));
        }
        Ok(config)
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(HuginnError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".huginn").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/huginn/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(HuginnError::Configuration(
            "No config file found. Create ~/.huginn/config.toml or /etc/huginn/config.toml"
                .to_string(),
        ))
    }

    /// `host:port`, defaulting the port to 6667.
    pub fn server_address(&self) -> String {
        let server = self.irc.server.trim();
        if server.contains(':') {
            server.to_string()
        } else {
            format!("{server}:6667")
        }
    }

    fn server_host(&self) -> &str {
        let server = self.irc.server.trim();
        server.split(':').next().unwrap_or(server)
    }

    pub fn irc_config(&self, secrets: &Secrets) -> IrcConfig {
        let irc = &self.irc;
        IrcConfig::new(self.server_address(), irc.nick.clone())
            .username(irc.username.clone().unwrap_or_else(|| irc.nick.clone()))
            .realname(irc.realname.clone().unwrap_or_else(|| irc.nick.clone()))
            .password(secrets.irc_password())
            .connect_timeout(Duration::from_secs(irc.connect_timeout_secs))
    }

    pub fn bot_config(&self, secrets: &Secrets) -> BotConfig {
        BotConfig::new(self.irc.nick.clone())
            .prefix(self.commands.prefix.clone())
            .channels(self.irc.channels.clone())
            .nickserv_password(secrets.nickserv_password())
            .wp_concurrency(self.limits.wp_concurrency)
            .who_timeout(Duration::from_secs(self.limits.who_timeout_secs))
    }

    pub fn identity_config(&self) -> IdentityConfig {
        IdentityConfig::new()
            .required(self.identity.required)
            .timeout(Duration::from_secs(self.identity.timeout_secs))
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig::new()
            .base_delay(Duration::from_secs(self.reconnect.base_delay_secs))
            .backoff_unit(Duration::from_secs(self.reconnect.backoff_unit_secs))
            .max_exponent(self.reconnect.max_exponent)
    }

    /// `None` when the cache is memory-only.
    pub fn persist_config(&self) -> Option<PersistConfig> {
        let cache = &self.cache;
        cache.file.as_ref().map(|file| {
            PersistConfig::new(file)
                .interval(Duration::from_secs(cache.save_interval_secs))
                .debounce(Duration::from_secs(cache.save_debounce_secs))
        })
    }

    /// Nick map file, or `None` when associations are not persisted.
    pub fn nick_file(&self) -> Option<PathBuf> {
        if !self.nicks.save {
            return None;
        }
        Some(
            self.nicks
                .file
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("{}.nicks.json", self.server_host()))),
        )
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Returns empty secrets if no file exists (env vars may provide them).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".huginn").join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/huginn/secrets.toml");
        if system_secrets.exists() {
            return Self::load_from(&system_secrets);
        }

        Ok(Secrets::default())
    }

    /// Load secrets from `path`, which must not be readable by others.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            HuginnError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(HuginnError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// Last.fm API key, falling back to `LASTFM_API_KEY`.
    pub fn api_key(&self) -> Option<String> {
        self.lastfm
            .as_ref()
            .map(|s| s.api_key.clone())
            .or_else(|| std::env::var(LASTFM_API_KEY_ENV).ok())
            .filter(|k| !k.is_empty())
    }

    /// Server password, falling back to `IRC_PASSWORD`.
    pub fn irc_password(&self) -> Option<String> {
        self.irc
            .as_ref()
            .and_then(|s| s.password.clone())
            .or_else(|| std::env::var(IRC_PASSWORD_ENV).ok())
            .filter(|p| !p.is_empty())
    }

    /// NickServ password, falling back to `NICKSERV_PASSWORD`.
    pub fn nickserv_password(&self) -> Option<String> {
        self.irc
            .as_ref()
            .and_then(|s| s.nickserv_password.clone())
            .or_else(|| std::env::var(NICKSERV_PASSWORD_ENV).ok())
            .filter(|p| !p.is_empty())
    }
}
