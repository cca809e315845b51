use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::types::{AccuracyTier, PresenceText, SessionConfig};

/// Env var that overrides the default config file location.
pub const CONFIG_PATH_ENV: &str = "GEOTRACK_CONFIG";

/// Top-level configuration loaded from `~/.geotrack/config.toml`.
///
/// **Security**: this struct never stores the bearer token. The endpoint
/// section only names the env var to read it from; see [`CredentialProvider`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub session: SessionIdsConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
}

impl Config {
    /// Load config from `$GEOTRACK_CONFIG` or `~/.geotrack/config.toml`,
    /// falling back to defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    ///
    /// Session ids and the endpoint URL may be left empty here; they are only
    /// required once a session is assembled via [`Config::session_config`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.general.validate()?;
        self.tracking.validate()?;
        self.endpoint.validate()?;
        self.replay.validate()?;
        Ok(())
    }

    /// Assemble the [`SessionConfig`] for a tracking session, resolving the
    /// bearer token from the environment.
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        self.validate()?;
        let token = CredentialProvider::auth_token(&self.endpoint.auth_token_env).ok_or_else(|| {
            ConfigError::Validation(format!(
                "auth token env var '{}' is not set",
                self.endpoint.auth_token_env
            ))
        })?;

        let interval = Duration::from_secs(self.tracking.interval_secs);
        let mut cfg = SessionConfig::new(
            self.session.driver_id.clone(),
            self.session.order_id.clone(),
            token,
            self.endpoint.url.clone(),
        )
        .with_interval(interval)
        .with_accuracy(self.tracking.accuracy)
        .with_presence(PresenceText {
            title: self.presence.title.clone(),
            description: self.presence.description.clone(),
        });
        if let Some(secs) = self.tracking.tick_timeout_secs {
            cfg = cfg.with_tick_timeout(Duration::from_secs(secs));
        }

        cfg.validate().map_err(ConfigError::Validation)?;
        Ok(cfg)
    }

    pub fn default_path() -> PathBuf {
        if let Some(p) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".geotrack")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Resolves secrets from environment variables at runtime.
pub struct CredentialProvider;

impl CredentialProvider {
    /// Read the bearer token from `env_name`. Empty values count as unset.
    pub fn auth_token(env_name: &str) -> Option<String> {
        std::env::var(env_name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `human` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl GeneralConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.log_format.as_str() {
            "human" | "json" => Ok(()),
            other => Err(ConfigError::Validation(format!(
                "general.log_format must be 'human' or 'json', got '{other}'"
            ))),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "human".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Upper bound on one tick. Defaults to the interval.
    #[serde(default)]
    pub tick_timeout_secs: Option<u64>,
    #[serde(default)]
    pub accuracy: AccuracyTier,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            tick_timeout_secs: None,
            accuracy: AccuracyTier::default(),
        }
    }
}

impl TrackingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "tracking.interval_secs must be greater than zero".into(),
            ));
        }
        if self.tick_timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "tracking.tick_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_interval_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub url: String,
    /// Env var holding the bearer token (default: `GEOTRACK_AUTH_TOKEN`).
    #[serde(default = "default_auth_token_env")]
    pub auth_token_env: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_token_env: default_auth_token_env(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl EndpointConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "endpoint.request_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_auth_token_env() -> String {
    "GEOTRACK_AUTH_TOKEN".into()
}
fn default_request_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionIdsConfig {
    #[serde(default)]
    pub driver_id: String,
    #[serde(default)]
    pub order_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    #[serde(default = "default_presence_title")]
    pub title: String,
    #[serde(default = "default_presence_description")]
    pub description: String,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            title: default_presence_title(),
            description: default_presence_description(),
        }
    }
}

fn default_presence_title() -> String {
    PresenceText::default().title
}
fn default_presence_description() -> String {
    PresenceText::default().description
}

/// Coordinates replayed by the headless daemon's position source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayConfig {
    #[serde(default)]
    pub waypoints: Vec<[f64; 2]>,
}

impl ReplayConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (i, [lat, lon]) in self.waypoints.iter().enumerate() {
            if !(-90.0..=90.0).contains(lat) || !(-180.0..=180.0).contains(lon) {
                return Err(ConfigError::Validation(format!(
                    "replay.waypoints[{i}] is out of range: [{lat}, {lon}]"
                )));
            }
        }
        Ok(())
    }
}
