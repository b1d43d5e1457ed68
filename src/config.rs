use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::auth::refresh::REFRESH_PATH;
use crate::error::{ClientError, ClientResult};

// Default configuration values
const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/";
const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_REFRESH_INTERVAL_SECONDS: u64 = 15 * 60;
const DEFAULT_STORE_FILE: &str = "session.json";
const APP_DIR: &str = "quill";

/// Main configuration struct for Quill
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Blog API settings
    #[serde(default)]
    pub api: ApiConfig,
    /// Session settings
    #[serde(default)]
    pub auth: AuthConfig,
    /// Session persistence
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Blog API configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL every endpoint path is resolved against
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// Base URL for uploaded media; defaults to the API's origin
    #[serde(default = "default_media_base_url")]
    pub media_base_url: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Background token refresh interval in seconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,
    /// End the session when the refresh endpoint cannot be reached
    #[serde(default = "default_clear_on_transient_failure")]
    pub clear_on_transient_failure: bool,
}

/// Session storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON file holding the tokens and cached identity
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

// Default functions
fn default_api_base_url() -> String {
    std::env::var("QUILL_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string())
}

fn default_media_base_url() -> Option<String> {
    std::env::var("QUILL_MEDIA_BASE_URL").ok()
}

fn default_http_timeout() -> u64 {
    std::env::var("QUILL_HTTP_TIMEOUT_SECONDS")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECONDS)
}

fn default_refresh_interval() -> u64 {
    std::env::var("QUILL_REFRESH_INTERVAL_SECONDS")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_REFRESH_INTERVAL_SECONDS)
}

fn default_clear_on_transient_failure() -> bool {
    std::env::var("QUILL_CLEAR_ON_TRANSIENT_FAILURE")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(true)
}

fn default_store_path() -> PathBuf {
    if let Ok(path) = std::env::var("QUILL_STORE_PATH") {
        return PathBuf::from(path);
    }

    match dirs::data_dir() {
        Some(data_dir) => data_dir.join(APP_DIR).join(DEFAULT_STORE_FILE),
        None => PathBuf::from(DEFAULT_STORE_FILE),
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            media_base_url: default_media_base_url(),
            timeout_seconds: default_http_timeout(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: default_refresh_interval(),
            clear_on_transient_failure: default_clear_on_transient_failure(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Config {
    /// Defaults pointed at a specific API
    pub fn for_api_base(base_url: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.api.base_url = base_url.into();
        config
    }

    /// Check every value that would otherwise fail later
    pub fn validate(&self) -> ClientResult<()> {
        self.api_base_url()?;
        self.media_base_url()?;
        if self.api.timeout_seconds == 0 {
            return Err(ClientError::config("api.timeout_seconds", "must be greater than zero"));
        }
        if self.auth.refresh_interval_seconds == 0 {
            return Err(ClientError::config(
                "auth.refresh_interval_seconds",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// API base URL, normalised to end with `/`
    pub fn api_base_url(&self) -> ClientResult<Url> {
        parse_base("api.base_url", &self.api.base_url)
    }

    /// Media base URL; the API origin unless configured
    pub fn media_base_url(&self) -> ClientResult<Url> {
        match &self.api.media_base_url {
            Some(media) => parse_base("api.media_base_url", media),
            None => {
                let api = self.api_base_url()?;
                api.join("/")
                    .map_err(|e| ClientError::config("api.media_base_url", e))
            }
        }
    }

    /// Absolute URL of the refresh endpoint
    pub fn refresh_url(&self) -> ClientResult<Url> {
        self.api_base_url()?
            .join(REFRESH_PATH)
            .map_err(|e| ClientError::config("api.base_url", e))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_seconds)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.auth.refresh_interval_seconds)
    }
}

fn parse_base(key: &str, raw: &str) -> ClientResult<Url> {
    let mut url = Url::parse(raw.trim()).map_err(|e| ClientError::config(key, e))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(ClientError::config(key, "expected an http(s) URL"));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Manages configuration for the application
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Config>>,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Load the configuration from the default location
    pub async fn new() -> ClientResult<Self> {
        Self::load_from(get_config_path()).await
    }

    /// Load the configuration from `path`, creating it with defaults if missing
    pub async fn load_from(path: impl Into<PathBuf>) -> ClientResult<Self> {
        let config_path = path.into();
        let config = load_or_create_config(&config_path).await?;
        config.validate()?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Get a clone of the current configuration
    pub async fn get_config(&self) -> Config {
        self.config.read().await.clone()
    }

    /// Replace and persist the configuration
    pub async fn update_config(&self, new_config: Config) -> ClientResult<()> {
        new_config.validate()?;
        save_config(&self.config_path, &new_config).await?;
        *self.config.write().await = new_config;
        Ok(())
    }

    /// Location of the configuration file
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

/// Get the path to the configuration file
pub fn get_config_path() -> PathBuf {
    // Check for explicit config path from environment
    if let Ok(path) = std::env::var("QUILL_CONFIG_PATH") {
        return PathBuf::from(path);
    }

    if let Some(user_config_dir) = dirs::config_dir() {
        return user_config_dir.join(APP_DIR).join("config.json");
    }

    // Fallback to current directory
    PathBuf::from("config.json")
}

/// Load configuration from file or create default
async fn load_or_create_config(path: &Path) -> ClientResult<Config> {
    if !path.exists() {
        let default_config = Config::default();
        save_config(path, &default_config).await?;
        info!("Created default configuration at {}", path.display());
        return Ok(default_config);
    }

    let config_str = fs::read_to_string(path).await?;
    let config: Config = serde_json::from_str(&config_str)
        .map_err(|e| ClientError::config(path.display().to_string(), e))?;
    debug!("Loaded configuration from {}", path.display());

    Ok(config)
}

/// Save configuration to file
async fn save_config(path: &Path, config: &Config) -> ClientResult<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let config_str = serde_json::to_string_pretty(config)
        .map_err(|e| ClientError::Storage(e.to_string()))?;
    fs::write(path, config_str).await?;
    debug!("Saved configuration to {}", path.display());

    Ok(())
}
