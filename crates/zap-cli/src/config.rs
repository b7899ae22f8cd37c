//! Configuration file support and the on-disk conversation store

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zap_session::{ConfigStore, DEFAULT_EXCHANGE_TIMEOUT};

/// Default app-chat API root
pub const DEFAULT_APP_CHAT_URL: &str = "https://grok.com/rest/app-chat";
/// Default origin sent with app-chat requests
pub const DEFAULT_ORIGIN: &str = "https://grok.com";
/// Default chat completions server
pub const DEFAULT_COMPLETIONS_URL: &str = "http://localhost:3000";
/// Default model for chat completions servers
pub const DEFAULT_COMPLETIONS_MODEL: &str = "llama3.1";

/// Which backend dialect to speak
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// Conversation-based app-chat API over direct HTTP
    #[default]
    AppChat,
    /// OpenAI-compatible chat completions server
    ChatCompletions,
}

/// Configuration for zap
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend dialect
    pub backend: Option<Backend>,
    /// API root of the backend
    pub base_url: Option<String>,
    /// Bearer token (alternative to ZAP_API_KEY)
    pub api_key: Option<String>,
    /// Model name
    pub model: Option<String>,
    /// Origin header for app-chat requests
    pub origin: Option<String>,
    /// Deadline for a whole exchange, in seconds
    pub exchange_timeout_secs: Option<u64>,
    /// Tool activated at startup
    pub default_tool: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("zap")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("ZAP_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from a specific file, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            backend: Some(Backend::AppChat),
            base_url: Some(DEFAULT_APP_CHAT_URL.to_string()),
            api_key: None,
            model: Some(zap_stream::transports::payload::DEFAULT_MODEL.to_string()),
            origin: Some(DEFAULT_ORIGIN.to_string()),
            exchange_timeout_secs: Some(DEFAULT_EXCHANGE_TIMEOUT.as_secs()),
            default_tool: None,
        };

        default_config.save()?;
        Ok(path)
    }

    /// API key from config, falling back to ZAP_API_KEY
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("ZAP_API_KEY").ok())
            .filter(|k| !k.is_empty())
    }

    /// Exchange deadline, defaulting to thirty minutes
    pub fn exchange_timeout(&self) -> Duration {
        self.exchange_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_EXCHANGE_TIMEOUT)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# zap configuration file
# Place at ~/.config/zap/config.toml (Linux) or set ZAP_CONFIG_PATH

# Backend dialect: "app-chat" or "chat-completions"
backend = "app-chat"

# API root of the backend
base_url = "https://grok.com/rest/app-chat"

# Origin/Referer headers for app-chat requests
origin = "https://grok.com"

# Model name sent with each exchange
model = "grok-3"

# Give up on an exchange after this many seconds (default 1800)
exchange_timeout_secs = 1800

# Tool to activate at startup (optional)
# default_tool = "file"

# Bearer token (optional - ZAP_API_KEY works too)
# api_key = "..."
"#
}

/// TOML file-per-key store: `<dir>/<key>.toml`
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.toml", key))
    }
}

impl ConfigStore for FileStore {
    fn load(&self, key: &str) -> zap_session::Result<Option<serde_json::Value>> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| zap_session::Error::Store(format!("{}: {}", path.display(), e)))?;
        let table: toml::Table = toml::from_str(&content)
            .map_err(|e| zap_session::Error::Store(format!("{}: {}", path.display(), e)))?;
        serde_json::to_value(table)
            .map(Some)
            .map_err(|e| zap_session::Error::Store(e.to_string()))
    }

    fn save(&self, key: &str, value: serde_json::Value) -> zap_session::Result<()> {
        let path = self.path(key);
        let content = toml::to_string_pretty(&value)
            .map_err(|e| zap_session::Error::Store(e.to_string()))?;
        fs::create_dir_all(&self.dir)
            .and_then(|_| fs::write(&path, content))
            .map_err(|e| zap_session::Error::Store(format!("{}: {}", path.display(), e)))?;
        tracing::debug!("Saved {} to {}", key, path.display());
        Ok(())
    }
}
