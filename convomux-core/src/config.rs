//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/convomux/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/convomux/` (~/.config/convomux/)
//! - Data: `$XDG_DATA_HOME/convomux/` (~/.local/share/convomux/)
//! - State/Logs: `$XDG_STATE_HOME/convomux/` (~/.local/state/convomux/)

use crate::error::{Error, Result};
use crate::types::Source;
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream LLM provider configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Agent backend configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Host address to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4000
}

/// Upstream LLM provider configuration
#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the provider (path translation appends /v1/...)
    #[serde(default = "default_upstream_url")]
    pub base_url: String,

    /// Provider API key (falls back to the OPENAI_API_KEY env var)
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_url(),
            api_key: None,
            timeout_secs: default_upstream_timeout(),
        }
    }
}

impl UpstreamConfig {
    /// Resolve the API key from config or environment
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        std::env::var("OPENAI_API_KEY").map_err(|_| {
            Error::Config(
                "upstream.api_key not set and OPENAI_API_KEY not in environment".to_string(),
            )
        })
    }
}

fn default_upstream_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_upstream_timeout() -> u64 {
    120
}

/// Agent backend configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// Base URL of the agent server
    #[serde(default = "default_agent_url")]
    pub base_url: String,

    /// Agent server API key / password
    pub api_key: Option<String>,

    /// Which backend conventions shape the intercepted bodies
    #[serde(default = "default_agent_source")]
    pub source: Source,

    /// HTTP request timeout in seconds
    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: default_agent_url(),
            api_key: None,
            source: default_agent_source(),
            timeout_secs: default_agent_timeout(),
        }
    }
}

fn default_agent_url() -> String {
    "http://localhost:8283".to_string()
}

fn default_agent_source() -> Source {
    Source::Letta
}

fn default_agent_timeout() -> u64 {
    120
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/convomux/config.toml` (~/.config/convomux/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("convomux").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/convomux/` (~/.local/share/convomux/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("convomux")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/convomux/` (~/.local/state/convomux/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("convomux")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/convomux/data.db` (~/.local/share/convomux/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/convomux/convomux.log` (~/.local/state/convomux/convomux.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("convomux.log")
    }
}
