// Configuration module entry point
// Loads configuration from file and environment, validates it, and builds runtime state

mod state;
mod types;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

// Re-export public types
pub use state::{AppState, Resource};
pub use types::{Config, LoggingConfig, ResourceConfig, ResponseStyle};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid server address '{addr}': {source}")]
    InvalidAddress {
        addr: String,
        source: std::net::AddrParseError,
    },

    #[error("invalid resource '{name}': {reason}")]
    InvalidResource { name: String, reason: String },
}

type Builder = ::config::ConfigBuilder<::config::builder::DefaultState>;

impl Config {
    /// Load configuration from specified file path (without extension)
    /// Default config file is "config.toml" when no path specified
    pub fn load_from(config_path: &str) -> Result<Self, ConfigError> {
        let builder = ::config::Config::builder()
            .add_source(::config::File::with_name(config_path).required(false))
            .add_source(::config::Environment::with_prefix("FLATDOC").separator("__"));
        Self::build(builder)
    }

    /// Load configuration from TOML text, over the same defaults
    #[cfg(test)]
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let builder = ::config::Config::builder()
            .add_source(::config::File::from_str(text, ::config::FileFormat::Toml));
        Self::build(builder)
    }

    fn build(builder: Builder) -> Result<Self, ConfigError> {
        let settings = builder
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("logging.level", "info")?
            .set_default("logging.access_log", true)?
            .set_default("performance.keep_alive", true)?
            .set_default("performance.request_timeout", 30)?
            .set_default("http.server_name", "flatdoc/0.1")?
            .set_default("http.max_body_size", 1_048_576)? // 1MB
            .build()?;

        let mut config: Self = settings.try_deserialize()?;
        if config.resources.is_empty() {
            config.resources.push(ResourceConfig::default());
        }
        config.validate()?;
        Ok(config)
    }

    pub fn get_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.server.host, self.server.port);
        addr.parse()
            .map_err(|source| ConfigError::InvalidAddress { addr, source })
    }

    /// Reject resource names that cannot be routed unambiguously
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.get_socket_addr()?;

        let health = &self.http.health;
        let mut seen = HashSet::new();
        let mut files = HashSet::new();
        for resource in &self.resources {
            let invalid = |reason: &str| ConfigError::InvalidResource {
                name: resource.name.clone(),
                reason: reason.to_string(),
            };

            if resource.name.is_empty() {
                return Err(invalid("name must not be empty"));
            }
            if resource.name.contains('/') {
                return Err(invalid("name must be a single path segment"));
            }
            if !seen.insert(resource.name.as_str()) {
                return Err(invalid("name is used by more than one resource"));
            }
            let path = format!("/{}", resource.name);
            if health.enabled && (path == health.liveness_path || path == health.readiness_path) {
                return Err(invalid("name collides with a health check path"));
            }
            if resource.file.as_os_str().is_empty() {
                return Err(invalid("file must not be empty"));
            }
            // Stores lock per resource, so two resources must never share a file
            if !files.insert(normalize_path(&resource.file)) {
                return Err(invalid("file is used by more than one resource"));
            }
        }
        Ok(())
    }
}

/// Absolute form of `path` with `.` and `..` resolved lexically
fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}
