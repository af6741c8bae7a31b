// Configuration types module
// Defines all configuration-related data structures

use serde::Deserialize;
use std::path::PathBuf;

use crate::logger::LogLevel;
use crate::store::{FileLayout, IdStrategy, MissingFilePolicy, StoreOptions};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub performance: PerformanceConfig,
    pub http: HttpConfig,
    /// Served collections, one per `[[resources]]` table
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// Server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub access_log: bool,
    /// Access log format (combined, common or json)
    #[serde(default = "default_access_log_format")]
    pub access_log_format: String,
    /// Access log file path (optional, stdout if not set)
    #[serde(default)]
    pub access_log_file: Option<String>,
    /// Error log file path (optional, stderr if not set)
    #[serde(default)]
    pub error_log_file: Option<String>,
}

#[allow(clippy::missing_const_for_fn)]
fn default_access_log_format() -> String {
    "combined".to_string()
}

/// Performance configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PerformanceConfig {
    pub keep_alive: bool,
    /// Seconds a connection may stay open; 0 disables the limit
    pub request_timeout: u64,
    pub max_connections: Option<u64>,
}

/// HTTP configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub server_name: String,
    pub max_body_size: u64,
    /// Health check configuration
    #[serde(default)]
    pub health: HealthConfig,
}

/// Health check configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    /// Enable health check endpoints
    #[serde(default = "default_health_enabled")]
    pub enabled: bool,
    /// Liveness probe path (default: /healthz)
    #[serde(default = "default_healthz_path")]
    pub liveness_path: String,
    /// Readiness probe path (default: /readyz)
    #[serde(default = "default_readyz_path")]
    pub readiness_path: String,
}

#[allow(clippy::missing_const_for_fn)]
fn default_health_enabled() -> bool {
    true
}

#[allow(clippy::missing_const_for_fn)]
fn default_healthz_path() -> String {
    "/healthz".to_string()
}

#[allow(clippy::missing_const_for_fn)]
fn default_readyz_path() -> String {
    "/readyz".to_string()
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: default_health_enabled(),
            liveness_path: default_healthz_path(),
            readiness_path: default_readyz_path(),
        }
    }
}

/// How mutation results are rendered
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStyle {
    /// The record itself
    #[default]
    Bare,
    /// `{"message": ..., "data": record}`
    Envelope,
}

/// One collection exposed under `/<name>`
#[derive(Debug, Deserialize, Clone)]
pub struct ResourceConfig {
    /// First path segment, e.g. `todos`
    pub name: String,
    /// Backing JSON file
    pub file: PathBuf,
    #[serde(default)]
    pub layout: FileLayout,
    #[serde(default)]
    pub id_strategy: IdStrategy,
    #[serde(default)]
    pub missing_file: MissingFilePolicy,
    #[serde(default)]
    pub response_style: ResponseStyle,
    /// Singular label used in messages, e.g. `Todo`
    #[serde(default = "default_item_name")]
    pub item_name: String,
}

#[allow(clippy::missing_const_for_fn)]
fn default_item_name() -> String {
    "Record".to_string()
}

impl ResourceConfig {
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            layout: self.layout.clone(),
            id_strategy: self.id_strategy,
            missing_file: self.missing_file,
        }
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            name: "records".to_string(),
            file: PathBuf::from("db.json"),
            layout: FileLayout::Array,
            id_strategy: IdStrategy::Sequential,
            missing_file: MissingFilePolicy::Empty,
            response_style: ResponseStyle::Bare,
            item_name: default_item_name(),
        }
    }
}
