//! Service configuration.
//!
//! # Design
//! Credentials are deliberately not validated here. An empty endpoint,
//! tenant, app id or app key surfaces as a fatal result the first time a
//! request is built, so a misconfigured service can still be constructed and
//! inspected.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::http::HttpOptions;

pub const DEFAULT_MAX_CONNECTIONS: usize = 20;
pub const DEFAULT_TIMEOUT_SECS: i32 = 60;

/// Tenant and application identity, fixed for the lifetime of a `Service`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub endpoint_url: String,
    pub tenant_id: String,
    pub app_id: String,
    pub app_key: String,
    /// Proxy URL; empty disables proxying.
    pub proxy: String,
}

impl Credentials {
    pub fn new(
        endpoint_url: impl Into<String>,
        tenant_id: impl Into<String>,
        app_id: impl Into<String>,
        app_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            tenant_id: tenant_id.into(),
            app_id: app_id.into(),
            app_key: app_key.into(),
            proxy: String::new(),
        }
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = proxy.into();
        self
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Everything needed to construct a `Service`.
///
/// ```toml
/// endpoint_url = "https://baas.example.com/api"
/// tenant_id = "tenant"
/// app_id = "app"
/// app_key = "key"
/// max_connections = 10
///
/// [http_options]
/// verify_peer = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    #[serde(flatten)]
    pub credentials: Credentials,
    pub http_options: HttpOptions,
    /// Ceiling on executors created by the pool.
    pub max_connections: usize,
    /// Timeout used when an operation passes a value `<= 0`.
    pub timeout_secs: i32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            http_options: HttpOptions::default(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ServiceConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
