//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, then config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub federation: FederationConfig,
    pub pages: PagesConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain every actor and object URL is built on (e.g., "wiki.example")
    pub domain: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://wiki.example"
    pub fn base_url(&self) -> String {
        format!("https://{}", self.domain)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Flat-file storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding record files, blobs and page actors
    pub root: PathBuf,
}

/// Outbound federation and signature settings
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Whole-request timeout for outbound calls
    pub http_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
    /// Allowed distance between a signed `Date` header and now
    pub max_clock_skew_secs: i64,
    /// RSA modulus size for newly created page actors
    pub key_bits: usize,
}

impl FederationConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn max_clock_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_clock_skew_secs)
    }
}

/// Pages that get an actor at startup
#[derive(Debug, Clone, Deserialize)]
pub struct PagesConfig {
    #[serde(default)]
    pub bootstrap: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (FEDIWIKI__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("storage.root", "data")?
            .set_default("federation.http_timeout_secs", 30)?
            .set_default("federation.connect_timeout_secs", 10)?
            .set_default(
                "federation.user_agent",
                concat!("fediwiki/", env!("CARGO_PKG_VERSION")),
            )?
            .set_default("federation.max_clock_skew_secs", 43_200)?
            .set_default("federation.key_bits", 4096)?
            .set_default("pages.bootstrap", vec!["FrontPage"])?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (FEDIWIKI__*)
            .add_source(
                Environment::with_prefix("FEDIWIKI")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("pages.bootstrap")
                    .try_parsing(true),
            )
            .build()?;

        let app_config: Self = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        const MIN_KEY_BITS: usize = 1024;

        let domain = self.server.domain.trim();
        if domain.is_empty() {
            return Err(crate::error::AppError::Config(
                "server.domain must be set".to_string(),
            ));
        }
        if domain.contains('/') || domain.contains("://") {
            return Err(crate::error::AppError::Config(format!(
                "server.domain must be a bare host name, got {domain}"
            )));
        }

        if self.server.port == 0 {
            return Err(crate::error::AppError::Config(
                "server.port must be greater than 0".to_string(),
            ));
        }

        if self.federation.http_timeout_secs == 0 || self.federation.connect_timeout_secs == 0 {
            return Err(crate::error::AppError::Config(
                "federation timeouts must be greater than 0".to_string(),
            ));
        }

        if self.federation.max_clock_skew_secs <= 0 {
            return Err(crate::error::AppError::Config(
                "federation.max_clock_skew_secs must be greater than 0".to_string(),
            ));
        }

        if self.federation.key_bits < MIN_KEY_BITS {
            return Err(crate::error::AppError::Config(format!(
                "federation.key_bits must be at least {MIN_KEY_BITS}"
            )));
        }

        for page in &self.pages.bootstrap {
            crate::pages::validate_page_name(page)
                .map_err(|e| crate::error::AppError::Config(format!("pages.bootstrap: {e}")))?;
        }

        if self.logging.format != "pretty" && self.logging.format != "json" {
            tracing::warn!(
                format = %self.logging.format,
                "Unknown logging.format; falling back to pretty"
            );
        }

        Ok(())
    }
}
