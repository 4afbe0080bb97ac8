//! Configuration management

use crate::error::{ErrorContext, SessionError, SessionResult};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the backend REST API
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            timeout_seconds: 30,
            user_agent: format!("erp-session/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Session lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// How often the renewal task compares expiry to the clock
    pub renewal_check_interval_secs: u64,
    /// Remaining lifetime below which the access token is renewed
    pub renewal_lead_time_secs: u64,
    /// Route navigated to after login or registration
    pub landing_route: String,
    /// Route navigated to after logout
    pub login_route: String,
    /// Where the file token store keeps its data
    pub token_store_path: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            renewal_check_interval_secs: 60,
            renewal_lead_time_secs: 300,
            landing_route: "/dashboard".to_string(),
            login_route: "/login".to_string(),
            token_store_path: None,
        }
    }
}

impl SessionSettings {
    /// Token store path, defaulting to the user's config directory
    pub fn resolved_token_store_path(&self) -> Option<PathBuf> {
        self.token_store_path
            .clone()
            .or_else(|| dirs::config_dir().map(|dir| dir.join("erp-session").join("tokens.json")))
    }
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("erp-session").join("config.toml"))
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> SessionResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SessionError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("read_file"),
        })?;

        let config: AppConfig = toml::from_str(&content).map_err(|e| SessionError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("parse_toml"),
        })?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> SessionResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| SessionError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content).map_err(|e| SessionError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("write_file"),
        })?;

        Ok(())
    }

    /// Apply `ERP_API_BASE_URL` and `ERP_LOG_LEVEL` on top of the loaded values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(base_url) = std::env::var("ERP_API_BASE_URL") {
            self.api.base_url = base_url;
        }
        if let Ok(level) = std::env::var("ERP_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> SessionResult<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(crate::config_error!("api.base_url must not be empty", "config"));
        }

        if let Err(e) = url::Url::parse(&self.api.base_url) {
            return Err(crate::config_error!(
                format!("api.base_url is not a valid URL: {}", e),
                "config",
                e
            ));
        }

        if self.api.timeout_seconds == 0 {
            return Err(crate::config_error!(
                "api.timeout_seconds must be greater than 0",
                "config"
            ));
        }

        if self.session.renewal_check_interval_secs == 0 {
            return Err(crate::config_error!(
                "session.renewal_check_interval_secs must be greater than 0",
                "config"
            ));
        }

        if self.session.renewal_lead_time_secs == 0 {
            return Err(crate::config_error!(
                "session.renewal_lead_time_secs must be greater than 0",
                "config"
            ));
        }

        Ok(())
    }
}
