//! Service settings loaded from `config/config.toml` and `APPROVALS__*`
//! environment variables.
use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tracing::warn;

use crate::role::ApprovalTiers;

const CONFIG_FILE: &str = "config/config.toml";
const ENV_PREFIX: &str = "APPROVALS";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_auth_url")]
    pub base_url: String,
    #[serde(default = "default_app_identifier")]
    pub app_identifier: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: default_auth_url(),
            app_identifier: default_app_identifier(),
            api_token: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// Mail endpoint. Empty disables outbound mail.
    pub url: String,
    pub api_token: String,
    pub sender_email: String,
    pub sender_name: String,
    pub bcc: Vec<String>,
    pub template_name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub auth: AuthConfig,
    pub mail: MailConfig,
    pub storage: StorageConfig,
    pub limits: ApprovalTiers,
}

fn default_auth_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_app_identifier() -> String {
    "factoring".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_db_path() -> String {
    "data/approvals".to_string()
}

impl ServiceConfig {
    /// Load from `config/config.toml` (optional), overridden by environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(CONFIG_FILE)
    }

    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                if Path::new(path).exists() {
                    warn!(%err, path, "failed to load config file, falling back to env");
                }
                Config::builder()
                    .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {err}, then env-only error: {env_err}"
                        ))
                    })?
            }
        };

        settings.try_deserialize::<ServiceConfig>().map_err(|e| {
            ConfigError::Message(format!("Service configuration could not be loaded: {e}"))
        })
    }
}
