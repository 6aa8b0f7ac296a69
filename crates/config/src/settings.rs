//! Deployment-wide settings, layered the way the teacher's `load_settings`
//! does: `config/default.{yaml,toml}` → `config/{env}.toml` →
//! `RAGQUERY_`-prefixed environment variables, highest priority last.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Deployment-level knobs that are not per-tenant: which backends the
/// fan-out talks to, observability sinks, and the default tenant config
/// cache TTL (§4.1, §6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default = "default_vector_store_url")]
    pub vector_store_url: String,

    #[serde(default = "default_lexical_index_url")]
    pub lexical_index_url: String,

    #[serde(default = "default_reranker_url")]
    pub reranker_url: Option<String>,

    #[serde(default = "default_cache_ttl_secs")]
    pub tenant_config_cache_ttl_secs: u64,

    #[serde(default)]
    pub audit_log_path: Option<String>,

    #[serde(default = "default_log_json")]
    pub log_json: bool,
}

fn default_vector_store_url() -> String {
    std::env::var("RAGQUERY_VECTOR_STORE_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".into())
}

fn default_lexical_index_url() -> String {
    std::env::var("RAGQUERY_LEXICAL_INDEX_URL").unwrap_or_else(|_| "http://127.0.0.1:7280".into())
}

fn default_reranker_url() -> Option<String> {
    std::env::var("RAGQUERY_RERANKER_URL").ok()
}

fn default_cache_ttl_secs() -> u64 {
    crate::constants::DEFAULT_CACHE_TTL_SECS
}

fn default_log_json() -> bool {
    false
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: RuntimeEnvironment::default(),
            vector_store_url: default_vector_store_url(),
            lexical_index_url: default_lexical_index_url(),
            reranker_url: default_reranker_url(),
            tenant_config_cache_ttl_secs: default_cache_ttl_secs(),
            audit_log_path: None,
            log_json: default_log_json(),
        }
    }
}

impl Settings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.vector_store_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "vector_store_url".into(),
                message: "must not be empty".into(),
            });
        }
        if self.tenant_config_cache_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tenant_config_cache_ttl_secs".into(),
                message: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

/// Loads deployment settings, layering sources lowest-to-highest priority:
/// `config/default`, `config/{env}`, then `RAGQUERY_`-prefixed env vars.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{env_name}")).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("RAGQUERY")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_pass_validation() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let mut settings = Settings::default();
        settings.tenant_config_cache_ttl_secs = 0;
        assert!(settings.validate().is_err());
    }
}
