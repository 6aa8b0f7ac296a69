//! Tenant Config Resolver (C1, §4.1): resolves the effective per-tenant
//! knob set every other crate in the pipeline reads, with deployment-wide
//! settings layered underneath.

pub mod constants;
pub mod resolver;
pub mod settings;
pub mod tenant;

pub use resolver::{StaticConfigSource, TenantConfigResolver, TenantConfigSource};
pub use settings::{load_settings, RuntimeEnvironment, Settings};
pub use tenant::{
    ContextConfig, FreshnessConfig, GuardrailConfig, GuardrailPreset, LlmConfig, LlmProviderSpec,
    RerankerConfig, RetrievalConfig, TenantConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for ragquery_core::Error {
    fn from(err: ConfigError) -> Self {
        ragquery_core::Error::Configuration(err.to_string())
    }
}
