//! Pluggable configuration providers and the guard's runtime settings.
//!
//! Settings are loaded explicitly from a provider chain and can be reloaded
//! while the guard is running:
//!
//! ```rust,no_run
//! use revenue_guard::config::{ConfigBuilder, GuardSettings};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = ConfigBuilder::new()
//!     .env_with_prefix("REVENUE_GUARD_")
//!     .file("config/revenue-guard.json")
//!     .build()
//!     .await?;
//! let settings = GuardSettings::load(&provider).await?;
//! # Ok(())
//! # }
//! ```

pub mod composite;
pub mod env;
pub mod file;
pub mod memory;
pub mod provider;
pub mod settings;
pub mod validator;

pub use composite::CompositeConfigProvider;
pub use env::EnvConfigProvider;
pub use file::FileConfigProvider;
pub use memory::MemoryConfigProvider;
pub use provider::{ConfigProvider, ConfigProviderExt};
pub use settings::{GuardSettings, keys};
pub use validator::{ConfigValidator, ValueType};

use thiserror::Error;

/// Errors that can occur in configuration operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment error: {0}")]
    Env(#[from] std::env::VarError),

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("{0}")]
    ValidationErrors(ValidationErrors),
}

#[derive(Debug)]
pub struct ValidationErrors(pub Vec<ConfigError>);

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msgs: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "Validation failed: {}", msgs.join("; "))
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Fluent construction of a provider chain; earlier providers win.
#[derive(Default)]
pub struct ConfigBuilder {
    providers: Vec<Box<dyn ConfigProvider>>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn env(mut self) -> Self {
        self.providers.push(Box::new(EnvConfigProvider::new()));
        self
    }

    pub fn env_with_prefix(mut self, prefix: &str) -> Self {
        self.providers
            .push(Box::new(EnvConfigProvider::prefixed(prefix)));
        self
    }

    pub fn file(mut self, path: impl AsRef<std::path::Path>) -> Self {
        self.providers
            .push(Box::new(FileConfigProvider::new(path.as_ref().to_path_buf())));
        self
    }

    pub fn memory(mut self, provider: MemoryConfigProvider) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn provider(mut self, provider: Box<dyn ConfigProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub async fn build(self) -> ConfigResult<CompositeConfigProvider> {
        let mut composite = CompositeConfigProvider::new();
        for provider in self.providers {
            composite.add_provider(provider);
        }
        tracing::debug!(providers = ?composite.provider_names(), "Configuration chain built");
        Ok(composite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::NotFound {
            key: "ledger.default_currency".to_string(),
        };
        assert!(err.to_string().contains("ledger.default_currency"));
    }

    #[test]
    fn test_validation_errors_joined() {
        let err = ConfigError::ValidationErrors(ValidationErrors(vec![
            ConfigError::NotFound { key: "a".into() },
            ConfigError::NotFound { key: "b".into() },
        ]));
        assert_eq!(
            err.to_string(),
            "Validation failed: Key not found: a; Key not found: b"
        );
    }

    #[tokio::test]
    async fn test_builder_orders_providers() {
        let composite = ConfigBuilder::new()
            .memory(MemoryConfigProvider::named("overrides"))
            .env_with_prefix("REVENUE_GUARD_")
            .build()
            .await
            .unwrap();
        assert_eq!(composite.provider_names(), vec!["overrides", "env"]);
    }
}
