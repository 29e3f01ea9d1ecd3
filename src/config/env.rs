//! Environment variable configuration provider.
//!
//! Read-only: mutating the process environment at runtime is not
//! thread-safe, so `set_raw` and `delete` always fail.

use super::provider::ConfigProvider;
use super::{ConfigError, ConfigResult};

/// Maps `cost_limit.default_daily_limit` to `{PREFIX}COST_LIMIT_DEFAULT_DAILY_LIMIT`.
#[derive(Debug, Clone, Default)]
pub struct EnvConfigProvider {
    prefix: Option<String>,
}

impl EnvConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn env_key(&self, key: &str) -> String {
        let name = key.to_uppercase().replace('.', "_");
        match &self.prefix {
            Some(prefix) => format!("{prefix}{name}"),
            None => name,
        }
    }

    fn read_only() -> ConfigError {
        ConfigError::Provider {
            message: "Environment variables are read-only at runtime".into(),
        }
    }
}

#[async_trait::async_trait]
impl ConfigProvider for EnvConfigProvider {
    fn name(&self) -> &str {
        "env"
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        match std::env::var(self.env_key(key)) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(ConfigError::Env(e)),
        }
    }

    async fn set_raw(&self, _key: &str, _value: &str) -> ConfigResult<()> {
        Err(Self::read_only())
    }

    async fn delete(&self, _key: &str) -> ConfigResult<bool> {
        Err(Self::read_only())
    }

    /// Dots and underscores are indistinguishable once mapped to a variable
    /// name, so listed keys come back in lowercase variable form.
    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        let env_prefix = self.env_key(prefix);
        let strip = self.prefix.as_deref().unwrap_or_default();
        Ok(std::env::vars()
            .filter(|(k, _)| k.starts_with(&env_prefix))
            .map(|(k, _)| k[strip.len()..].to_lowercase())
            .collect())
    }
}
