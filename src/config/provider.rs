//! Configuration provider trait

use serde::{Serialize, de::DeserializeOwned};

use super::{ConfigError, ConfigResult};

/// Key-value source of raw configuration strings.
#[async_trait::async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>>;

    async fn set_raw(&self, key: &str, value: &str) -> ConfigResult<()>;

    async fn delete(&self, key: &str) -> ConfigResult<bool>;

    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>>;
}

/// Typed access on top of the raw string values (JSON encoded).
pub trait ConfigProviderExt: ConfigProvider {
    fn get<T: DeserializeOwned + Send>(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = ConfigResult<Option<T>>> + Send
    where
        Self: Sync,
    {
        async move {
            match self.get_raw(key).await? {
                Some(raw) => serde_json::from_str(&raw)
                    .map(Some)
                    .map_err(|e| ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: e.to_string(),
                    }),
                None => Ok(None),
            }
        }
    }

    fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> impl std::future::Future<Output = ConfigResult<()>> + Send
    where
        Self: Sync,
    {
        async move {
            let raw = serde_json::to_string(value)?;
            self.set_raw(key, &raw).await
        }
    }

    /// Reads a value as loose JSON: raw strings that are not valid JSON
    /// (`IDR`, `block`) come back as JSON strings.
    fn get_value(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = ConfigResult<Option<serde_json::Value>>> + Send
    where
        Self: Sync,
    {
        async move {
            Ok(self.get_raw(key).await?.map(|raw| {
                serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
            }))
        }
    }
}

impl<P: ConfigProvider + ?Sized> ConfigProviderExt for P {}
