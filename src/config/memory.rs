//! In-memory configuration provider, for tests and code-defined overrides.

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::ConfigResult;
use super::provider::ConfigProvider;

#[derive(Debug)]
pub struct MemoryConfigProvider {
    data: RwLock<HashMap<String, String>>,
    name: String,
}

impl Default for MemoryConfigProvider {
    fn default() -> Self {
        Self::named("memory")
    }
}

impl MemoryConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            name: name.into(),
        }
    }

    pub fn from_data(data: HashMap<String, String>) -> Self {
        Self {
            data: RwLock::new(data),
            name: "memory".to_string(),
        }
    }

    /// Adds a value during construction.
    pub fn value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.get_mut().insert(key.into(), value.into());
        self
    }

    pub async fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.data.write().await.insert(key.into(), value.into());
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ConfigProvider for MemoryConfigProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set_raw(&self, key: &str, value: &str) -> ConfigResult<()> {
        self.data
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> ConfigResult<bool> {
        Ok(self.data.write().await.remove(key).is_some())
    }

    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        let data = self.data.read().await;
        let mut keys: Vec<String> = data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_provider_set_get_delete() {
        let provider = MemoryConfigProvider::new();
        provider.set_raw("ledger.default_currency", "IDR").await.unwrap();
        assert_eq!(
            provider.get_raw("ledger.default_currency").await.unwrap(),
            Some("IDR".to_string())
        );

        assert!(provider.delete("ledger.default_currency").await.unwrap());
        assert!(!provider.delete("ledger.default_currency").await.unwrap());
        assert!(provider.is_empty().await);
    }

    #[tokio::test]
    async fn test_memory_provider_list_keys() {
        let provider = MemoryConfigProvider::new()
            .value("cost_limit.default_daily_limit", "50000")
            .value("cost_limit.alert_threshold_percent", "80")
            .value("ledger.default_currency", "IDR");

        let keys = provider.list_keys("cost_limit.").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "cost_limit.alert_threshold_percent".to_string(),
                "cost_limit.default_daily_limit".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_memory_provider_from_data() {
        let mut data = HashMap::new();
        data.insert("notification.timeout_ms".to_string(), "1000".to_string());
        let provider = MemoryConfigProvider::from_data(data);
        assert_eq!(provider.len().await, 1);
    }
}
