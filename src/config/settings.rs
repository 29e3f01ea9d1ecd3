//! Runtime settings for the guard pipeline.
//!
//! Settings are a plain value loaded explicitly from a [`ConfigProvider`];
//! nothing reads configuration implicitly at call time.

use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::provider::{ConfigProvider, ConfigProviderExt};
use super::validator::{ConfigValidator, ValueType};
use super::{ConfigError, ConfigResult};
use crate::cost_limit::{ActionOnLimit, CostLimitPolicy};

/// Configuration keys read by [`GuardSettings::load`].
pub mod keys {
    pub const DEFAULT_CURRENCY: &str = "ledger.default_currency";
    pub const BILLING_UTC_OFFSET_MINUTES: &str = "cost_limit.billing_utc_offset_minutes";
    pub const ALERT_THRESHOLD_PERCENT: &str = "cost_limit.alert_threshold_percent";
    pub const DEFAULT_DAILY_LIMIT: &str = "cost_limit.default_daily_limit";
    pub const DEFAULT_MONTHLY_LIMIT: &str = "cost_limit.default_monthly_limit";
    pub const DEFAULT_ACTION_ON_LIMIT: &str = "cost_limit.default_action_on_limit";
    pub const NOTIFICATION_TIMEOUT_MS: &str = "notification.timeout_ms";

    pub const ALL: [&str; 7] = [
        DEFAULT_CURRENCY,
        BILLING_UTC_OFFSET_MINUTES,
        ALERT_THRESHOLD_PERCENT,
        DEFAULT_DAILY_LIMIT,
        DEFAULT_MONTHLY_LIMIT,
        DEFAULT_ACTION_ON_LIMIT,
        NOTIFICATION_TIMEOUT_MS,
    ];
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    pub default_currency: String,
    /// Offset of the billing calendar from UTC. Defaults to UTC+7 (WIB).
    pub billing_utc_offset_minutes: i32,
    pub alert_threshold_percent: Decimal,
    pub default_daily_limit: Option<Decimal>,
    pub default_monthly_limit: Option<Decimal>,
    pub default_action_on_limit: ActionOnLimit,
    pub notification_timeout_ms: u64,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            default_currency: "IDR".to_string(),
            billing_utc_offset_minutes: 420,
            alert_threshold_percent: dec!(80),
            default_daily_limit: None,
            default_monthly_limit: None,
            default_action_on_limit: ActionOnLimit::Block,
            notification_timeout_ms: 5000,
        }
    }
}

impl GuardSettings {
    /// Reads every known key from `provider`, falling back to defaults for
    /// missing keys, and validates the result.
    pub async fn load<P>(provider: &P) -> ConfigResult<Self>
    where
        P: ConfigProvider + ?Sized,
    {
        let mut document = Self::default().to_document();
        for key in keys::ALL {
            if let Some(value) = provider.get_value(key).await? {
                insert_path(&mut document, key, value);
            }
        }

        validator()?.validate(&document)?;
        let settings = Self::from_document(&document)?;
        tracing::info!(
            provider = provider.name(),
            currency = %settings.default_currency,
            offset_minutes = settings.billing_utc_offset_minutes,
            daily_limit = ?settings.default_daily_limit,
            monthly_limit = ?settings.default_monthly_limit,
            "Guard settings loaded"
        );
        Ok(settings)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        validator()?.validate(&self.to_document())
    }

    pub fn billing_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.billing_utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_timeout_ms)
    }

    /// Policy applied to tenants without an explicit cost limit.
    pub fn default_policy(&self) -> CostLimitPolicy {
        CostLimitPolicy {
            daily_limit: self.default_daily_limit,
            monthly_limit: self.default_monthly_limit,
            alert_threshold_percent: self.alert_threshold_percent,
            action_on_limit: self.default_action_on_limit,
        }
    }

    fn to_document(&self) -> Value {
        let mut doc = Value::Object(Map::new());
        let decimal = |d: Option<Decimal>| d.map_or(Value::Null, |d| Value::String(d.to_string()));
        insert_path(&mut doc, keys::DEFAULT_CURRENCY, self.default_currency.clone().into());
        insert_path(
            &mut doc,
            keys::BILLING_UTC_OFFSET_MINUTES,
            self.billing_utc_offset_minutes.into(),
        );
        insert_path(
            &mut doc,
            keys::ALERT_THRESHOLD_PERCENT,
            decimal(Some(self.alert_threshold_percent)),
        );
        insert_path(&mut doc, keys::DEFAULT_DAILY_LIMIT, decimal(self.default_daily_limit));
        insert_path(&mut doc, keys::DEFAULT_MONTHLY_LIMIT, decimal(self.default_monthly_limit));
        insert_path(
            &mut doc,
            keys::DEFAULT_ACTION_ON_LIMIT,
            action_name(self.default_action_on_limit).into(),
        );
        insert_path(
            &mut doc,
            keys::NOTIFICATION_TIMEOUT_MS,
            self.notification_timeout_ms.into(),
        );
        doc
    }

    fn from_document(doc: &Value) -> ConfigResult<Self> {
        let field = |key: &str| get_path(doc, key).unwrap_or(&Value::Null);
        let int = |key: &str| {
            field(key).as_i64().ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                message: "expected an integer".into(),
            })
        };
        let required_decimal = |key: &str| {
            parse_decimal(field(key)).ok_or_else(|| ConfigError::NotFound {
                key: key.to_string(),
            })
        };

        Ok(Self {
            default_currency: field(keys::DEFAULT_CURRENCY)
                .as_str()
                .unwrap_or_default()
                .to_string(),
            billing_utc_offset_minutes: int(keys::BILLING_UTC_OFFSET_MINUTES)? as i32,
            alert_threshold_percent: required_decimal(keys::ALERT_THRESHOLD_PERCENT)?,
            default_daily_limit: parse_decimal(field(keys::DEFAULT_DAILY_LIMIT)),
            default_monthly_limit: parse_decimal(field(keys::DEFAULT_MONTHLY_LIMIT)),
            default_action_on_limit: field(keys::DEFAULT_ACTION_ON_LIMIT)
                .as_str()
                .and_then(ActionOnLimit::parse)
                .unwrap_or_default(),
            notification_timeout_ms: int(keys::NOTIFICATION_TIMEOUT_MS)? as u64,
        })
    }
}

fn validator() -> ConfigResult<ConfigValidator> {
    Ok(ConfigValidator::new()
        .require(keys::DEFAULT_CURRENCY)
        .expect_type(keys::DEFAULT_CURRENCY, ValueType::String)
        .expect_pattern(keys::DEFAULT_CURRENCY, r"^[A-Z]{3}$")?
        .expect_range(keys::BILLING_UTC_OFFSET_MINUTES, -720..=840)
        .expect_range(keys::NOTIFICATION_TIMEOUT_MS, 1..=600_000)
        .custom(keys::ALERT_THRESHOLD_PERCENT, |v| {
            match parse_decimal(v) {
                Some(p) if p > Decimal::ZERO && p <= dec!(100) => Ok(()),
                _ => Err("expected a percentage in (0, 100]".to_string()),
            }
        })
        .custom(keys::DEFAULT_DAILY_LIMIT, optional_limit)
        .custom(keys::DEFAULT_MONTHLY_LIMIT, optional_limit)
        .custom(keys::DEFAULT_ACTION_ON_LIMIT, |v| {
            match v.as_str().and_then(ActionOnLimit::parse) {
                Some(_) => Ok(()),
                None => Err("expected block, warn or notify".to_string()),
            }
        }))
}

fn optional_limit(value: &Value) -> Result<(), String> {
    if value.is_null() {
        return Ok(());
    }
    match parse_decimal(value) {
        Some(limit) if limit >= Decimal::ZERO => Ok(()),
        _ => Err("expected a non-negative amount or null".to_string()),
    }
}

fn action_name(action: ActionOnLimit) -> &'static str {
    match action {
        ActionOnLimit::Block => "block",
        ActionOnLimit::Warn => "warn",
        ActionOnLimit::Notify => "notify",
    }
}

fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()
        }
        _ => None,
    }
}

fn get_path<'a>(doc: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(doc, |current, part| current.get(part))
}

fn insert_path(doc: &mut Value, key: &str, value: Value) {
    let mut current = doc;
    let mut parts = key.split('.').peekable();
    while let Some(part) = parts.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return;
        }
        current = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigProvider;

    #[tokio::test]
    async fn test_load_defaults_from_empty_provider() {
        let settings = GuardSettings::load(&MemoryConfigProvider::new())
            .await
            .unwrap();
        assert_eq!(settings, GuardSettings::default());
        assert_eq!(settings.billing_offset().local_minus_utc(), 7 * 3600);
        assert_eq!(settings.notification_timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_load_overrides() {
        let provider = MemoryConfigProvider::new()
            .value(keys::DEFAULT_CURRENCY, "USD")
            .value(keys::BILLING_UTC_OFFSET_MINUTES, "-300")
            .value(keys::DEFAULT_DAILY_LIMIT, "50000")
            .value(keys::DEFAULT_MONTHLY_LIMIT, "\"1250000.50\"")
            .value(keys::DEFAULT_ACTION_ON_LIMIT, "warn")
            .value(keys::ALERT_THRESHOLD_PERCENT, "90")
            .value(keys::NOTIFICATION_TIMEOUT_MS, "250");

        let settings = GuardSettings::load(&provider).await.unwrap();
        assert_eq!(settings.default_currency, "USD");
        assert_eq!(settings.billing_utc_offset_minutes, -300);
        assert_eq!(settings.default_daily_limit, Some(dec!(50000)));
        assert_eq!(settings.default_monthly_limit, Some(dec!(1250000.50)));
        assert_eq!(settings.default_action_on_limit, ActionOnLimit::Warn);
        assert_eq!(settings.alert_threshold_percent, dec!(90));
        assert_eq!(settings.notification_timeout_ms, 250);

        let policy = settings.default_policy();
        assert_eq!(policy.daily_limit, Some(dec!(50000)));
        assert_eq!(policy.action_on_limit, ActionOnLimit::Warn);
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_values() {
        let provider = MemoryConfigProvider::new()
            .value(keys::DEFAULT_CURRENCY, "rupiah")
            .value(keys::BILLING_UTC_OFFSET_MINUTES, "2000")
            .value(keys::DEFAULT_ACTION_ON_LIMIT, "ignore")
            .value(keys::DEFAULT_DAILY_LIMIT, "-1");

        let err = GuardSettings::load(&provider).await.unwrap_err();
        let ConfigError::ValidationErrors(errors) = err else {
            panic!("expected validation errors, got {err}");
        };
        assert_eq!(errors.0.len(), 4);
    }

    #[test]
    fn test_validate_programmatic_settings() {
        assert!(GuardSettings::default().validate().is_ok());
        let bad = GuardSettings {
            alert_threshold_percent: dec!(0),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_insert_path_builds_nested_objects() {
        let mut doc = Value::Object(Map::new());
        insert_path(&mut doc, "a.b.c", Value::from(1));
        insert_path(&mut doc, "a.d", Value::from(2));
        assert_eq!(doc, serde_json::json!({"a": {"b": {"c": 1}, "d": 2}}));
    }
}
