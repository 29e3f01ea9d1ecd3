//! Declarative validation of a JSON configuration document.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use serde_json::Value;

use super::{ConfigError, ConfigResult, ValidationErrors};

pub type ValidationFn = Box<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Rules are keyed by dotted path and only apply to present values,
/// except `require`.
#[derive(Default)]
pub struct ConfigValidator {
    required_keys: Vec<String>,
    type_rules: BTreeMap<String, ValueType>,
    range_rules: BTreeMap<String, RangeInclusive<i64>>,
    pattern_rules: BTreeMap<String, regex::Regex>,
    custom_rules: BTreeMap<String, ValidationFn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ValueType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::String => value.is_string(),
            ValueType::Number => value.is_number(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Array => "array",
            ValueType::Object => "object",
        }
    }
}

impl ConfigValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, key: impl Into<String>) -> Self {
        self.required_keys.push(key.into());
        self
    }

    pub fn expect_type(mut self, key: impl Into<String>, value_type: ValueType) -> Self {
        self.type_rules.insert(key.into(), value_type);
        self
    }

    pub fn expect_range(mut self, key: impl Into<String>, range: RangeInclusive<i64>) -> Self {
        self.range_rules.insert(key.into(), range);
        self
    }

    pub fn expect_pattern(mut self, key: impl Into<String>, pattern: &str) -> ConfigResult<Self> {
        let key = key.into();
        let regex = regex::Regex::new(pattern).map_err(|e| ConfigError::InvalidValue {
            key: key.clone(),
            message: format!("Invalid regex pattern: {e}"),
        })?;
        self.pattern_rules.insert(key, regex);
        Ok(self)
    }

    pub fn custom<F>(mut self, key: impl Into<String>, validator: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.custom_rules.insert(key.into(), Box::new(validator));
        self
    }

    pub fn validate(&self, config: &Value) -> ConfigResult<()> {
        let errors = self.collect_errors(config);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationErrors(ValidationErrors(errors)))
        }
    }

    fn collect_errors(&self, config: &Value) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        for key in &self.required_keys {
            if get_nested(config, key).is_none() {
                errors.push(ConfigError::NotFound { key: key.clone() });
            }
        }

        for (key, expected) in &self.type_rules {
            if let Some(value) = get_nested(config, key)
                && !expected.matches(value)
            {
                errors.push(invalid(key, format!("expected {}", expected.name())));
            }
        }

        for (key, range) in &self.range_rules {
            if let Some(value) = get_nested(config, key) {
                match value.as_i64() {
                    Some(num) if range.contains(&num) => {}
                    Some(num) => errors.push(invalid(
                        key,
                        format!("value {num} not in range {}..={}", range.start(), range.end()),
                    )),
                    None => errors.push(invalid(key, "expected an integer".to_string())),
                }
            }
        }

        for (key, pattern) in &self.pattern_rules {
            if let Some(value) = get_nested(config, key)
                && let Some(s) = value.as_str()
                && !pattern.is_match(s)
            {
                errors.push(invalid(key, format!("'{s}' does not match {}", pattern.as_str())));
            }
        }

        for (key, validator) in &self.custom_rules {
            if let Some(value) = get_nested(config, key)
                && let Err(msg) = validator(value)
            {
                errors.push(invalid(key, msg));
            }
        }

        errors
    }
}

fn invalid(key: &str, message: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    }
}

fn get_nested<'a>(config: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(config, |current, part| current.get(part))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_and_type_rules() {
        let validator = ConfigValidator::new()
            .require("ledger.default_currency")
            .expect_type("ledger.default_currency", ValueType::String);

        assert!(
            validator
                .validate(&json!({"ledger": {"default_currency": "IDR"}}))
                .is_ok()
        );
        assert!(validator.validate(&json!({"ledger": {}})).is_err());
        assert!(
            validator
                .validate(&json!({"ledger": {"default_currency": 360}}))
                .is_err()
        );
    }

    #[test]
    fn test_range_rule_rejects_out_of_range_and_non_integer() {
        let validator = ConfigValidator::new().expect_range("percent", 1..=100);
        assert!(validator.validate(&json!({"percent": 80})).is_ok());
        assert!(validator.validate(&json!({"percent": 101})).is_err());
        assert!(validator.validate(&json!({"percent": "eighty"})).is_err());
        assert!(validator.validate(&json!({})).is_ok());
    }

    #[test]
    fn test_pattern_rule() {
        let validator = ConfigValidator::new()
            .expect_pattern("currency", r"^[A-Z]{3}$")
            .unwrap();
        assert!(validator.validate(&json!({"currency": "IDR"})).is_ok());
        assert!(validator.validate(&json!({"currency": "rupiah"})).is_err());
    }

    #[test]
    fn test_custom_rule_and_error_collection() {
        let validator = ConfigValidator::new()
            .require("a")
            .require("b")
            .custom("action", |v| match v.as_str() {
                Some("block" | "warn" | "notify") => Ok(()),
                _ => Err("expected block, warn or notify".to_string()),
            });

        let err = validator
            .validate(&json!({"action": "ignore"}))
            .unwrap_err();
        let ConfigError::ValidationErrors(ValidationErrors(errors)) = err else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 3);
    }
}
