//! Attribute Validators.
//!
//! A pipeline of small, single-purpose checkers composed per attribute,
//! same spirit as a `ValidationRule` chain-of-responsibility
//! in `json/validator.rs`, but checking attribute *values* instead of SQL
//! statements. Collection-level caps (`maxItems`, `maxProperties`,
//! `maxLength`) are enforced by the caller (the patch engine / lifecycle
//! engine) before these element-level rules run.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{ApiError, ApiResult};
use crate::value::ScalarValue;

/// A single constraint check against one scalar value, or — via
/// `ElementValidator` — against every element of a list/map attribute.
pub trait ValidationRule: Send + Sync {
    fn validate_scalar(&self, value: &ScalarValue) -> ApiResult<()> {
        let _ = value;
        Ok(())
    }

    /// Called once with the *whole* list, so rules like `Unique` can see
    /// all elements at once instead of pairwise.
    fn validate_list(&self, _items: &[ScalarValue]) -> ApiResult<()> {
        Ok(())
    }

    /// Called once with the whole map's keys, for key-shape rules like
    /// `AllowedDictKeys`/`MaxDictKeyLen`.
    fn validate_map_keys(&self, _keys: &BTreeSet<&str>) -> ApiResult<()> {
        Ok(())
    }

    fn describe(&self) -> String;
}

impl fmt::Debug for dyn ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValidationRule({})", self.describe())
    }
}

fn as_str(value: &ScalarValue) -> Option<&str> {
    match value {
        ScalarValue::Str(s) => Some(s.as_str()),
        _ => None,
    }
}

fn as_f64(value: &ScalarValue) -> Option<f64> {
    match value {
        ScalarValue::Int(i) => Some(*i as f64),
        ScalarValue::Float(f) => Some(*f),
        _ => None,
    }
}

/// `MaxStrLen(n)` — rejects strings longer than `n` characters.
pub struct MaxStrLen(pub usize);

impl ValidationRule for MaxStrLen {
    fn validate_scalar(&self, value: &ScalarValue) -> ApiResult<()> {
        if let Some(s) = as_str(value)
            && s.chars().count() > self.0
        {
            return Err(ApiError::bad_value(format!(
                "value exceeds maximum length of {}",
                self.0
            )));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("MaxStrLen({})", self.0)
    }
}

/// `MinStrLen(n)` — rejects strings shorter than `n` characters.
pub struct MinStrLen(pub usize);

impl ValidationRule for MinStrLen {
    fn validate_scalar(&self, value: &ScalarValue) -> ApiResult<()> {
        if let Some(s) = as_str(value)
            && s.chars().count() < self.0
        {
            return Err(ApiError::bad_value(format!(
                "value is shorter than the minimum length of {}",
                self.0
            )));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("MinStrLen({})", self.0)
    }
}

/// `ForbiddenChars(set)` — rejects strings containing any of `set`.
pub struct ForbiddenChars(pub BTreeSet<char>);

impl ValidationRule for ForbiddenChars {
    fn validate_scalar(&self, value: &ScalarValue) -> ApiResult<()> {
        if let Some(s) = as_str(value)
            && s.chars().any(|c| self.0.contains(&c))
        {
            return Err(ApiError::bad_value("value contains a forbidden character"));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "ForbiddenChars".to_string()
    }
}

/// `AllowedValues(set)` — the scalar must equal one of the given values
/// (string comparison via the lossless representation, so it works for
/// any scalar kind).
pub struct AllowedValues(pub Vec<ScalarValue>);

impl ValidationRule for AllowedValues {
    fn validate_scalar(&self, value: &ScalarValue) -> ApiResult<()> {
        if !self.0.iter().any(|v| v == value) {
            return Err(ApiError::bad_value("value is not one of the allowed values"));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "AllowedValues".to_string()
    }
}

/// `Unique()` — every element of a list attribute must be distinct.
pub struct Unique;

impl ValidationRule for Unique {
    fn validate_list(&self, items: &[ScalarValue]) -> ApiResult<()> {
        let mut seen: Vec<&ScalarValue> = Vec::with_capacity(items.len());
        for item in items {
            if seen.contains(&item) {
                return Err(ApiError::bad_value("list values must be unique"));
            }
            seen.push(item);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "Unique".to_string()
    }
}

/// `AllowedListValues(set)` — every element of a list must be a member
/// of `set`.
pub struct AllowedListValues(pub Vec<ScalarValue>);

impl ValidationRule for AllowedListValues {
    fn validate_list(&self, items: &[ScalarValue]) -> ApiResult<()> {
        for item in items {
            if !self.0.iter().any(|v| v == item) {
                return Err(ApiError::bad_value("list contains a disallowed value"));
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "AllowedListValues".to_string()
    }
}

/// `AllowedDictKeys(set)` — every key of a map attribute must be a
/// member of `set`.
pub struct AllowedDictKeys(pub BTreeSet<String>);

impl ValidationRule for AllowedDictKeys {
    fn validate_map_keys(&self, keys: &BTreeSet<&str>) -> ApiResult<()> {
        for key in keys {
            if !self.0.iter().any(|k| k == key) {
                return Err(ApiError::bad_value(format!("key '{key}' is not an allowed key")));
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "AllowedDictKeys".to_string()
    }
}

/// `MinNumberSize(n)` — numeric lower bound (inclusive).
pub struct MinNumberSize(pub f64);

impl ValidationRule for MinNumberSize {
    fn validate_scalar(&self, value: &ScalarValue) -> ApiResult<()> {
        if let Some(n) = as_f64(value)
            && n < self.0
        {
            return Err(ApiError::bad_value(format!("value is below the minimum of {}", self.0)));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("MinNumberSize({})", self.0)
    }
}

/// `MaxNumberSize(n)` — numeric upper bound (inclusive).
pub struct MaxNumberSize(pub f64);

impl ValidationRule for MaxNumberSize {
    fn validate_scalar(&self, value: &ScalarValue) -> ApiResult<()> {
        if let Some(n) = as_f64(value)
            && n > self.0
        {
            return Err(ApiError::bad_value(format!("value is above the maximum of {}", self.0)));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("MaxNumberSize({})", self.0)
    }
}

/// `MaxDictKeyLen(n)` — caps the length of every key in a map attribute.
pub struct MaxDictKeyLen(pub usize);

impl ValidationRule for MaxDictKeyLen {
    fn validate_map_keys(&self, keys: &BTreeSet<&str>) -> ApiResult<()> {
        for key in keys {
            if key.chars().count() > self.0 {
                return Err(ApiError::bad_value(format!(
                    "key '{key}' exceeds the maximum key length of {}",
                    self.0
                )));
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("MaxDictKeyLen({})", self.0)
    }
}

/// `ElementValidator(inner)` — applies `inner` to every element of a list
/// attribute individually (as opposed to rules like `Unique` that see the
/// whole list at once).
pub struct ElementValidator(pub Box<dyn ValidationRule>);

impl ValidationRule for ElementValidator {
    fn validate_list(&self, items: &[ScalarValue]) -> ApiResult<()> {
        for item in items {
            self.0.validate_scalar(item)?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("ElementValidator({})", self.0.describe())
    }
}

/// Runs every validator attached to an attribute against a scalar value.
pub fn run_scalar(rules: &[Box<dyn ValidationRule>], value: &ScalarValue) -> ApiResult<()> {
    for rule in rules {
        rule.validate_scalar(value)?;
    }
    Ok(())
}

pub fn run_list(rules: &[Box<dyn ValidationRule>], items: &[ScalarValue]) -> ApiResult<()> {
    for rule in rules {
        rule.validate_list(items)?;
    }
    Ok(())
}

pub fn run_map_keys(rules: &[Box<dyn ValidationRule>], keys: &BTreeSet<&str>) -> ApiResult<()> {
    for rule in rules {
        rule.validate_map_keys(keys)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_str_len_rejects_long_strings() {
        let rule = MaxStrLen(3);
        assert!(rule.validate_scalar(&ScalarValue::Str("ab".into())).is_ok());
        assert!(rule.validate_scalar(&ScalarValue::Str("abcd".into())).is_err());
    }

    #[test]
    fn unique_rejects_duplicates() {
        let rule = Unique;
        let items = vec![ScalarValue::Str("a".into()), ScalarValue::Str("a".into())];
        assert!(rule.validate_list(&items).is_err());
    }

    #[test]
    fn allowed_dict_keys_rejects_unknown_key() {
        let rule = AllowedDictKeys(["abc".to_string()].into_iter().collect());
        let keys: BTreeSet<&str> = ["abc"].into_iter().collect();
        assert!(rule.validate_map_keys(&keys).is_ok());
        let keys: BTreeSet<&str> = ["xyz"].into_iter().collect();
        assert!(rule.validate_map_keys(&keys).is_err());
    }
}
