//! Typed access to the type-specific keys of a monitor, alerter or sink.
//!
//! Each component reads its own keys through an [`OptionReader`]. Problems are
//! collected instead of returned one at a time, so a broken config file is
//! reported with every malformed field named in a single pass.

use std::collections::BTreeSet;

use serde::de::DeserializeOwned;
use toml::{Table, Value};

use crate::error::{ConfigError, FieldError};
use crate::units::size_string_to_bytes;

pub struct OptionReader<'a> {
    component: String,
    table: &'a Table,
    consumed: BTreeSet<String>,
    errors: Vec<FieldError>,
}

impl<'a> OptionReader<'a> {
    pub fn new(component: impl Into<String>, table: &'a Table) -> Self {
        Self { component: component.into(), table, consumed: BTreeSet::new(), errors: Vec::new() }
    }

    /// Dotted component path used in error messages
    pub fn component(&self) -> &str {
        &self.component
    }

    fn take(&mut self, key: &str) -> Option<&'a Value> {
        self.consumed.insert(key.to_string());
        self.table.get(key)
    }

    fn convert<T: DeserializeOwned>(&mut self, key: &str, value: &Value) -> Option<T> {
        match value.clone().try_into::<T>() {
            Ok(converted) => Some(converted),
            Err(e) => {
                self.error(key, format!("invalid value: {}", e.message()));
                None
            }
        }
    }

    /// Record an error against `key`
    pub fn error(&mut self, key: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(self.component.clone(), key, message));
    }

    /// Read a key that must be present. A default value is returned when it
    /// is missing or malformed; the error is reported by [`finish`].
    ///
    /// [`finish`]: OptionReader::finish
    pub fn required<T: DeserializeOwned + Default>(&mut self, key: &str) -> T {
        match self.take(key) {
            Some(value) => self.convert(key, value).unwrap_or_default(),
            None => {
                self.error(key, "required field is missing");
                T::default()
            }
        }
    }

    /// Read a string key that must be present and non-empty
    pub fn required_string(&mut self, key: &str) -> String {
        let present = self.table.contains_key(key);
        let value: String = self.required(key);
        if present && value.trim().is_empty() {
            self.error(key, "must not be empty");
        }
        value
    }

    pub fn optional<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let value = self.take(key)?;
        self.convert(key, value)
    }

    pub fn with_default<T: DeserializeOwned>(&mut self, key: &str, default: T) -> T {
        self.optional(key).unwrap_or(default)
    }

    /// Read a size given either as an integer byte count or a size string
    /// such as `"10G"`
    pub fn optional_size(&mut self, key: &str) -> Option<u64> {
        let value = self.take(key)?;
        match value {
            Value::Integer(bytes) if *bytes >= 0 => Some(*bytes as u64),
            Value::String(raw) => match size_string_to_bytes(raw) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    self.error(key, e.to_string());
                    None
                }
            },
            other => {
                self.error(key, format!("expected a size, found {}", other.type_str()));
                None
            }
        }
    }

    pub fn size(&mut self, key: &str) -> u64 {
        if !self.table.contains_key(key) {
            self.consumed.insert(key.to_string());
            self.error(key, "required field is missing");
            return 0;
        }
        self.optional_size(key).unwrap_or_default()
    }

    /// Fail with every collected problem, including keys nobody asked for
    pub fn finish(&mut self) -> Result<(), ConfigError> {
        let unknown: Vec<String> =
            self.table.keys().filter(|key| !self.consumed.contains(*key)).cloned().collect();
        for key in unknown {
            self.error(&key, "unknown field");
        }

        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(std::mem::take(&mut self.errors)))
        }
    }
}
