//! Ordered, duplicate-free header store
//!
//! A minimal stand-in for a file header: string keys mapped to typed scalar
//! values, preserving insertion order. Setting an existing key replaces its
//! value in place.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetaDataError {
    #[error("header keyword '{0}' not found")]
    KeyNotFound(String),
    #[error("header keyword '{0}' is not numeric")]
    NotNumeric(String),
    #[error("header keyword '{0}' already exists")]
    DuplicateKey(String),
}

/// A typed header value
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Str(String),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
}

impl MetaValue {
    /// Numeric view of the value, if it has one.
    ///
    /// Strings are parsed; booleans map to 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Str(s) => s.trim().parse::<f64>().ok(),
            MetaValue::Int(v) => Some(f64::from(*v)),
            MetaValue::Long(v) => Some(*v as f64),
            MetaValue::Float(v) => Some(f64::from(*v)),
            MetaValue::Double(v) => Some(*v),
            MetaValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Str(s) => write!(f, "{s}"),
            MetaValue::Int(v) => write!(f, "{v}"),
            MetaValue::Long(v) => write!(f, "{v}"),
            MetaValue::Float(v) => write!(f, "{v}"),
            MetaValue::Double(v) => write!(f, "{v}"),
            MetaValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Str(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Str(value)
    }
}

impl From<i32> for MetaValue {
    fn from(value: i32) -> Self {
        MetaValue::Int(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        MetaValue::Long(value)
    }
}

impl From<f32> for MetaValue {
    fn from(value: f32) -> Self {
        MetaValue::Float(value)
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        MetaValue::Double(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Bool(value)
    }
}

/// Insertion-ordered header with unique keys
#[derive(Debug, Clone, Default)]
pub struct MetaData {
    entries: Vec<(String, MetaValue)>,
}

impl MetaData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a keyword; replacement keeps the original position
    pub fn set(&mut self, key: &str, value: impl Into<MetaValue>) {
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key.to_string(), value));
        }
    }

    /// Insert a keyword, rejecting duplicates
    pub fn add(&mut self, key: &str, value: impl Into<MetaValue>) -> Result<(), MetaDataError> {
        if self.contains(key) {
            return Err(MetaDataError::DuplicateKey(key.to_string()));
        }
        self.entries.push((key.to_string(), value.into()));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Numeric lookup, used for header scalars like `CDELT3` or `BMAJ`
    pub fn get_f64(&self, key: &str) -> Result<f64, MetaDataError> {
        let value = self
            .get(key)
            .ok_or_else(|| MetaDataError::KeyNotFound(key.to_string()))?;
        value
            .as_f64()
            .ok_or_else(|| MetaDataError::NotNumeric(key.to_string()))
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, MetaDataError> {
        Ok(self.get_f64(key)? as i64)
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).map(ToString::to_string)
    }

    /// Boolean lookup; any nonzero numeric value counts as true
    pub fn get_bool(&self, key: &str) -> Result<bool, MetaDataError> {
        match self.get(key) {
            Some(MetaValue::Bool(v)) => Ok(*v),
            Some(_) => Ok(self.get_f64(key)? != 0.0),
            None => Err(MetaDataError::KeyNotFound(key.to_string())),
        }
    }

    /// Keyword at position `index`, in insertion order
    pub fn key_at(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|(k, _)| k.as_str())
    }

    pub fn value_at(&self, index: usize) -> Option<&MetaValue> {
        self.entries.get(index).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn remove(&mut self, key: &str) -> Option<MetaValue> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate key/value pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_preserved() {
        let mut header = MetaData::new();
        header.set("CRPIX1", 1.0);
        header.set("CRPIX2", 2.0);
        header.set("CRPIX3", 3.0);

        let keys: Vec<&str> = header.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["CRPIX1", "CRPIX2", "CRPIX3"]);
    }

    #[test]
    fn replacement_keeps_position() {
        let mut header = MetaData::new();
        header.set("A", 1);
        header.set("B", 2);
        header.set("A", 99);

        assert_eq!(header.len(), 2);
        let keys: Vec<&str> = header.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["A", "B"]);
        assert_eq!(header.get_i64("A").unwrap(), 99);
    }

    #[test]
    fn numeric_coercion() {
        let mut header = MetaData::new();
        header.set("CDELT3", 12.5f32);
        header.set("NAXIS", 3);
        header.set("BUNIT", "Jy/beam");
        header.set("TEXTNUM", "  4.25 ");

        assert_eq!(header.get_f64("CDELT3").unwrap(), 12.5);
        assert_eq!(header.get_i64("NAXIS").unwrap(), 3);
        assert_eq!(header.get_f64("TEXTNUM").unwrap(), 4.25);
        assert_eq!(
            header.get_f64("BUNIT"),
            Err(MetaDataError::NotNumeric("BUNIT".to_string()))
        );
        assert_eq!(
            header.get_f64("MISSING"),
            Err(MetaDataError::KeyNotFound("MISSING".to_string()))
        );
    }

    #[test]
    fn add_rejects_duplicates() {
        let mut header = MetaData::new();
        header.add("OBJECT", "NGC 253").unwrap();
        assert_eq!(
            header.add("OBJECT", "NGC 300"),
            Err(MetaDataError::DuplicateKey("OBJECT".to_string()))
        );
        assert_eq!(header.get_str("OBJECT").as_deref(), Some("NGC 253"));
    }

    #[test]
    fn positional_access() {
        let mut header = MetaData::new();
        header.set("NAXIS", 3);
        header.set("BLANK", true);

        assert_eq!(header.key_at(1), Some("BLANK"));
        assert_eq!(header.value_at(0), Some(&MetaValue::Int(3)));
        assert_eq!(header.key_at(2), None);
        assert!(header.get_bool("BLANK").unwrap());
        assert!(header.get_bool("NAXIS").unwrap());
    }

    #[test]
    fn remove_entry() {
        let mut header = MetaData::new();
        header.set("BMAJ", 0.01);
        assert!(header.contains("BMAJ"));
        assert_eq!(header.remove("BMAJ"), Some(MetaValue::Double(0.01)));
        assert!(header.is_empty());
    }
}
