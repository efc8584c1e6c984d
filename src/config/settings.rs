//! Building blocks for per-receiver `settings` decoding.
//!
//! Receiver settings arrive as free-form JSON. Each integration declares a
//! `serde` struct for its plaintext fields and uses these helpers for the
//! loosely-typed values operators tend to write in more than one way.

use crate::error::SettingsError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Decodes receiver settings into `T`. A missing (`null`) settings object
/// decodes like `{}`.
pub fn decode<T: DeserializeOwned>(settings: &Value) -> Result<T, SettingsError> {
    let value = match settings {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    Ok(serde_json::from_value(value)?)
}

/// Returns the trimmed value, or `SettingsError::Missing` when it is blank.
pub fn require(field: &'static str, value: &str) -> Result<String, SettingsError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(SettingsError::Missing(field))
    } else {
        Ok(trimmed.to_string())
    }
}

/// A number that may be written as a JSON number or a string.
///
/// Chat and thread identifiers are often quoted in configuration; an empty
/// string or `null` means "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FlexibleNumber {
    #[default]
    Empty,
    Number(i64),
    Text(String),
}

impl FlexibleNumber {
    /// Numeric value, `None` when unset.
    ///
    /// # Errors
    ///
    /// When the value was written as text that is not an integer.
    pub fn as_i64(&self) -> Result<Option<i64>, std::num::ParseIntError> {
        match self {
            FlexibleNumber::Empty => Ok(None),
            FlexibleNumber::Number(n) => Ok(Some(*n)),
            FlexibleNumber::Text(s) if s.trim().is_empty() => Ok(None),
            FlexibleNumber::Text(s) => s.trim().parse().map(Some),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.as_i64(), Ok(None))
    }
}

impl fmt::Display for FlexibleNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlexibleNumber::Empty => Ok(()),
            FlexibleNumber::Number(n) => write!(f, "{}", n),
            FlexibleNumber::Text(s) => f.write_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for FlexibleNumber {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Float(f64),
            Text(String),
        }

        Ok(match Option::<Raw>::deserialize(deserializer)? {
            None => FlexibleNumber::Empty,
            Some(Raw::Int(n)) => FlexibleNumber::Number(n),
            Some(Raw::Float(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                FlexibleNumber::Number(f as i64)
            }
            Some(Raw::Float(f)) => FlexibleNumber::Text(f.to_string()),
            Some(Raw::Text(s)) => FlexibleNumber::Text(s),
        })
    }
}

impl Serialize for FlexibleNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_i64() {
            Ok(Some(n)) => serializer.serialize_i64(n),
            Ok(None) => serializer.serialize_none(),
            Err(_) => serializer.serialize_str(&self.to_string()),
        }
    }
}

/// A list written either as a JSON array or a single string separated by
/// commas, semicolons or newlines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DelimitedList(Vec<String>);

impl DelimitedList {
    pub fn parse(raw: &str) -> Self {
        DelimitedList(
            raw.split([',', ';', '\n'])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for DelimitedList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Option::<Raw>::deserialize(deserializer)? {
            None => DelimitedList::default(),
            Some(Raw::One(s)) => DelimitedList::parse(&s),
            Some(Raw::Many(items)) => DelimitedList(
                items
                    .iter()
                    .flat_map(|item| DelimitedList::parse(item).0)
                    .collect(),
            ),
        })
    }
}
