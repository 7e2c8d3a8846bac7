use std::fmt;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};

/// Field names that describe the device rather than a reading.
pub const RESERVED_FIELDS: [&str; 5] = ["id", "model", "channel", "message", "raw_message"];

/// A single decoded value. The decoder only promises numbers and strings;
/// anything else (booleans, nulls, nested data) is kept in `Other`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    /// Integers above `i64::MAX`, kept exact instead of widening to `Float`.
    Unsigned(u64),
    Float(f64),
    String(String),
    Other(serde_json::Value),
}

impl FieldValue {
    /// True for integers, floats and strings made only of ASCII digits.
    ///
    /// Signs, decimal points and whitespace disqualify a string, so `"42"`
    /// counts while `"42.0"`, `"-1"` and `""` do not. Leading zeros are fine.
    pub fn is_numeric(&self) -> bool {
        match self {
            Self::Integer(_) | Self::Unsigned(_) | Self::Float(_) => true,
            Self::String(value) => !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()),
            Self::Other(_) => false,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Unsigned(value) => write!(f, "{value}"),
            Self::Float(value) if value.is_finite() && value.fract() == 0.0 => {
                write!(f, "{value:.1}")
            }
            Self::Float(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(value),
            Self::Other(serde_json::Value::Bool(true)) => f.write_str("True"),
            Self::Other(serde_json::Value::Bool(false)) => f.write_str("False"),
            Self::Other(serde_json::Value::Null) => f.write_str("None"),
            Self::Other(value) => write!(f, "{value}"),
        }
    }
}

/// One line of decoder output, fields kept in the order they arrived.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedEvent {
    fields: Vec<(String, FieldValue)>,
}

impl DecodedEvent {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Fields that are not part of [`RESERVED_FIELDS`].
    pub fn readings(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields()
            .filter(|(name, _)| !RESERVED_FIELDS.contains(name))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Later duplicates overwrite the value but keep the first position.
    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        let key = key.into();
        match self.fields.iter_mut().find(|(name, _)| *name == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((key, value)),
        }
    }
}

impl<'de> Deserialize<'de> for DecodedEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EventVisitor;

        impl<'de> Visitor<'de> for EventVisitor {
            type Value = DecodedEvent;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut event = DecodedEvent {
                    fields: Vec::with_capacity(map.size_hint().unwrap_or(8)),
                };
                while let Some((key, value)) = map.next_entry::<String, FieldValue>()? {
                    event.insert(key, value);
                }
                Ok(event)
            }
        }

        deserializer.deserialize_map(EventVisitor)
    }
}

/// Stable, sanitized name of one physical device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Wraps an already-sanitized identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
