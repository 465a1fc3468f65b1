//! JSON-LD `@context` values
//!
//! On the wire `@context` is a string, an object, or an array of either
//! (arrays may nest). Internally it is always a flat list:
//!
//! - no entries: field omitted
//! - one entry: emitted as a bare scalar
//! - several entries: emitted as an array of strings
//!
//! Embedded context objects are accepted on input but cannot be re-emitted
//! next to other entries.

use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use super::activity::ACTIVITYSTREAMS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("Unsupported context type: multi-entry contexts may only contain strings")]
    UnsupportedContextType,

    #[error("Invalid context value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonLdContext(Vec<Value>);

impl JsonLdContext {
    /// `["https://www.w3.org/ns/activitystreams"]`
    pub fn activitystreams() -> Self {
        Self(vec![Value::String(ACTIVITYSTREAMS.to_string())])
    }

    pub fn from_strings<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(entries.into_iter().map(|s| Value::String(s.into())).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn entries(&self) -> &[Value] {
        &self.0
    }

    /// Parse any JSON value into a flat context.
    pub fn from_value(value: Value) -> Result<Self, ContextError> {
        let mut entries = Vec::new();
        flatten(value, &mut entries)?;
        Ok(Self(entries))
    }

    /// Wire representation, or `None` when the field should be omitted.
    pub fn to_value(&self) -> Result<Option<Value>, ContextError> {
        match self.0.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(single.clone())),
            many => {
                if many.iter().all(Value::is_string) {
                    Ok(Some(Value::Array(many.to_vec())))
                } else {
                    Err(ContextError::UnsupportedContextType)
                }
            }
        }
    }
}

fn flatten(value: Value, out: &mut Vec<Value>) -> Result<(), ContextError> {
    match value {
        Value::Null => Ok(()),
        Value::String(_) | Value::Object(_) => {
            out.push(value);
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                flatten(item, out)?;
            }
            Ok(())
        }
        other => Err(ContextError::InvalidValue(other.to_string())),
    }
}

impl Serialize for JsonLdContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.to_value().map_err(S::Error::custom)? {
            Some(value) => value.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for JsonLdContext {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(D::Error::custom)
    }
}
