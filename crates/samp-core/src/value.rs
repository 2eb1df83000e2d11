use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::HubError;

/// Maximum nesting depth accepted for any value tree arriving on the wire.
pub const MAX_VALUE_DEPTH: usize = 32;

/// A nested SAMP value: a string, an ordered list of values, or a mapping
/// of string keys to values.
///
/// No other scalar types exist on the wire; numbers and booleans travel as
/// their string encodings. Maps are kept ordered so that serialised output
/// is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// Top-level mapping used for metadata, message parameters, subscription
/// annotations, and response payloads.
pub type MapValue = BTreeMap<String, Value>;

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Walks the tree and rejects structures nested deeper than
    /// [`MAX_VALUE_DEPTH`].
    ///
    /// Strings, lists, and maps are the only representable shapes, so the
    /// depth bound is the sole structural constraint left to enforce after
    /// deserialisation.
    pub fn validate(&self) -> Result<(), HubError> {
        self.validate_at(0)
    }

    fn validate_at(&self, depth: usize) -> Result<(), HubError> {
        if depth > MAX_VALUE_DEPTH {
            return Err(HubError::InvalidArgument(format!(
                "value nested deeper than {MAX_VALUE_DEPTH} levels"
            )));
        }
        match self {
            Value::Str(_) => Ok(()),
            Value::List(items) => {
                for item in items {
                    item.validate_at(depth + 1)?;
                }
                Ok(())
            }
            Value::Map(entries) => {
                for entry in entries.values() {
                    entry.validate_at(depth + 1)?;
                }
                Ok(())
            }
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_owned())
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Value::Map(value)
    }
}

/// Validates every entry of a top-level mapping.
pub fn validate_map(map: &MapValue) -> Result<(), HubError> {
    for value in map.values() {
        value.validate()?;
    }
    Ok(())
}
