//! Canonical JSON encoding with recursively sorted object keys.

use std::collections::BTreeMap;
use std::iter::FromIterator;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::errors::{ErrorInfo, VrsError};

fn serde_error(code: &str, err: impl ToString) -> VrsError {
    VrsError::Serde(ErrorInfo::new(code, err.to_string()))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered = map
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect::<BTreeMap<_, _>>();
            Value::Object(Map::from_iter(ordered))
        }
        Value::Array(values) => Value::Array(values.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Serializes a value into canonical JSON bytes with deterministic ordering.
pub fn to_canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, VrsError> {
    let value = serde_json::to_value(value).map_err(|err| serde_error("json_serialize", err))?;
    let canonical = canonicalize(value);
    let mut bytes = Vec::new();
    serde_json::to_writer(&mut bytes, &canonical).map_err(|err| serde_error("json_write", err))?;
    Ok(bytes)
}

/// Serializes a value into a canonical JSON string.
pub fn to_canonical_json_string<T: Serialize>(value: &T) -> Result<String, VrsError> {
    let bytes = to_canonical_json_bytes(value)?;
    String::from_utf8(bytes).map_err(|err| serde_error("json_utf8", err))
}

/// Deserializes a value from JSON bytes.
pub fn from_json_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, VrsError> {
    serde_json::from_slice(data).map_err(|err| serde_error("json_deserialize", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_objects_are_key_ordered() {
        let value = json!({"b": 1, "a": {"z": true, "m": [ {"y": 1, "x": 2} ]}});
        let rendered = to_canonical_json_string(&value).expect("json");
        assert_eq!(rendered, r#"{"a":{"m":[{"x":2,"y":1}],"z":true},"b":1}"#);
    }
}
