use crate::error::{Result, SscError};
use serde_json::Value;
use std::collections::BTreeMap;

/// Dynamically typed SSC value
///
/// SSC parameters are JSON values whose types are only known at runtime,
/// either from a limits query or by probing. `DynamicValue` is the crate's
/// value model: a JSON-like tagged union restricted to what the protocol
/// can actually carry. Arrays are homogeneous and at most one level deep;
/// arrays of arrays, arrays of objects and arrays containing null are not
/// representable.
#[derive(Debug, Clone, PartialEq)]
pub enum DynamicValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<DynamicValue>),
    Object(BTreeMap<String, DynamicValue>),
}

impl DynamicValue {
    /// Decode a wire payload against a schema value.
    ///
    /// The schema mirrors the *shape* expected at each path and is walked
    /// in lock-step with the incoming data:
    ///
    /// - `Object` schema: decode the children named by the schema; keys
    ///   present on the wire but absent from the schema are ignored, and
    ///   keys named by the schema but absent from the wire are skipped.
    ///   A wire value that is not an object where the schema promises one
    ///   fails with [`SscError::SchemaMismatch`].
    /// - `Null` schema: accept only a JSON null.
    /// - `Bool`/`Number`/`String` schema: decode the single matching
    ///   primitive, fail with [`SscError::IncorrectSchema`] on mismatch.
    /// - `Array` schema: the first element's tag selects which homogeneous
    ///   array to decode. An empty schema array decodes to an empty array
    ///   unconditionally. A first element that is itself an array, object
    ///   or null fails with [`SscError::NestedArrayUnsupported`].
    pub fn decode(text: &str, schema: &DynamicValue) -> Result<DynamicValue> {
        let wire: Value = serde_json::from_str(text)?;
        Self::decode_value(&wire, schema)
    }

    /// Decode an already-parsed JSON value against a schema value
    pub fn decode_value(wire: &Value, schema: &DynamicValue) -> Result<DynamicValue> {
        match schema {
            DynamicValue::Object(children) => {
                let map = wire
                    .as_object()
                    .ok_or_else(|| SscError::SchemaMismatch("object".to_string()))?;
                let mut out = BTreeMap::new();
                for (name, child_schema) in children {
                    // Keys the wire does not carry are skipped, mirroring
                    // how unknown wire keys are ignored
                    if let Some(entry) = map.get(name) {
                        out.insert(name.clone(), Self::decode_value(entry, child_schema)?);
                    }
                }
                Ok(DynamicValue::Object(out))
            }
            DynamicValue::Null => {
                if wire.is_null() {
                    Ok(DynamicValue::Null)
                } else {
                    Err(SscError::IncorrectSchema("null".to_string()))
                }
            }
            DynamicValue::Bool(_) => wire
                .as_bool()
                .map(DynamicValue::Bool)
                .ok_or_else(|| SscError::IncorrectSchema("boolean".to_string())),
            DynamicValue::Number(_) => wire
                .as_f64()
                .map(DynamicValue::Number)
                .ok_or_else(|| SscError::IncorrectSchema("number".to_string())),
            DynamicValue::String(_) => wire
                .as_str()
                .map(|s| DynamicValue::String(s.to_string()))
                .ok_or_else(|| SscError::IncorrectSchema("string".to_string())),
            DynamicValue::Array(elements) => {
                let Some(first) = elements.first() else {
                    return Ok(DynamicValue::Array(Vec::new()));
                };
                let items = wire
                    .as_array()
                    .ok_or_else(|| SscError::IncorrectSchema("array".to_string()))?;
                match first {
                    DynamicValue::Bool(_) | DynamicValue::Number(_) | DynamicValue::String(_) => {
                        let decoded = items
                            .iter()
                            .map(|item| Self::decode_value(item, first))
                            .collect::<Result<Vec<_>>>()?;
                        Ok(DynamicValue::Array(decoded))
                    }
                    _ => Err(SscError::NestedArrayUnsupported),
                }
            }
        }
    }

    /// Convert a plain JSON value, enforcing the array invariants.
    ///
    /// Used where no schema is available, e.g. restoring a backup blob.
    pub fn from_json(value: &Value) -> Result<DynamicValue> {
        match value {
            Value::Null => Ok(DynamicValue::Null),
            Value::Bool(b) => Ok(DynamicValue::Bool(*b)),
            Value::Number(n) => n
                .as_f64()
                .map(DynamicValue::Number)
                .ok_or_else(|| SscError::IncorrectSchema("number".to_string())),
            Value::String(s) => Ok(DynamicValue::String(s.clone())),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match Self::from_json(item)? {
                        DynamicValue::Array(_) | DynamicValue::Object(_) => {
                            return Err(SscError::NestedArrayUnsupported)
                        }
                        DynamicValue::Null => {
                            return Err(SscError::IncorrectSchema(
                                "non-null array element".to_string(),
                            ))
                        }
                        element => out.push(element),
                    }
                }
                // Homogeneity: every element must share the first one's tag
                if let Some(first) = out.first() {
                    let tag = std::mem::discriminant(first);
                    if out.iter().any(|e| std::mem::discriminant(e) != tag) {
                        return Err(SscError::IncorrectSchema(
                            "homogeneous array".to_string(),
                        ));
                    }
                }
                Ok(DynamicValue::Array(out))
            }
            Value::Object(map) => {
                let mut out = BTreeMap::new();
                for (key, entry) in map {
                    out.insert(key.clone(), Self::from_json(entry)?);
                }
                Ok(DynamicValue::Object(out))
            }
        }
    }

    /// Convert to a plain JSON value
    pub fn to_json(&self) -> Value {
        match self {
            DynamicValue::Null => Value::Null,
            DynamicValue::Bool(b) => Value::Bool(*b),
            DynamicValue::Number(n) => serde_json::json!(n),
            DynamicValue::String(s) => Value::String(s.clone()),
            DynamicValue::Array(items) => {
                Value::Array(items.iter().map(DynamicValue::to_json).collect())
            }
            DynamicValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Encode to wire text
    pub fn encode(&self) -> String {
        self.to_json().to_string()
    }

    /// Nest the value inside one single-key object per path segment,
    /// innermost first: wrapping `V` in `["a", "b"]` yields `{"a":{"b":V}}`.
    ///
    /// This is how SSC write and read commands address a parameter.
    pub fn wrap<S: AsRef<str>>(self, path: &[S]) -> DynamicValue {
        let mut value = self;
        for segment in path.iter().rev() {
            let mut map = BTreeMap::new();
            map.insert(segment.as_ref().to_string(), value);
            value = DynamicValue::Object(map);
        }
        value
    }

    /// Peel addressing layers: descend through single-key objects until a
    /// non-single-key object or a non-object is reached.
    ///
    /// Note that a value which is itself a chain of single-key objects
    /// collapses all the way through; see the module tests.
    pub fn unwrap(self) -> DynamicValue {
        let mut value = self;
        loop {
            match value {
                DynamicValue::Object(map) if map.len() == 1 => {
                    value = map.into_values().next().unwrap_or(DynamicValue::Null);
                }
                other => return other,
            }
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DynamicValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DynamicValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DynamicValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Look up an entry of an object value
    pub fn get(&self, key: &str) -> Option<&DynamicValue> {
        match self {
            DynamicValue::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Return the array as numbers, or `None` if the tag or any element
    /// type does not match
    pub fn as_number_array(&self) -> Option<Vec<f64>> {
        match self {
            DynamicValue::Array(items) => items.iter().map(DynamicValue::as_f64).collect(),
            _ => None,
        }
    }

    /// Return the array as booleans, or `None` on a tag mismatch
    pub fn as_bool_array(&self) -> Option<Vec<bool>> {
        match self {
            DynamicValue::Array(items) => items.iter().map(DynamicValue::as_bool).collect(),
            _ => None,
        }
    }

    /// Return the array as strings, or `None` on a tag mismatch
    pub fn as_string_array(&self) -> Option<Vec<String>> {
        match self {
            DynamicValue::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => None,
        }
    }
}

impl From<f64> for DynamicValue {
    fn from(value: f64) -> Self {
        DynamicValue::Number(value)
    }
}

impl From<bool> for DynamicValue {
    fn from(value: bool) -> Self {
        DynamicValue::Bool(value)
    }
}

impl From<&str> for DynamicValue {
    fn from(value: &str) -> Self {
        DynamicValue::String(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(entries: &[(&str, DynamicValue)]) -> DynamicValue {
        DynamicValue::Object(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn decode_round_trips_schema_conformant_values() {
        let value = object(&[
            ("level", DynamicValue::Number(54.0)),
            ("mute", DynamicValue::Bool(false)),
            ("name", DynamicValue::String("KH 150".to_string())),
            (
                "gains",
                DynamicValue::Array(vec![
                    DynamicValue::Number(0.0),
                    DynamicValue::Number(-3.5),
                ]),
            ),
        ]);
        // The value doubles as its own schema: only tags are inspected
        let decoded = DynamicValue::decode(&value.encode(), &value).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn decode_ignores_unknown_wire_keys() {
        let schema = object(&[("level", DynamicValue::Number(0.0))]);
        let decoded =
            DynamicValue::decode(r#"{"level": 12.5, "extra": "ignored"}"#, &schema).unwrap();
        assert_eq!(decoded, object(&[("level", DynamicValue::Number(12.5))]));
    }

    #[test]
    fn decode_skips_schema_keys_missing_from_wire() {
        let schema = object(&[
            ("level", DynamicValue::Number(0.0)),
            ("mute", DynamicValue::Bool(false)),
        ]);
        let decoded = DynamicValue::decode(r#"{"mute": true}"#, &schema).unwrap();
        assert_eq!(decoded, object(&[("mute", DynamicValue::Bool(true))]));
    }

    #[test]
    fn decode_fails_when_wire_is_not_an_object() {
        let schema = object(&[("level", DynamicValue::Number(0.0))]);
        let err = DynamicValue::decode("54.0", &schema).unwrap_err();
        assert!(matches!(err, SscError::SchemaMismatch(_)));
    }

    #[test]
    fn decode_fails_on_primitive_type_mismatch() {
        let schema = object(&[("mute", DynamicValue::Bool(false))]);
        let err = DynamicValue::decode(r#"{"mute": 1}"#, &schema).unwrap_err();
        assert!(matches!(err, SscError::IncorrectSchema(_)));
    }

    #[test]
    fn decode_accepts_null_only_for_null_schema() {
        let schema = DynamicValue::Null;
        assert_eq!(
            DynamicValue::decode("null", &schema).unwrap(),
            DynamicValue::Null
        );
        assert!(matches!(
            DynamicValue::decode("3", &schema).unwrap_err(),
            SscError::IncorrectSchema(_)
        ));
    }

    #[test]
    fn empty_schema_array_decodes_to_empty_array() {
        let schema = DynamicValue::Array(Vec::new());
        assert_eq!(
            DynamicValue::decode("[1, 2, 3]", &schema).unwrap(),
            DynamicValue::Array(Vec::new())
        );
    }

    #[test]
    fn nested_array_schema_is_rejected() {
        let schema = DynamicValue::Array(vec![DynamicValue::Array(Vec::new())]);
        let err = DynamicValue::decode("[[1]]", &schema).unwrap_err();
        assert!(matches!(err, SscError::NestedArrayUnsupported));
    }

    #[test]
    fn from_json_rejects_null_in_array() {
        let raw = serde_json::json!([1.0, null]);
        assert!(DynamicValue::from_json(&raw).is_err());
    }

    #[test]
    fn from_json_rejects_heterogeneous_array() {
        let raw = serde_json::json!([1.0, "two"]);
        assert!(DynamicValue::from_json(&raw).is_err());
    }

    #[test]
    fn wrap_builds_nested_single_key_objects() {
        let wrapped = DynamicValue::Number(60.0).wrap(&["audio", "out", "level"]);
        assert_eq!(wrapped.encode(), r#"{"audio":{"out":{"level":60.0}}}"#);
    }

    #[test]
    fn unwrap_inverts_wrap_for_multi_key_payloads() {
        let value = object(&[
            ("level", DynamicValue::Number(54.0)),
            ("mute", DynamicValue::Bool(false)),
        ]);
        let unwrapped = value.clone().wrap(&["audio", "out"]).unwrap();
        assert_eq!(unwrapped, value);
    }

    #[test]
    fn unwrap_collapses_single_key_value_chains() {
        // A single-key object payload cannot be told apart from an
        // addressing layer, so unwrap falls through both.
        let value = object(&[("x", DynamicValue::Number(1.0))]);
        let unwrapped = value.wrap(&["a"]).unwrap();
        assert_eq!(unwrapped, DynamicValue::Number(1.0));
    }

    #[test]
    fn typed_array_extraction_checks_element_tags() {
        let numbers = DynamicValue::Array(vec![
            DynamicValue::Number(1.0),
            DynamicValue::Number(2.0),
        ]);
        assert_eq!(numbers.as_number_array(), Some(vec![1.0, 2.0]));
        assert_eq!(numbers.as_bool_array(), None);
        assert_eq!(DynamicValue::Number(1.0).as_number_array(), None);
    }
}
