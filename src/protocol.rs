use crate::error::{Result, SscError};
use crate::value::DynamicValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default SSC control port
pub const DEFAULT_PORT: u16 = 45;

/// Value type reported by a limits query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Number,
    String,
    Boolean,
}

/// Leaf metadata returned by a limits query
///
/// Every key is optional; devices only report what applies to the
/// parameter in question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(rename = "type")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ValueType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    /// Adjustment increment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inc: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub writeable: Option<bool>,

    /// Whether the parameter supports subscriptions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscr: Option<bool>,

    #[serde(rename = "const")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constant: Option<bool>,

    /// Enumerated allowed values for string parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option: Option<Vec<String>>,

    /// Element count for array parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

/// Build a value read command: the address envelope with `null` at the leaf,
/// e.g. `{"audio":{"out":{"level":null}}}`
pub fn read_command<S: AsRef<str>>(path: &[S]) -> String {
    DynamicValue::Null.wrap(path).encode()
}

/// Build a value write command: the address envelope carrying the new value,
/// e.g. `{"audio":{"out":{"level":60.0}}}`
pub fn write_command<S: AsRef<str>>(path: &[S], value: &DynamicValue) -> String {
    value.clone().wrap(path).encode()
}

/// Build a value write command from a plain JSON payload.
///
/// Typed-state writes use this directly: a Q array can mix numbers and
/// switches, which the homogeneous value model does not carry.
pub fn write_json_command<S: AsRef<str>>(path: &[S], value: &Value) -> String {
    let mut node = value.clone();
    for segment in path.iter().rev() {
        node = serde_json::json!({ segment.as_ref(): node });
    }
    node.to_string()
}

/// Build a schema query for the children under `path`
pub fn schema_command<S: AsRef<str>>(path: &[S]) -> String {
    let address = DynamicValue::Null.wrap(path).to_json();
    serde_json::json!({"osc": {"schema": [address]}}).to_string()
}

/// Build a limits query for the leaf at `path`
pub fn limits_command<S: AsRef<str>>(path: &[S]) -> String {
    let address = DynamicValue::Null.wrap(path).to_json();
    serde_json::json!({"osc": {"limits": [address]}}).to_string()
}

/// Classify a protocol-level error reply.
///
/// Error replies begin with the `{"osc":{"error"` envelope; code 404 means
/// the address does not exist, 400 that the command was not understood.
/// Returns `None` for well-formed non-error replies, which the caller
/// decodes itself.
pub fn classify_error(reply: &str) -> Option<SscError> {
    let trimmed = reply.trim_start();
    if !trimmed.starts_with(r#"{"osc":{"error""#) {
        return None;
    }
    if trimmed.contains("404") {
        Some(SscError::AddressNotFound)
    } else if trimmed.contains("400") {
        Some(SscError::MessageNotUnderstood)
    } else {
        None
    }
}

fn descend<'a>(mut value: &'a Value, path: &[String]) -> Result<&'a Value> {
    for segment in path {
        value = value.get(segment).ok_or_else(|| {
            SscError::MalformedResponse(format!("reply is missing '{segment}'"))
        })?;
    }
    Ok(value)
}

/// Extract the raw value at `path` from a read or write reply
pub fn parse_value_reply(text: &str, path: &[String]) -> Result<Value> {
    let reply: Value = serde_json::from_str(text)?;
    Ok(descend(&reply, path)?.clone())
}

/// Navigate an `osc/schema` or `osc/limits` reply to the sub-value for `path`.
///
/// Both replies wrap their result in a single-element list mirroring the
/// list argument of the query.
fn parse_query_reply(text: &str, kind: &str, path: &[String]) -> Result<Value> {
    let reply: Value = serde_json::from_str(text)?;
    let list = reply
        .get("osc")
        .and_then(|osc| osc.get(kind))
        .and_then(Value::as_array)
        .ok_or_else(|| SscError::MalformedResponse(format!("no osc/{kind} list in reply")))?;
    let first = list
        .first()
        .ok_or_else(|| SscError::MalformedResponse(format!("empty osc/{kind} list")))?;
    Ok(descend(first, path)?.clone())
}

/// Extract the children map from a schema reply: one key per addressable
/// child, `null` for a leaf, `{}` for a further expandable branch
pub fn parse_schema_reply(text: &str, path: &[String]) -> Result<serde_json::Map<String, Value>> {
    parse_query_reply(text, "schema", path)?
        .as_object()
        .cloned()
        .ok_or_else(|| SscError::MalformedResponse("schema reply is not an object".to_string()))
}

/// Extract and deserialize the limits object from a limits reply
pub fn parse_limits_reply(text: &str, path: &[String]) -> Result<Limits> {
    let raw = parse_query_reply(text, "limits", path)?;
    if !raw.is_object() {
        return Err(SscError::MalformedResponse(
            "limits reply is not an object".to_string(),
        ));
    }
    serde_json::from_value(raw)
        .map_err(|e| SscError::MalformedResponse(format!("bad limits object: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments(path: &[&str]) -> Vec<String> {
        path.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn read_command_places_null_at_the_leaf() {
        assert_eq!(
            read_command(&["audio", "out", "mute"]),
            r#"{"audio":{"out":{"mute":null}}}"#
        );
    }

    #[test]
    fn write_command_carries_the_value() {
        assert_eq!(
            write_command(&["audio", "out", "level"], &DynamicValue::Number(60.0)),
            r#"{"audio":{"out":{"level":60.0}}}"#
        );
    }

    #[test]
    fn json_write_command_keeps_mixed_arrays() {
        let payload = serde_json::json!([0.7, true]);
        assert_eq!(
            write_json_command(&["audio", "out", "eq2", "q"], &payload),
            r#"{"audio":{"out":{"eq2":{"q":[0.7,true]}}}}"#
        );
    }

    #[test]
    fn schema_command_wraps_the_address_in_a_list() {
        assert_eq!(
            schema_command(&["audio"]),
            r#"{"osc":{"schema":[{"audio":null}]}}"#
        );
        // Root query addresses the whole namespace
        let empty: [&str; 0] = [];
        assert_eq!(schema_command(&empty), r#"{"osc":{"schema":[null]}}"#);
    }

    #[test]
    fn error_replies_are_classified_by_code() {
        assert!(matches!(
            classify_error(r#"{"osc":{"error":{"code":404}}}"#),
            Some(SscError::AddressNotFound)
        ));
        assert!(matches!(
            classify_error(r#"{"osc":{"error":{"code":400}}}"#),
            Some(SscError::MessageNotUnderstood)
        ));
        assert!(classify_error(r#"{"audio":{"out":{"level":54.0}}}"#).is_none());
    }

    #[test]
    fn limits_reply_parses_optional_keys() {
        let text = r#"{"osc":{"limits":[{"audio":{"out":{"level":{
            "type":"Number","units":"dB","min":0.0,"max":120.0,"inc":0.5,"writeable":true
        }}}}]}}"#;
        let limits = parse_limits_reply(text, &segments(&["audio", "out", "level"])).unwrap();
        assert_eq!(limits.value_type, Some(ValueType::Number));
        assert_eq!(limits.units.as_deref(), Some("dB"));
        assert_eq!(limits.max, Some(120.0));
        assert_eq!(limits.writeable, Some(true));
        assert_eq!(limits.option, None);
    }

    #[test]
    fn malformed_schema_reply_is_rejected() {
        let err =
            parse_schema_reply(r#"{"osc":{"schema":"nope"}}"#, &segments(&[])).unwrap_err();
        assert!(matches!(err, SscError::MalformedResponse(_)));
    }
}
