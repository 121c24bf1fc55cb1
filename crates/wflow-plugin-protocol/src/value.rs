//! Tagged values carried across the plugin boundary.
//!
//! Host and plugin both work with `serde_json::Value` internally. At the
//! boundary every value is converted into an explicit [`WireValue`] so the
//! kind of each value is visible on the wire and conversion failures surface
//! as errors instead of silently degraded data.
//!
//! Numbers are carried as 64-bit floats. Integers therefore arrive on the
//! other side as floating-point numbers; `30` becomes `30.0`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// String-keyed map of JSON values used for configuration and step data.
pub type ValueMap = serde_json::Map<String, serde_json::Value>;

/// String-keyed map of wire values.
pub type WireMap = BTreeMap<String, WireValue>;

/// Explicitly tagged dynamic value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum WireValue {
    /// Absent value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Floating-point number.
    Number(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered list of values.
    List(Vec<Self>),
    /// String-keyed map of values.
    Map(WireMap),
}

/// Errors raised while converting values at the boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    /// A number has no finite floating-point representation.
    #[error("number at '{path}' cannot be represented: {detail}")]
    UnrepresentableNumber {
        /// Location of the offending value.
        path: String,
        /// Human-readable description of the number.
        detail: String,
    },
}

/// Converts a JSON value into its tagged wire form.
///
/// # Errors
///
/// Returns [`ValueError::UnrepresentableNumber`] when a number cannot be
/// expressed as a finite `f64`.
pub fn encode(value: &serde_json::Value) -> Result<WireValue, ValueError> {
    encode_at(value, "$")
}

/// Converts a tagged wire value back into JSON.
///
/// # Errors
///
/// Returns [`ValueError::UnrepresentableNumber`] for NaN or infinite numbers,
/// which JSON cannot carry.
pub fn decode(value: &WireValue) -> Result<serde_json::Value, ValueError> {
    decode_at(value, "$")
}

/// Encodes every entry of a JSON map.
///
/// # Errors
///
/// Propagates the first conversion failure.
pub fn encode_map(map: &ValueMap) -> Result<WireMap, ValueError> {
    map.iter()
        .map(|(key, value)| Ok((key.clone(), encode_at(value, &child_path("$", key))?)))
        .collect()
}

/// Decodes every entry of a wire map.
///
/// # Errors
///
/// Propagates the first conversion failure.
pub fn decode_map(map: &WireMap) -> Result<ValueMap, ValueError> {
    map.iter()
        .map(|(key, value)| Ok((key.clone(), decode_at(value, &child_path("$", key))?)))
        .collect()
}

fn encode_at(value: &serde_json::Value, path: &str) -> Result<WireValue, ValueError> {
    Ok(match value {
        serde_json::Value::Null => WireValue::Null,
        serde_json::Value::Bool(flag) => WireValue::Bool(*flag),
        serde_json::Value::Number(number) => match number.as_f64() {
            Some(float) if float.is_finite() => WireValue::Number(float),
            _ => {
                return Err(ValueError::UnrepresentableNumber {
                    path: path.to_owned(),
                    detail: number.to_string(),
                });
            }
        },
        serde_json::Value::String(text) => WireValue::String(text.clone()),
        serde_json::Value::Array(items) => WireValue::List(
            items
                .iter()
                .enumerate()
                .map(|(index, item)| encode_at(item, &format!("{path}[{index}]")))
                .collect::<Result<_, _>>()?,
        ),
        serde_json::Value::Object(map) => WireValue::Map(
            map.iter()
                .map(|(key, item)| Ok((key.clone(), encode_at(item, &child_path(path, key))?)))
                .collect::<Result<_, ValueError>>()?,
        ),
    })
}

fn decode_at(value: &WireValue, path: &str) -> Result<serde_json::Value, ValueError> {
    Ok(match value {
        WireValue::Null => serde_json::Value::Null,
        WireValue::Bool(flag) => serde_json::Value::Bool(*flag),
        WireValue::Number(float) => serde_json::Number::from_f64(*float)
            .map(serde_json::Value::Number)
            .ok_or_else(|| ValueError::UnrepresentableNumber {
                path: path.to_owned(),
                detail: float.to_string(),
            })?,
        WireValue::String(text) => serde_json::Value::String(text.clone()),
        WireValue::List(items) => serde_json::Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(index, item)| decode_at(item, &format!("{path}[{index}]")))
                .collect::<Result<_, _>>()?,
        ),
        WireValue::Map(map) => serde_json::Value::Object(
            map.iter()
                .map(|(key, item)| Ok((key.clone(), decode_at(item, &child_path(path, key))?)))
                .collect::<Result<_, ValueError>>()?,
        ),
    })
}

fn child_path(parent: &str, key: &str) -> String {
    format!("{parent}.{key}")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[test]
    fn integers_cross_the_boundary_as_floats() {
        let wire = encode(&json!({"timeout": 30})).expect("encode");
        let WireValue::Map(map) = &wire else {
            panic!("expected map, got {wire:?}");
        };
        assert_eq!(map.get("timeout"), Some(&WireValue::Number(30.0)));

        let back = decode(&wire).expect("decode");
        assert_eq!(back, json!({"timeout": 30.0}));
    }

    #[test]
    fn nested_structures_survive_conversion() {
        let original = json!({
            "name": "fetch",
            "enabled": true,
            "tags": ["a", "b", null],
            "limits": {"rate": 2.5, "burst": {"max": 10.0}}
        });
        let back = decode(&encode(&original).expect("encode")).expect("decode");
        assert_eq!(back, original);
    }

    #[rstest]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    #[case(f64::NEG_INFINITY)]
    fn non_finite_numbers_are_rejected_on_decode(#[case] float: f64) {
        let mut map = WireMap::new();
        map.insert(
            "items".to_owned(),
            WireValue::List(vec![WireValue::Number(float)]),
        );
        let error = decode_map(&map).expect_err("non-finite number must fail");
        let ValueError::UnrepresentableNumber { path, .. } = error;
        assert_eq!(path, "$.items[0]");
    }

    #[test]
    fn wire_values_are_explicitly_tagged() {
        let text = serde_json::to_string(&WireValue::String("x".to_owned())).expect("serialise");
        assert_eq!(text, r#"{"kind":"string","value":"x"}"#);
        let null = serde_json::to_string(&WireValue::Null).expect("serialise");
        assert_eq!(null, r#"{"kind":"null"}"#);
    }
}
