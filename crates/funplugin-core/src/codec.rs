//! Call argument decoding and return value encoding.
//!
//! Arguments travel as a JSON array of positional values. Return values are
//! encoded by type:
//!
//! ```text
//! Integer / Float        -> decimal text        (42, 3.5, 7.0, 1e+300)
//! Text / List / Mapping  -> JSON                ("a1b", ["a","b"], {"k":1})
//! anything else          -> UnsupportedReturnType
//! ```
//!
//! `null` and booleans are not encodable return values, even though they are
//! accepted as arguments.

use crate::{PluginError, Result};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Decode an argument payload into positional values.
pub fn decode_args(payload: &[u8]) -> Result<Vec<Value>> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| PluginError::MalformedArguments {
            message: e.to_string(),
        })?;

    match value {
        Value::Array(args) => Ok(args),
        other => Err(PluginError::MalformedArguments {
            message: format!("expected an argument list, got {}", json_type_name(&other)),
        }),
    }
}

/// Encode positional values as an argument payload.
pub fn encode_args(args: &[Value]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(args)?)
}

/// A value returned by a registered function.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnValue {
    Integer(i128),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Mapping(Map<String, Value>),
    /// A value outside the encodable set, tagged with its type name.
    Unsupported { type_name: String },
}

impl ReturnValue {
    /// Classify a JSON value.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ReturnValue::Integer(i128::from(i))
                } else if let Some(u) = n.as_u64() {
                    ReturnValue::Integer(i128::from(u))
                } else {
                    ReturnValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => ReturnValue::Text(s),
            Value::Array(items) => ReturnValue::List(items),
            Value::Object(map) => ReturnValue::Mapping(map),
            Value::Null => Self::unsupported("null"),
            Value::Bool(_) => Self::unsupported("bool"),
        }
    }

    pub fn unsupported(type_name: impl Into<String>) -> Self {
        ReturnValue::Unsupported {
            type_name: type_name.into(),
        }
    }

    /// Name of the value's type, as reported in errors and logs.
    pub fn type_name(&self) -> &str {
        match self {
            ReturnValue::Integer(_) => "int",
            ReturnValue::Float(_) => "float",
            ReturnValue::Text(_) => "str",
            ReturnValue::List(_) => "list",
            ReturnValue::Mapping(_) => "dict",
            ReturnValue::Unsupported { type_name } => type_name,
        }
    }
}

/// Encode a return value into its transport payload.
pub fn encode_return(value: &ReturnValue) -> Result<Vec<u8>> {
    match value {
        ReturnValue::Integer(i) => Ok(i.to_string().into_bytes()),
        ReturnValue::Float(f) => format_float(*f)
            .map(String::into_bytes)
            .ok_or_else(|| PluginError::UnsupportedReturnType {
                type_name: format!("float({})", f),
            }),
        ReturnValue::Text(s) => Ok(serde_json::to_vec(s)?),
        ReturnValue::List(items) => Ok(serde_json::to_vec(items)?),
        ReturnValue::Mapping(map) => Ok(serde_json::to_vec(map)?),
        ReturnValue::Unsupported { type_name } => Err(PluginError::UnsupportedReturnType {
            type_name: type_name.clone(),
        }),
    }
}

/// Magnitudes in `[PLAIN_FLOAT_MIN, PLAIN_FLOAT_MAX)` are written positionally.
const PLAIN_FLOAT_MIN: f64 = 1e-4;
const PLAIN_FLOAT_MAX: f64 = 1e16;

/// Shortest round-trip text.
///
/// Whole numbers keep a `.0` suffix. Magnitudes outside the plain window use
/// exponent form with a signed, two-digit exponent: `1e+300`, `1.5e-07`.
fn format_float(value: f64) -> Option<String> {
    if !value.is_finite() {
        return None;
    }

    let magnitude = value.abs();
    if magnitude != 0.0 && !(PLAIN_FLOAT_MIN..PLAIN_FLOAT_MAX).contains(&magnitude) {
        let text = format!("{:e}", value);
        let (mantissa, exponent) = text.split_once('e')?;
        let exponent: i32 = exponent.parse().ok()?;
        let sign = if exponent < 0 { '-' } else { '+' };
        return Some(format!("{}e{}{:02}", mantissa, sign, exponent.unsigned_abs()));
    }

    let text = value.to_string();
    if text.contains('.') {
        Some(text)
    } else {
        Some(format!("{}.0", text))
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

macro_rules! impl_from_integer {
    ($($t:ty),*) => {
        $(
            impl From<$t> for ReturnValue {
                fn from(v: $t) -> Self {
                    ReturnValue::Integer(i128::from(v))
                }
            }
        )*
    };
}

impl_from_integer!(i8, i16, i32, i64, u8, u16, u32, u64);

impl From<f64> for ReturnValue {
    fn from(v: f64) -> Self {
        ReturnValue::Float(v)
    }
}

impl From<f32> for ReturnValue {
    fn from(v: f32) -> Self {
        ReturnValue::Float(f64::from(v))
    }
}

impl From<String> for ReturnValue {
    fn from(v: String) -> Self {
        ReturnValue::Text(v)
    }
}

impl From<&str> for ReturnValue {
    fn from(v: &str) -> Self {
        ReturnValue::Text(v.to_string())
    }
}

impl From<Value> for ReturnValue {
    fn from(v: Value) -> Self {
        ReturnValue::from_json(v)
    }
}

impl From<Map<String, Value>> for ReturnValue {
    fn from(v: Map<String, Value>) -> Self {
        ReturnValue::Mapping(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for ReturnValue {
    fn from(v: Vec<T>) -> Self {
        ReturnValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<HashMap<String, T>> for ReturnValue {
    fn from(v: HashMap<String, T>) -> Self {
        ReturnValue::Mapping(v.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<Value>> From<BTreeMap<String, T>> for ReturnValue {
    fn from(v: BTreeMap<String, T>) -> Self {
        ReturnValue::Mapping(v.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl From<bool> for ReturnValue {
    fn from(_: bool) -> Self {
        ReturnValue::unsupported("bool")
    }
}

impl From<()> for ReturnValue {
    fn from(_: ()) -> Self {
        ReturnValue::unsupported("null")
    }
}

impl<T: Into<ReturnValue>> From<Option<T>> for ReturnValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => ReturnValue::unsupported("null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encoded(value: impl Into<ReturnValue>) -> String {
        String::from_utf8(encode_return(&value.into()).unwrap()).unwrap()
    }

    #[test]
    fn test_decode_args_list() {
        let args = decode_args(br#"["a", 1, "b", true, null, {"k": [1, 2]}]"#).unwrap();
        assert_eq!(args.len(), 6);
        assert_eq!(args[0], json!("a"));
        assert_eq!(args[3], json!(true));
        assert_eq!(args[5], json!({"k": [1, 2]}));
    }

    #[test]
    fn test_decode_args_empty_list() {
        assert!(decode_args(b"[]").unwrap().is_empty());
    }

    #[test]
    fn test_decode_args_rejects_invalid_json() {
        let err = decode_args(b"[1, 2").unwrap_err();
        assert!(matches!(err, PluginError::MalformedArguments { .. }));
    }

    #[test]
    fn test_decode_args_rejects_non_list() {
        let err = decode_args(br#"{"a": 1}"#).unwrap_err();
        match err {
            PluginError::MalformedArguments { message } => assert!(message.contains("mapping")),
            other => panic!("Expected MalformedArguments, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_args_rejects_invalid_utf8() {
        assert!(decode_args(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_encode_numbers_as_decimal_text() {
        assert_eq!(encoded(42), "42");
        assert_eq!(encoded(-7i64), "-7");
        assert_eq!(encoded(u64::MAX), "18446744073709551615");
        assert_eq!(encoded(3.5), "3.5");
        assert_eq!(encoded(7.0), "7.0");
        assert_eq!(encoded(0.1), "0.1");
    }

    #[test]
    fn test_encode_extreme_floats_in_exponent_form() {
        assert_eq!(encoded(1e300), "1e+300");
        assert_eq!(encoded(-2.5e20), "-2.5e+20");
        assert_eq!(encoded(1e16), "1e+16");
        assert_eq!(encoded(1.5e-7), "1.5e-07");
        assert_eq!(encoded(1e-5), "1e-05");

        assert_eq!(encoded(9999999999999998.0), "9999999999999998.0");
        assert_eq!(encoded(0.0001), "0.0001");
        assert_eq!(encoded(0.0), "0.0");

        // Still valid JSON numbers.
        let parsed: f64 = serde_json::from_str(&encoded(1e300)).unwrap();
        assert_eq!(parsed, 1e300);
    }

    #[test]
    fn test_encode_non_finite_float_fails() {
        let err = encode_return(&ReturnValue::Float(f64::NAN)).unwrap_err();
        assert!(matches!(err, PluginError::UnsupportedReturnType { .. }));
    }

    #[test]
    fn test_encode_structured_values_as_json() {
        assert_eq!(encoded("a1b"), r#""a1b""#);
        assert_eq!(encoded(vec!["a", "b"]), r#"["a","b"]"#);

        let mut map = BTreeMap::new();
        map.insert("total".to_string(), 3);
        assert_eq!(encoded(map), r#"{"total":3}"#);

        let decoded: Value = serde_json::from_str(&encoded(vec!["a", "b"])).unwrap();
        assert_eq!(decoded, json!(["a", "b"]));
    }

    #[test]
    fn test_null_and_bool_are_unsupported() {
        for value in [ReturnValue::from(()), ReturnValue::from(true), ReturnValue::from(json!(null))] {
            let err = encode_return(&value).unwrap_err();
            assert!(matches!(err, PluginError::UnsupportedReturnType { .. }));
        }

        let err = encode_return(&ReturnValue::from(false)).unwrap_err();
        assert!(err.to_string().contains("bool"));
    }

    #[test]
    fn test_from_json_classification() {
        assert_eq!(ReturnValue::from_json(json!(5)), ReturnValue::Integer(5));
        assert_eq!(ReturnValue::from_json(json!(2.5)), ReturnValue::Float(2.5));
        assert_eq!(ReturnValue::from_json(json!("s")).type_name(), "str");
        assert_eq!(ReturnValue::from_json(json!([1])).type_name(), "list");
        assert_eq!(ReturnValue::from_json(json!({})).type_name(), "dict");
        assert_eq!(ReturnValue::from_json(json!(null)).type_name(), "null");
    }

    #[test]
    fn test_option_return() {
        assert_eq!(ReturnValue::from(Some(3)), ReturnValue::Integer(3));
        assert_eq!(ReturnValue::from(None::<i64>).type_name(), "null");
    }

    #[test]
    fn test_encode_args_is_a_json_list() {
        let payload = encode_args(&[json!(3), json!(4)]).unwrap();
        assert_eq!(payload, b"[3,4]");
        assert_eq!(decode_args(&payload).unwrap(), vec![json!(3), json!(4)]);
    }
}
