//! Built-in scalars and their output coercion.
use serde_json_bytes::Value;

pub(crate) const ID: &str = "ID";
pub(crate) const STRING: &str = "String";
pub(crate) const INT: &str = "Int";
pub(crate) const FLOAT: &str = "Float";
pub(crate) const BOOLEAN: &str = "Boolean";
pub(crate) const DATE: &str = "Date";
pub(crate) const JSON: &str = "JSON";

const BUILTIN: [&str; 7] = [ID, STRING, INT, FLOAT, BOOLEAN, DATE, JSON];

pub(crate) fn is_builtin(name: &str) -> bool {
    BUILTIN.contains(&name)
}

/// Coerces a resolved value to the scalar `name`.
///
/// Coercion is lenient: upstream services are not always precise about their types, so
/// numbers are accepted as strings and vice versa when the conversion is lossless.
pub(crate) fn coerce_output(name: &str, value: Value) -> Result<Value, String> {
    match name {
        INT => coerce_int(value),
        FLOAT => coerce_float(value),
        STRING | ID => coerce_string(name, value),
        BOOLEAN => coerce_boolean(value),
        DATE => match value {
            Value::String(_) | Value::Number(_) => Ok(value),
            other => Err(invalid(DATE, &other)),
        },
        _ => Ok(value),
    }
}

fn invalid(name: &str, value: &Value) -> String {
    format!("{name} cannot represent value: {value}")
}

fn coerce_int(value: Value) -> Result<Value, String> {
    match &value {
        Value::Number(n) if n.is_i64() || n.is_u64() => {
            match n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Some(i) => Ok(Value::from(i)),
                None => Err(invalid(INT, &value)),
            }
        }
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f >= i32::MIN as f64 && f <= i32::MAX as f64 => {
                Ok(Value::from(f as i32))
            }
            _ => Err(invalid(INT, &value)),
        },
        Value::String(s) => s
            .as_str()
            .parse::<i32>()
            .map(Value::from)
            .map_err(|_| invalid(INT, &value)),
        Value::Bool(b) => Ok(Value::from(i32::from(*b))),
        _ => Err(invalid(INT, &value)),
    }
}

fn coerce_float(value: Value) -> Result<Value, String> {
    let float = match &value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.as_str().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    float
        .filter(|f| f.is_finite())
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| invalid(FLOAT, &value))
}

fn coerce_string(name: &str, value: Value) -> Result<Value, String> {
    match value {
        Value::String(_) => Ok(value),
        Value::Number(n) => Ok(Value::from(n.to_string())),
        Value::Bool(b) => Ok(Value::from(b.to_string())),
        other => Err(invalid(name, &other)),
    }
}

fn coerce_boolean(value: Value) -> Result<Value, String> {
    match &value {
        Value::Bool(_) => Ok(value),
        Value::Number(n) => Ok(Value::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
        Value::String(s) => match s.as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(invalid(BOOLEAN, &value)),
        },
        _ => Err(invalid(BOOLEAN, &value)),
    }
}
