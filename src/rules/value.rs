//! Document values for rule evaluation.
//!
//! Like JSON, plus sets and objects with non-string keys. Values have a total
//! order (null < bool < number < string < array < object < set) so they can
//! live in sets and be compared with `<`.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(f) => f,
        }
    }

    /// Integral value, if the number has no fractional part.
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Number::Int(n) => Some(n),
            Number::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e18 => Some(f as i64),
            Number::Float(_) => None,
        }
    }

    /// Normalize integral floats to ints.
    pub fn from_f64(f: f64) -> Number {
        if f.fract() == 0.0 && f.abs() < 9.0e18 {
            Number::Int(f as i64)
        } else {
            Number::Float(f)
        }
    }

    pub fn add(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a
                .checked_add(b)
                .map(Number::Int)
                .unwrap_or_else(|| Number::Float(a as f64 + b as f64)),
            (a, b) => Number::from_f64(a.as_f64() + b.as_f64()),
        }
    }

    pub fn sub(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a
                .checked_sub(b)
                .map(Number::Int)
                .unwrap_or_else(|| Number::Float(a as f64 - b as f64)),
            (a, b) => Number::from_f64(a.as_f64() - b.as_f64()),
        }
    }

    pub fn mul(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a
                .checked_mul(b)
                .map(Number::Int)
                .unwrap_or_else(|| Number::Float(a as f64 * b as f64)),
            (a, b) => Number::from_f64(a.as_f64() * b.as_f64()),
        }
    }

    pub fn div(self, other: Number) -> Result<Number, String> {
        if other.as_f64() == 0.0 {
            return Err("divide by zero".into());
        }
        match (self, other) {
            (Number::Int(a), Number::Int(b)) if a % b == 0 => Ok(Number::Int(a / b)),
            (a, b) => Ok(Number::from_f64(a.as_f64() / b.as_f64())),
        }
    }

    pub fn rem(self, other: Number) -> Result<Number, String> {
        match (self.as_i64(), other.as_i64()) {
            (Some(_), Some(0)) => Err("modulo by zero".into()),
            (Some(a), Some(b)) => Ok(Number::Int(a % b)),
            _ => Err("modulo on floating-point number".into()),
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Number {}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a.cmp(b),
            (a, b) => a.as_f64().total_cmp(&b.as_f64()),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(n) => write!(f, "{n}"),
            Number::Float(x) => write!(f, "{x}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<Value, Value>),
    Set(BTreeSet<Value>),
}

impl Value {
    pub fn empty_object() -> Value {
        Value::Object(BTreeMap::new())
    }

    pub fn from_i64(n: i64) -> Value {
        Value::Number(Number::Int(n))
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::String(s.into())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Set(_) => "set",
        }
    }

    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::from_i64(i),
                None => Value::Number(Number::from_f64(n.as_f64().unwrap_or(f64::NAN))),
            },
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (Value::String(k.clone()), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Value, serde_json::Error> {
        let json: JsonValue = serde_json::from_str(text)?;
        Ok(Value::from_json(&json))
    }

    /// Sets become sorted arrays; non-string object keys are rendered as
    /// their JSON text.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Number(Number::Int(n)) => JsonValue::from(*n),
            Value::Number(Number::Float(f)) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Set(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| {
                        let key = match k {
                            Value::String(s) => s.clone(),
                            other => other.to_json().to_string(),
                        };
                        (key, v.to_json())
                    })
                    .collect(),
            ),
        }
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        match (self, key) {
            (Value::Object(map), key) => map.get(key),
            (Value::Array(items), Value::Number(n)) => {
                n.as_i64().and_then(|i| usize::try_from(i).ok()).and_then(|i| items.get(i))
            }
            (Value::Set(items), key) => items.get(key),
            _ => None,
        }
    }

    /// Walk string keys from this value.
    pub fn get_path(&self, path: &[String]) -> Option<&Value> {
        path.iter().try_fold(self, |node, key| match node {
            Value::Object(map) => map.get(&Value::String(key.clone())),
            _ => None,
        })
    }

    /// Deep merge: nested objects merge recursively; anything else is
    /// replaced by `patch`.
    pub fn merge(&mut self, patch: Value) {
        match (self, patch) {
            (Value::Object(base), Value::Object(patch)) => {
                for (k, v) in patch {
                    match base.get_mut(&k) {
                        Some(existing) => existing.merge(v),
                        None => {
                            base.insert(k, v);
                        }
                    }
                }
            }
            (slot, patch) => *slot = patch,
        }
    }

    /// Replace the value under the string path `at`, creating objects
    /// along the way.
    pub fn set_path(&mut self, at: &[String], value: Value) {
        let Some((first, rest)) = at.split_first() else {
            *self = value;
            return;
        };
        if !matches!(self, Value::Object(_)) {
            *self = Value::empty_object();
        }
        if let Value::Object(map) = self {
            map.entry(Value::String(first.clone()))
                .or_insert_with(Value::empty_object)
                .set_path(rest, value);
        }
    }

    /// Merge `patch` under the string path `at`, creating objects along the way.
    pub fn merge_at(&mut self, at: &[String], patch: Value) {
        let Some((first, rest)) = at.split_first() else {
            self.merge(patch);
            return;
        };
        if !matches!(self, Value::Object(_)) {
            *self = Value::empty_object();
        }
        if let Value::Object(map) = self {
            map.entry(Value::String(first.clone()))
                .or_insert_with(Value::empty_object)
                .merge_at(rest, patch);
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
