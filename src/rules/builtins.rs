//! Built-in functions callable from rule bodies and queries.
//!
//! Each builtin returns `Ok(Some(value))`, `Ok(None)` for an undefined
//! result, or `Err(message)` when the arguments have the wrong types.

use std::collections::BTreeSet;

use crate::rules::value::{Number, Value};

type BuiltinResult = Result<Option<Value>, String>;

const BUILTINS: &[(&str, usize)] = &[
    ("count", 1),
    ("sum", 1),
    ("product", 1),
    ("max", 1),
    ("min", 1),
    ("sort", 1),
    ("concat", 2),
    ("contains", 2),
    ("startswith", 2),
    ("endswith", 2),
    ("lower", 1),
    ("upper", 1),
    ("trim", 2),
    ("trim_space", 1),
    ("split", 2),
    ("replace", 3),
    ("sprintf", 2),
    ("format_int", 2),
    ("to_number", 1),
    ("abs", 1),
    ("round", 1),
    ("is_string", 1),
    ("is_number", 1),
    ("is_boolean", 1),
    ("is_array", 1),
    ("is_object", 1),
    ("is_null", 1),
    ("is_set", 1),
    ("object.get", 3),
    ("array.concat", 2),
    ("union", 1),
    ("intersection", 1),
];

/// Number of arguments taken by `name`, or `None` for an unknown function.
pub(crate) fn arity(name: &str) -> Option<usize> {
    BUILTINS
        .iter()
        .find(|(builtin, _)| *builtin == name)
        .map(|(_, arity)| *arity)
}

pub(crate) fn call(name: &str, args: &[Value]) -> BuiltinResult {
    match (name, args) {
        ("count", [coll]) => count(coll),
        ("sum", [coll]) => fold_numbers(name, coll, Number::Int(0), Number::add),
        ("product", [coll]) => fold_numbers(name, coll, Number::Int(1), Number::mul),
        ("max", [coll]) => Ok(elements(name, coll)?.into_iter().max()),
        ("min", [coll]) => Ok(elements(name, coll)?.into_iter().min()),
        ("sort", [coll]) => {
            let mut items = elements(name, coll)?;
            items.sort();
            Ok(Some(Value::Array(items)))
        }
        ("concat", [delim, coll]) => {
            let delim = string_arg(name, 1, delim)?;
            let parts = elements(name, coll)?
                .iter()
                .map(|v| string_arg(name, 2, v).map(str::to_string))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(Value::String(parts.join(delim))))
        }
        ("contains", [s, sub]) => {
            let (s, sub) = (string_arg(name, 1, s)?, string_arg(name, 2, sub)?);
            Ok(Some(Value::Bool(s.contains(sub))))
        }
        ("startswith", [s, prefix]) => {
            let (s, prefix) = (string_arg(name, 1, s)?, string_arg(name, 2, prefix)?);
            Ok(Some(Value::Bool(s.starts_with(prefix))))
        }
        ("endswith", [s, suffix]) => {
            let (s, suffix) = (string_arg(name, 1, s)?, string_arg(name, 2, suffix)?);
            Ok(Some(Value::Bool(s.ends_with(suffix))))
        }
        ("lower", [s]) => Ok(Some(Value::String(string_arg(name, 1, s)?.to_lowercase()))),
        ("upper", [s]) => Ok(Some(Value::String(string_arg(name, 1, s)?.to_uppercase()))),
        ("trim", [s, cutset]) => {
            let (s, cutset) = (string_arg(name, 1, s)?, string_arg(name, 2, cutset)?);
            Ok(Some(Value::string(s.trim_matches(|c| cutset.contains(c)))))
        }
        ("trim_space", [s]) => Ok(Some(Value::string(string_arg(name, 1, s)?.trim()))),
        ("split", [s, delim]) => {
            let (s, delim) = (string_arg(name, 1, s)?, string_arg(name, 2, delim)?);
            Ok(Some(Value::Array(s.split(delim).map(Value::string).collect())))
        }
        ("replace", [s, old, new]) => {
            let s = string_arg(name, 1, s)?;
            let (old, new) = (string_arg(name, 2, old)?, string_arg(name, 3, new)?);
            Ok(Some(Value::String(s.replace(old, new))))
        }
        ("sprintf", [format, values]) => {
            let format = string_arg(name, 1, format)?;
            let Value::Array(values) = values else {
                return Err(type_error(name, 2, "array", values));
            };
            sprintf(format, values).map(|s| Some(Value::String(s)))
        }
        ("format_int", [n, base]) => {
            let n = number_arg(name, 1, n)?;
            let base = number_arg(name, 2, base)?;
            let n = n.as_f64().floor() as i64;
            let text = match base.as_i64() {
                Some(2) => format!("{n:b}"),
                Some(8) => format!("{n:o}"),
                Some(10) => format!("{n}"),
                Some(16) => format!("{n:x}"),
                _ => return Err(format!("{name}: base must be one of 2, 8, 10, 16")),
            };
            Ok(Some(Value::String(text)))
        }
        ("to_number", [v]) => match v {
            Value::Null => Ok(Some(Value::from_i64(0))),
            Value::Bool(b) => Ok(Some(Value::from_i64(i64::from(*b)))),
            Value::Number(_) => Ok(Some(v.clone())),
            Value::String(s) => {
                let n = s
                    .parse::<i64>()
                    .map(Number::Int)
                    .or_else(|_| s.parse::<f64>().map(Number::from_f64))
                    .map_err(|_| format!("{name}: invalid syntax `{s}`"))?;
                Ok(Some(Value::Number(n)))
            }
            other => Err(type_error(name, 1, "number, string, boolean or null", other)),
        },
        ("abs", [n]) => {
            let n = match number_arg(name, 1, n)? {
                Number::Int(i) => i.checked_abs().map(Number::Int).unwrap_or(Number::Float((i as f64).abs())),
                Number::Float(f) => Number::from_f64(f.abs()),
            };
            Ok(Some(Value::Number(n)))
        }
        ("round", [n]) => {
            let n = number_arg(name, 1, n)?;
            Ok(Some(Value::Number(Number::from_f64(n.as_f64().round()))))
        }
        ("is_string", [v]) => Ok(Some(Value::Bool(matches!(v, Value::String(_))))),
        ("is_number", [v]) => Ok(Some(Value::Bool(matches!(v, Value::Number(_))))),
        ("is_boolean", [v]) => Ok(Some(Value::Bool(matches!(v, Value::Bool(_))))),
        ("is_array", [v]) => Ok(Some(Value::Bool(matches!(v, Value::Array(_))))),
        ("is_object", [v]) => Ok(Some(Value::Bool(matches!(v, Value::Object(_))))),
        ("is_null", [v]) => Ok(Some(Value::Bool(matches!(v, Value::Null)))),
        ("is_set", [v]) => Ok(Some(Value::Bool(matches!(v, Value::Set(_))))),
        ("object.get", [obj, key, default]) => {
            if !matches!(obj, Value::Object(_)) {
                return Err(type_error(name, 1, "object", obj));
            }
            let found = match key {
                Value::Array(path) => path.iter().try_fold(obj, |node, k| node.get(k)),
                key => obj.get(key),
            };
            Ok(Some(found.cloned().unwrap_or_else(|| default.clone())))
        }
        ("array.concat", [a, b]) => match (a, b) {
            (Value::Array(a), Value::Array(b)) => {
                Ok(Some(Value::Array(a.iter().chain(b).cloned().collect())))
            }
            (Value::Array(_), other) => Err(type_error(name, 2, "array", other)),
            (other, _) => Err(type_error(name, 1, "array", other)),
        },
        ("union", [sets]) => {
            let mut out = BTreeSet::new();
            for set in set_of_sets(name, sets)? {
                out.extend(set.iter().cloned());
            }
            Ok(Some(Value::Set(out)))
        }
        ("intersection", [sets]) => {
            let mut iter = set_of_sets(name, sets)?.into_iter();
            let Some(first) = iter.next() else {
                return Ok(Some(Value::Set(BTreeSet::new())));
            };
            let out = iter.fold(first.clone(), |acc, set| {
                acc.intersection(set).cloned().collect()
            });
            Ok(Some(Value::Set(out)))
        }
        _ => match arity(name) {
            Some(n) => Err(format!("{name}: expects {n} argument(s), got {}", args.len())),
            None => Err(format!("unknown function `{name}`")),
        },
    }
}

fn type_error(name: &str, position: usize, expected: &str, got: &Value) -> String {
    format!(
        "{name}: operand {position} must be {expected} but got {}",
        got.type_name()
    )
}

fn string_arg<'v>(name: &str, position: usize, v: &'v Value) -> Result<&'v str, String> {
    match v {
        Value::String(s) => Ok(s),
        other => Err(type_error(name, position, "string", other)),
    }
}

fn number_arg(name: &str, position: usize, v: &Value) -> Result<Number, String> {
    match v {
        Value::Number(n) => Ok(*n),
        other => Err(type_error(name, position, "number", other)),
    }
}

/// Elements of an array or set.
fn elements(name: &str, coll: &Value) -> Result<Vec<Value>, String> {
    match coll {
        Value::Array(items) => Ok(items.clone()),
        Value::Set(items) => Ok(items.iter().cloned().collect()),
        other => Err(type_error(name, 1, "array or set", other)),
    }
}

fn count(coll: &Value) -> BuiltinResult {
    let n = match coll {
        Value::Array(items) => items.len(),
        Value::Set(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::String(s) => s.chars().count(),
        other => return Err(type_error("count", 1, "collection or string", other)),
    };
    Ok(Some(Value::from_i64(n as i64)))
}

fn fold_numbers(
    name: &str,
    coll: &Value,
    init: Number,
    op: fn(Number, Number) -> Number,
) -> BuiltinResult {
    let mut acc = init;
    for item in elements(name, coll)? {
        match item {
            Value::Number(n) => acc = op(acc, n),
            other => return Err(type_error(name, 1, "collection of numbers", &other)),
        }
    }
    Ok(Some(Value::Number(acc)))
}

fn set_of_sets<'v>(name: &str, v: &'v Value) -> Result<Vec<&'v BTreeSet<Value>>, String> {
    let Value::Set(items) = v else {
        return Err(type_error(name, 1, "set of sets", v));
    };
    items
        .iter()
        .map(|item| match item {
            Value::Set(set) => Ok(set),
            other => Err(type_error(name, 1, "set of sets", other)),
        })
        .collect()
}

/// `%v`, `%s`, `%d`, `%f` and `%%`; strings print without quotes.
fn sprintf(format: &str, values: &[Value]) -> Result<String, String> {
    let mut out = String::new();
    let mut args = values.iter();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let verb = chars.next().ok_or("sprintf: dangling `%`")?;
        if verb == '%' {
            out.push('%');
            continue;
        }
        let arg = args
            .next()
            .ok_or_else(|| format!("sprintf: missing argument for `%{verb}`"))?;
        match (verb, arg) {
            ('s' | 'v', Value::String(s)) => out.push_str(s),
            ('s' | 'v', other) => out.push_str(&other.to_string()),
            ('d', Value::Number(n)) => match n.as_i64() {
                Some(i) => out.push_str(&i.to_string()),
                None => out.push_str(&n.to_string()),
            },
            ('f', Value::Number(n)) => out.push_str(&format!("{:.6}", n.as_f64())),
            (verb, other) => {
                return Err(format!(
                    "sprintf: cannot format {} with `%{verb}`",
                    other.type_name()
                ))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Value {
        Value::string(v)
    }

    fn arr(items: &[i64]) -> Value {
        Value::Array(items.iter().map(|n| Value::from_i64(*n)).collect())
    }

    #[test]
    fn test_aggregates() {
        assert_eq!(call("count", &[arr(&[1, 2, 3])]).unwrap(), Some(Value::from_i64(3)));
        assert_eq!(call("sum", &[arr(&[1, 2, 3])]).unwrap(), Some(Value::from_i64(6)));
        assert_eq!(call("product", &[arr(&[2, 3])]).unwrap(), Some(Value::from_i64(6)));
        assert_eq!(call("max", &[arr(&[4, 9, 2])]).unwrap(), Some(Value::from_i64(9)));
        assert_eq!(call("min", &[arr(&[])]).unwrap(), None);
        assert_eq!(call("sort", &[arr(&[3, 1, 2])]).unwrap(), Some(arr(&[1, 2, 3])));
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            call("concat", &[s(","), Value::Array(vec![s("a"), s("b")])]).unwrap(),
            Some(s("a,b"))
        );
        assert_eq!(call("startswith", &[s("hello"), s("he")]).unwrap(), Some(Value::Bool(true)));
        assert_eq!(call("trim", &[s("--x--"), s("-")]).unwrap(), Some(s("x")));
        assert_eq!(
            call("split", &[s("a.b"), s(".")]).unwrap(),
            Some(Value::Array(vec![s("a"), s("b")]))
        );
        assert_eq!(
            call("sprintf", &[s("%s has %d items (%v)"), Value::Array(vec![s("cart"), Value::from_i64(3), Value::Bool(true)])]).unwrap(),
            Some(s("cart has 3 items (true)"))
        );
        assert_eq!(call("format_int", &[Value::from_i64(255), Value::from_i64(16)]).unwrap(), Some(s("ff")));
    }

    #[test]
    fn test_type_errors() {
        let err = call("upper", &[Value::from_i64(1)]).unwrap_err();
        assert!(err.contains("operand 1 must be string"));
        assert!(call("to_number", &[s("abc")]).is_err());
        assert!(call("nope", &[]).unwrap_err().contains("unknown function"));
        assert!(call("count", &[]).unwrap_err().contains("expects 1"));
    }

    #[test]
    fn test_object_get_and_sets() {
        let obj = Value::from_json(&serde_json::json!({"a": {"b": 1}}));
        assert_eq!(
            call("object.get", &[obj.clone(), Value::Array(vec![s("a"), s("b")]), Value::Null]).unwrap(),
            Some(Value::from_i64(1))
        );
        assert_eq!(call("object.get", &[obj, s("x"), s("d")]).unwrap(), Some(s("d")));

        let set = |items: &[i64]| Value::Set(items.iter().map(|n| Value::from_i64(*n)).collect());
        let sets = Value::Set([set(&[1, 2]), set(&[2, 3])].into_iter().collect());
        assert_eq!(call("union", &[sets.clone()]).unwrap(), Some(set(&[1, 2, 3])));
        assert_eq!(call("intersection", &[sets]).unwrap(), Some(set(&[2])));
    }
}
