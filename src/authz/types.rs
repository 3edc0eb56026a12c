use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::authz::errors::AuthzError;

/// Reference to an entity: `Type::"id"`, e.g. `User::"alice"`.
/// The type may be namespaced: `App::Photo::"vacation.jpg"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityUid {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityUid {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }

    /// Parse the textual literal form. Surrounding whitespace is ignored.
    pub fn parse(literal: &str) -> Result<Self, AuthzError> {
        crate::authz::condition::parse_entity_literal(literal.trim()).map_err(|e| {
            AuthzError::InvalidEntity {
                literal: literal.trim().to_string(),
                reason: e.to_string(),
            }
        })
    }

    /// Read a uid from its JSON forms: `{"type": .., "id": ..}`,
    /// `{"__entity": {"type": .., "id": ..}}` or the literal string `Type::"id"`.
    pub fn from_json(value: &JsonValue) -> Result<Self, String> {
        match value {
            JsonValue::String(s) => EntityUid::parse(s).map_err(|e| e.to_string()),
            JsonValue::Object(map) => {
                if let Some(inner) = map.get("__entity") {
                    return EntityUid::from_json(inner);
                }
                let ty = map
                    .get("type")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| format!("entity uid is missing `type`: {value}"))?;
                let id = map
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| format!("entity uid is missing `id`: {value}"))?;
                if ty.is_empty() || id.is_empty() {
                    return Err(format!("entity uid has an empty type or id: {value}"));
                }
                Ok(EntityUid::new(ty, id))
            }
            other => Err(format!("expected an entity uid, got {other}")),
        }
    }
}

impl FromStr for EntityUid {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityUid::parse(s)
    }
}

impl fmt::Display for EntityUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::\"{}\"", self.entity_type, escape(&self.entity_id))
    }
}

/// Escape a string for inclusion between double quotes in policy text.
pub(crate) fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out
}

/// Runtime value produced while evaluating policy conditions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Value {
    Bool(bool),
    Long(i64),
    String(String),
    Entity(EntityUid),
    Set(BTreeSet<Value>),
    Record(BTreeMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Long(_) => "long",
            Value::String(_) => "string",
            Value::Entity(_) => "entity",
            Value::Set(_) => "set",
            Value::Record(_) => "record",
        }
    }

    /// Convert a JSON value into a runtime value. Arrays become sets; an
    /// object with a single `__entity` key becomes an entity reference.
    pub fn from_json(value: &JsonValue) -> Result<Self, String> {
        match value {
            JsonValue::Null => Err("null is not a valid attribute value".into()),
            JsonValue::Bool(b) => Ok(Value::Bool(*b)),
            JsonValue::Number(n) => n
                .as_i64()
                .map(Value::Long)
                .ok_or_else(|| format!("only integer numbers are supported, got {n}")),
            JsonValue::String(s) => Ok(Value::String(s.clone())),
            JsonValue::Array(items) => items
                .iter()
                .map(Value::from_json)
                .collect::<Result<BTreeSet<_>, _>>()
                .map(Value::Set),
            JsonValue::Object(map) => {
                if map.len() == 1 {
                    if let Some(uid) = map.get("__entity") {
                        return EntityUid::from_json(uid).map(Value::Entity);
                    }
                }
                map.iter()
                    .map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
                    .collect::<Result<BTreeMap<_, _>, _>>()
                    .map(Value::Record)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Long(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "\"{}\"", escape(s)),
            Value::Entity(uid) => write!(f, "{uid}"),
            Value::Set(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Record(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{}\": {v}", escape(k))?;
                }
                write!(f, "}}")
            }
        }
    }
}

// ---------- Policy domain types ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Permit,
    Forbid,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Permit => write!(f, "permit"),
            Effect::Forbid => write!(f, "forbid"),
        }
    }
}

/// One of the three scope clauses of a policy head.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeConstraint {
    /// Bare `principal` / `action` / `resource`: matches anything.
    Any,
    Eq(EntityUid),
    In(EntityUid),
    /// `action in [A, B]`
    InSet(Vec<EntityUid>),
    Is(String),
    IsIn(String, EntityUid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    When,
    Unless,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub kind: ConditionKind,
    pub expr: crate::authz::condition::Expr,
}

/// A parsed `permit` / `forbid` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    pub id: String,
    /// Annotations in source order, `@id` included.
    pub annotations: Vec<(String, String)>,
    pub effect: Effect,
    pub principal: ScopeConstraint,
    pub action: ScopeConstraint,
    pub resource: ScopeConstraint,
    pub conditions: Vec<Condition>,
}

impl Policy {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// An authorization request with already-parsed parts.
///
/// The context keeps its JSON form. Fields are converted to [`Value`]s only
/// when a condition reads them, so a field with no runtime representation
/// (`null`, a fractional number) affects only the policies that touch it.
#[derive(Debug, Clone)]
pub struct Request {
    pub principal: EntityUid,
    pub action: EntityUid,
    pub resource: EntityUid,
    pub context: serde_json::Map<String, JsonValue>,
}

impl Request {
    /// Parse the textual request form. The context must be a JSON object;
    /// an empty (or blank) string is treated as `{}`.
    pub fn parse(
        principal: &str,
        action: &str,
        resource: &str,
        context: &str,
    ) -> Result<Self, AuthzError> {
        Ok(Self {
            principal: EntityUid::parse(principal)?,
            action: EntityUid::parse(action)?,
            resource: EntityUid::parse(resource)?,
            context: parse_context(context)?,
        })
    }
}

fn parse_context(text: &str) -> Result<serde_json::Map<String, JsonValue>, AuthzError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(serde_json::Map::new());
    }
    let json: JsonValue =
        serde_json::from_str(text).map_err(|e| AuthzError::InvalidContext(e.to_string()))?;
    match json {
        JsonValue::Object(fields) => Ok(fields),
        other => Err(AuthzError::InvalidContext(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}
