use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::authz::condition::{BinOp, Expr, LitValue, Method, Var};
use crate::authz::entities::Entities;
use crate::authz::types::*;

/// Final answer for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Allow,
    Deny,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => write!(f, "ALLOW"),
            Decision::Deny => write!(f, "DENY"),
        }
    }
}

/// A policy whose condition could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyError {
    pub policy_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// Ids of the policies that determined the decision.
    pub reason: Vec<String>,
    pub errors: Vec<PolicyError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    pub decision: Decision,
    pub diagnostics: Diagnostics,
}

/// Evaluate `request` against every policy.
///
/// A policy matches when its scope matches and every `when` condition is
/// true and every `unless` condition is false. A condition that fails to
/// evaluate makes only that policy non-matching. The result is ALLOW iff
/// some permit matches and no forbid matches.
pub fn is_authorized(policies: &[Policy], entities: &Entities, request: &Request) -> Response {
    let env = Env { request, entities };
    let mut permits = Vec::new();
    let mut forbids = Vec::new();
    let mut errors = Vec::new();

    for policy in policies {
        match policy_matches(policy, &env) {
            Ok(true) => match policy.effect {
                Effect::Permit => permits.push(policy.id.clone()),
                Effect::Forbid => forbids.push(policy.id.clone()),
            },
            Ok(false) => {}
            Err(message) => {
                tracing::warn!(
                    policy = %policy.id,
                    error = %message,
                    "Policy condition failed to evaluate; treating as not matching"
                );
                errors.push(PolicyError {
                    policy_id: policy.id.clone(),
                    message,
                });
            }
        }
    }

    let (decision, reason) = if !forbids.is_empty() {
        (Decision::Deny, forbids)
    } else if !permits.is_empty() {
        (Decision::Allow, permits)
    } else {
        (Decision::Deny, Vec::new())
    };

    tracing::debug!(
        principal = %request.principal,
        action = %request.action,
        resource = %request.resource,
        %decision,
        ?reason,
        "Authorization decision"
    );

    Response {
        decision,
        diagnostics: Diagnostics { reason, errors },
    }
}

struct Env<'a> {
    request: &'a Request,
    entities: &'a Entities,
}

fn policy_matches(policy: &Policy, env: &Env<'_>) -> Result<bool, String> {
    let req = env.request;
    if !scope_matches(&policy.principal, &req.principal, env.entities)
        || !scope_matches(&policy.action, &req.action, env.entities)
        || !scope_matches(&policy.resource, &req.resource, env.entities)
    {
        return Ok(false);
    }
    for cond in &policy.conditions {
        let holds = expect_bool(eval(&cond.expr, env)?)?;
        let satisfied = match cond.kind {
            ConditionKind::When => holds,
            ConditionKind::Unless => !holds,
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn scope_matches(scope: &ScopeConstraint, uid: &EntityUid, entities: &Entities) -> bool {
    match scope {
        ScopeConstraint::Any => true,
        ScopeConstraint::Eq(expected) => uid == expected,
        ScopeConstraint::In(ancestor) => entities.is_descendant_of(uid, ancestor),
        ScopeConstraint::InSet(ancestors) => ancestors
            .iter()
            .any(|ancestor| entities.is_descendant_of(uid, ancestor)),
        ScopeConstraint::Is(ty) => uid.entity_type == *ty,
        ScopeConstraint::IsIn(ty, ancestor) => {
            uid.entity_type == *ty && entities.is_descendant_of(uid, ancestor)
        }
    }
}

// ─── Expression evaluation ──────────────────────────────────────────────

fn expect_bool(value: Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(format!("expected a bool, got {}", other.type_name())),
    }
}

fn expect_long(value: Value) -> Result<i64, String> {
    match value {
        Value::Long(n) => Ok(n),
        other => Err(format!("expected a long, got {}", other.type_name())),
    }
}

fn expect_set(value: Value) -> Result<BTreeSet<Value>, String> {
    match value {
        Value::Set(items) => Ok(items),
        other => Err(format!("expected a set, got {}", other.type_name())),
    }
}

fn eval(expr: &Expr, env: &Env<'_>) -> Result<Value, String> {
    match expr {
        Expr::Literal(LitValue::Long(n)) => Ok(Value::Long(*n)),
        Expr::Literal(LitValue::Str(s)) => Ok(Value::String(s.clone())),
        Expr::Literal(LitValue::Bool(b)) => Ok(Value::Bool(*b)),
        Expr::Entity(uid) => Ok(Value::Entity(uid.clone())),
        Expr::Var(Var::Principal) => Ok(Value::Entity(env.request.principal.clone())),
        Expr::Var(Var::Action) => Ok(Value::Entity(env.request.action.clone())),
        Expr::Var(Var::Resource) => Ok(Value::Entity(env.request.resource.clone())),
        Expr::Var(Var::Context) => context_record(env),
        Expr::Set(items) => items
            .iter()
            .map(|item| eval(item, env))
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Value::Set),
        Expr::Record(fields) => fields
            .iter()
            .map(|(k, v)| eval(v, env).map(|v| (k.clone(), v)))
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Value::Record),
        Expr::GetAttr { expr, attr } if matches!(**expr, Expr::Var(Var::Context)) => {
            context_attr(attr, env)
        }
        Expr::GetAttr { expr, attr } => get_attr(eval(expr, env)?, attr, env),
        Expr::HasAttr { expr, attr } if matches!(**expr, Expr::Var(Var::Context)) => {
            Ok(Value::Bool(env.request.context.contains_key(attr)))
        }
        Expr::HasAttr { expr, attr } => match eval(expr, env)? {
            Value::Entity(uid) => Ok(Value::Bool(
                env.entities
                    .get(&uid)
                    .is_some_and(|e| e.attrs.contains_key(attr)),
            )),
            Value::Record(fields) => Ok(Value::Bool(fields.contains_key(attr))),
            other => Err(format!(
                "`has` requires an entity or record, got {}",
                other.type_name()
            )),
        },
        Expr::Like { expr, pattern } => match eval(expr, env)? {
            Value::String(s) => Ok(Value::Bool(pattern.matches(&s))),
            other => Err(format!("`like` requires a string, got {}", other.type_name())),
        },
        Expr::Is {
            expr,
            entity_type,
            in_expr,
        } => {
            let uid = match eval(expr, env)? {
                Value::Entity(uid) => uid,
                other => {
                    return Err(format!("`is` requires an entity, got {}", other.type_name()))
                }
            };
            if uid.entity_type != *entity_type {
                return Ok(Value::Bool(false));
            }
            match in_expr {
                Some(in_expr) => {
                    let collection = eval(in_expr, env)?;
                    eval_in(Value::Entity(uid), collection, env)
                }
                None => Ok(Value::Bool(true)),
            }
        }
        Expr::BinOp {
            op: BinOp::And,
            left,
            right,
        } => {
            if !expect_bool(eval(left, env)?)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(expect_bool(eval(right, env)?)?))
        }
        Expr::BinOp {
            op: BinOp::Or,
            left,
            right,
        } => {
            if expect_bool(eval(left, env)?)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(expect_bool(eval(right, env)?)?))
        }
        Expr::BinOp { op, left, right } => {
            let l = eval(left, env)?;
            let r = eval(right, env)?;
            eval_binop(*op, l, r)
        }
        Expr::UnaryNot(inner) => Ok(Value::Bool(!expect_bool(eval(inner, env)?)?)),
        Expr::Neg(inner) => expect_long(eval(inner, env)?)?
            .checked_neg()
            .map(Value::Long)
            .ok_or_else(|| "integer overflow in negation".to_string()),
        Expr::In {
            element,
            collection,
        } => {
            let element = eval(element, env)?;
            let collection = eval(collection, env)?;
            eval_in(element, collection, env)
        }
        Expr::IfThenElse {
            cond,
            then_expr,
            else_expr,
        } => {
            if expect_bool(eval(cond, env)?)? {
                eval(then_expr, env)
            } else {
                eval(else_expr, env)
            }
        }
        Expr::MethodCall {
            receiver,
            method,
            args,
        } => {
            let set = expect_set(eval(receiver, env)?)?;
            let arg = match args.first() {
                Some(arg) => Some(eval(arg, env)?),
                None => None,
            };
            match (method, arg) {
                (Method::Contains, Some(arg)) => Ok(Value::Bool(set.contains(&arg))),
                (Method::ContainsAll, Some(arg)) => {
                    Ok(Value::Bool(expect_set(arg)?.is_subset(&set)))
                }
                (Method::ContainsAny, Some(arg)) => {
                    Ok(Value::Bool(!expect_set(arg)?.is_disjoint(&set)))
                }
                (Method::IsEmpty, _) => Ok(Value::Bool(set.is_empty())),
                (_, None) => Err("missing method argument".to_string()),
            }
        }
    }
}

/// `context.attr`, converting only the field read.
fn context_attr(attr: &str, env: &Env<'_>) -> Result<Value, String> {
    let json = env
        .request
        .context
        .get(attr)
        .ok_or_else(|| format!("context has no attribute `{attr}`"))?;
    Value::from_json(json).map_err(|e| format!("context.{attr}: {e}"))
}

fn context_record(env: &Env<'_>) -> Result<Value, String> {
    env.request
        .context
        .iter()
        .map(|(k, v)| {
            Value::from_json(v)
                .map(|v| (k.clone(), v))
                .map_err(|e| format!("context.{k}: {e}"))
        })
        .collect::<Result<BTreeMap<_, _>, _>>()
        .map(Value::Record)
}

fn get_attr(target: Value, attr: &str, env: &Env<'_>) -> Result<Value, String> {
    match target {
        Value::Entity(uid) => {
            let entity = env
                .entities
                .get(&uid)
                .ok_or_else(|| format!("entity {uid} does not exist"))?;
            entity
                .attrs
                .get(attr)
                .cloned()
                .ok_or_else(|| format!("{uid} has no attribute `{attr}`"))
        }
        Value::Record(mut fields) => fields
            .remove(attr)
            .ok_or_else(|| format!("record has no attribute `{attr}`")),
        other => Err(format!(
            "cannot access attribute `{attr}` on a {}",
            other.type_name()
        )),
    }
}

/// `x in y`: entity hierarchy membership, or plain set membership for
/// non-entity elements.
fn eval_in(element: Value, collection: Value, env: &Env<'_>) -> Result<Value, String> {
    match (element, collection) {
        (Value::Entity(child), Value::Entity(ancestor)) => {
            Ok(Value::Bool(env.entities.is_descendant_of(&child, &ancestor)))
        }
        (Value::Entity(child), Value::Set(items)) => {
            Ok(Value::Bool(items.iter().any(|item| match item {
                Value::Entity(ancestor) => env.entities.is_descendant_of(&child, ancestor),
                _ => false,
            })))
        }
        (element, Value::Set(items)) => Ok(Value::Bool(items.contains(&element))),
        (element, collection) => Err(format!(
            "`in` is not defined for {} in {}",
            element.type_name(),
            collection.type_name()
        )),
    }
}

fn eval_binop(op: BinOp, l: Value, r: Value) -> Result<Value, String> {
    match op {
        BinOp::Eq => Ok(Value::Bool(l == r)),
        BinOp::Ne => Ok(Value::Bool(l != r)),
        BinOp::Gt | BinOp::Lt | BinOp::Ge | BinOp::Le => {
            let (a, b) = (expect_long(l)?, expect_long(r)?);
            Ok(Value::Bool(match op {
                BinOp::Gt => a > b,
                BinOp::Lt => a < b,
                BinOp::Ge => a >= b,
                _ => a <= b,
            }))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul => {
            let (a, b) = (expect_long(l)?, expect_long(r)?);
            let result = match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                _ => a.checked_mul(b),
            };
            result
                .map(Value::Long)
                .ok_or_else(|| format!("integer overflow in `{a} {} {b}`", op_symbol(op)))
        }
        BinOp::And | BinOp::Or => {
            let (a, b) = (expect_bool(l)?, expect_bool(r)?);
            Ok(Value::Bool(if op == BinOp::And { a && b } else { a || b }))
        }
    }
}

fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        _ => "*",
    }
}
