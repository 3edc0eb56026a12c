use std::collections::HashSet;
use std::fmt;

use crate::authz::condition::{Parser, Token};
use crate::authz::errors::AuthzError;
use crate::authz::types::*;

/// Parse a policy-set document: zero or more `permit` / `forbid` statements,
/// each optionally preceded by `@key("value")` annotations.
///
/// Policies without an `@id` annotation come back with an empty `id`; the
/// engine assigns `policyN` ids when the set is added.
pub fn parse_policy_set(source: &str) -> Result<Vec<Policy>, AuthzError> {
    let mut parser = Parser::new(source)?;
    let mut policies = Vec::new();
    while !parser.at_end() {
        policies.push(parse_policy(&mut parser)?);
    }

    let mut seen = HashSet::new();
    for policy in &policies {
        if !policy.id.is_empty() && !seen.insert(policy.id.as_str()) {
            return Err(AuthzError::Semantic(format!(
                "duplicate policy id `{}`",
                policy.id
            )));
        }
    }
    Ok(policies)
}

fn parse_policy(p: &mut Parser) -> Result<Policy, AuthzError> {
    let mut annotations: Vec<(String, String)> = Vec::new();
    while p.peek() == Some(&Token::At) {
        p.advance();
        let key = p.parse_ident("an annotation name after `@`")?;
        p.expect(Token::LParen, "`(` after annotation name")?;
        let value = p.parse_string()?;
        p.expect(Token::RParen, "`)` after annotation value")?;
        if annotations.iter().any(|(k, _)| *k == key) {
            return Err(AuthzError::Semantic(format!("duplicate annotation `@{key}`")));
        }
        annotations.push((key, value));
    }

    let effect = match p.peek() {
        Some(Token::Ident(w)) if w == "permit" => Effect::Permit,
        Some(Token::Ident(w)) if w == "forbid" => Effect::Forbid,
        _ => {
            let found = p.describe_current();
            return Err(p.error(format!("expected `permit` or `forbid`, found {found}")));
        }
    };
    p.advance();

    p.expect(Token::LParen, "`(` after effect")?;
    let principal = parse_scope(p, "principal", true)?;
    p.expect(Token::Comma, "`,` after principal constraint")?;
    let action = parse_scope(p, "action", false)?;
    p.expect(Token::Comma, "`,` after action constraint")?;
    let resource = parse_scope(p, "resource", true)?;
    if p.peek() == Some(&Token::Comma) {
        p.advance();
    }
    p.expect(Token::RParen, "`)` closing the policy scope")?;

    let mut conditions = Vec::new();
    loop {
        let kind = if p.peek_keyword("when") {
            ConditionKind::When
        } else if p.peek_keyword("unless") {
            ConditionKind::Unless
        } else {
            break;
        };
        p.advance();
        p.expect(Token::LBrace, "`{` opening the condition body")?;
        let expr = p.parse_expr()?;
        p.expect(Token::RBrace, "`}` closing the condition body")?;
        conditions.push(Condition { kind, expr });
    }
    p.expect(Token::Semi, "`;` at the end of the policy")?;

    let id = annotations
        .iter()
        .find(|(k, _)| k == "id")
        .map(|(_, v)| v.clone())
        .unwrap_or_default();

    Ok(Policy {
        id,
        annotations,
        effect,
        principal,
        action,
        resource,
        conditions,
    })
}

/// scope = var ( "==" entity | "in" entity | "in" "[" entities "]" | "is" type ("in" entity)? )?
fn parse_scope(p: &mut Parser, var: &str, allow_is: bool) -> Result<ScopeConstraint, AuthzError> {
    p.expect_keyword(var)?;
    match p.peek() {
        Some(Token::Eq) => {
            p.advance();
            Ok(ScopeConstraint::Eq(p.parse_entity_uid()?))
        }
        Some(Token::In) => {
            p.advance();
            if p.peek() == Some(&Token::LBracket) {
                if allow_is {
                    return Err(p.error(format!(
                        "`{var} in [...]` is only allowed for the action"
                    )));
                }
                p.advance();
                let mut uids = Vec::new();
                while p.peek() != Some(&Token::RBracket) {
                    uids.push(p.parse_entity_uid()?);
                    if p.peek() == Some(&Token::Comma) {
                        p.advance();
                    } else if p.peek() != Some(&Token::RBracket) {
                        return Err(p.error("expected `,` or `]` in action list"));
                    }
                }
                p.advance();
                Ok(ScopeConstraint::InSet(uids))
            } else {
                Ok(ScopeConstraint::In(p.parse_entity_uid()?))
            }
        }
        Some(Token::Ident(w)) if w == "is" => {
            if !allow_is {
                return Err(p.error("`is` is not allowed in the action constraint"));
            }
            p.advance();
            let entity_type = p.parse_type_path()?;
            if p.peek() == Some(&Token::In) {
                p.advance();
                Ok(ScopeConstraint::IsIn(entity_type, p.parse_entity_uid()?))
            } else {
                Ok(ScopeConstraint::Is(entity_type))
            }
        }
        _ => Ok(ScopeConstraint::Any),
    }
}

// ---------- Printing ----------

struct Scope<'a>(&'a str, &'a ScopeConstraint);

impl fmt::Display for Scope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Scope(var, constraint) = self;
        match constraint {
            ScopeConstraint::Any => write!(f, "{var}"),
            ScopeConstraint::Eq(uid) => write!(f, "{var} == {uid}"),
            ScopeConstraint::In(uid) => write!(f, "{var} in {uid}"),
            ScopeConstraint::InSet(uids) => {
                write!(f, "{var} in [")?;
                for (i, uid) in uids.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{uid}")?;
                }
                write!(f, "]")
            }
            ScopeConstraint::Is(ty) => write!(f, "{var} is {ty}"),
            ScopeConstraint::IsIn(ty, uid) => write!(f, "{var} is {ty} in {uid}"),
        }
    }
}

/// Canonical text: parsing it yields an equivalent policy.
impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.annotations {
            writeln!(f, "@{key}(\"{}\")", escape(value))?;
        }
        writeln!(f, "{} (", self.effect)?;
        writeln!(f, "    {},", Scope("principal", &self.principal))?;
        writeln!(f, "    {},", Scope("action", &self.action))?;
        write!(f, "    {}\n)", Scope("resource", &self.resource))?;
        for cond in &self.conditions {
            let kw = match cond.kind {
                ConditionKind::When => "when",
                ConditionKind::Unless => "unless",
            };
            write!(f, "\n{kw} {{ {} }}", cond.expr)?;
        }
        write!(f, ";")
    }
}
