//! Cedar-style authorization: `permit` / `forbid` policies with scopes and
//! `when` / `unless` conditions, evaluated against an entity store.

pub mod condition;
pub mod engine;
pub mod entities;
pub mod errors;
pub mod loader;
pub mod policy;
pub mod types;

use std::collections::HashSet;

pub use engine::{Decision, Diagnostics, PolicyError, Response};
pub use entities::{Entities, Entity};
pub use errors::AuthzError;
pub use types::{EntityUid, Policy, Request};

/// In-memory policy set plus entity store.
///
/// Mutation takes `&mut self` and evaluation `&self`; every add-call parses
/// fully before committing, so a failed call leaves the engine untouched.
#[derive(Debug, Default)]
pub struct AuthorizationEngine {
    policies: Vec<Policy>,
    entities: Entities,
    next_id: usize,
}

impl AuthorizationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and append every statement in `text`. Returns how many
    /// policies were added.
    pub fn add_policy(&mut self, text: &str) -> Result<usize, AuthzError> {
        let mut parsed = policy::parse_policy_set(text)?;

        let mut ids: HashSet<String> = self.policies.iter().map(|p| p.id.clone()).collect();
        for p in parsed.iter().filter(|p| !p.id.is_empty()) {
            if ids.contains(&p.id) {
                return Err(AuthzError::Semantic(format!(
                    "a policy with id `{}` is already loaded",
                    p.id
                )));
            }
        }
        ids.extend(parsed.iter().filter(|p| !p.id.is_empty()).map(|p| p.id.clone()));

        let mut next_id = self.next_id;
        for p in parsed.iter_mut().filter(|p| p.id.is_empty()) {
            loop {
                let candidate = format!("policy{next_id}");
                next_id += 1;
                if ids.insert(candidate.clone()) {
                    p.id = candidate;
                    break;
                }
            }
        }

        let added = parsed.len();
        self.next_id = next_id;
        self.policies.extend(parsed);
        tracing::debug!(added, total = self.policies.len(), "Added authorization policies");
        Ok(added)
    }

    /// Replace the entity store with the given JSON entities document.
    pub fn add_entities(&mut self, json: &str) -> Result<(), AuthzError> {
        self.entities = Entities::from_json_str(json)?;
        Ok(())
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    pub fn entities(&self) -> &Entities {
        &self.entities
    }

    /// Canonical text of the whole policy set; feeding it to `add_policy`
    /// on a fresh engine yields an equivalent set.
    pub fn policy_text(&self) -> String {
        self.policies
            .iter()
            .map(|p| {
                if p.annotation("id").is_some() {
                    p.to_string()
                } else {
                    let mut with_id = p.clone();
                    with_id.annotations.insert(0, ("id".to_string(), p.id.clone()));
                    with_id.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Decide a request given in textual form. Malformed entity literals or
    /// context fail with an error instead of producing a decision.
    pub fn decide_request(
        &self,
        principal: &str,
        action: &str,
        resource: &str,
        context: &str,
    ) -> Result<Decision, AuthzError> {
        Ok(self
            .authorize_request(principal, action, resource, context)?
            .decision)
    }

    pub fn authorize_request(
        &self,
        principal: &str,
        action: &str,
        resource: &str,
        context: &str,
    ) -> Result<Response, AuthzError> {
        let request = Request::parse(principal, action, resource, context)?;
        Ok(self.authorize(&request))
    }

    pub fn authorize(&self, request: &Request) -> Response {
        engine::is_authorized(&self.policies, &self.entities, request)
    }
}
