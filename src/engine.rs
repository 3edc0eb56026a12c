use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::authz::AuthorizationEngine;
use crate::errors::PaplError;
use crate::rules::RuleEngine;

/// Policy language an engine speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Cedar-style `permit` / `forbid` policies.
    Authorization,
    /// Rego-style rule modules.
    Rules,
}

impl FromStr for EngineKind {
    type Err = PaplError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "authorization" | "authz" | "cedar" => Ok(EngineKind::Authorization),
            "rules" | "rego" => Ok(EngineKind::Rules),
            other => Err(PaplError::Other(format!("unknown engine kind `{other}`"))),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineKind::Authorization => "authorization",
            EngineKind::Rules => "rules",
        })
    }
}

/// One engine of either kind.
#[derive(Debug)]
pub enum PolicyEngine {
    Authorization(AuthorizationEngine),
    Rules(RuleEngine),
}

impl PolicyEngine {
    pub fn new(kind: EngineKind) -> Self {
        match kind {
            EngineKind::Authorization => PolicyEngine::Authorization(AuthorizationEngine::new()),
            EngineKind::Rules => PolicyEngine::Rules(RuleEngine::new()),
        }
    }

    pub fn kind(&self) -> EngineKind {
        match self {
            PolicyEngine::Authorization(_) => EngineKind::Authorization,
            PolicyEngine::Rules(_) => EngineKind::Rules,
        }
    }

    /// Add policy text in the engine's language. `name` identifies a rule
    /// module and is ignored by the authorization engine.
    pub fn add_policy(&mut self, name: &str, text: &str) -> Result<(), PaplError> {
        match self {
            PolicyEngine::Authorization(engine) => {
                engine.add_policy(text)?;
            }
            PolicyEngine::Rules(engine) => {
                engine.add_policy_from_string(name, text)?;
            }
        }
        Ok(())
    }

    pub fn as_authorization(&self) -> Option<&AuthorizationEngine> {
        match self {
            PolicyEngine::Authorization(engine) => Some(engine),
            PolicyEngine::Rules(_) => None,
        }
    }

    pub fn as_authorization_mut(&mut self) -> Option<&mut AuthorizationEngine> {
        match self {
            PolicyEngine::Authorization(engine) => Some(engine),
            PolicyEngine::Rules(_) => None,
        }
    }

    pub fn as_rules(&self) -> Option<&RuleEngine> {
        match self {
            PolicyEngine::Rules(engine) => Some(engine),
            PolicyEngine::Authorization(_) => None,
        }
    }

    pub fn as_rules_mut(&mut self) -> Option<&mut RuleEngine> {
        match self {
            PolicyEngine::Rules(engine) => Some(engine),
            PolicyEngine::Authorization(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::Decision;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("cedar".parse::<EngineKind>().unwrap(), EngineKind::Authorization);
        assert_eq!(" Rego ".parse::<EngineKind>().unwrap(), EngineKind::Rules);
        assert!("prolog".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_dispatch_by_kind() {
        let mut authz = PolicyEngine::new(EngineKind::Authorization);
        authz
            .add_policy("ignored", "permit(principal, action, resource);")
            .unwrap();
        let decision = authz
            .as_authorization()
            .unwrap()
            .decide_request(r#"User::"a""#, r#"Action::"read""#, r#"Doc::"d""#, "{}")
            .unwrap();
        assert_eq!(decision, Decision::Allow);
        assert!(authz.as_rules().is_none());

        let mut rules = PolicyEngine::new(EngineKind::Rules);
        rules.add_policy("p.rego", "package p\nx := 1").unwrap();
        assert_eq!(rules.kind(), EngineKind::Rules);
        assert_eq!(rules.as_rules().unwrap().get_packages(), vec!["data.p"]);
    }
}
