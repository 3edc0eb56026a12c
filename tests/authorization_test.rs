// Integration tests for the authorization engine
//
// These tests verify:
// 1. Decisions from permit-only, forbid and empty policy sets
// 2. Forbid overrides permit regardless of policy order
// 3. Entity hierarchy and attributes in conditions
// 4. Canonical policy text round-trips through the parser

mod helpers;

use helpers::builders::entities_json;
use helpers::EntityBuilder;
use papl::authz::{AuthorizationEngine, AuthzError, Decision};
use proptest::prelude::*;
use serde_json::json;

const ALICE: &str = r#"User::"alice""#;
const VIEW: &str = r#"Action::"view""#;
const PHOTO: &str = r#"Photo::"vacation.jpg""#;

const PERMIT_ALICE: &str = r#"permit(
    principal == User::"alice",
    action == Action::"view",
    resource == Photo::"vacation.jpg"
);"#;

#[test]
fn test_permit_allows_and_empty_set_denies() {
    let mut engine = AuthorizationEngine::new();
    engine.add_policy(PERMIT_ALICE).expect("Failed to add policy");
    assert_eq!(engine.decide_request(ALICE, VIEW, PHOTO, "{}").unwrap(), Decision::Allow);
    assert_eq!(
        engine.decide_request(r#"User::"bob""#, VIEW, PHOTO, "{}").unwrap(),
        Decision::Deny
    );

    // Without the permit nothing is allowed
    let empty = AuthorizationEngine::new();
    assert_eq!(empty.decide_request(ALICE, VIEW, PHOTO, "{}").unwrap(), Decision::Deny);
}

#[test]
fn test_empty_context_forms_are_equivalent() {
    let mut engine = AuthorizationEngine::new();
    engine.add_policy(PERMIT_ALICE).unwrap();
    let braces = engine.decide_request(ALICE, VIEW, PHOTO, "{}").unwrap();
    let empty = engine.decide_request(ALICE, VIEW, PHOTO, "").unwrap();
    let spaced = engine.decide_request(ALICE, VIEW, PHOTO, "  { }  ").unwrap();
    assert_eq!(braces, empty);
    assert_eq!(braces, spaced);
}

#[test]
fn test_any_json_context_is_accepted() {
    let mut engine = AuthorizationEngine::new();
    engine.add_policy("permit(principal, action, resource);").unwrap();
    for ctx in [r#"{"x": null}"#, r#"{"score": 1.5}"#, r#"{"list": [1, null, 2.5]}"#] {
        assert_eq!(
            engine.decide_request(ALICE, VIEW, PHOTO, ctx).unwrap(),
            Decision::Allow,
            "context {ctx}"
        );
    }
}

#[test]
fn test_malformed_requests_fail_fast() {
    let mut engine = AuthorizationEngine::new();
    engine.add_policy("permit(principal, action, resource);").unwrap();
    assert!(matches!(
        engine.decide_request("alice", VIEW, PHOTO, "{}"),
        Err(AuthzError::InvalidEntity { .. })
    ));
    assert!(matches!(
        engine.decide_request(ALICE, VIEW, PHOTO, "[1, 2]"),
        Err(AuthzError::InvalidContext(_))
    ));
    assert!(engine.decide_request(ALICE, VIEW, PHOTO, "{not json").is_err());
}

#[test]
fn test_failed_add_keeps_previous_policies() {
    let mut engine = AuthorizationEngine::new();
    engine.add_policy(PERMIT_ALICE).unwrap();
    let err = engine
        .add_policy("permit(principal, action, resource);\nallow(principal, action, resource);")
        .unwrap_err();
    assert!(matches!(err, AuthzError::Parse { .. }));
    assert_eq!(engine.policies().len(), 1);
}

#[test]
fn test_hierarchy_and_attributes() {
    let mut engine = AuthorizationEngine::new();
    engine
        .add_policy(
            r#"
@id("team-read")
permit(principal in Group::"team", action == Action::"view", resource is Photo)
when { resource.owner == principal || context.shared }
unless { resource has archived && resource.archived };
"#,
        )
        .unwrap();
    engine
        .add_entities(&entities_json(vec![
            EntityBuilder::new("User", "alice").with_parent("Group", "team"),
            EntityBuilder::new("User", "bob"),
            EntityBuilder::new("Group", "team").with_parent("Group", "org"),
            EntityBuilder::new("Photo", "vacation.jpg")
                .with_attr("owner", json!({"__entity": {"type": "User", "id": "alice"}})),
            EntityBuilder::new("Photo", "old.jpg")
                .with_attr("owner", json!({"__entity": {"type": "User", "id": "alice"}}))
                .with_attr("archived", json!(true)),
        ]))
        .unwrap();

    let response = engine.authorize_request(ALICE, VIEW, PHOTO, "{}").unwrap();
    assert_eq!(response.decision, Decision::Allow);
    assert_eq!(response.diagnostics.reason, vec!["team-read".to_string()]);

    assert_eq!(
        engine.decide_request(ALICE, VIEW, r#"Photo::"old.jpg""#, "{}").unwrap(),
        Decision::Deny
    );
    // bob is not in the team
    assert_eq!(
        engine
            .decide_request(r#"User::"bob""#, VIEW, PHOTO, r#"{"shared": true}"#)
            .unwrap(),
        Decision::Deny
    );
}

#[test]
fn test_evaluation_errors_do_not_grant() {
    let mut engine = AuthorizationEngine::new();
    engine
        .add_policy(r#"permit(principal, action, resource) when { context.level > 3 };"#)
        .unwrap();
    let response = engine
        .authorize_request(ALICE, VIEW, PHOTO, r#"{"level": "high"}"#)
        .unwrap();
    assert_eq!(response.decision, Decision::Deny);
    assert_eq!(response.diagnostics.errors.len(), 1);
    assert_eq!(response.diagnostics.errors[0].policy_id, "policy0");
}

#[test]
fn test_policy_text_round_trip() {
    let mut engine = AuthorizationEngine::new();
    engine
        .add_policy(
            r#"
permit(principal == User::"alice", action in [Action::"view", Action::"edit"], resource)
when { context.ip like "10.*" && [1, 2].contains(1) };

@id("no-guests")
forbid(principal is Guest, action, resource in Album::"private");
"#,
        )
        .unwrap();

    let text = engine.policy_text();
    let mut reparsed = AuthorizationEngine::new();
    reparsed.add_policy(&text).expect("Canonical text should parse");

    assert_eq!(engine.policies().len(), reparsed.policies().len());
    for (a, b) in engine.policies().iter().zip(reparsed.policies()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.effect, b.effect);
        assert_eq!(a.principal, b.principal);
        assert_eq!(a.action, b.action);
        assert_eq!(a.resource, b.resource);
        assert_eq!(a.conditions, b.conditions);
    }
}

proptest! {
    /// Any forbid wins; otherwise one permit suffices. Order never matters.
    #[test]
    fn prop_forbid_overrides_permit(effects in prop::collection::vec(any::<bool>(), 0..8)) {
        let mut engine = AuthorizationEngine::new();
        for permit in &effects {
            let effect = if *permit { "permit" } else { "forbid" };
            engine.add_policy(&format!("{effect}(principal, action, resource);")).unwrap();
        }

        let expected = if !effects.is_empty() && effects.iter().all(|p| *p) {
            Decision::Allow
        } else {
            Decision::Deny
        };
        prop_assert_eq!(engine.decide_request(ALICE, VIEW, PHOTO, "{}").unwrap(), expected);
    }
}
