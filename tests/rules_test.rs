// Integration tests for the rule engine
//
// These tests verify:
// 1. Query results flip with input and survive clear_data
// 2. Bundles load as units from directories and archives
// 3. Conflicts and recursion surface as errors
// 4. Data documents deep merge
// 5. Functions, `every` and `with` modifiers

mod helpers;

use std::collections::BTreeMap;

use helpers::BundleBuilder;
use papl::rules::{RuleEngine, RuleError};
use proptest::prelude::*;
use serde_json::json;
use tempfile::TempDir;

const HELLO: &str = r#"
package test

default hello = false

hello {
    m := input.message
    m == "world"
}
"#;

#[test]
fn test_hello_module() {
    let mut engine = RuleEngine::new();
    engine.add_policy_from_string("hello.rego", HELLO).unwrap();

    engine.add_input_json(r#"{"message": "world"}"#).unwrap();
    let results = engine.eval_query("data.test.hello").unwrap();
    assert_eq!(results.result.len(), 1);
    assert_eq!(results.first_value(), Some(&json!(true)));

    engine.add_input_json(r#"{"message": "world!"}"#).unwrap();
    assert_eq!(
        engine.eval_query("data.test.hello").unwrap().first_value(),
        Some(&json!(false))
    );
}

const LIMITS: &str = r#"
package limits

import future.keywords.every
import future.keywords.if

max_for(role) := 100 if role == "admin"
max_for(role) := 10 if role != "admin"

within_limits if {
    every req in input.requests { req.size <= max_for(input.role) }
}
"#;

#[test]
fn test_functions_every_and_with() {
    let mut engine = RuleEngine::new();
    engine.add_policy_from_string("limits.rego", LIMITS).unwrap();
    engine
        .add_input_json(r#"{"role": "user", "requests": [{"size": 5}, {"size": 50}]}"#)
        .unwrap();

    assert_eq!(
        engine.eval_query(r#"data.limits.max_for("admin")"#).unwrap().first_value(),
        Some(&json!(100))
    );
    assert_eq!(engine.eval_rule("data.limits.within_limits").unwrap(), None);

    let elevated = engine
        .eval_query(r#"data.limits.within_limits with input.role as "admin""#)
        .unwrap();
    assert_eq!(elevated.first_value(), Some(&json!(true)));

    // The override does not outlive its literal
    assert_eq!(engine.eval_rule("data.limits.within_limits").unwrap(), None);
}

#[test]
fn test_clear_data_keeps_modules() {
    let mut engine = RuleEngine::new();
    engine.add_policy_from_string("hello.rego", HELLO).unwrap();
    engine.add_data_from_string(r#"{"users": ["a"]}"#).unwrap();

    engine.clear_data();
    engine.clear_data();

    assert_eq!(engine.get_packages(), vec!["data.test"]);
    assert!(engine.eval_query("data.users").unwrap().is_undefined());
    engine.add_input_json(r#"{"message": "world"}"#).unwrap();
    assert_eq!(engine.eval_rule("data.test.hello").unwrap(), Some(json!(true)));
}

#[test]
fn test_rbac_policy_with_data() {
    let mut engine = RuleEngine::new();
    engine
        .add_policy_from_string(
            "rbac.rego",
            r#"
package rbac

import future.keywords.if
import future.keywords.in
import data.roles

default allow := false

allow if {
    some role in input.user.roles
    input.action in roles[role].actions
}

denied contains msg if {
    not allow
    msg := sprintf("%s may not %s", [input.user.name, input.action])
}
"#,
        )
        .unwrap();
    engine
        .add_data_from_string(
            r#"{"roles": {"reader": {"actions": ["read"]}, "writer": {"actions": ["read", "write"]}}}"#,
        )
        .unwrap();

    engine
        .add_input_json(r#"{"user": {"name": "ann", "roles": ["reader"]}, "action": "write"}"#)
        .unwrap();
    assert_eq!(engine.eval_rule("data.rbac.allow").unwrap(), Some(json!(false)));
    assert_eq!(
        engine.eval_rule("data.rbac.denied").unwrap(),
        Some(json!(["ann may not write"]))
    );

    engine
        .add_input_json(r#"{"user": {"name": "ann", "roles": ["reader", "writer"]}, "action": "write"}"#)
        .unwrap();
    assert_eq!(engine.eval_rule("data.rbac.allow").unwrap(), Some(json!(true)));
    assert_eq!(engine.eval_rule("data.rbac.denied").unwrap(), Some(json!([])));
}

#[test]
fn test_conflict_and_recursion_errors() {
    let mut engine = RuleEngine::new();
    engine
        .add_policy_from_string("c.rego", "package c\nx := input.a\nx := input.b")
        .unwrap();
    engine.add_input_json(r#"{"a": 1, "b": 2}"#).unwrap();
    assert!(matches!(engine.eval_rule("data.c.x"), Err(RuleError::Conflict(_))));

    engine.add_input_json(r#"{"a": 1, "b": 1}"#).unwrap();
    assert_eq!(engine.eval_rule("data.c.x").unwrap(), Some(json!(1)));

    engine
        .add_policy_from_string("r.rego", "package r\np { q }\nq { p }")
        .unwrap();
    let err = engine.eval_query("data.r.p").unwrap_err();
    assert!(matches!(err, RuleError::Recursion(_)));
    assert!(err.to_string().contains("recursion detected"));
}

#[test]
fn test_directory_bundle_with_data() {
    let root = TempDir::new().unwrap();
    let bundle = BundleBuilder::new()
        .with_module("authz/policy.rego", "package authz\nlimit := data.authz.config.limit")
        .with_data("authz/config", json!({"limit": 10}))
        .with_data("", json!({"global": true}))
        .write_dir(&root, "main");

    let mut engine = RuleEngine::new();
    assert_eq!(engine.add_bundles(&[&bundle]).unwrap(), 1);
    assert_eq!(engine.eval_rule("data.authz.limit").unwrap(), Some(json!(10)));
    assert_eq!(
        engine.eval_query("data.global").unwrap().first_value(),
        Some(&json!(true))
    );
}

#[test]
fn test_archive_bundle() {
    let root = TempDir::new().unwrap();
    let archive = BundleBuilder::new()
        .with_module("p/main.rego", "package p\nnames := {n | n := data.p.people[_].name}")
        .with_data("p", json!({"people": [{"name": "x"}, {"name": "y"}, {"name": "x"}]}))
        .write_archive(&root, "bundle.tar.gz");

    let mut engine = RuleEngine::new();
    engine.add_bundles(&[archive]).unwrap();
    assert_eq!(engine.eval_rule("data.p.names").unwrap(), Some(json!(["x", "y"])));
}

#[test]
fn test_bundle_partial_load() {
    let root = TempDir::new().unwrap();
    let good = BundleBuilder::new()
        .with_module("a.rego", "package good\nok := true")
        .write_dir(&root, "good");
    let bad = BundleBuilder::new()
        .with_module("fine.rego", "package bad\nfine := true")
        .with_module("broken.rego", "package bad\nbroken {")
        .write_dir(&root, "bad");
    let missing = root.path().join("missing");

    let mut engine = RuleEngine::new();
    let err = engine.add_bundles(&[good.clone(), bad]).unwrap_err();
    assert!(matches!(err, RuleError::Bundle { .. }));
    // The first bundle stays, nothing of the broken one is committed
    assert_eq!(engine.get_packages(), vec!["data.good"]);

    assert!(matches!(
        engine.add_bundles(&[missing]),
        Err(RuleError::Bundle { .. })
    ));
    assert_eq!(engine.eval_rule("data.good.ok").unwrap(), Some(json!(true)));
}

#[test]
fn test_policy_and_input_files() {
    let dir = TempDir::new().unwrap();
    let policy = dir.path().join("hello.rego");
    let input = dir.path().join("input.json");
    let data = dir.path().join("extra.json");
    std::fs::write(&policy, HELLO).unwrap();
    std::fs::write(&input, r#"{"message": "world"}"#).unwrap();
    std::fs::write(&data, r#"{"site": "eu"}"#).unwrap();

    let mut engine = RuleEngine::new();
    assert_eq!(engine.add_policy_from_file(&policy).unwrap(), "data.test");
    engine.add_input(&input).unwrap();
    engine.add_data(&data).unwrap();

    let results = engine.eval_query("data.test.hello; data.site == \"eu\"").unwrap();
    assert_eq!(results.result[0].expressions.len(), 2);
    assert_eq!(results.result[0].expressions[0].value, json!(true));
    assert_eq!(results.result[0].expressions[1].value, json!(true));
}

proptest! {
    /// Later documents win at the leaves; untouched keys survive.
    #[test]
    fn prop_data_merge_later_wins(
        first in prop::collection::btree_map("[a-e]", 0i64..100, 0..5),
        second in prop::collection::btree_map("[a-e]", 0i64..100, 0..5),
    ) {
        let mut engine = RuleEngine::new();
        engine.add_data_from_string(&json!({"doc": first}).to_string()).unwrap();
        engine.add_data_from_string(&json!({"doc": second}).to_string()).unwrap();

        let mut expected: BTreeMap<String, i64> = first.clone();
        expected.extend(second.clone());
        let results = engine.eval_query("data.doc").unwrap();
        prop_assert_eq!(results.first_value(), Some(&json!(expected)));
    }
}
