//! Rego-style rule engine.
//!
//! Modules are parsed into an AST and indexed by rule path
//! (`data.<package>.<rule>`). Queries evaluate against the owned `input`
//! and `data` documents, with rules appearing as virtual documents under
//! `data`. Every mutating call builds its new state first and commits it
//! only on success.

mod ast;
mod builtins;
pub mod errors;
mod eval;
mod index;
mod lexer;
mod loader;
mod parser;
pub mod types;
pub mod value;

use std::path::Path;

use indexmap::IndexMap;

pub use errors::RuleError;
pub use types::{Expression, QueryResult, QueryResults, SourceLocation};
pub use value::Value;

use ast::Module;
use eval::Evaluator;
use index::RuleIndex;

#[derive(Debug)]
pub struct RuleEngine {
    /// Loaded modules by name, in load order.
    modules: IndexMap<String, Module>,
    index: RuleIndex,
    data: Value,
    input: Option<Value>,
    strict_builtin_errors: bool,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEngine {
    pub fn new() -> Self {
        Self {
            modules: IndexMap::new(),
            index: RuleIndex::default(),
            data: Value::empty_object(),
            input: None,
            strict_builtin_errors: true,
        }
    }

    /// When disabled, a builtin that fails (bad operand type, unparsable
    /// number) makes its expression undefined instead of raising
    /// [`RuleError::Eval`].
    pub fn set_strict_builtin_errors(&mut self, strict: bool) {
        self.strict_builtin_errors = strict;
    }

    // ─── Modules ────────────────────────────────────────────────────────

    /// Parse and register one module under `name`, replacing any module
    /// previously added with the same name. Returns the package path.
    pub fn add_policy_from_string(&mut self, name: &str, text: &str) -> Result<String, RuleError> {
        let module = parser::parse_module(name, text)?;
        let package = module.package_path();

        let mut modules = self.modules.clone();
        modules.insert(name.to_string(), module);
        let index = RuleIndex::build(modules.values())?;

        self.modules = modules;
        self.index = index;
        tracing::info!(module = %name, package = %package, "Loaded rule module");
        Ok(package)
    }

    pub fn add_policy_from_file(&mut self, path: impl AsRef<Path>) -> Result<String, RuleError> {
        let path = path.as_ref();
        if path.extension().map_or(true, |ext| ext != "rego") {
            return Err(RuleError::bundle(
                path.display(),
                "unsupported policy file, expected a .rego extension",
            ));
        }
        let text = std::fs::read_to_string(path)?;
        self.add_policy_from_string(&path.display().to_string(), &text)
    }

    /// Load bundles in order. Each bundle is committed as a unit; when one
    /// fails, the bundles before it stay loaded.
    pub fn add_bundles<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<usize, RuleError> {
        let mut loaded = 0;
        for path in paths {
            loaded += self.add_bundle(path.as_ref())?;
        }
        Ok(loaded)
    }

    fn add_bundle(&mut self, path: &Path) -> Result<usize, RuleError> {
        let fail = |message: String| RuleError::bundle(path.display(), message);
        let bundle = loader::read_bundle(path)?;

        let mut modules = self.modules.clone();
        for (name, source) in &bundle.modules {
            let module = parser::parse_module(name, source).map_err(|e| fail(e.to_string()))?;
            modules.insert(format!("{}:{name}", path.display()), module);
        }
        let index = RuleIndex::build(modules.values()).map_err(|e| fail(e.to_string()))?;

        let mut data = self.data.clone();
        for (dirs, text) in &bundle.data {
            let patch = Value::from_json_str(text).map_err(|e| {
                let mut file = dirs.clone();
                file.push("data.json".to_string());
                fail(format!("{}: {e}", file.join("/")))
            })?;
            data.merge_at(dirs, patch);
        }

        self.modules = modules;
        self.index = index;
        self.data = data;
        tracing::info!(
            path = %path.display(),
            modules = bundle.modules.len(),
            data_files = bundle.data.len(),
            "Loaded bundle"
        );
        Ok(bundle.modules.len())
    }

    /// Sorted package paths (`data.x.y`) of every loaded module.
    pub fn get_packages(&self) -> Vec<String> {
        let mut packages: Vec<String> = self.modules.values().map(Module::package_path).collect();
        packages.sort();
        packages.dedup();
        packages
    }

    // ─── Documents ──────────────────────────────────────────────────────

    /// Replace `input` with the JSON document at `path` (`.json` only).
    pub fn add_input(&mut self, path: impl AsRef<Path>) -> Result<(), RuleError> {
        let path = path.as_ref();
        if path.extension().map_or(true, |ext| ext != "json") {
            return Err(RuleError::bundle(
                path.display(),
                "unsupported input file, expected a .json extension",
            ));
        }
        let text = std::fs::read_to_string(path)?;
        self.add_input_json(&text)
    }

    pub fn add_input_json(&mut self, text: &str) -> Result<(), RuleError> {
        self.input = Some(Value::from_json_str(text)?);
        Ok(())
    }

    pub fn add_data(&mut self, path: impl AsRef<Path>) -> Result<(), RuleError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        self.add_data_from_string(&text)?;
        tracing::info!(path = %path.as_ref().display(), "Loaded data document");
        Ok(())
    }

    /// Deep merge a JSON document into `data`.
    pub fn add_data_from_string(&mut self, text: &str) -> Result<(), RuleError> {
        let patch = Value::from_json_str(text)?;
        self.data.merge(patch);
        Ok(())
    }

    /// Reset `data` to `{}`. Modules stay loaded.
    pub fn clear_data(&mut self) {
        self.data = Value::empty_object();
    }

    // ─── Evaluation ─────────────────────────────────────────────────────

    pub fn eval_query(&self, query: &str) -> Result<QueryResults, RuleError> {
        let body = parser::parse_query(query)?;
        let mut evaluator = self.evaluator();
        let solutions = evaluator.eval_query(&body)?;

        let result = solutions
            .into_iter()
            .map(|(values, env)| QueryResult {
                expressions: values
                    .iter()
                    .zip(&body)
                    .map(|(value, lit)| Expression {
                        value: value.to_json(),
                        text: lit.text.clone(),
                        location: lit.location.into(),
                    })
                    .collect(),
                bindings: env.bindings_json(),
            })
            .collect::<Vec<_>>();
        tracing::debug!(query = %query, solutions = result.len(), "Evaluated query");
        Ok(QueryResults { result })
    }

    /// Evaluate the rule at `data.<package>.<rule>`. `Ok(None)` means the
    /// rule is undefined for the current input and data.
    pub fn eval_rule(&self, path: &str) -> Result<Option<serde_json::Value>, RuleError> {
        let segments: Vec<String> = path.trim().split('.').map(str::to_string).collect();
        if segments.len() < 3 || segments[0] != "data" || segments.iter().any(String::is_empty) {
            return Err(RuleError::RuleNotFound(path.to_string()));
        }
        if !self.index.rules.contains_key(&segments) || self.index.is_function(&segments) {
            return Err(RuleError::RuleNotFound(path.to_string()));
        }
        let value = self.evaluator().eval_rule(&segments)?;
        tracing::debug!(rule = %path, defined = value.is_some(), "Evaluated rule");
        Ok(value.map(|v| v.to_json()))
    }

    fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(
            &self.index,
            &self.data,
            self.input.as_ref(),
            self.strict_builtin_errors,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HELLO: &str = r#"package test

default hello = false

hello {
    m := input.message
    m == "world"
}
"#;

    #[test]
    fn test_hello_flips_with_input() {
        let mut engine = RuleEngine::new();
        assert_eq!(engine.add_policy_from_string("hello.rego", HELLO).unwrap(), "data.test");

        engine.add_input_json(r#"{"message": "world"}"#).unwrap();
        let results = engine.eval_query("data.test.hello").unwrap();
        assert_eq!(results.first_value(), Some(&json!(true)));
        assert_eq!(results.result[0].expressions[0].text, "data.test.hello");

        engine.add_input_json(r#"{"message": "world!"}"#).unwrap();
        assert_eq!(engine.eval_rule("data.test.hello").unwrap(), Some(json!(false)));
    }

    #[test]
    fn test_failed_add_keeps_previous_modules() {
        let mut engine = RuleEngine::new();
        engine.add_policy_from_string("a.rego", "package a\nx := 1").unwrap();
        assert!(matches!(
            engine.add_policy_from_string("b.rego", "package a\ndefault x := 2\ndefault x := 3"),
            Err(RuleError::Semantic(_))
        ));
        assert!(engine.add_policy_from_string("c.rego", "package c\np {").is_err());
        assert_eq!(engine.get_packages(), vec!["data.a"]);
        assert_eq!(engine.eval_rule("data.a.x").unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_same_name_replaces_module() {
        let mut engine = RuleEngine::new();
        engine.add_policy_from_string("m", "package m\nv := 1").unwrap();
        engine.add_policy_from_string("m", "package m\nv := 2").unwrap();
        assert_eq!(engine.eval_rule("data.m.v").unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_data_merge_and_clear() {
        let mut engine = RuleEngine::new();
        engine.add_policy_from_string("r", "package r\nlimit := data.config.limit").unwrap();
        engine.add_data_from_string(r#"{"config": {"limit": 5, "name": "a"}}"#).unwrap();
        engine.add_data_from_string(r#"{"config": {"limit": 7}}"#).unwrap();
        assert_eq!(engine.eval_rule("data.r.limit").unwrap(), Some(json!(7)));
        assert_eq!(
            engine.eval_query("data.config.name").unwrap().first_value(),
            Some(&json!("a"))
        );

        engine.clear_data();
        engine.clear_data();
        assert_eq!(engine.eval_rule("data.r.limit").unwrap(), None);
        assert_eq!(engine.get_packages(), vec!["data.r"]);
    }

    #[test]
    fn test_eval_rule_validates_path() {
        let mut engine = RuleEngine::new();
        engine.add_policy_from_string("p", "package p\nq := 1").unwrap();
        for path in ["p.q", "data.p", "data.p.missing", "data..q"] {
            assert!(matches!(engine.eval_rule(path), Err(RuleError::RuleNotFound(_))), "{path}");
        }
    }

    #[test]
    fn test_functions_are_not_rules() {
        let mut engine = RuleEngine::new();
        engine
            .add_policy_from_string("f", "package f\ndouble(x) = y { y := x * 2 }\nfour := double(2)")
            .unwrap();
        assert_eq!(engine.eval_rule("data.f.four").unwrap(), Some(json!(4)));
        assert!(matches!(engine.eval_rule("data.f.double"), Err(RuleError::RuleNotFound(_))));
        assert_eq!(
            engine.eval_query("data.f").unwrap().first_value(),
            Some(&json!({"four": 4}))
        );
    }

    #[test]
    fn test_query_bindings() {
        let engine = RuleEngine::new();
        let results = engine.eval_query("x := [1, 2][i]").unwrap();
        assert_eq!(results.result.len(), 2);
        assert_eq!(results.result[1].bindings, json!({"i": 1, "x": 2}));
    }

    #[test]
    fn test_lenient_builtin_errors() {
        let mut engine = RuleEngine::new();
        assert!(engine.eval_query("to_number(\"abc\")").is_err());
        engine.set_strict_builtin_errors(false);
        assert!(engine.eval_query("to_number(\"abc\")").unwrap().is_undefined());
    }

    #[test]
    fn test_input_and_policy_file_extensions() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("input.txt");
        std::fs::write(&input, "{}").unwrap();
        let mut engine = RuleEngine::new();
        assert!(matches!(engine.add_input(&input), Err(RuleError::Bundle { .. })));

        let policy = dir.path().join("policy.txt");
        std::fs::write(&policy, "package p").unwrap();
        assert!(matches!(engine.add_policy_from_file(&policy), Err(RuleError::Bundle { .. })));
    }
}
