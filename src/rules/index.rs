use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::rules::ast::{Import, Module, Rule, RuleHead, Term};
use crate::rules::errors::RuleError;

/// Name-resolution scope of the module a rule came from.
#[derive(Debug, Default)]
pub(crate) struct ModuleScope {
    /// Package path including the leading `data`.
    pub package: Vec<String>,
    pub imports: Vec<Import>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RuleKind {
    Complete,
    PartialSet,
    PartialObject,
    /// User-defined function with its parameter count.
    Function(usize),
}

impl RuleKind {
    fn of(rule: &Rule) -> Self {
        match rule.head {
            RuleHead::Complete(_) => RuleKind::Complete,
            RuleHead::PartialSet(_) => RuleKind::PartialSet,
            RuleHead::PartialObject(_, _) => RuleKind::PartialObject,
            RuleHead::Function { ref args, .. } => RuleKind::Function(args.len()),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            RuleKind::Complete => "complete",
            RuleKind::PartialSet => "partial set",
            RuleKind::PartialObject => "partial object",
            RuleKind::Function(_) => "function",
        }
    }
}

#[derive(Debug)]
pub(crate) struct Definition {
    pub scope: Arc<ModuleScope>,
    pub rule: Rule,
}

/// Every definition of one rule path, across modules.
#[derive(Debug)]
pub(crate) struct RuleSet {
    pub kind: RuleKind,
    pub definitions: Vec<Definition>,
    pub default: Option<(Arc<ModuleScope>, Term)>,
}

/// All loaded rules keyed by full path (`["data", "pkg", "rule"]`).
#[derive(Debug, Default)]
pub(crate) struct RuleIndex {
    pub rules: BTreeMap<Vec<String>, RuleSet>,
    /// Strict prefixes of rule paths: `data`, `data.pkg`, ...
    prefixes: BTreeSet<Vec<String>>,
}

impl RuleIndex {
    pub fn build<'m>(modules: impl IntoIterator<Item = &'m Module>) -> Result<Self, RuleError> {
        let mut index = RuleIndex::default();
        for module in modules {
            let mut package = vec!["data".to_string()];
            package.extend(module.package.iter().cloned());
            let scope = Arc::new(ModuleScope {
                package: package.clone(),
                imports: module.imports.clone(),
            });

            for rule in &module.rules {
                let mut path = package.clone();
                path.push(rule.name.clone());
                index.add_rule(path, &scope, rule)?;
            }
        }

        for path in index.rules.keys() {
            for len in 1..path.len() {
                index.prefixes.insert(path[..len].to_vec());
            }
        }
        if let Some(path) = index.rules.keys().find(|p| index.prefixes.contains(*p)) {
            return Err(RuleError::Semantic(format!(
                "rule `{}` conflicts with a package of the same name",
                path.join(".")
            )));
        }
        Ok(index)
    }

    fn add_rule(
        &mut self,
        path: Vec<String>,
        scope: &Arc<ModuleScope>,
        rule: &Rule,
    ) -> Result<(), RuleError> {
        let kind = RuleKind::of(rule);
        let name = path.join(".");
        let set = self.rules.entry(path).or_insert_with(|| RuleSet {
            kind,
            definitions: Vec::new(),
            default: None,
        });
        if let (RuleKind::Function(a), RuleKind::Function(b)) = (set.kind, kind) {
            if a != b {
                return Err(RuleError::Semantic(format!(
                    "function `{name}` is defined with both {a} and {b} parameters"
                )));
            }
        }
        if set.kind != kind {
            return Err(RuleError::Semantic(format!(
                "rule `{name}` is defined as both {} and {}",
                set.kind.describe(),
                kind.describe()
            )));
        }
        if rule.is_default {
            if set.default.is_some() {
                return Err(RuleError::Semantic(format!(
                    "multiple default values for rule `{name}`"
                )));
            }
            if let RuleHead::Complete(value) = &rule.head {
                set.default = Some((scope.clone(), value.clone()));
            }
        } else {
            set.definitions.push(Definition {
                scope: scope.clone(),
                rule: rule.clone(),
            });
        }
        Ok(())
    }

    pub fn is_function(&self, path: &[String]) -> bool {
        self.rules
            .get(path)
            .is_some_and(|set| matches!(set.kind, RuleKind::Function(_)))
    }

    pub fn is_prefix(&self, path: &[String]) -> bool {
        self.prefixes.contains(path)
    }

    /// Distinct next path segments below `prefix` that lead to rules.
    pub fn children(&self, prefix: &[String]) -> BTreeSet<String> {
        self.rules
            .keys()
            .filter(|p| p.len() > prefix.len() && p.starts_with(prefix))
            .map(|p| p[prefix.len()].clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::parser::parse_module;

    fn index(sources: &[&str]) -> Result<RuleIndex, RuleError> {
        let modules = sources
            .iter()
            .map(|s| parse_module("test", s).unwrap())
            .collect::<Vec<_>>();
        RuleIndex::build(&modules)
    }

    #[test]
    fn test_prefixes_and_children() {
        let idx = index(&["package a.b\nallow := true\nx := 1", "package a.c\ny := 2"]).unwrap();
        assert!(idx.is_prefix(&["data".into()]));
        assert!(idx.is_prefix(&["data".into(), "a".into()]));
        assert!(!idx.is_prefix(&["data".into(), "a".into(), "b".into(), "x".into()]));
        let children = idx.children(&["data".into(), "a".into()]);
        assert_eq!(children.into_iter().collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn test_definitions_across_modules_merge() {
        let idx = index(&["package p\ndeny[x] { x := 1 }", "package p\ndeny[x] { x := 2 }"]).unwrap();
        let path: Vec<String> = vec!["data".into(), "p".into(), "deny".into()];
        assert_eq!(idx.rules[&path].definitions.len(), 2);
    }

    #[test]
    fn test_function_clauses_merge() {
        let idx = index(&["package p\nf(1) := \"one\"\nf(x) := \"many\" { x > 1 }"]).unwrap();
        let path: Vec<String> = vec!["data".into(), "p".into(), "f".into()];
        assert!(idx.is_function(&path));
        assert_eq!(idx.rules[&path].kind, RuleKind::Function(1));
        assert_eq!(idx.rules[&path].definitions.len(), 2);
    }

    #[test]
    fn test_semantic_errors() {
        assert!(matches!(
            index(&["package p\ndefault a := 1\ndefault a := 2"]),
            Err(RuleError::Semantic(_))
        ));
        assert!(matches!(
            index(&["package p\na := 1\na[x] { x := 1 }"]),
            Err(RuleError::Semantic(_))
        ));
        assert!(matches!(
            index(&["package p\nq := 1", "package p.q\nr := 1"]),
            Err(RuleError::Semantic(_))
        ));
        assert!(matches!(
            index(&["package p\nf(x) := 1\nf(x, y) := 2"]),
            Err(RuleError::Semantic(_))
        ));
        assert!(matches!(
            index(&["package p\nf(x) := 1\nf := 2"]),
            Err(RuleError::Semantic(_))
        ));
    }
}
