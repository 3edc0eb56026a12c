//! Rule and query evaluation.
//!
//! Evaluation is eager: every term evaluates to the list of
//! `(value, bindings)` solutions it admits, so iteration (`xs[_]`,
//! `some x in xs`) fans out and failed literals prune. References into
//! `data` resolve lazily against the rule index, so only rules that are
//! actually reached get evaluated. Each rule result is memoized for the
//! lifetime of one [`Evaluator`], and an explicit stack of in-progress
//! rules and functions turns dependency cycles into errors. A literal
//! carrying `with` modifiers runs against its own overridden documents
//! and a fresh memo cache.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::rules::ast::*;
use crate::rules::builtins;
use crate::rules::errors::RuleError;
use crate::rules::index::{ModuleScope, RuleIndex, RuleKind, RuleSet};
use crate::rules::value::Value;

#[derive(Debug, Clone, Default)]
pub(crate) struct Env {
    bindings: BTreeMap<String, Value>,
    /// Declared with `some` or `:=` but not bound yet.
    declared: BTreeSet<String>,
}

impl Env {
    fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    fn bind(&mut self, name: &str, value: Value) {
        self.declared.remove(name);
        self.bindings.insert(name.to_string(), value);
    }

    fn declare(&mut self, name: &str) {
        self.bindings.remove(name);
        self.declared.insert(name.to_string());
    }

    pub fn bindings_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.bindings
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

type Solutions = Vec<(Value, Env)>;

fn eval_error(message: impl Into<String>) -> RuleError {
    RuleError::Eval(message.into())
}

pub(crate) struct Evaluator<'a> {
    index: &'a RuleIndex,
    data: Cow<'a, Value>,
    input: Option<Cow<'a, Value>>,
    strict_builtin_errors: bool,
    scope: Arc<ModuleScope>,
    cache: HashMap<Vec<String>, Option<Value>>,
    /// Function results by path and argument values.
    calls: BTreeMap<(Vec<String>, Vec<Value>), Option<Value>>,
    stack: Vec<Vec<String>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        index: &'a RuleIndex,
        data: &'a Value,
        input: Option<&'a Value>,
        strict_builtin_errors: bool,
    ) -> Self {
        Self {
            index,
            data: Cow::Borrowed(data),
            input: input.map(Cow::Borrowed),
            strict_builtin_errors,
            scope: Arc::new(ModuleScope::default()),
            cache: HashMap::new(),
            calls: BTreeMap::new(),
            stack: Vec::new(),
        }
    }

    /// Evaluate a query. Every literal but the last must hold; the last
    /// one reports its value even when it is `false`. Returns one entry
    /// per solution with the value of each literal.
    pub fn eval_query(&mut self, body: &[Literal]) -> Result<Vec<(Vec<Value>, Env)>, RuleError> {
        let mut states = vec![(Vec::new(), Env::default())];
        for (i, lit) in body.iter().enumerate() {
            let last = i + 1 == body.len();
            let mut next = Vec::new();
            for (values, env) in states {
                for (value, env) in self.eval_literal(lit, env, !last)? {
                    let mut values = values.clone();
                    values.push(value);
                    next.push((values, env));
                }
            }
            states = next;
            if states.is_empty() {
                break;
            }
        }
        Ok(states)
    }

    // ─── Rules ──────────────────────────────────────────────────────────

    /// Value of the rule at `path` (`["data", "pkg", "rule"]`), `None` when
    /// undefined.
    pub fn eval_rule(&mut self, path: &[String]) -> Result<Option<Value>, RuleError> {
        if let Some(cached) = self.cache.get(path) {
            return Ok(cached.clone());
        }
        self.check_cycle(path)?;
        let index = self.index;
        let Some(set) = index.rules.get(path) else {
            return Ok(None);
        };

        self.stack.push(path.to_vec());
        let saved_scope = self.scope.clone();
        let result = self.compute_rule(&path.join("."), set);
        self.scope = saved_scope;
        self.stack.pop();

        let value = result?;
        self.cache.insert(path.to_vec(), value.clone());
        Ok(value)
    }

    fn check_cycle(&self, path: &[String]) -> Result<(), RuleError> {
        if let Some(pos) = self.stack.iter().position(|p| p == path) {
            let chain = self.stack[pos..]
                .iter()
                .map(|p| p.join("."))
                .chain(std::iter::once(path.join(".")))
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(RuleError::Recursion(chain));
        }
        Ok(())
    }

    fn compute_rule(&mut self, name: &str, set: &'a RuleSet) -> Result<Option<Value>, RuleError> {
        match set.kind {
            RuleKind::Complete => {
                let mut values = BTreeSet::new();
                for def in &set.definitions {
                    self.scope = def.scope.clone();
                    let RuleHead::Complete(value_term) = &def.rule.head else {
                        continue;
                    };
                    let mut produced = self.eval_clause(&def.rule.body, value_term, Env::default())?;
                    if produced.is_empty() {
                        for clause in &def.rule.else_chain {
                            produced = self.eval_clause(&clause.body, &clause.value, Env::default())?;
                            if !produced.is_empty() {
                                break;
                            }
                        }
                    }
                    values.extend(produced);
                }
                if values.len() > 1 {
                    let shown = values
                        .iter()
                        .map(Value::to_string)
                        .collect::<Vec<_>>()
                        .join(", ");
                    return Err(RuleError::Conflict(format!(
                        "complete rule `{name}` produced multiple values: {shown}"
                    )));
                }
                if let Some(value) = values.into_iter().next() {
                    return Ok(Some(value));
                }
                match &set.default {
                    Some((scope, term)) => {
                        self.scope = scope.clone();
                        let solutions = self.eval_term(term, Env::default())?;
                        Ok(solutions.into_iter().next().map(|(v, _)| v))
                    }
                    None => Ok(None),
                }
            }
            RuleKind::PartialSet => {
                let mut out = BTreeSet::new();
                for def in &set.definitions {
                    self.scope = def.scope.clone();
                    if let RuleHead::PartialSet(key) = &def.rule.head {
                        out.extend(self.eval_clause(&def.rule.body, key, Env::default())?);
                    }
                }
                Ok(Some(Value::Set(out)))
            }
            RuleKind::PartialObject => {
                let mut out: BTreeMap<Value, Value> = BTreeMap::new();
                for def in &set.definitions {
                    self.scope = def.scope.clone();
                    let RuleHead::PartialObject(key, value) = &def.rule.head else {
                        continue;
                    };
                    for env in self.eval_body(&def.rule.body, Env::default())? {
                        for (mut pair, _) in self.eval_product(&[key, value], env)? {
                            let (Some(v), Some(k)) = (pair.pop(), pair.pop()) else {
                                continue;
                            };
                            match out.get(&k) {
                                Some(existing) if *existing != v => {
                                    return Err(RuleError::Conflict(format!(
                                        "object rule `{name}` produced conflicting values for key {k}"
                                    )));
                                }
                                _ => {
                                    out.insert(k, v);
                                }
                            }
                        }
                    }
                }
                Ok(Some(Value::Object(out)))
            }
            // Functions have no value until called.
            RuleKind::Function(_) => Ok(None),
        }
    }

    fn eval_clause(&mut self, body: &[Literal], value: &Term, env: Env) -> Result<BTreeSet<Value>, RuleError> {
        let mut out = BTreeSet::new();
        for env in self.eval_body(body, env)? {
            for (v, _) in self.eval_term(value, env)? {
                out.insert(v);
            }
        }
        Ok(out)
    }

    // ─── Functions ──────────────────────────────────────────────────────

    /// Path of the user-defined function `name` refers to: a function of
    /// the current package, `data.pkg.f`, or `alias.f` through an import.
    fn resolve_function(&self, name: &str) -> Option<Vec<String>> {
        let segments: Vec<&str> = name.split('.').collect();
        let path: Vec<String> = match segments.as_slice() {
            [single] => {
                let mut path = self.scope.package.clone();
                path.push(single.to_string());
                path
            }
            ["data", ..] => segments.iter().map(|s| s.to_string()).collect(),
            [first, rest @ ..] => {
                let import = self.scope.imports.iter().find(|i| i.alias == *first)?;
                import
                    .path
                    .iter()
                    .cloned()
                    .chain(rest.iter().map(|s| s.to_string()))
                    .collect()
            }
            [] => return None,
        };
        self.index.is_function(&path).then_some(path)
    }

    fn call_function(&mut self, path: &[String], args: &[Term], env: Env) -> Result<Solutions, RuleError> {
        let index = self.index;
        let Some(set) = index.rules.get(path) else {
            return Ok(Vec::new());
        };
        if let RuleKind::Function(arity) = set.kind {
            if args.len() != arity {
                return Err(eval_error(format!(
                    "{}: expects {arity} argument(s), got {}",
                    path.join("."),
                    args.len()
                )));
            }
        }
        let refs: Vec<&Term> = args.iter().collect();
        let mut out = Vec::new();
        for (vals, env) in self.eval_product(&refs, env)? {
            if let Some(v) = self.eval_function(path, set, vals)? {
                out.push((v, env));
            }
        }
        Ok(out)
    }

    fn eval_function(
        &mut self,
        path: &[String],
        set: &'a RuleSet,
        args: Vec<Value>,
    ) -> Result<Option<Value>, RuleError> {
        let key = (path.to_vec(), args);
        if let Some(cached) = self.calls.get(&key) {
            return Ok(cached.clone());
        }
        self.check_cycle(path)?;

        self.stack.push(path.to_vec());
        let saved_scope = self.scope.clone();
        let result = self.compute_function(&path.join("."), set, &key.1);
        self.scope = saved_scope;
        self.stack.pop();

        let value = result?;
        self.calls.insert(key, value.clone());
        Ok(value)
    }

    /// Every clause whose parameters unify with `args` contributes its
    /// value; distinct values conflict.
    fn compute_function(
        &mut self,
        name: &str,
        set: &'a RuleSet,
        args: &[Value],
    ) -> Result<Option<Value>, RuleError> {
        let mut values = BTreeSet::new();
        for def in &set.definitions {
            self.scope = def.scope.clone();
            let RuleHead::Function { args: params, value } = &def.rule.head else {
                continue;
            };
            let Some(env) = self.bind_params(params, args)? else {
                continue;
            };
            let mut produced = self.eval_clause(&def.rule.body, value, env.clone())?;
            if produced.is_empty() {
                for clause in &def.rule.else_chain {
                    produced = self.eval_clause(&clause.body, &clause.value, env.clone())?;
                    if !produced.is_empty() {
                        break;
                    }
                }
            }
            values.extend(produced);
        }
        if values.len() > 1 {
            let shown = values
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(RuleError::Conflict(format!(
                "function `{name}` produced multiple values for one call: {shown}"
            )));
        }
        Ok(values.into_iter().next())
    }

    fn bind_params(&mut self, params: &[Term], args: &[Value]) -> Result<Option<Env>, RuleError> {
        let mut env = Env::default();
        for name in params.iter().flat_map(pattern_vars) {
            env.declare(&name);
        }
        for (param, arg) in params.iter().zip(args) {
            match self.unify(param, arg, env)? {
                Some(next) => env = next,
                None => return Ok(None),
            }
        }
        Ok(Some(env))
    }

    // ─── Bodies and literals ────────────────────────────────────────────

    fn eval_body(&mut self, body: &[Literal], env: Env) -> Result<Vec<Env>, RuleError> {
        let mut envs = vec![env];
        for lit in body {
            let mut next = Vec::new();
            for env in envs {
                next.extend(self.eval_literal(lit, env, true)?.into_iter().map(|(_, e)| e));
            }
            envs = next;
            if envs.is_empty() {
                break;
            }
        }
        Ok(envs)
    }

    /// Solutions of one literal. With `filter` set, a `false` expression
    /// value counts as failure.
    fn eval_literal(&mut self, lit: &Literal, env: Env, filter: bool) -> Result<Solutions, RuleError> {
        if lit.with.is_empty() {
            return self.eval_unmodified(lit, env, filter);
        }

        let mut input = self.input.as_deref().cloned();
        let mut data: Option<Value> = None;
        let mut replaced_rules = Vec::new();
        for modifier in &lit.with {
            let Some((value, _)) = self.eval_term(&modifier.value, env.clone())?.into_iter().next() else {
                return Ok(Vec::new());
            };
            let target = &modifier.target;
            if target[0] == "input" {
                input
                    .get_or_insert_with(Value::empty_object)
                    .set_path(&target[1..], value);
                continue;
            }
            match (2..=target.len()).find(|&n| self.index.rules.contains_key(&target[..n])) {
                Some(n) if n < target.len() || self.index.is_function(target) => {
                    return Err(eval_error(format!(
                        "`with {}` cannot override `{}`",
                        target.join("."),
                        target[..n].join(".")
                    )));
                }
                Some(_) => replaced_rules.push((target.clone(), value)),
                None => data
                    .get_or_insert_with(|| Value::clone(&self.data))
                    .set_path(&target[1..], value),
            }
        }

        let saved_input = std::mem::replace(&mut self.input, input.map(Cow::Owned));
        let saved_data = data.map(|d| std::mem::replace(&mut self.data, Cow::Owned(d)));
        let saved_cache = std::mem::take(&mut self.cache);
        let saved_calls = std::mem::take(&mut self.calls);
        for (path, value) in replaced_rules {
            self.cache.insert(path, Some(value));
        }

        let result = self.eval_unmodified(lit, env, filter);

        self.input = saved_input;
        if let Some(d) = saved_data {
            self.data = d;
        }
        self.cache = saved_cache;
        self.calls = saved_calls;
        result
    }

    fn eval_unmodified(&mut self, lit: &Literal, env: Env, filter: bool) -> Result<Solutions, RuleError> {
        if lit.negated {
            let inner = self.eval_literal_kind(&lit.kind, env.clone(), true)?;
            return Ok(if inner.is_empty() {
                vec![(Value::Bool(true), env)]
            } else {
                Vec::new()
            });
        }
        self.eval_literal_kind(&lit.kind, env, filter)
    }

    fn eval_literal_kind(
        &mut self,
        kind: &LiteralKind,
        env: Env,
        filter: bool,
    ) -> Result<Solutions, RuleError> {
        let yes = Value::Bool(true);
        match kind {
            LiteralKind::Expr(term) => {
                let mut solutions = self.eval_term(term, env)?;
                if filter {
                    solutions.retain(|(v, _)| *v != Value::Bool(false));
                }
                Ok(solutions)
            }
            LiteralKind::Some(names) => {
                let mut env = env;
                for name in names {
                    env.declare(name);
                }
                Ok(vec![(yes, env)])
            }
            LiteralKind::SomeIn {
                key,
                value,
                collection,
            } => {
                let mut out = Vec::new();
                for (coll, env) in self.eval_term(collection, env)? {
                    let mut env = env;
                    for name in pattern_vars(value).into_iter().chain(key.iter().flat_map(pattern_vars)) {
                        env.declare(&name);
                    }
                    for (k, v) in entries(coll) {
                        let Some(env) = self.unify(value, &v, env.clone())? else {
                            continue;
                        };
                        let env = match key {
                            Some(key) => match self.unify(key, &k, env)? {
                                Some(env) => env,
                                None => continue,
                            },
                            None => env,
                        };
                        out.push((yes.clone(), env));
                    }
                }
                Ok(out)
            }
            LiteralKind::Assign(lhs, rhs) => {
                let mut out = Vec::new();
                for (v, mut env) in self.eval_term(rhs, env)? {
                    for name in pattern_vars(lhs) {
                        env.declare(&name);
                    }
                    if let Some(env) = self.unify(lhs, &v, env)? {
                        out.push((yes.clone(), env));
                    }
                }
                Ok(out)
            }
            LiteralKind::Every {
                key,
                value,
                domain,
                body,
            } => {
                let mut out = Vec::new();
                for (coll, env) in self.eval_term(domain, env)? {
                    let mut holds = true;
                    for (k, v) in entries(coll) {
                        let mut inner = env.clone();
                        if value != "_" {
                            inner.bind(value, v);
                        }
                        if let Some(key) = key.as_deref().filter(|k| *k != "_") {
                            inner.bind(key, k);
                        }
                        if self.eval_body(body, inner)?.is_empty() {
                            holds = false;
                            break;
                        }
                    }
                    // Bindings made inside the body stay local to it.
                    if holds {
                        out.push((yes.clone(), env));
                    }
                }
                Ok(out)
            }
            LiteralKind::Unify(lhs, rhs) => {
                let (pattern, source) = match (self.has_unbound(lhs, &env), self.has_unbound(rhs, &env)) {
                    (true, true) => {
                        return Err(eval_error(
                            "both sides of `=` contain unbound variables",
                        ))
                    }
                    (true, false) => (lhs, rhs),
                    _ => (rhs, lhs),
                };
                let mut out = Vec::new();
                for (v, env) in self.eval_term(source, env)? {
                    if let Some(env) = self.unify(pattern, &v, env)? {
                        out.push((yes.clone(), env));
                    }
                }
                Ok(out)
            }
        }
    }

    // ─── Unification ────────────────────────────────────────────────────

    fn is_free(&self, name: &str, env: &Env) -> bool {
        name == "_"
            || (env.get(name).is_none()
                && (env.declared.contains(name) || self.resolve_global(name).is_none()))
    }

    fn has_unbound(&self, term: &Term, env: &Env) -> bool {
        pattern_vars_with_wildcards(term)
            .iter()
            .any(|name| self.is_free(name, env))
    }

    fn unify(&mut self, pattern: &Term, value: &Value, env: Env) -> Result<Option<Env>, RuleError> {
        match pattern {
            Term::Var(name) if name == "_" => Ok(Some(env)),
            Term::Var(name) if self.is_free(name, &env) => {
                let mut env = env;
                env.bind(name, value.clone());
                Ok(Some(env))
            }
            Term::Array(items) => {
                let Value::Array(values) = value else {
                    return Ok(None);
                };
                if values.len() != items.len() {
                    return Ok(None);
                }
                let mut env = env;
                for (item, v) in items.iter().zip(values) {
                    match self.unify(item, v, env)? {
                        Some(next) => env = next,
                        None => return Ok(None),
                    }
                }
                Ok(Some(env))
            }
            Term::Object(pairs) => {
                let Value::Object(map) = value else {
                    return Ok(None);
                };
                if map.len() != pairs.len() {
                    return Ok(None);
                }
                let mut env = env;
                for (key_term, value_term) in pairs {
                    let Some((key, _)) = self.eval_term(key_term, env.clone())?.into_iter().next() else {
                        return Ok(None);
                    };
                    let Some(v) = map.get(&key) else {
                        return Ok(None);
                    };
                    match self.unify(value_term, v, env)? {
                        Some(next) => env = next,
                        None => return Ok(None),
                    }
                }
                Ok(Some(env))
            }
            other => Ok(self
                .eval_term(other, env)?
                .into_iter()
                .find(|(v, _)| v == value)
                .map(|(_, env)| env)),
        }
    }

    // ─── Terms ──────────────────────────────────────────────────────────

    /// Root path (`data...` or `input...`) a non-local name refers to.
    fn resolve_global(&self, name: &str) -> Option<Vec<String>> {
        if let Some(import) = self.scope.imports.iter().find(|i| i.alias == name) {
            return Some(import.path.clone());
        }
        if !self.scope.package.is_empty() {
            let mut path = self.scope.package.clone();
            path.push(name.to_string());
            if self.index.rules.contains_key(&path) {
                return Some(path);
            }
        }
        match name {
            "input" | "data" => Some(vec![name.to_string()]),
            _ => None,
        }
    }

    fn eval_root(&mut self, root: Vec<String>, path: &[Term], env: Env) -> Result<Solutions, RuleError> {
        let mut terms: Vec<Term> = root[1..]
            .iter()
            .map(|s| Term::Scalar(Value::String(s.clone())))
            .collect();
        terms.extend(path.iter().cloned());
        if root[0] == "input" {
            return match self.input.as_deref().cloned() {
                Some(input) => self.walk(input, &terms, env),
                None => Ok(Vec::new()),
            };
        }
        self.eval_data_ref(vec!["data".to_string()], &terms, env)
    }

    fn unbound_var(name: &str) -> RuleError {
        eval_error(format!("var `{name}` is unbound"))
    }

    fn eval_term(&mut self, term: &Term, env: Env) -> Result<Solutions, RuleError> {
        match term {
            Term::Scalar(v) => Ok(vec![(v.clone(), env)]),
            Term::Var(name) => {
                if let Some(v) = env.get(name) {
                    let v = v.clone();
                    return Ok(vec![(v, env)]);
                }
                if name == "_" || env.declared.contains(name) {
                    return Err(Self::unbound_var(name));
                }
                match self.resolve_global(name) {
                    Some(root) => self.eval_root(root, &[], env),
                    None => Err(Self::unbound_var(name)),
                }
            }
            Term::Ref { head, path } => {
                if let Term::Var(name) = head.as_ref() {
                    if let Some(v) = env.get(name) {
                        let v = v.clone();
                        return self.walk(v, path, env);
                    }
                    if name == "_" || env.declared.contains(name) {
                        return Err(Self::unbound_var(name));
                    }
                    return match self.resolve_global(name) {
                        Some(root) => self.eval_root(root, path, env),
                        None => Err(Self::unbound_var(name)),
                    };
                }
                let mut out = Vec::new();
                for (v, env) in self.eval_term(head, env)? {
                    out.extend(self.walk(v, path, env)?);
                }
                Ok(out)
            }
            Term::Array(items) => {
                let refs: Vec<&Term> = items.iter().collect();
                Ok(self
                    .eval_product(&refs, env)?
                    .into_iter()
                    .map(|(vals, env)| (Value::Array(vals), env))
                    .collect())
            }
            Term::Set(items) => {
                let refs: Vec<&Term> = items.iter().collect();
                Ok(self
                    .eval_product(&refs, env)?
                    .into_iter()
                    .map(|(vals, env)| (Value::Set(vals.into_iter().collect()), env))
                    .collect())
            }
            Term::Object(pairs) => {
                let refs: Vec<&Term> = pairs.iter().flat_map(|(k, v)| [k, v]).collect();
                Ok(self
                    .eval_product(&refs, env)?
                    .into_iter()
                    .map(|(vals, env)| {
                        let mut map = BTreeMap::new();
                        let mut iter = vals.into_iter();
                        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                            map.insert(k, v);
                        }
                        (Value::Object(map), env)
                    })
                    .collect())
            }
            Term::ArrayCompr { term, body } => {
                let mut items = Vec::new();
                for inner in self.eval_body(body, env.clone())? {
                    items.extend(self.eval_term(term, inner)?.into_iter().map(|(v, _)| v));
                }
                Ok(vec![(Value::Array(items), env)])
            }
            Term::SetCompr { term, body } => {
                let mut items = BTreeSet::new();
                for inner in self.eval_body(body, env.clone())? {
                    items.extend(self.eval_term(term, inner)?.into_iter().map(|(v, _)| v));
                }
                Ok(vec![(Value::Set(items), env)])
            }
            Term::ObjectCompr { key, value, body } => {
                let mut map: BTreeMap<Value, Value> = BTreeMap::new();
                for inner in self.eval_body(body, env.clone())? {
                    for (mut pair, _) in self.eval_product(&[key.as_ref(), value.as_ref()], inner)? {
                        let (Some(v), Some(k)) = (pair.pop(), pair.pop()) else {
                            continue;
                        };
                        if let Some(existing) = map.get(&k) {
                            if *existing != v {
                                return Err(RuleError::Conflict(format!(
                                    "object comprehension produced conflicting values for key {k}"
                                )));
                            }
                        }
                        map.insert(k, v);
                    }
                }
                Ok(vec![(Value::Object(map), env)])
            }
            Term::Call { name, args } => {
                if let Some(path) = self.resolve_function(name) {
                    return self.call_function(&path, args, env);
                }
                let arity = builtins::arity(name)
                    .ok_or_else(|| eval_error(format!("unknown function `{name}`")))?;
                if args.len() != arity {
                    return Err(eval_error(format!(
                        "{name}: expects {arity} argument(s), got {}",
                        args.len()
                    )));
                }
                let refs: Vec<&Term> = args.iter().collect();
                let mut out = Vec::new();
                for (vals, env) in self.eval_product(&refs, env)? {
                    match builtins::call(name, &vals) {
                        Ok(Some(v)) => out.push((v, env)),
                        Ok(None) => {}
                        Err(message) if self.strict_builtin_errors => {
                            return Err(eval_error(message))
                        }
                        Err(message) => {
                            tracing::debug!(function = %name, error = %message, "Builtin error treated as undefined");
                        }
                    }
                }
                Ok(out)
            }
            Term::BinOp { op, left, right } => {
                let mut out = Vec::new();
                for (vals, env) in self.eval_product(&[left.as_ref(), right.as_ref()], env)? {
                    let [l, r] = <[Value; 2]>::try_from(vals)
                        .map_err(|_| eval_error("malformed binary operation"))?;
                    out.push((binop(*op, l, r)?, env));
                }
                Ok(out)
            }
            Term::Membership {
                key,
                value,
                collection,
            } => {
                let mut refs: Vec<&Term> = vec![value.as_ref(), collection.as_ref()];
                if let Some(key) = key {
                    refs.push(key.as_ref());
                }
                let mut out = Vec::new();
                for (vals, env) in self.eval_product(&refs, env)? {
                    let found = match vals.as_slice() {
                        [v, coll] => entries(coll.clone()).iter().any(|(_, e)| e == v),
                        [v, coll, k] => entries(coll.clone()).iter().any(|(ek, e)| e == v && ek == k),
                        _ => false,
                    };
                    out.push((Value::Bool(found), env));
                }
                Ok(out)
            }
        }
    }

    fn eval_product(&mut self, terms: &[&Term], env: Env) -> Result<Vec<(Vec<Value>, Env)>, RuleError> {
        let mut acc = vec![(Vec::new(), env)];
        for term in terms {
            let mut next = Vec::new();
            for (vals, env) in acc {
                for (v, env) in self.eval_term(term, env)? {
                    let mut vals = vals.clone();
                    vals.push(v);
                    next.push((vals, env));
                }
            }
            acc = next;
        }
        Ok(acc)
    }

    // ─── References ─────────────────────────────────────────────────────

    fn iteration_var<'t>(&self, arg: &'t Term, env: &Env) -> Option<&'t str> {
        match arg {
            Term::Var(name) if self.is_free(name, env) => Some(name),
            _ => None,
        }
    }

    /// Follow `path` into `value`; free variables iterate.
    fn walk(&mut self, value: Value, path: &[Term], env: Env) -> Result<Solutions, RuleError> {
        let Some((arg, tail)) = path.split_first() else {
            return Ok(vec![(value, env)]);
        };
        if let Some(name) = self.iteration_var(arg, &env) {
            let mut out = Vec::new();
            for (k, v) in entries(value) {
                let mut env = env.clone();
                if name != "_" {
                    env.bind(name, k);
                }
                out.extend(self.walk(v, tail, env)?);
            }
            return Ok(out);
        }
        let mut out = Vec::new();
        for (key, env) in self.eval_term(arg, env)? {
            if let Some(child) = value.get(&key) {
                out.extend(self.walk(child.clone(), tail, env)?);
            }
        }
        Ok(out)
    }

    /// Follow `rest` from the `data` node at `prefix`, evaluating rules
    /// as they are reached.
    fn eval_data_ref(&mut self, prefix: Vec<String>, rest: &[Term], env: Env) -> Result<Solutions, RuleError> {
        let index = self.index;
        if index.rules.contains_key(&prefix) {
            return match self.eval_rule(&prefix)? {
                Some(v) => self.walk(v, rest, env),
                None => Ok(Vec::new()),
            };
        }
        if !index.is_prefix(&prefix) {
            let base = self.data.get_path(&prefix[1..]).cloned();
            return match base {
                Some(v) => self.walk(v, rest, env),
                None => Ok(Vec::new()),
            };
        }
        let Some((arg, tail)) = rest.split_first() else {
            let v = self.resolve_data(&prefix)?;
            return Ok(vec![(v, env)]);
        };
        if self.iteration_var(arg, &env).is_some() {
            let v = self.resolve_data(&prefix)?;
            return self.walk(v, rest, env);
        }
        let mut out = Vec::new();
        for (key, env) in self.eval_term(arg, env)? {
            match key {
                Value::String(segment) => {
                    let mut next = prefix.clone();
                    next.push(segment);
                    out.extend(self.eval_data_ref(next, tail, env)?);
                }
                other => {
                    let v = self.resolve_data(&prefix)?;
                    if let Some(child) = v.get(&other) {
                        out.extend(self.walk(child.clone(), tail, env)?);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Base data at `prefix` overlaid with every rule below it.
    fn resolve_data(&mut self, prefix: &[String]) -> Result<Value, RuleError> {
        let mut value = match self.data.get_path(&prefix[1..]) {
            Some(v @ Value::Object(_)) => v.clone(),
            _ => Value::empty_object(),
        };
        let index = self.index;
        for child in index.children(prefix) {
            let mut path = prefix.to_vec();
            path.push(child.clone());
            let child_value = if index.rules.contains_key(&path) {
                self.eval_rule(&path)?
            } else {
                Some(self.resolve_data(&path)?)
            };
            if let (Some(v), Value::Object(map)) = (child_value, &mut value) {
                map.insert(Value::String(child), v);
            }
        }
        Ok(value)
    }
}

/// `(key, element)` pairs of a collection; empty for scalars.
fn entries(coll: Value) -> Vec<(Value, Value)> {
    match coll {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (Value::from_i64(i as i64), v))
            .collect(),
        Value::Set(items) => items.into_iter().map(|v| (v.clone(), v)).collect(),
        Value::Object(map) => map.into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Variables bound by a pattern, `_` excluded.
fn pattern_vars(term: &Term) -> Vec<String> {
    pattern_vars_with_wildcards(term)
        .into_iter()
        .filter(|n| n != "_")
        .collect()
}

fn pattern_vars_with_wildcards(term: &Term) -> Vec<String> {
    match term {
        Term::Var(name) => vec![name.clone()],
        Term::Array(items) => items.iter().flat_map(pattern_vars_with_wildcards).collect(),
        Term::Object(pairs) => pairs
            .iter()
            .flat_map(|(_, v)| pattern_vars_with_wildcards(v))
            .collect(),
        _ => Vec::new(),
    }
}

fn binop(op: BinOp, l: Value, r: Value) -> Result<Value, RuleError> {
    let type_mismatch = |l: &Value, r: &Value| {
        eval_error(format!(
            "operator {op:?} is not defined for {} and {}",
            l.type_name(),
            r.type_name()
        ))
    };
    Ok(match op {
        BinOp::Eq => Value::Bool(l == r),
        BinOp::Ne => Value::Bool(l != r),
        BinOp::Lt => Value::Bool(l < r),
        BinOp::Le => Value::Bool(l <= r),
        BinOp::Gt => Value::Bool(l > r),
        BinOp::Ge => Value::Bool(l >= r),
        BinOp::Add | BinOp::Mul | BinOp::Div | BinOp::Rem => match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => Value::Number(match op {
                BinOp::Add => a.add(*b),
                BinOp::Mul => a.mul(*b),
                BinOp::Div => a.div(*b).map_err(eval_error)?,
                _ => a.rem(*b).map_err(eval_error)?,
            }),
            _ => return Err(type_mismatch(&l, &r)),
        },
        BinOp::Sub => match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a.sub(*b)),
            (Value::Set(a), Value::Set(b)) => Value::Set(a.difference(b).cloned().collect()),
            _ => return Err(type_mismatch(&l, &r)),
        },
        BinOp::Union | BinOp::Intersect => match (&l, &r) {
            (Value::Set(a), Value::Set(b)) => Value::Set(if op == BinOp::Union {
                a.union(b).cloned().collect()
            } else {
                a.intersection(b).cloned().collect()
            }),
            _ => return Err(type_mismatch(&l, &r)),
        },
    })
}
