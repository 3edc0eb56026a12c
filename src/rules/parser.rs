//! Recursive-descent parser for rule modules and ad-hoc queries.
//!
//! Precedence, loosest first: `in`, `|`, `&`, comparisons, `+ -`,
//! `* / %`, unary `-`, postfix (`.field`, `[index]`, `(args)`).

use crate::rules::ast::*;
use crate::rules::errors::RuleError;
use crate::rules::lexer::{tokenize, Tok, Token};
use crate::rules::value::{Number, Value};

pub(crate) struct Parser<'s> {
    source_name: &'s str,
    src: &'s str,
    tokens: Vec<Token>,
    pos: usize,
    /// Inside brackets newlines are insignificant.
    nesting: usize,
    /// Set while parsing the first element of a collection literal, where
    /// `|` introduces a comprehension body rather than a set union.
    no_union: bool,
}

/// Parse a complete module (`package` + imports + rules).
pub fn parse_module(source_name: &str, src: &str) -> Result<Module, RuleError> {
    Parser::new(source_name, src)?.module()
}

/// Parse a query: literals separated by `;` or newlines.
pub fn parse_query(src: &str) -> Result<Vec<Literal>, RuleError> {
    let mut p = Parser::new("query", src)?;
    let body = p.body_until(None)?;
    if body.is_empty() {
        return Err(p.error("empty query"));
    }
    Ok(body)
}

impl<'s> Parser<'s> {
    fn new(source_name: &'s str, src: &'s str) -> Result<Self, RuleError> {
        Ok(Self {
            source_name,
            src,
            tokens: tokenize(source_name, src)?,
            pos: 0,
            nesting: 0,
            no_union: false,
        })
    }

    // ─── Token access ───────────────────────────────────────────────────

    fn index(&self) -> usize {
        let mut i = self.pos;
        if self.nesting > 0 {
            while matches!(self.tokens.get(i), Some(t) if t.tok == Tok::Newline) {
                i += 1;
            }
        }
        i
    }

    fn peek_token(&self) -> Option<&Token> {
        self.tokens.get(self.index())
    }

    fn peek(&self) -> Option<&Tok> {
        self.peek_token().map(|t| &t.tok)
    }

    fn peek_past_newlines(&self) -> Option<&Tok> {
        self.tokens[self.pos.min(self.tokens.len())..]
            .iter()
            .map(|t| &t.tok)
            .find(|t| **t != Tok::Newline)
    }

    fn advance(&mut self) -> Option<Token> {
        let i = self.index();
        self.pos = i + 1;
        self.tokens.get(i).cloned()
    }

    fn skip_newlines(&mut self) {
        while matches!(self.tokens.get(self.pos), Some(t) if t.tok == Tok::Newline) {
            self.pos += 1;
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(w)) if w == keyword)
    }

    /// Next token starts right where the previous one ended.
    fn adjacent(&self) -> bool {
        match (self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)), self.peek_token()) {
            (Some(prev), Some(next)) => prev.end == next.start,
            _ => false,
        }
    }

    fn prev_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|t| t.end)
            .unwrap_or(0)
    }

    fn error(&self, message: impl Into<String>) -> RuleError {
        let (line, column) = match self.peek_token() {
            Some(t) => (t.line, t.column),
            None => self
                .tokens
                .last()
                .map(|t| (t.line, t.column + (t.end - t.start)))
                .unwrap_or((1, 1)),
        };
        RuleError::Parse {
            source_name: self.source_name.to_string(),
            message: message.into(),
            line,
            column,
        }
    }

    fn describe(&self) -> String {
        match self.peek() {
            Some(Tok::Ident(w)) => format!("`{w}`"),
            Some(Tok::Str(s)) => format!("\"{s}\""),
            Some(Tok::Number(n)) => format!("`{n}`"),
            Some(Tok::Newline) => "newline".to_string(),
            Some(other) => format!("{other:?}"),
            None => "end of input".to_string(),
        }
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<Token, RuleError> {
        if self.peek() != Some(&tok) {
            return Err(self.error(format!("expected {what}, found {}", self.describe())));
        }
        self.advance()
            .ok_or_else(|| self.error(format!("expected {what}")))
    }

    fn ident(&mut self, what: &str) -> Result<String, RuleError> {
        match self.peek().cloned() {
            Some(Tok::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(format!("expected {what}, found {}", self.describe()))),
        }
    }

    // ─── Module level ───────────────────────────────────────────────────

    fn module(mut self) -> Result<Module, RuleError> {
        self.skip_separators();
        if !self.is_keyword("package") {
            return Err(self.error("module must start with a `package` declaration"));
        }
        self.advance();
        let package = self.dotted_path("a package name")?;
        self.end_statement()?;

        let mut imports = Vec::new();
        let mut rules = Vec::new();
        loop {
            self.skip_separators();
            if self.peek().is_none() {
                break;
            }
            if self.is_keyword("import") {
                if let Some(import) = self.import()? {
                    imports.push(import);
                }
            } else {
                rules.push(self.rule()?);
            }
            self.end_statement()?;
        }
        Ok(Module {
            package,
            imports,
            rules,
        })
    }

    fn skip_separators(&mut self) {
        while matches!(self.tokens.get(self.pos), Some(t) if matches!(t.tok, Tok::Newline | Tok::Semi))
        {
            self.pos += 1;
        }
    }

    fn end_statement(&mut self) -> Result<(), RuleError> {
        match self.tokens.get(self.pos).map(|t| &t.tok) {
            None | Some(Tok::Newline) | Some(Tok::Semi) => Ok(()),
            _ => Err(self.error(format!(
                "expected newline or `;` after statement, found {}",
                self.describe()
            ))),
        }
    }

    /// `a.b["c"].d`
    fn dotted_path(&mut self, what: &str) -> Result<Vec<String>, RuleError> {
        let mut path = vec![self.ident(what)?];
        loop {
            match self.peek() {
                Some(Tok::Dot) => {
                    self.advance();
                    path.push(self.ident(what)?);
                }
                Some(Tok::LBracket) if self.adjacent() => {
                    self.advance();
                    match self.advance().map(|t| t.tok) {
                        Some(Tok::Str(s)) => path.push(s),
                        _ => return Err(self.error("expected a string key in path")),
                    }
                    self.expect(Tok::RBracket, "`]`")?;
                }
                _ => return Ok(path),
            }
        }
    }

    fn import(&mut self) -> Result<Option<Import>, RuleError> {
        self.advance();
        let path = self.dotted_path("an import path")?;
        let alias = if self.is_keyword("as") {
            self.advance();
            Some(self.ident("an import alias")?)
        } else {
            None
        };
        match path[0].as_str() {
            "future" | "rego" => Ok(None),
            "data" | "input" => {
                let alias = match alias {
                    Some(alias) => alias,
                    None => path[path.len() - 1].clone(),
                };
                Ok(Some(Import { path, alias }))
            }
            other => Err(self.error(format!(
                "import path must start with `data`, `input`, `future` or `rego`, found `{other}`"
            ))),
        }
    }

    fn rule(&mut self) -> Result<Rule, RuleError> {
        let start = self
            .peek_token()
            .map(|t| Location {
                row: t.line,
                col: t.column,
            })
            .ok_or_else(|| self.error("expected a rule"))?;

        if self.is_keyword("default") {
            self.advance();
            let name = self.ident("a rule name after `default`")?;
            match self.peek() {
                Some(Tok::Unify) | Some(Tok::Assign) => {
                    self.advance();
                }
                _ => return Err(self.error("expected `=` or `:=` after default rule name")),
            }
            let value = self.expr()?;
            return Ok(Rule {
                name,
                head: RuleHead::Complete(value),
                body: Vec::new(),
                else_chain: Vec::new(),
                is_default: true,
                location: start,
            });
        }

        let name = self.ident("a rule name")?;
        if matches!(self.peek(), Some(Tok::Dot)) {
            return Err(self.error("rule names with dotted paths are not supported"));
        }
        let params = if matches!(self.peek(), Some(Tok::LParen)) && self.adjacent() {
            self.advance();
            let params = self.nested(|p| {
                p.closed(Tok::RParen, "`)` closing the parameter list", |p| {
                    p.list(Tok::RParen)
                })
            })?;
            Some(params)
        } else {
            None
        };

        let mut bare = false;
        let head = match (params, self.peek()) {
            (Some(args), Some(Tok::Unify | Tok::Assign)) => {
                self.advance();
                RuleHead::Function {
                    args,
                    value: self.expr()?,
                }
            }
            (Some(args), _) => {
                bare = true;
                RuleHead::Function {
                    args,
                    value: Term::Scalar(Value::Bool(true)),
                }
            }
            (None, _) => self.rule_head(&mut bare)?,
        };

        let body = match self.rule_body()? {
            Some(body) => body,
            None if bare => {
                return Err(self.error(format!("rule `{name}` needs a value or a body")));
            }
            None => Vec::new(),
        };

        let mut else_chain = Vec::new();
        while matches!(self.peek_past_newlines(), Some(Tok::Ident(w)) if w == "else") {
            if !matches!(head, RuleHead::Complete(_) | RuleHead::Function { .. }) {
                return Err(self.error("`else` is only allowed on complete rules and functions"));
            }
            self.skip_newlines();
            self.advance();
            let value = if matches!(self.peek(), Some(Tok::Unify | Tok::Assign)) {
                self.advance();
                self.expr()?
            } else {
                Term::Scalar(Value::Bool(true))
            };
            let body = self.rule_body()?.unwrap_or_default();
            else_chain.push(ElseClause { value, body });
        }

        Ok(Rule {
            name,
            head,
            body,
            else_chain,
            is_default: false,
            location: start,
        })
    }

    /// Head of a non-function rule after its name. Sets `bare` when the
    /// head carries no value, so the rule needs a body.
    fn rule_head(&mut self, bare: &mut bool) -> Result<RuleHead, RuleError> {
        Ok(match self.peek() {
            Some(Tok::LBracket) => {
                self.advance();
                let key =
                    self.nested(|p| p.closed(Tok::RBracket, "`]` after rule key", Self::expr))?;
                if matches!(self.peek(), Some(Tok::Unify | Tok::Assign)) {
                    self.advance();
                    RuleHead::PartialObject(key, self.expr()?)
                } else {
                    RuleHead::PartialSet(key)
                }
            }
            Some(Tok::Ident(w)) if w == "contains" => {
                self.advance();
                RuleHead::PartialSet(self.expr()?)
            }
            Some(Tok::Unify | Tok::Assign) => {
                self.advance();
                RuleHead::Complete(self.expr()?)
            }
            _ => {
                *bare = true;
                RuleHead::Complete(Term::Scalar(Value::Bool(true)))
            }
        })
    }

    /// `if { ... }`, `if literal`, `{ ... }` or nothing.
    fn rule_body(&mut self) -> Result<Option<Vec<Literal>>, RuleError> {
        if self.is_keyword("if") {
            self.advance();
            if matches!(self.peek(), Some(Tok::LBrace)) {
                return self.braced_body().map(Some);
            }
            return Ok(Some(vec![self.literal()?]));
        }
        if matches!(self.peek(), Some(Tok::LBrace)) {
            return self.braced_body().map(Some);
        }
        Ok(None)
    }

    fn braced_body(&mut self) -> Result<Vec<Literal>, RuleError> {
        self.expect(Tok::LBrace, "`{`")?;
        let saved = std::mem::replace(&mut self.nesting, 0);
        let body = self.body_until(Some(Tok::RBrace));
        self.nesting = saved;
        let body = body?;
        self.expect(Tok::RBrace, "`}` closing the rule body")?;
        Ok(body)
    }

    /// Literals up to (not including) `close`, or to end of input.
    fn body_until(&mut self, close: Option<Tok>) -> Result<Vec<Literal>, RuleError> {
        let saved_union = std::mem::replace(&mut self.no_union, false);
        let mut body = Vec::new();
        let result = loop {
            self.skip_separators();
            match (self.peek(), &close) {
                (None, None) => break Ok(()),
                (None, Some(_)) => break Err(self.error("unexpected end of input in body")),
                (Some(t), Some(c)) if t == c => break Ok(()),
                _ => {}
            }
            match self.literal() {
                Ok(lit) => body.push(lit),
                Err(e) => break Err(e),
            }
            match (self.tokens.get(self.pos).map(|t| &t.tok), &close) {
                (None, _) | (Some(Tok::Newline | Tok::Semi), _) => {}
                (Some(t), Some(c)) if t == c => {}
                _ => {
                    break Err(self.error(format!(
                        "expected `;` or newline between expressions, found {}",
                        self.describe()
                    )))
                }
            }
        };
        self.no_union = saved_union;
        result.map(|_| body)
    }

    // ─── Literals ───────────────────────────────────────────────────────

    fn literal(&mut self) -> Result<Literal, RuleError> {
        let (location, start) = match self.peek_token() {
            Some(t) => (
                Location {
                    row: t.line,
                    col: t.column,
                },
                t.start,
            ),
            None => return Err(self.error("expected an expression")),
        };

        let negated = self.is_keyword("not");
        if negated {
            self.advance();
        }

        let kind = if self.is_keyword("some") {
            if negated {
                return Err(self.error("`not some` is not allowed"));
            }
            self.advance();
            self.some_decl()?
        } else if self.is_keyword("every") {
            self.advance();
            self.every()?
        } else {
            let lhs = self.expr()?;
            match self.peek() {
                Some(Tok::Assign) => {
                    self.advance();
                    LiteralKind::Assign(lhs, self.expr()?)
                }
                Some(Tok::Unify) => {
                    self.advance();
                    LiteralKind::Unify(lhs, self.expr()?)
                }
                _ => LiteralKind::Expr(lhs),
            }
        };

        let mut with = Vec::new();
        while self.is_keyword("with") {
            self.advance();
            let target = self.dotted_path("a `with` target")?;
            if !matches!(target[0].as_str(), "input" | "data") {
                return Err(self.error(format!(
                    "`with` target must start with `input` or `data`, found `{}`",
                    target[0]
                )));
            }
            if !self.is_keyword("as") {
                return Err(self.error("expected `as` in `with` modifier"));
            }
            self.advance();
            with.push(WithModifier {
                target,
                value: self.or_expr()?,
            });
        }

        Ok(Literal {
            kind,
            negated,
            with,
            location,
            text: self.src[start..self.prev_end()].to_string(),
        })
    }

    /// `every x in xs { .. }` / `every k, v in xs { .. }`, after `every`.
    fn every(&mut self) -> Result<LiteralKind, RuleError> {
        let first = self.ident("a variable after `every`")?;
        let (key, value) = if matches!(self.peek(), Some(Tok::Comma)) {
            self.advance();
            (Some(first), self.ident("a value variable after `,`")?)
        } else {
            (None, first)
        };
        if !self.is_keyword("in") {
            return Err(self.error("expected `in` after the `every` variables"));
        }
        self.advance();
        let domain = self.or_expr()?;
        if !matches!(self.peek(), Some(Tok::LBrace)) {
            return Err(self.error("expected `{` opening the `every` body"));
        }
        let body = self.braced_body()?;
        Ok(LiteralKind::Every {
            key,
            value,
            domain,
            body,
        })
    }

    fn some_decl(&mut self) -> Result<LiteralKind, RuleError> {
        let mut terms = vec![self.or_expr()?];
        while matches!(self.peek(), Some(Tok::Comma)) {
            self.advance();
            terms.push(self.or_expr()?);
        }
        if self.is_keyword("in") {
            self.advance();
            let collection = self.or_expr()?;
            let mut terms = terms.into_iter();
            return match (terms.next(), terms.next(), terms.next()) {
                (Some(value), None, None) => Ok(LiteralKind::SomeIn {
                    key: None,
                    value,
                    collection,
                }),
                (Some(key), Some(value), None) => Ok(LiteralKind::SomeIn {
                    key: Some(key),
                    value,
                    collection,
                }),
                _ => Err(self.error("`some ... in` takes one or two variables")),
            };
        }
        terms
            .into_iter()
            .map(|t| match t {
                Term::Var(name) => Ok(name),
                _ => Err(self.error("`some` declares variables only")),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(LiteralKind::Some)
    }

    // ─── Expressions ────────────────────────────────────────────────────

    pub(crate) fn expr(&mut self) -> Result<Term, RuleError> {
        let left = self.or_expr()?;
        if self.is_keyword("in") {
            self.advance();
            let collection = self.or_expr()?;
            return Ok(Term::Membership {
                key: None,
                value: Box::new(left),
                collection: Box::new(collection),
            });
        }
        Ok(left)
    }

    fn or_expr(&mut self) -> Result<Term, RuleError> {
        let mut left = self.and_expr()?;
        while !self.no_union && matches!(self.peek(), Some(Tok::Pipe)) {
            self.advance();
            let right = self.and_expr()?;
            left = binop(BinOp::Union, left, right);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Term, RuleError> {
        let mut left = self.comparison()?;
        while matches!(self.peek(), Some(Tok::Amp)) {
            self.advance();
            let right = self.comparison()?;
            left = binop(BinOp::Intersect, left, right);
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Term, RuleError> {
        let mut left = self.arith()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Eq) => BinOp::Eq,
                Some(Tok::Ne) => BinOp::Ne,
                Some(Tok::Lt) => BinOp::Lt,
                Some(Tok::Le) => BinOp::Le,
                Some(Tok::Gt) => BinOp::Gt,
                Some(Tok::Ge) => BinOp::Ge,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.arith()?;
            left = binop(op, left, right);
        }
    }

    fn arith(&mut self) -> Result<Term, RuleError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.factor()?;
            left = binop(op, left, right);
        }
    }

    fn factor(&mut self) -> Result<Term, RuleError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                Some(Tok::Percent) => BinOp::Rem,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = binop(op, left, right);
        }
    }

    fn unary(&mut self) -> Result<Term, RuleError> {
        if matches!(self.peek(), Some(Tok::Minus)) {
            self.advance();
            if let Some(Tok::Number(raw)) = self.peek().cloned() {
                self.advance();
                let n = self.number(&format!("-{raw}"))?;
                return Ok(Term::Scalar(Value::Number(n)));
            }
            let operand = self.unary()?;
            return Ok(binop(BinOp::Sub, Term::Scalar(Value::from_i64(0)), operand));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Term, RuleError> {
        let mut term = self.primary()?;
        loop {
            match self.peek() {
                Some(Tok::Dot) => {
                    self.advance();
                    let field = self.ident("a field name after `.`")?;
                    term = push_ref(term, Term::Scalar(Value::String(field)));
                }
                Some(Tok::LBracket) if self.adjacent() => {
                    self.advance();
                    let index = self.nested(|p| p.closed(Tok::RBracket, "`]`", Self::expr))?;
                    term = push_ref(term, index);
                }
                Some(Tok::LParen) if self.adjacent() => {
                    let name = call_name(&term)
                        .ok_or_else(|| self.error("only named functions can be called"))?;
                    self.advance();
                    let args = self.nested(|p| {
                        p.closed(Tok::RParen, "`)` closing the argument list", |p| {
                            p.list(Tok::RParen)
                        })
                    })?;
                    term = Term::Call { name, args };
                }
                _ => return Ok(term),
            }
        }
    }

    /// Run `f` with newlines ignored and `|` restored to set union.
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, RuleError>,
    ) -> Result<T, RuleError> {
        self.nesting += 1;
        let saved = std::mem::replace(&mut self.no_union, false);
        let result = f(self);
        self.no_union = saved;
        self.nesting -= 1;
        result
    }

    /// Parse with `f`, then require the closing token.
    fn closed<T>(
        &mut self,
        close: Tok,
        what: &str,
        f: impl FnOnce(&mut Self) -> Result<T, RuleError>,
    ) -> Result<T, RuleError> {
        let result = f(self)?;
        self.expect(close, what)?;
        Ok(result)
    }

    /// Comma-separated expressions, stopping before `close`.
    fn list(&mut self, close: Tok) -> Result<Vec<Term>, RuleError> {
        let mut items = Vec::new();
        while self.peek() != Some(&close) {
            items.push(self.expr()?);
            if matches!(self.peek(), Some(Tok::Comma)) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(items)
    }

    fn number(&self, raw: &str) -> Result<Number, RuleError> {
        if let Ok(n) = raw.parse::<i64>() {
            return Ok(Number::Int(n));
        }
        raw.parse::<f64>()
            .map(Number::from_f64)
            .map_err(|_| self.error(format!("invalid number `{raw}`")))
    }

    fn primary(&mut self) -> Result<Term, RuleError> {
        let Some(tok) = self.peek().cloned() else {
            return Err(self.error("unexpected end of input"));
        };
        match tok {
            Tok::Number(raw) => {
                let n = self.number(&raw)?;
                self.advance();
                Ok(Term::Scalar(Value::Number(n)))
            }
            Tok::Str(s) => {
                self.advance();
                Ok(Term::Scalar(Value::String(s)))
            }
            Tok::Ident(name) => {
                self.advance();
                Ok(match name.as_str() {
                    "true" => Term::Scalar(Value::Bool(true)),
                    "false" => Term::Scalar(Value::Bool(false)),
                    "null" => Term::Scalar(Value::Null),
                    _ => Term::Var(name),
                })
            }
            Tok::LParen => {
                self.advance();
                self.nested(|p| p.closed(Tok::RParen, "`)`", Self::expr))
            }
            Tok::LBracket => {
                self.advance();
                self.nested(|p| p.closed(Tok::RBracket, "`]`", Self::array_like))
            }
            Tok::LBrace => {
                self.advance();
                self.nested(|p| p.closed(Tok::RBrace, "`}`", Self::brace_like))
            }
            _ => Err(self.error(format!("unexpected {}", self.describe()))),
        }
    }

    /// Contents of `[...]`: array literal or array comprehension.
    fn array_like(&mut self) -> Result<Term, RuleError> {
        if matches!(self.peek(), Some(Tok::RBracket)) {
            return Ok(Term::Array(Vec::new()));
        }
        let first = self.first_element()?;
        if matches!(self.peek(), Some(Tok::Pipe)) {
            self.advance();
            let body = self.comprehension_body(Tok::RBracket)?;
            return Ok(Term::ArrayCompr {
                term: Box::new(first),
                body,
            });
        }
        let mut items = vec![first];
        if matches!(self.peek(), Some(Tok::Comma)) {
            self.advance();
            items.extend(self.list(Tok::RBracket)?);
        }
        Ok(Term::Array(items))
    }

    /// Contents of `{...}`: object, set, or one of their comprehensions.
    fn brace_like(&mut self) -> Result<Term, RuleError> {
        if matches!(self.peek(), Some(Tok::RBrace)) {
            return Ok(Term::Object(Vec::new()));
        }
        let first = self.first_element()?;
        if matches!(self.peek(), Some(Tok::Colon)) {
            self.advance();
            let value = self.first_element()?;
            if matches!(self.peek(), Some(Tok::Pipe)) {
                self.advance();
                let body = self.comprehension_body(Tok::RBrace)?;
                return Ok(Term::ObjectCompr {
                    key: Box::new(first),
                    value: Box::new(value),
                    body,
                });
            }
            let mut pairs = vec![(first, value)];
            while matches!(self.peek(), Some(Tok::Comma)) {
                self.advance();
                if matches!(self.peek(), Some(Tok::RBrace)) {
                    break;
                }
                let key = self.expr()?;
                self.expect(Tok::Colon, "`:` in object literal")?;
                pairs.push((key, self.expr()?));
            }
            return Ok(Term::Object(pairs));
        }
        if matches!(self.peek(), Some(Tok::Pipe)) {
            self.advance();
            let body = self.comprehension_body(Tok::RBrace)?;
            return Ok(Term::SetCompr {
                term: Box::new(first),
                body,
            });
        }
        let mut items = vec![first];
        if matches!(self.peek(), Some(Tok::Comma)) {
            self.advance();
            items.extend(self.list(Tok::RBrace)?);
        }
        Ok(Term::Set(items))
    }

    fn first_element(&mut self) -> Result<Term, RuleError> {
        let saved = std::mem::replace(&mut self.no_union, true);
        let result = self.expr();
        self.no_union = saved;
        result
    }

    fn comprehension_body(&mut self, close: Tok) -> Result<Vec<Literal>, RuleError> {
        let saved = std::mem::replace(&mut self.nesting, 0);
        let body = self.body_until(Some(close));
        self.nesting = saved;
        let body = body?;
        if body.is_empty() {
            return Err(self.error("comprehension body must not be empty"));
        }
        Ok(body)
    }
}

fn binop(op: BinOp, left: Term, right: Term) -> Term {
    Term::BinOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn push_ref(term: Term, arg: Term) -> Term {
    match term {
        Term::Ref { head, mut path } => {
            path.push(arg);
            Term::Ref { head, path }
        }
        other => Term::Ref {
            head: Box::new(other),
            path: vec![arg],
        },
    }
}

/// `count` or `object.get` style names.
fn call_name(term: &Term) -> Option<String> {
    match term {
        Term::Var(name) => Some(name.clone()),
        Term::Ref { head, path } => {
            let Term::Var(first) = head.as_ref() else {
                return None;
            };
            let mut name = first.clone();
            for segment in path {
                match segment {
                    Term::Scalar(Value::String(s)) => {
                        name.push('.');
                        name.push_str(s);
                    }
                    _ => return None,
                }
            }
            Some(name)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_module_shapes() {
        let module = parse_module(
            "example.rego",
            r#"
package app.rbac

import future.keywords.if
import data.roles as r

default allow := false

allow if {
    some role in input.roles
    r[role].admin == true
}

deny contains msg if {
    input.user == ""
    msg := "missing user"
}

names[n] { n := input.users[_].name }

by_id[id] = u { u := input.users[i]; id := u.id }

level = "high" { input.score > 90 } else = "low" { true }

count_users := count(input.users)
"#,
        )
        .unwrap();
        assert_eq!(module.package, vec!["app", "rbac"]);
        assert_eq!(module.package_path(), "data.app.rbac");
        assert_eq!(module.imports.len(), 1);
        assert_eq!(module.imports[0].alias, "r");
        assert_eq!(module.rules.len(), 7);
        assert!(module.rules[0].is_default);
        assert_eq!(module.rules[1].body.len(), 2);
        assert!(matches!(module.rules[2].head, RuleHead::PartialSet(_)));
        assert!(matches!(module.rules[3].head, RuleHead::PartialSet(_)));
        assert!(matches!(module.rules[4].head, RuleHead::PartialObject(_, _)));
        assert_eq!(module.rules[5].else_chain.len(), 1);
        assert!(module.rules[6].body.is_empty());
    }

    #[test]
    fn test_single_literal_if_body() {
        let module = parse_module("m", "package a\nallow if input.x == 1\n").unwrap();
        assert_eq!(module.rules[0].body.len(), 1);
        assert_eq!(module.rules[0].body[0].text, "input.x == 1");
    }

    #[test]
    fn test_comprehensions_and_union() {
        let lits = parse_query("x := {a | some a in [1, 2]} | {3}; y := [v | v := input[_]]").unwrap();
        assert_eq!(lits.len(), 2);
        match &lits[0].kind {
            LiteralKind::Assign(_, Term::BinOp { op: BinOp::Union, left, .. }) => {
                assert!(matches!(**left, Term::SetCompr { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            lits[1].kind,
            LiteralKind::Assign(_, Term::ArrayCompr { .. })
        ));
    }

    #[test]
    fn test_multiline_collections() {
        let lits = parse_query("x := [\n  1,\n  2,\n]\ny := {\"a\":\n 1}").unwrap();
        assert_eq!(lits.len(), 2);
    }

    #[test]
    fn test_calls_and_refs() {
        let lits = parse_query(r#"object.get(input, "a", 0) > count(data.xs[_].ys)"#).unwrap();
        match &lits[0].kind {
            LiteralKind::Expr(Term::BinOp { left, right, .. }) => {
                assert!(matches!(**left, Term::Call { ref name, .. } if name == "object.get"));
                assert!(matches!(**right, Term::Call { ref name, .. } if name == "count"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_literal_location_and_text() {
        let lits = parse_query("input.a == 1;\n  not input.b").unwrap();
        assert_eq!(lits[1].location, Location { row: 2, col: 3 });
        assert_eq!(lits[1].text, "not input.b");
        assert!(lits[1].negated);
    }

    #[test]
    fn test_functions_every_and_with() {
        let module = parse_module(
            "fn.rego",
            r#"package fn
double(x) := y if { y := x * 2 }
is_even(n) { n % 2 == 0 }
pick([a, _]) = a
all_even if {
    every v in input.nums { is_even(v) }
}
"#,
        )
        .unwrap();
        match &module.rules[0].head {
            RuleHead::Function { args, .. } => assert_eq!(args, &vec![Term::Var("x".into())]),
            other => panic!("expected function head, got {other:?}"),
        }
        assert!(matches!(module.rules[1].head, RuleHead::Function { .. }));
        assert!(module.rules[2].body.is_empty());
        assert!(matches!(
            module.rules[3].body[0].kind,
            LiteralKind::Every { key: None, ref value, .. } if value == "v"
        ));
        assert_eq!(module.rules.len(), 4);

        let lits = parse_query("data.p.allow with input.user as \"bob\" with data.roles as {}").unwrap();
        assert_eq!(lits[0].with.len(), 2);
        assert_eq!(lits[0].with[0].target, vec!["input", "user"]);
        assert_eq!(lits[0].with[1].target, vec!["data", "roles"]);

        let lits = parse_query("every k, v in {\"a\": 1} { k == \"a\"; v > 0 }").unwrap();
        match &lits[0].kind {
            LiteralKind::Every { key, body, .. } => {
                assert_eq!(key.as_deref(), Some("k"));
                assert_eq!(body.len(), 2);
            }
            other => panic!("expected every, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_module("m", "allow { true }").is_err());
        assert!(parse_module("m", "package a\nallow\n").is_err());
        assert!(parse_module("m", "package a\nallow { input.x == }").is_err());
        assert!(parse_module("m", "package a\nallow { true ").is_err());
        assert!(parse_query("x with other as 1").is_err());
        assert!(parse_query("every x in xs").is_err());
        assert!(parse_module("m", "package a\nf(x)\n").is_err());
        let err = parse_module("bad.rego", "package a\n\nallow { 1 + }").unwrap_err();
        match err {
            RuleError::Parse {
                source_name, line, ..
            } => {
                assert_eq!(source_name, "bad.rego");
                assert_eq!(line, 3);
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
