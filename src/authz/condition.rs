//! Tokenizer, parser and canonical printer for policy condition expressions.
//!
//! Supported syntax:
//! - Comparisons: `==`, `!=`, `>`, `<`, `>=`, `<=`
//! - Boolean operators: `&&`, `||`, `!`
//! - Arithmetic on longs: `+`, `-`, `*`
//! - Hierarchy / membership: `x in y`, `x is Type`, `x is Type in y`
//! - Attributes: `principal.dept`, `context["ip"]`, `x has attr`
//! - Patterns: `resource.name like "*.jpg"`
//! - Literals: longs, `"strings"`, `true`, `false`, entities (`User::"alice"`),
//!   sets (`[1, 2]`) and records (`{ a: 1 }`)
//! - `if c then a else b`, methods `.contains()`, `.containsAll()`,
//!   `.containsAny()`, `.isEmpty()`, parentheses for grouping

use std::fmt;

use crate::authz::errors::AuthzError;
use crate::authz::types::{escape, EntityUid};

// ─── AST ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(LitValue),
    Entity(EntityUid),
    Var(Var),
    Set(Vec<Expr>),
    Record(Vec<(String, Expr)>),
    GetAttr {
        expr: Box<Expr>,
        attr: String,
    },
    HasAttr {
        expr: Box<Expr>,
        attr: String,
    },
    Like {
        expr: Box<Expr>,
        pattern: Pattern,
    },
    Is {
        expr: Box<Expr>,
        entity_type: String,
        in_expr: Option<Box<Expr>>,
    },
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryNot(Box<Expr>),
    Neg(Box<Expr>),
    In {
        element: Box<Expr>,
        collection: Box<Expr>,
    },
    IfThenElse {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    MethodCall {
        receiver: Box<Expr>,
        method: Method,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
    Add,
    Sub,
    Mul,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Gt => ">",
            BinOp::Lt => "<",
            BinOp::Ge => ">=",
            BinOp::Le => "<=",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LitValue {
    Long(i64),
    Str(String),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Var {
    Principal,
    Action,
    Resource,
    Context,
}

impl Var {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "principal" => Some(Var::Principal),
            "action" => Some(Var::Action),
            "resource" => Some(Var::Resource),
            "context" => Some(Var::Context),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Var::Principal => "principal",
            Var::Action => "action",
            Var::Resource => "resource",
            Var::Context => "context",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Contains,
    ContainsAll,
    ContainsAny,
    IsEmpty,
}

impl Method {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "contains" => Some(Method::Contains),
            "containsAll" => Some(Method::ContainsAll),
            "containsAny" => Some(Method::ContainsAny),
            "isEmpty" => Some(Method::IsEmpty),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Method::Contains => "contains",
            Method::ContainsAll => "containsAll",
            Method::ContainsAny => "containsAny",
            Method::IsEmpty => "isEmpty",
        }
    }

    fn arity(self) -> usize {
        match self {
            Method::IsEmpty => 0,
            _ => 1,
        }
    }
}

/// A `like` pattern: literal characters and `*` wildcards.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern(pub Vec<PatternElem>);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PatternElem {
    Char(char),
    Wildcard,
}

impl Pattern {
    /// Match `text` against the pattern; `*` matches any run of characters.
    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        let pat = &self.0;
        let (mut t, mut p) = (0, 0);
        let mut backtrack: Option<(usize, usize)> = None;
        while t < text.len() {
            match pat.get(p) {
                Some(PatternElem::Wildcard) => {
                    backtrack = Some((p, t));
                    p += 1;
                }
                Some(PatternElem::Char(c)) if *c == text[t] => {
                    p += 1;
                    t += 1;
                }
                _ => match backtrack {
                    Some((bp, bt)) => {
                        p = bp + 1;
                        t = bt + 1;
                        backtrack = Some((bp, bt + 1));
                    }
                    None => return false,
                },
            }
        }
        pat[p..].iter().all(|e| *e == PatternElem::Wildcard)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"")?;
        for elem in &self.0 {
            match elem {
                PatternElem::Wildcard => write!(f, "*")?,
                PatternElem::Char('*') => write!(f, "\\*")?,
                PatternElem::Char(c) => write!(f, "{}", escape(&c.to_string()))?,
            }
        }
        write!(f, "\"")
    }
}

// ─── Tokenizer ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Int(i64),
    /// Raw string contents, escapes not yet processed.
    Str(String),
    True,
    False,
    In,
    Dot,
    Comma,
    Semi,
    Colon,
    PathSep, // ::
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    At,
    Eq,  // ==
    Ne,  // !=
    Gt,  // >
    Lt,  // <
    Ge,  // >=
    Le,  // <=
    And, // &&
    Or,  // ||
    Not, // !
    Plus,
    Minus,
    Star,
}

#[derive(Debug, Clone)]
pub(crate) struct Spanned {
    pub token: Token,
    pub line: usize,
    pub column: usize,
}

fn punctuation(c: char, next: Option<char>) -> Option<(Token, usize)> {
    let pair = match (c, next) {
        (':', Some(':')) => Some(Token::PathSep),
        ('=', Some('=')) => Some(Token::Eq),
        ('!', Some('=')) => Some(Token::Ne),
        ('>', Some('=')) => Some(Token::Ge),
        ('<', Some('=')) => Some(Token::Le),
        ('&', Some('&')) => Some(Token::And),
        ('|', Some('|')) => Some(Token::Or),
        _ => None,
    };
    if let Some(token) = pair {
        return Some((token, 2));
    }
    let single = match c {
        '.' => Token::Dot,
        ',' => Token::Comma,
        ';' => Token::Semi,
        ':' => Token::Colon,
        '(' => Token::LParen,
        ')' => Token::RParen,
        '{' => Token::LBrace,
        '}' => Token::RBrace,
        '[' => Token::LBracket,
        ']' => Token::RBracket,
        '@' => Token::At,
        '+' => Token::Plus,
        '-' => Token::Minus,
        '*' => Token::Star,
        '!' => Token::Not,
        '>' => Token::Gt,
        '<' => Token::Lt,
        _ => return None,
    };
    Some((single, 1))
}

fn tokenize(input: &str) -> Result<Vec<Spanned>, AuthzError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    let mut line = 1;
    let mut line_start = 0;

    while i < chars.len() {
        let column = i - line_start + 1;
        let next = chars.get(i + 1).copied();
        if let Some((token, width)) = punctuation(chars[i], next) {
            tokens.push(Spanned {
                token,
                line,
                column,
            });
            i += width;
            continue;
        }
        match chars[i] {
            '\n' => {
                i += 1;
                line += 1;
                line_start = i;
            }
            ' ' | '\t' | '\r' => {
                i += 1;
            }
            '/' if next == Some('/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '"' => {
                let start_line = line;
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j] != '"' {
                    if chars[j] == '\\' {
                        j += 1; // skip escaped char
                    }
                    if j < chars.len() && chars[j] == '\n' {
                        line += 1;
                        line_start = j + 1;
                    }
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(AuthzError::parse(
                        "unterminated string literal",
                        start_line,
                        column,
                    ));
                }
                let raw: String = chars[start..j].iter().collect();
                tokens.push(Spanned {
                    token: Token::Str(raw),
                    line: start_line,
                    column,
                });
                i = j + 1; // skip closing quote
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let num_str: String = chars[start..i].iter().collect();
                let n: i64 = num_str.parse().map_err(|_| {
                    AuthzError::parse(format!("integer literal `{num_str}` is out of range"), line, column)
                })?;
                tokens.push(Spanned {
                    token: Token::Int(n),
                    line,
                    column,
                });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "in" => Token::In,
                    _ => Token::Ident(word),
                };
                tokens.push(Spanned {
                    token,
                    line,
                    column,
                });
            }
            c => {
                return Err(AuthzError::parse(
                    format!("unexpected character `{c}`"),
                    line,
                    column,
                ));
            }
        }
    }
    Ok(tokens)
}

/// Process escape sequences in a raw string literal.
fn unescape(raw: &str) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('*') => out.push('*'),
            Some('u') => out.push(unicode_escape(&mut chars)?),
            Some(other) => return Err(format!("invalid escape sequence `\\{other}`")),
            None => return Err("dangling `\\` at end of string".into()),
        }
    }
    Ok(out)
}

fn unicode_escape(chars: &mut std::str::Chars<'_>) -> Result<char, String> {
    if chars.next() != Some('{') {
        return Err("expected `{` after `\\u`".into());
    }
    let mut hex = String::new();
    for c in chars.by_ref() {
        if c == '}' {
            let code = u32::from_str_radix(&hex, 16)
                .map_err(|_| format!("invalid unicode escape `\\u{{{hex}}}`"))?;
            return char::from_u32(code).ok_or_else(|| format!("invalid code point {code:#x}"));
        }
        hex.push(c);
    }
    Err("unterminated unicode escape".into())
}

/// Build a `like` pattern from raw string contents: `*` is a wildcard and
/// `\*` a literal star.
fn parse_pattern(raw: &str) -> Result<Pattern, String> {
    let mut elems = Vec::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => elems.push(PatternElem::Wildcard),
            '\\' => {
                let mut escaped = String::from('\\');
                match chars.next() {
                    Some('u') => {
                        escaped.push('u');
                        for c in chars.by_ref() {
                            escaped.push(c);
                            if c == '}' {
                                break;
                            }
                        }
                    }
                    Some(c) => escaped.push(c),
                    None => return Err("dangling `\\` at end of pattern".into()),
                }
                for c in unescape(&escaped)?.chars() {
                    elems.push(PatternElem::Char(c));
                }
            }
            c => elems.push(PatternElem::Char(c)),
        }
    }
    Ok(Pattern(elems))
}

// ─── Parser ─────────────────────────────────────────────────────────────

pub(crate) struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    eof: (usize, usize),
}

impl Parser {
    pub(crate) fn new(source: &str) -> Result<Self, AuthzError> {
        let tokens = tokenize(source)?;
        let lines = source.lines().count().max(1);
        let last_col = source.lines().last().map(|l| l.len() + 1).unwrap_or(1);
        Ok(Self {
            tokens,
            pos: 0,
            eof: (lines, last_col),
        })
    }

    pub(crate) fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    pub(crate) fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    pub(crate) fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|s| s.token.clone());
        self.pos += 1;
        tok
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub(crate) fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w == keyword)
    }

    pub(crate) fn error(&self, message: impl Into<String>) -> AuthzError {
        let (line, column) = match self.tokens.get(self.pos) {
            Some(s) => (s.line, s.column),
            None => self.eof,
        };
        AuthzError::parse(message, line, column)
    }

    pub(crate) fn expect(&mut self, expected: Token, what: &str) -> Result<(), AuthzError> {
        if self.peek() != Some(&expected) {
            let found = self.describe_current();
            return Err(self.error(format!("expected {what}, found {found}")));
        }
        self.advance();
        Ok(())
    }

    pub(crate) fn expect_keyword(&mut self, keyword: &str) -> Result<(), AuthzError> {
        if !self.peek_keyword(keyword) {
            let found = self.describe_current();
            return Err(self.error(format!("expected `{keyword}`, found {found}")));
        }
        self.advance();
        Ok(())
    }

    pub(crate) fn describe_current(&self) -> String {
        match self.peek() {
            Some(Token::Ident(w)) => format!("`{w}`"),
            Some(Token::Str(s)) => format!("\"{s}\""),
            Some(Token::Int(n)) => format!("`{n}`"),
            Some(other) => format!("{other:?}"),
            None => "end of input".to_string(),
        }
    }

    pub(crate) fn parse_ident(&mut self, what: &str) -> Result<String, AuthzError> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            _ => {
                let found = self.describe_current();
                Err(self.error(format!("expected {what}, found {found}")))
            }
        }
    }

    pub(crate) fn parse_string(&mut self) -> Result<String, AuthzError> {
        match self.peek().cloned() {
            Some(Token::Str(raw)) => {
                let s = unescape(&raw).map_err(|e| self.error(e))?;
                self.advance();
                Ok(s)
            }
            _ => {
                let found = self.describe_current();
                Err(self.error(format!("expected a string literal, found {found}")))
            }
        }
    }

    /// entity = Ident ("::" Ident)* "::" Str
    pub(crate) fn parse_entity_uid(&mut self) -> Result<EntityUid, AuthzError> {
        let first = self.parse_ident("an entity type")?;
        self.parse_entity_rest(first)
    }

    fn parse_entity_rest(&mut self, first: String) -> Result<EntityUid, AuthzError> {
        let mut segments = vec![first];
        loop {
            self.expect(Token::PathSep, "`::`")?;
            match self.peek().cloned() {
                Some(Token::Ident(seg)) => {
                    self.advance();
                    segments.push(seg);
                }
                Some(Token::Str(_)) => {
                    let id = self.parse_string()?;
                    if id.is_empty() {
                        return Err(self.error("entity id must not be empty"));
                    }
                    return Ok(EntityUid::new(segments.join("::"), id));
                }
                _ => {
                    let found = self.describe_current();
                    return Err(self.error(format!(
                        "expected an entity id string after `::`, found {found}"
                    )));
                }
            }
        }
    }

    /// type = Ident ("::" Ident)*, without consuming a trailing `::"id"`.
    pub(crate) fn parse_type_path(&mut self) -> Result<String, AuthzError> {
        let mut segments = vec![self.parse_ident("an entity type")?];
        while self.peek() == Some(&Token::PathSep)
            && matches!(self.peek_at(1), Some(Token::Ident(_)))
        {
            self.advance();
            segments.push(self.parse_ident("an entity type")?);
        }
        Ok(segments.join("::"))
    }

    /// expr = "if" expr "then" expr "else" expr | or_expr
    pub(crate) fn parse_expr(&mut self) -> Result<Expr, AuthzError> {
        if self.peek_keyword("if") {
            self.advance();
            let cond = self.parse_expr()?;
            self.expect_keyword("then")?;
            let then_expr = self.parse_expr()?;
            self.expect_keyword("else")?;
            let else_expr = self.parse_expr()?;
            return Ok(Expr::IfThenElse {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            });
        }
        self.parse_or()
    }

    /// or_expr = and_expr ("||" and_expr)*
    fn parse_or(&mut self) -> Result<Expr, AuthzError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::BinOp {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// and_expr = relation ("&&" relation)*
    fn parse_and(&mut self) -> Result<Expr, AuthzError> {
        let mut left = self.parse_relation()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_relation()?;
            left = Expr::BinOp {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// relation = add ((relop | "in") add | "has" attr | "like" pattern | "is" type ("in" add)?)?
    fn parse_relation(&mut self) -> Result<Expr, AuthzError> {
        let left = self.parse_add()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Ge) => BinOp::Ge,
            Some(Token::Le) => BinOp::Le,
            Some(Token::In) => {
                self.advance();
                let right = self.parse_add()?;
                return Ok(Expr::In {
                    element: Box::new(left),
                    collection: Box::new(right),
                });
            }
            Some(Token::Ident(w)) if w == "has" => {
                self.advance();
                let attr = match self.peek() {
                    Some(Token::Str(_)) => self.parse_string()?,
                    _ => self.parse_ident("an attribute name after `has`")?,
                };
                return Ok(Expr::HasAttr {
                    expr: Box::new(left),
                    attr,
                });
            }
            Some(Token::Ident(w)) if w == "like" => {
                self.advance();
                let raw = match self.peek().cloned() {
                    Some(Token::Str(raw)) => raw,
                    _ => return Err(self.error("expected a pattern string after `like`")),
                };
                let pattern = parse_pattern(&raw).map_err(|e| self.error(e))?;
                self.advance();
                return Ok(Expr::Like {
                    expr: Box::new(left),
                    pattern,
                });
            }
            Some(Token::Ident(w)) if w == "is" => {
                self.advance();
                let entity_type = self.parse_type_path()?;
                let in_expr = if self.peek() == Some(&Token::In) {
                    self.advance();
                    Some(Box::new(self.parse_add()?))
                } else {
                    None
                };
                return Ok(Expr::Is {
                    expr: Box::new(left),
                    entity_type,
                    in_expr,
                });
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_add()?;
        Ok(Expr::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// add = mult (("+" | "-") mult)*
    fn parse_add(&mut self) -> Result<Expr, AuthzError> {
        let mut left = self.parse_mult()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_mult()?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    /// mult = unary ("*" unary)*
    fn parse_mult(&mut self) -> Result<Expr, AuthzError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::Star) {
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::BinOp {
                op: BinOp::Mul,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// unary = "!" unary | "-" unary | member
    fn parse_unary(&mut self) -> Result<Expr, AuthzError> {
        match self.peek() {
            Some(Token::Not) => {
                self.advance();
                let expr = self.parse_unary()?;
                Ok(Expr::UnaryNot(Box::new(expr)))
            }
            Some(Token::Minus) => {
                self.advance();
                if let Some(Token::Int(n)) = self.peek().cloned() {
                    self.advance();
                    return Ok(Expr::Literal(LitValue::Long(-n)));
                }
                let expr = self.parse_unary()?;
                Ok(Expr::Neg(Box::new(expr)))
            }
            _ => self.parse_member(),
        }
    }

    /// member = primary ("." ident ("(" args ")")? | "[" string "]")*
    fn parse_member(&mut self) -> Result<Expr, AuthzError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    let name = self.parse_ident("an attribute or method name after `.`")?;
                    if self.peek() == Some(&Token::LParen) {
                        let method = Method::from_name(&name)
                            .ok_or_else(|| self.error(format!("unknown method `{name}`")))?;
                        self.advance();
                        let args = self.parse_list(Token::RParen)?;
                        if args.len() != method.arity() {
                            return Err(self.error(format!(
                                "`{name}` takes {} argument(s), got {}",
                                method.arity(),
                                args.len()
                            )));
                        }
                        expr = Expr::MethodCall {
                            receiver: Box::new(expr),
                            method,
                            args,
                        };
                    } else {
                        expr = Expr::GetAttr {
                            expr: Box::new(expr),
                            attr: name,
                        };
                    }
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let attr = self.parse_string()?;
                    self.expect(Token::RBracket, "`]`")?;
                    expr = Expr::GetAttr {
                        expr: Box::new(expr),
                        attr,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Comma-separated expressions up to and including `close`.
    fn parse_list(&mut self, close: Token) -> Result<Vec<Expr>, AuthzError> {
        let mut items = Vec::new();
        if self.peek() == Some(&close) {
            self.advance();
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr()?);
            match self.advance() {
                Some(Token::Comma) if self.peek() == Some(&close) => {
                    self.advance();
                    return Ok(items);
                }
                Some(Token::Comma) => continue,
                Some(tok) if tok == close => return Ok(items),
                _ => {
                    self.pos -= 1;
                    return Err(self.error(format!("expected `,` or {close:?}")));
                }
            }
        }
    }

    /// primary = literal | entity | var | "(" expr ")" | "[" list "]" | "{" record "}"
    fn parse_primary(&mut self) -> Result<Expr, AuthzError> {
        match self.peek().cloned() {
            Some(Token::Int(n)) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Long(n)))
            }
            Some(Token::Str(_)) => Ok(Expr::Literal(LitValue::Str(self.parse_string()?))),
            Some(Token::True) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Bool(true)))
            }
            Some(Token::False) => {
                self.advance();
                Ok(Expr::Literal(LitValue::Bool(false)))
            }
            Some(Token::Ident(name)) => {
                self.advance();
                if self.peek() == Some(&Token::PathSep) {
                    return Ok(Expr::Entity(self.parse_entity_rest(name)?));
                }
                match Var::from_name(&name) {
                    Some(var) => Ok(Expr::Var(var)),
                    None => {
                        self.pos -= 1;
                        Err(self.error(format!("unknown variable `{name}`")))
                    }
                }
            }
            Some(Token::LParen) => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(Token::RParen, "closing parenthesis `)`")?;
                Ok(expr)
            }
            Some(Token::LBracket) => {
                self.advance();
                Ok(Expr::Set(self.parse_list(Token::RBracket)?))
            }
            Some(Token::LBrace) => {
                self.advance();
                self.parse_record()
            }
            _ => {
                let found = self.describe_current();
                Err(self.error(format!("unexpected token: {found}")))
            }
        }
    }

    fn parse_record(&mut self) -> Result<Expr, AuthzError> {
        let mut fields = Vec::new();
        while self.peek() != Some(&Token::RBrace) {
            let key = match self.peek() {
                Some(Token::Str(_)) => self.parse_string()?,
                _ => self.parse_ident("a record key")?,
            };
            self.expect(Token::Colon, "`:` after record key")?;
            fields.push((key, self.parse_expr()?));
            if self.peek() == Some(&Token::Comma) {
                self.advance();
            } else if self.peek() != Some(&Token::RBrace) {
                return Err(self.error("expected `,` or `}` in record literal"));
            }
        }
        self.advance();
        Ok(Expr::Record(fields))
    }
}

/// Parse a condition expression string into an AST.
pub fn parse_condition(input: &str) -> Result<Expr, AuthzError> {
    let mut parser = Parser::new(input)?;
    if parser.at_end() {
        return Err(parser.error("empty expression"));
    }
    let expr = parser.parse_expr()?;
    if !parser.at_end() {
        let found = parser.describe_current();
        return Err(parser.error(format!("unexpected trailing token: {found}")));
    }
    Ok(expr)
}

/// Parse a standalone entity literal such as `User::"alice"`.
pub(crate) fn parse_entity_literal(input: &str) -> Result<EntityUid, AuthzError> {
    let mut parser = Parser::new(input)?;
    let uid = parser.parse_entity_uid()?;
    if !parser.at_end() {
        let found = parser.describe_current();
        return Err(parser.error(format!("unexpected trailing token: {found}")));
    }
    Ok(uid)
}

// ─── Printer ────────────────────────────────────────────────────────────

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !matches!(s, "true" | "false" | "in")
}

fn is_atomic(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Literal(LitValue::Str(_) | LitValue::Bool(_))
            | Expr::Entity(_)
            | Expr::Var(_)
            | Expr::Set(_)
            | Expr::Record(_)
            | Expr::GetAttr { .. }
            | Expr::MethodCall { .. }
    ) || matches!(expr, Expr::Literal(LitValue::Long(n)) if *n >= 0)
}

struct Operand<'a>(&'a Expr);

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if is_atomic(self.0) {
            write!(f, "{}", self.0)
        } else {
            write!(f, "({})", self.0)
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(LitValue::Long(n)) => write!(f, "{n}"),
            Expr::Literal(LitValue::Str(s)) => write!(f, "\"{}\"", escape(s)),
            Expr::Literal(LitValue::Bool(b)) => write!(f, "{b}"),
            Expr::Entity(uid) => write!(f, "{uid}"),
            Expr::Var(var) => write!(f, "{}", var.name()),
            Expr::Set(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
            Expr::Record(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{}\": {v}", escape(k))?;
                }
                write!(f, "}}")
            }
            Expr::GetAttr { expr, attr } if is_ident(attr) => {
                write!(f, "{}.{attr}", Operand(expr))
            }
            Expr::GetAttr { expr, attr } => write!(f, "{}[\"{}\"]", Operand(expr), escape(attr)),
            Expr::HasAttr { expr, attr } if is_ident(attr) => {
                write!(f, "{} has {attr}", Operand(expr))
            }
            Expr::HasAttr { expr, attr } => {
                write!(f, "{} has \"{}\"", Operand(expr), escape(attr))
            }
            Expr::Like { expr, pattern } => write!(f, "{} like {pattern}", Operand(expr)),
            Expr::Is {
                expr,
                entity_type,
                in_expr,
            } => {
                write!(f, "{} is {entity_type}", Operand(expr))?;
                if let Some(in_expr) = in_expr {
                    write!(f, " in {}", Operand(in_expr))?;
                }
                Ok(())
            }
            Expr::BinOp { op, left, right } => {
                write!(f, "{} {} {}", Operand(left), op.symbol(), Operand(right))
            }
            Expr::UnaryNot(inner) => write!(f, "!{}", Operand(inner)),
            Expr::Neg(inner) => write!(f, "-{}", Operand(inner)),
            Expr::In {
                element,
                collection,
            } => write!(f, "{} in {}", Operand(element), Operand(collection)),
            Expr::IfThenElse {
                cond,
                then_expr,
                else_expr,
            } => write!(
                f,
                "if {} then {} else {}",
                Operand(cond),
                Operand(then_expr),
                Operand(else_expr)
            ),
            Expr::MethodCall {
                receiver,
                method,
                args,
            } => {
                write!(f, "{}.{}(", Operand(receiver), method.name())?;
                write_list(f, args)?;
                write!(f, ")")
            }
        }
    }
}
