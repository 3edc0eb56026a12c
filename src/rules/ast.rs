use crate::rules::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Union,
    Intersect,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Scalar(Value),
    Var(String),
    /// `head.a[b]...`; dotted fields are stored as string scalars.
    Ref {
        head: Box<Term>,
        path: Vec<Term>,
    },
    Array(Vec<Term>),
    Set(Vec<Term>),
    Object(Vec<(Term, Term)>),
    ArrayCompr {
        term: Box<Term>,
        body: Vec<Literal>,
    },
    SetCompr {
        term: Box<Term>,
        body: Vec<Literal>,
    },
    ObjectCompr {
        key: Box<Term>,
        value: Box<Term>,
        body: Vec<Literal>,
    },
    Call {
        name: String,
        args: Vec<Term>,
    },
    BinOp {
        op: BinOp,
        left: Box<Term>,
        right: Box<Term>,
    },
    /// `x in xs` or `k, v in xs` used as an expression.
    Membership {
        key: Option<Box<Term>>,
        value: Box<Term>,
        collection: Box<Term>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub row: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralKind {
    Expr(Term),
    /// `some x, y`
    Some(Vec<String>),
    /// `some x in xs` / `some k, v in xs`
    SomeIn {
        key: Option<Term>,
        value: Term,
        collection: Term,
    },
    /// `x := expr`
    Assign(Term, Term),
    /// `a = b`
    Unify(Term, Term),
    /// `every k, v in domain { body }`
    Every {
        key: Option<String>,
        value: String,
        domain: Term,
        body: Vec<Literal>,
    },
}

/// `with input.a as v` / `with data.x as v`
#[derive(Debug, Clone, PartialEq)]
pub struct WithModifier {
    /// Full path starting at `input` or `data`.
    pub target: Vec<String>,
    pub value: Term,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    pub kind: LiteralKind,
    pub negated: bool,
    pub with: Vec<WithModifier>,
    pub location: Location,
    /// Source text of the literal.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleHead {
    /// `p = v` (value `true` when omitted)
    Complete(Term),
    /// `p[x]` / `p contains x`
    PartialSet(Term),
    /// `p[k] = v`
    PartialObject(Term, Term),
    /// `f(a, b) = v`; one clause of a user-defined function
    Function { args: Vec<Term>, value: Term },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElseClause {
    pub value: Term,
    pub body: Vec<Literal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub head: RuleHead,
    pub body: Vec<Literal>,
    pub else_chain: Vec<ElseClause>,
    pub is_default: bool,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    /// Full path starting at `data` or `input`.
    pub path: Vec<String>,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    /// Package path without the leading `data`.
    pub package: Vec<String>,
    pub imports: Vec<Import>,
    pub rules: Vec<Rule>,
}

impl Module {
    /// `data.<package>`
    pub fn package_path(&self) -> String {
        std::iter::once("data")
            .chain(self.package.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(".")
    }
}
