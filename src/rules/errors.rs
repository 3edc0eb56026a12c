use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RuleError {
    #[error("{source_name}:{line}:{column}: {message}")]
    #[diagnostic(
        code(papl::rules::parse),
        help("Modules start with `package <path>` followed by rules such as `allow if {{ ... }}` or `default allow := false`")
    )]
    Parse {
        source_name: String,
        message: String,
        line: usize,
        column: usize,
    },

    #[error("Invalid JSON document: {0}")]
    #[diagnostic(code(papl::rules::json))]
    Json(String),

    #[error("Invalid rule set: {0}")]
    #[diagnostic(
        code(papl::rules::semantic),
        help("A rule may have at most one default and must use the same kind (complete, set or object) in every definition")
    )]
    Semantic(String),

    #[error("Evaluation error: {0}")]
    #[diagnostic(code(papl::rules::eval))]
    Eval(String),

    #[error("Evaluation error: recursion detected: {0}")]
    #[diagnostic(
        code(papl::rules::recursion),
        help("Rules may not depend on themselves, directly or through other rules")
    )]
    Recursion(String),

    #[error("Rule `{0}` not found")]
    #[diagnostic(
        code(papl::rules::rule_not_found),
        help("Rule paths look like data.<package>.<rule>; run `papl packages` to list loaded packages")
    )]
    RuleNotFound(String),

    #[error("Conflicting results: {0}")]
    #[diagnostic(
        code(papl::rules::conflict),
        help("A complete rule (or one key of an object rule) produced more than one distinct value")
    )]
    Conflict(String),

    #[error("Failed to load bundle `{path}`: {message}")]
    #[diagnostic(code(papl::rules::bundle))]
    Bundle { path: String, message: String },

    #[error("I/O error: {0}")]
    #[diagnostic(code(papl::rules::io))]
    Io(#[from] std::io::Error),
}

impl RuleError {
    pub(crate) fn bundle(path: impl std::fmt::Display, message: impl Into<String>) -> Self {
        RuleError::Bundle {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for RuleError {
    fn from(err: serde_json::Error) -> Self {
        RuleError::Json(err.to_string())
    }
}
