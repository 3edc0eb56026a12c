use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(papl::authz::policy_load),
        help("Check that the file exists and is readable")
    )]
    PolicyLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Policy parse error at line {line}, column {column}: {message}")]
    #[diagnostic(
        code(papl::authz::parse),
        help("Policy syntax: permit|forbid(principal [== | in | is] ..., action [== | in] ..., resource [== | in | is] ...) [when {{ ... }}] [unless {{ ... }}];")
    )]
    Parse {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("Invalid policy: {0}")]
    #[diagnostic(
        code(papl::authz::semantic),
        help("Policy ids given with @id(\"...\") must be unique within the policy set")
    )]
    Semantic(String),

    #[error("Invalid entity reference `{literal}`: {reason}")]
    #[diagnostic(
        code(papl::authz::invalid_entity),
        help("Entity references look like Type::\"id\", e.g. User::\"alice\" or App::Photo::\"vacation.jpg\"")
    )]
    InvalidEntity { literal: String, reason: String },

    #[error("Invalid request context: {0}")]
    #[diagnostic(
        code(papl::authz::invalid_context),
        help("The context must be a JSON object such as {{\"ip\": \"10.0.0.1\"}}; use {{}} for an empty context")
    )]
    InvalidContext(String),

    #[error("Invalid entities document: {0}")]
    #[diagnostic(
        code(papl::authz::invalid_entities),
        help("Entities are a JSON array of {{\"uid\": {{\"type\": ..., \"id\": ...}}, \"attrs\": {{...}}, \"parents\": [...]}}")
    )]
    InvalidEntities(String),

    /// Raised while evaluating a single policy. The engine records it in the
    /// response diagnostics and treats the policy as not matching.
    #[error("{0}")]
    #[diagnostic(code(papl::authz::evaluation))]
    Evaluation(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(papl::authz::io))]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    pub(crate) fn parse(message: impl Into<String>, line: usize, column: usize) -> Self {
        AuthzError::Parse {
            message: message.into(),
            line,
            column,
        }
    }
}
