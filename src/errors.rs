use miette::Diagnostic;
use thiserror::Error;

use crate::authz::AuthzError;
use crate::rules::RuleError;
use crate::store::StoreError;

#[derive(Debug, Error, Diagnostic)]
pub enum PaplError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Authz(#[from] AuthzError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rules(#[from] RuleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    #[diagnostic(code(papl::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(papl::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(papl::serde))]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    #[diagnostic(code(papl::other))]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_errors_convert() {
        let err: PaplError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, PaplError::Serde(_)));
        assert_eq!(err.code().map(|c| c.to_string()), Some("papl::serde".to_string()));
    }

    #[test]
    fn test_io_errors_convert() {
        let err: PaplError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, PaplError::Io(_)));
        assert_eq!(err.to_string(), "I/O error: gone");
    }
}
