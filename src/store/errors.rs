use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("Key `{0}` not found")]
    #[diagnostic(code(papl::store::not_found))]
    NotFound(String),

    #[error("Store is closed")]
    #[diagnostic(
        code(papl::store::closed),
        help("Open a new store instance; a closed store cannot be reopened")
    )]
    Closed,

    #[error("Failed to open store at `{path}`")]
    #[diagnostic(
        code(papl::store::open),
        help("Supported kinds are `memory` and `file`; the file store needs a creatable, writable path")
    )]
    Open {
        path: String,
        #[source]
        cause: OpenCause,
    },

    #[error("Store backend error: {0}")]
    #[diagnostic(code(papl::store::backend))]
    Backend(#[from] rusqlite::Error),
}

/// Why a store could not be opened.
#[derive(Debug, Error)]
pub enum OpenCause {
    #[error("unknown store kind `{0}`")]
    UnknownKind(String),

    #[error("cannot create directory `{path}`")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}
