use std::io;

use thiserror::Error as ThisError;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A programmer mistake caught at registration time.
    Configuration,
    NotFound,
    Forbidden,
    Internal,
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("alias `{alias}` is already bound to route `{existing}`")]
    DuplicateAlias { alias: String, existing: String },

    #[error("parameter `@{name}` appears more than once in pattern `{pattern}`")]
    DuplicateParameter { name: String, pattern: String },

    #[error("malformed pattern `{pattern}`: {reason}")]
    MalformedPattern { pattern: String, reason: String },

    #[error("pattern `{pattern}` does not compile: {source}")]
    InvalidConstraint {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unknown HTTP method `{0}`")]
    UnknownMethod(String),

    #[error("cannot override an existing framework method `{0}`")]
    ReservedName(String),

    #[error("route `{alias}` requires parameter `@{name}`")]
    MissingParameter { alias: String, name: String },

    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    #[error("no route matches {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("no route found with alias `{alias}`{}", did_you_mean(.suggestion))]
    AliasNotFound {
        alias: String,
        suggestion: Option<String>,
    },

    #[error("`{0}` must be mapped to a valid callable")]
    UnboundName(String),

    #[error("forbidden")]
    Forbidden,

    #[error("failed to construct `{name}`: {reason}")]
    Construction { name: String, reason: String },

    #[error("output of `{0}` is not of the requested type")]
    TypeMismatch(String),

    #[error("{0}")]
    Handler(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DuplicateAlias { .. }
            | Error::DuplicateParameter { .. }
            | Error::MalformedPattern { .. }
            | Error::InvalidConstraint { .. }
            | Error::UnknownMethod(_)
            | Error::ReservedName(_)
            | Error::MissingParameter { .. }
            | Error::InvalidStatus(_) => ErrorKind::Configuration,
            Error::RouteNotFound { .. } | Error::AliasNotFound { .. } | Error::UnboundName(_) => {
                ErrorKind::NotFound
            }
            Error::Forbidden => ErrorKind::Forbidden,
            Error::Construction { .. }
            | Error::TypeMismatch(_)
            | Error::Handler(_)
            | Error::Serialization(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::Forbidden => 403,
            ErrorKind::Configuration | ErrorKind::Internal => 500,
        }
    }

    /// Shorthand for a failure raised by application code.
    pub fn handler(message: impl Into<String>) -> Self {
        Error::Handler(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

fn did_you_mean(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(alias) => format!(", did you mean `{}`?", alias),
        None => String::new(),
    }
}
