//! Error types you might see while discovering, tagging, or deleting images

use crate::graph::{DeletionReport, Graph};
use thiserror::Error;

/// Errors from any graph, registry, or package operation
#[derive(Error, Debug)]
pub enum GraphError {
    /// invalid image reference format
    #[error("invalid image reference format: {0:?}")]
    InvalidReference(String),

    /// no token available for an authenticated call
    #[error("authentication required, set GITHUB_TOKEN")]
    Unauthenticated,

    /// the token does not carry the scope this call needs
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// tag, digest, or package is absent upstream
    #[error("not found: {0}")]
    NotFound(String),

    /// retry budget exhausted on a rate limit, server error, or network reset
    #[error("transient failure after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },

    /// a tag already points somewhere else and overwriting was not requested
    #[error("tag {tag:?} already points at {existing}, refusing to move it to {requested} without force")]
    Conflict {
        tag: String,
        existing: String,
        requested: String,
    },

    /// a multi-step operation completed some steps and failed others
    #[error("{failed} of {total} deletion steps failed")]
    Partial {
        failed: usize,
        total: usize,
        report: DeletionReport,
    },

    /// the operation was cancelled; a partially built graph may be attached
    #[error("operation cancelled")]
    Cancelled(Option<Box<Graph>>),

    /// upstream answered with a status we do not know how to handle
    #[error("unexpected response status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    /// registry server requested an unsupported type of authentication
    #[error("registry server requested an unsupported type of authentication: {0:?}")]
    UnsupportedAuthentication(String),

    /// calculated digest of downloaded content is not what we asked for
    #[error("calculated digest of downloaded content is not what we asked for, expected {expected}, found {found}")]
    ContentDigestMismatch {
        expected: crate::image::ContentDigest,
        found: crate::image::ContentDigest,
    },

    /// configuration file could not be read or written
    #[error("configuration error: {0}")]
    Config(String),

    /// network request error
    #[error("network request error: {0}")]
    Network(#[from] reqwest::Error),

    /// json error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// io error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// url construction error
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),

    /// a discovery worker task failed
    #[error("task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl GraphError {
    /// Process exit code for this error
    ///
    /// 1 usage, 2 authentication, 3 not found, 4 partial failure, 5 network or
    /// transient failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            GraphError::InvalidReference(_)
            | GraphError::Conflict { .. }
            | GraphError::Config(_)
            | GraphError::Io(_) => 1,
            GraphError::Unauthenticated
            | GraphError::Forbidden(_)
            | GraphError::UnsupportedAuthentication(_) => 2,
            GraphError::NotFound(_) => 3,
            GraphError::Partial { .. } => 4,
            GraphError::Transient { .. }
            | GraphError::Cancelled(_)
            | GraphError::UnexpectedStatus { .. }
            | GraphError::ContentDigestMismatch { .. }
            | GraphError::Network(_)
            | GraphError::Json(_)
            | GraphError::Url(_)
            | GraphError::TaskJoin(_) => 5,
        }
    }

    /// Is this a not-found error?
    pub fn is_not_found(&self) -> bool {
        matches!(self, GraphError::NotFound(_))
    }
}

impl From<toml::de::Error> for GraphError {
    fn from(err: toml::de::Error) -> Self {
        GraphError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for GraphError {
    fn from(err: toml::ser::Error) -> Self {
        GraphError::Config(err.to_string())
    }
}
