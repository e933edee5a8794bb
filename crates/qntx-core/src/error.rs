//! Error kinds for the attestation substrate.
//!
//! One enum covers every layer (store, jsonrpc transport, HTTP, gRPC); transport layers map
//! variants onto their own status codes at the boundary rather than each defining their own
//! error type.

use thiserror::Error;

/// The QNTX error kind hierarchy.
#[derive(Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("cancelled")]
    Cancelled,

    #[error("capacity exceeded: {0}")]
    Capacity(String),

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("{source}")]
    WithDetail {
        #[source]
        source: Box<Error>,
        detail: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Error::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Error::Forbidden(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Error::Upstream(msg.into())
    }

    pub fn capacity(msg: impl Into<String>) -> Self {
        Error::Capacity(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Error::Corrupt(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Annotate an error with operation context as it crosses a layer boundary.
    pub fn with_detail(self, detail: impl Into<String>) -> Self {
        Error::WithDetail {
            source: Box::new(self),
            detail: detail.into(),
        }
    }

    /// True for [`Error::Cancelled`] anywhere in the detail chain — cancellation is surfaced
    /// verbatim and never logged as an error (§7).
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::WithDetail { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}
