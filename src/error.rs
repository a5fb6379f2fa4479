use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// JSON-RPC error codes reserved by the spec (spec.md §6/§7).
pub mod code {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const NOT_INITIALIZED: i64 = -32002;
}

/// Errors produced by the session/feature-dispatch core.
///
/// Every variant that can cross the wire as a JSON-RPC error response
/// knows its own code via [`Error::rpc_code`].
#[derive(Debug, Error, Clone)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("server not initialized")]
    NotInitialized,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("session closed")]
    SessionClosed,

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("registration error: {0}")]
    Registration(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Validation(String),
}

impl Error {
    /// The JSON-RPC error code this variant maps to, per spec.md §7's taxonomy.
    /// Variants that are never written to the wire as a protocol-level error
    /// (cancellation, timeout, session-closed, validation — those resolve a
    /// Waiter locally or become a tool-result `isError`) return `None`.
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            Error::Parse(_) => Some(code::PARSE_ERROR),
            Error::InvalidRequest(_) => Some(code::INVALID_REQUEST),
            Error::MethodNotFound(_) => Some(code::METHOD_NOT_FOUND),
            Error::InvalidParams(_) => Some(code::INVALID_PARAMS),
            Error::NotInitialized => Some(code::NOT_INITIALIZED),
            Error::Internal(_) | Error::Transport(_) | Error::NotFound(_) | Error::Protocol(_) => {
                Some(code::INTERNAL_ERROR)
            }
            Error::Registration(_) | Error::Config(_) => Some(code::INTERNAL_ERROR),
            Error::SessionClosed | Error::Cancelled(_) | Error::Timeout(_) | Error::Validation(_) => {
                None
            }
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Error::Protocol(message.into())
    }

    pub fn transport<S: Into<String>>(message: S) -> Self {
        Error::Transport(message.into())
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Error::NotFound(message.into())
    }

    pub fn registration<S: Into<String>>(message: S) -> Self {
        Error::Registration(message.into())
    }

    pub fn invalid_params<S: Into<String>>(message: S) -> Self {
        Error::InvalidParams(message.into())
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Error::Config(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}
