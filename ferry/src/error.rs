//! Error types for bridge operations.

/// Alias for `Result<T, ferry::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by bridge operations.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Missing or inconsistent bridge configuration; fatal at start-up.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A message carried a top-level error; its handling was aborted.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer failed to execute a request; the text is the peer's.
    #[error("{0}")]
    Remote(String),

    /// The connection closed while the request was pending, or before it
    /// was issued.
    #[error("connection closed")]
    ConnectionClosed,

    /// The transport reported a failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A descriptor named a Reference Table key this side never issued.
    #[error("unknown reference `{0}`")]
    UnknownReference(String),

    /// Member access or invocation on a value that does not support it.
    #[error("TypeError: {0}")]
    Type(String),

    /// A host object raised an error.
    #[error("{0}")]
    Host(String),

    /// Frame or payload encoding failed.
    #[error("codec error: {0}")]
    Codec(String),
}

impl Error {
    /// Host error with the given message; the usual way for host functions
    /// to fail a call.
    pub fn host(msg: impl Into<String>) -> Self {
        Self::Host(msg.into())
    }

    /// Type error with the given message.
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::Type(msg.into())
    }
}

impl From<ferry_proto::Error> for Error {
    fn from(e: ferry_proto::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
