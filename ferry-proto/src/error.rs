//! Error types for the wire layer.

/// Alias for `Result<T, ferry_proto::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The payload was not a valid JSON message.
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// An action message named a verb outside the protocol.
    #[error("unknown action verb `{0}`")]
    UnknownVerb(String),

    /// A message did not have the shape its classification requires.
    #[error("invalid message: {0}")]
    Invalid(&'static str),
}
