// ABOUTME: Inference client error types for structured error handling across all operations
// ABOUTME: Provides automatic conversion from underlying I/O, codec, and transport errors

use std::io;
use thiserror::Error;

/// Comprehensive error type for inference client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Malformed URL, missing mandatory configuration key, bad shape
    /// vector, or another caller-supplied value that fails validation.
    #[error("bad parameter: {0}")]
    BadParameter(String),

    /// The server reported `success: false`, an HTTP status outside 2xx,
    /// a WebSocket transport error, or a generic I/O failure mid-protocol.
    #[error("operation failed: {0}")]
    OperationFailed(String),

    /// A connect, send, receive, or queue wait exceeded its timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The server response carried no `VERSION` tag, or one below the
    /// minimum this client supports.
    #[error("unsupported protocol version: {0}")]
    NotSupportedVersion(String),

    /// The operation is not valid in the client's current state, e.g.
    /// `submit` before `open_stream`.
    #[error("incorrect API use: {0}")]
    IncorrectApiUse(String),

    /// DNS or connect-level OS error after retries.
    #[error("system error: {0}")]
    System(#[from] io::Error),

    /// Invalid JSON or MessagePack payload.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Result type alias for inference client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Parse(format!("invalid JSON: {err}"))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Io(io_err) => ClientError::System(io_err),
            other => ClientError::OperationFailed(format!("websocket error: {other}")),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout(format!("http request timed out: {err}"))
        } else {
            ClientError::OperationFailed(format!("http error: {err}"))
        }
    }
}
