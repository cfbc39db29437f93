//! Error types for the HTTP-to-SSE bridge

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("connection is not established")]
    NotConnected,

    #[error("failed to connect to remote: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("URL parsing failed: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP server error: {0}")]
    HttpServer(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
