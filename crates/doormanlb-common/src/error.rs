use thiserror::Error;

/// Error type shared by all doormanlb crates.
///
/// The HTTP layer maps these onto status codes: `BadRequest` becomes
/// 400, everything else surfacing from a request handler becomes 502.
/// `WaitTimeout` is consumed inside the single-flight loop and never
/// reaches a client.
#[derive(Error, Debug)]
pub enum DoormanError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("bad gateway: {0}")]
    BadGateway(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("coordination store error: {0}")]
    Coordination(String),

    #[error("wait timeout")]
    WaitTimeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DoormanError>;
