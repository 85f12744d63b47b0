//! Error type for the daemon's I/O layers
//!
//! The registry and resolver never fail; only the listener, the PID file,
//! the daemon client and the publisher surface errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("daemon answered with HTTP {0}")]
    Status(u16),

    #[error("daemon already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("presence publisher: {0}")]
    Publisher(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
