//! Error types for sms-relay

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Connection refused, DNS failure, timeout.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Unexpected status code or payload shape from the queue.
    #[error("Protocol error: status {status}: {body}")]
    Protocol { status: u16, body: String },

    /// Token rejected by the queue.
    #[error("Auth error: queue rejected token (status {status})")]
    Auth { status: u16 },

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => Error::Auth {
                status: status.as_u16(),
            },
            Some(status) => Error::Protocol {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None if e.is_decode() => Error::Protocol {
                status: 200,
                body: e.to_string(),
            },
            None => Error::Transport(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Protocol {
            status: 500,
            body: "boom".to_string(),
        };
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
