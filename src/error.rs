//! Error taxonomy shared by the engine, stores and adapters.
//!
//! Every failure that reaches a caller is one of the [`ErrorKind`]s below and
//! can be rendered as a structured [`ErrorBody`] with a bounded message.

use serde::Serialize;
use thiserror::Error;

/// Maximum length of a human-readable message in an [`ErrorBody`] or an
/// upstream error built from a response body.
pub const MAX_MESSAGE_LEN: usize = 200;

/// Engine errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("adapter not found: {0}")]
    AdapterNotFound(String),

    #[error("channel not found: {content_id} (adapter {adapter_id})")]
    ChannelNotFound {
        adapter_id: String,
        content_id: String,
    },

    #[error("show not found: {0}")]
    ShowNotFound(String),

    #[error("{adapter_id} does not support {operation}")]
    NotSupported {
        adapter_id: String,
        operation: &'static str,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("no provider found for {content_id}")]
    NoProviderFound {
        content_id: String,
        last: Option<Box<Error>>,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Stable, serializable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    AdapterNotFound,
    ChannelNotFound,
    ShowNotFound,
    NotSupported,
    AuthError,
    UpstreamError,
    NoProviderFound,
    ConfigError,
    /// Failure outside the engine, such as writing CLI output.
    InternalError,
}

/// Structured error payload handed to callers instead of a raw error chain.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorBody {
    pub fn internal(message: impl AsRef<str>) -> Self {
        Self {
            kind: ErrorKind::InternalError,
            message: truncate(message.as_ref(), MAX_MESSAGE_LEN),
        }
    }
}

impl Error {
    /// Build an [`Error::Upstream`] with the message truncated.
    pub fn upstream(message: impl AsRef<str>) -> Self {
        Error::Upstream(truncate(message.as_ref(), MAX_MESSAGE_LEN))
    }

    pub fn not_supported(adapter_id: &str, operation: &'static str) -> Self {
        Error::NotSupported {
            adapter_id: adapter_id.to_string(),
            operation,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AdapterNotFound(_) => ErrorKind::AdapterNotFound,
            Error::ChannelNotFound { .. } => ErrorKind::ChannelNotFound,
            Error::ShowNotFound(_) => ErrorKind::ShowNotFound,
            Error::NotSupported { .. } => ErrorKind::NotSupported,
            Error::Auth(_) => ErrorKind::AuthError,
            Error::Upstream(_) => ErrorKind::UpstreamError,
            Error::NoProviderFound { .. } => ErrorKind::NoProviderFound,
            // Store plumbing only fails on persisted state
            Error::Config(_) | Error::Io(_) | Error::Json(_) => ErrorKind::ConfigError,
        }
    }

    /// Render as a structured payload. For [`Error::NoProviderFound`] the
    /// last candidate error is appended for diagnostics.
    pub fn body(&self) -> ErrorBody {
        let message = match self {
            Error::NoProviderFound {
                last: Some(last), ..
            } => format!("{self}: {last}"),
            _ => self.to_string(),
        };
        ErrorBody {
            kind: self.kind(),
            message: truncate(&message, MAX_MESSAGE_LEN),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::upstream(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_strings() {
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn truncate_cuts_on_char_boundary() {
        let s = "ääääää";
        assert_eq!(truncate(s, 3), "äää...");
    }

    #[test]
    fn upstream_messages_are_bounded() {
        let err = Error::upstream("x".repeat(1000));
        match err {
            Error::Upstream(msg) => assert!(msg.len() <= MAX_MESSAGE_LEN + 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn body_carries_kind_and_last_error() {
        let err = Error::NoProviderFound {
            content_id: "news".into(),
            last: Some(Box::new(Error::upstream("503 from alpha"))),
        };
        let body = err.body();
        assert_eq!(body.kind, ErrorKind::NoProviderFound);
        assert!(body.message.contains("503 from alpha"));
    }

    #[test]
    fn store_errors_report_as_config() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn internal_body_is_bounded() {
        let body = ErrorBody::internal("broken pipe ".repeat(50));
        assert_eq!(body.kind, ErrorKind::InternalError);
        assert!(body.message.len() <= MAX_MESSAGE_LEN + 3);
    }

    #[test]
    fn body_serializes_kind_name() {
        let json = serde_json::to_string(&Error::AdapterNotFound("zeta".into()).body()).unwrap();
        assert!(json.contains("\"kind\":\"AdapterNotFound\""));
    }
}
