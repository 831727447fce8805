//! Error types for QuickBooks sessions and QBXML translation.
//!
//! Connection, session and request failures always carry the message reported by the
//! transport or by QuickBooks itself. The only place errors are deliberately swallowed
//! is session teardown, see [`crate::session::SessionManager::end`].

use thiserror::Error;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, QuickBooksError>;

/// Coarse classification of a [`QuickBooksError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConnectionFailed,
    SessionFailed,
    RequestFailed,
    ParseFailed,
    InvalidRequest,
}

/// Errors raised while talking to QuickBooks.
#[must_use = "errors should be handled or propagated"]
#[derive(Debug, Error)]
pub enum QuickBooksError {
    /// The request processor could not be created or the connection could not be opened.
    #[error("could not access QuickBooks: {message}")]
    ConnectionFailed { message: String },

    /// A connection was opened but QuickBooks rejected the company file or session.
    #[error("could not start QuickBooks session: {message}")]
    SessionFailed { message: String },

    /// A submitted request was rejected by the transport or returned an error status.
    #[error("{request_type} failed{}: {message}", status_suffix(.status_code))]
    RequestFailed {
        request_type: String,
        status_code: Option<i64>,
        message: String,
    },

    /// The response was not well-formed XML or did not follow the QBXML envelope.
    #[error("malformed QBXML response: {0}")]
    ParseFailed(String),

    /// The request could not be serialized, e.g. a field name is not a valid element name.
    #[error("invalid QBXML request: {0}")]
    InvalidRequest(String),
}

fn status_suffix(code: &Option<i64>) -> String {
    code.map(|c| format!(" with status {c}")).unwrap_or_default()
}

impl QuickBooksError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuickBooksError::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            QuickBooksError::SessionFailed { .. } => ErrorKind::SessionFailed,
            QuickBooksError::RequestFailed { .. } => ErrorKind::RequestFailed,
            QuickBooksError::ParseFailed(_) => ErrorKind::ParseFailed,
            QuickBooksError::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }

    /// The underlying transport or status message.
    pub fn message(&self) -> &str {
        match self {
            QuickBooksError::ConnectionFailed { message }
            | QuickBooksError::SessionFailed { message }
            | QuickBooksError::RequestFailed { message, .. } => message,
            QuickBooksError::ParseFailed(message) | QuickBooksError::InvalidRequest(message) => message,
        }
    }

    pub(crate) fn request_failed(request_type: &str, message: impl Into<String>) -> Self {
        QuickBooksError::RequestFailed {
            request_type: request_type.to_string(),
            status_code: None,
            message: message.into(),
        }
    }
}
