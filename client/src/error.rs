//! Error types shared by the transport, the session manager and the entity store.
//!
//! [`TransportError`] is what the wire layer reports. [`ApiError`] is the
//! classified form that the store records in lifecycle flags and that callers
//! match on.

use serde::Deserialize;

/// The body the API sends alongside a failed request.
///
/// The server wraps failures as `{ statusCode, message, success: false, errors: [] }`.
/// When the body is not JSON we keep the raw text as the message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub errors: Vec<serde_json::Value>,
}

impl ErrorBody {
    pub fn from_text(text: &str) -> Option<Self> {
        if text.trim().is_empty() {
            return None;
        }
        match serde_json::from_str::<ErrorBody>(text) {
            Ok(body) => Some(body),
            Err(_) => Some(ErrorBody {
                message: Some(text.trim().to_string()),
                errors: Vec::new(),
            }),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportErrorKind {
    /// The server could not be reached, or the connection broke mid-request.
    #[error("network failure: {0}")]
    Network(String),
    /// The request did not complete within its timeout.
    #[error("request timed out")]
    Timeout,
    /// The server answered with a non-success status.
    #[error("server responded with status {0}")]
    Status(u16),
    /// The request could not be built (for example a malformed multipart part).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// A failed round-trip through the [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}{}", message_suffix(.body))]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub body: Option<ErrorBody>,
}

fn message_suffix(body: &Option<ErrorBody>) -> String {
    body.as_ref()
        .and_then(|body| body.message.as_deref())
        .map(|message| format!(": {message}"))
        .unwrap_or_default()
}

impl TransportError {
    pub fn network(reason: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Network(reason.into()),
            body: None,
        }
    }

    pub fn timeout() -> Self {
        Self {
            kind: TransportErrorKind::Timeout,
            body: None,
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Status(status),
            body: Some(ErrorBody::message(message)),
        }
    }

    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::InvalidRequest(reason.into()),
            body: None,
        }
    }

    /// Whether the server rejected the credential attached to this request.
    pub fn is_unauthorized(&self) -> bool {
        self.kind == TransportErrorKind::Status(401)
    }

    fn server_message(&self) -> Option<String> {
        self.body.as_ref().and_then(|b| b.message.clone())
    }
}

/// Classified failure of a client operation.
///
/// This is the reason stored in [`OperationStatus::Error`](crate::lifecycle::OperationStatus)
/// and the error half of every store operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// The server was unreachable or too slow. Re-issuing the same action may succeed.
    #[error("network error: {reason}")]
    Network { reason: String, timed_out: bool },

    /// The credential was rejected and no renewal was attempted for this call.
    #[error("not authorized: {0}")]
    Auth(String),

    /// Credential renewal failed; the session has been reset to anonymous.
    #[error("session expired, please log in again")]
    SessionExpired,

    /// The server rejected the payload. The message is meant to be shown verbatim.
    #[error("{message}")]
    Validation { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// A required identifier was empty; no request was sent.
    #[error("missing required identifier `{0}`")]
    MissingIdentifier(&'static str),

    /// The server answered successfully but with a payload we could not interpret.
    #[error("unexpected response payload: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Transient failures the user may retry by re-invoking the same action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Network { .. } | ApiError::Server { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth(_) | ApiError::SessionExpired)
    }

    pub(crate) fn decode(context: &str, error: serde_json::Error) -> Self {
        ApiError::Decode(format!("{context}: {error}"))
    }
}

impl From<TransportError> for ApiError {
    fn from(error: TransportError) -> Self {
        let message = error.server_message();
        match error.kind {
            TransportErrorKind::Network(reason) => ApiError::Network {
                reason,
                timed_out: false,
            },
            TransportErrorKind::Timeout | TransportErrorKind::Status(408) => ApiError::Network {
                reason: "request timed out".to_string(),
                timed_out: true,
            },
            TransportErrorKind::InvalidRequest(reason) => ApiError::InvalidRequest(reason),
            TransportErrorKind::Status(401) => {
                ApiError::Auth(message.unwrap_or_else(|| "unauthorized".to_string()))
            }
            TransportErrorKind::Status(404) => {
                ApiError::NotFound(message.unwrap_or_else(|| "resource not found".to_string()))
            }
            TransportErrorKind::Status(status @ 400..=499) => ApiError::Validation {
                status,
                message: message.unwrap_or_else(|| "request rejected".to_string()),
            },
            TransportErrorKind::Status(status) => ApiError::Server {
                status,
                message: message.unwrap_or_else(|| "something went wrong".to_string()),
            },
        }
    }
}
