//! Error types for the request pipeline and credential capability.

use std::fmt;
use std::time::Duration;

/// Classification of transport-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Could not establish a connection.
    Connect,
    /// The attempt exceeded the transport timeout.
    Timeout,
    /// Connection dropped or body could not be read.
    Io,
    /// The request could not be built or was rejected locally.
    Request,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Io => "io",
            Self::Request => "request",
        };
        f.write_str(s)
    }
}

/// Pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network-level failure performing the request.
    #[error("transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The request body is a single-read stream that was already consumed.
    #[error("request body is not replayable")]
    BodyNotReplayable,

    /// 401 from the service.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// 429 from the service.
    #[error("rate limited: retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// Any other non-success status.
    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    /// Response could not be decoded.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A policy failed before the request reached the transport.
    #[error("policy error: {message}")]
    Policy { message: String },

    /// Token acquisition failed.
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl Error {
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Whether the error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport {
                kind: TransportErrorKind::Connect | TransportErrorKind::Timeout | TransportErrorKind::Io,
                ..
            }
        )
    }

    /// Whether the error reflects caller cancellation or an elapsed deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::DeadlineExceeded | Self::Credential(CredentialError::Cancelled)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_builder() {
            TransportErrorKind::Request
        } else {
            TransportErrorKind::Io
        };
        // Strip the URL: query strings may carry signatures.
        Self::Transport {
            kind,
            message: err.without_url().to_string(),
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of one constituent credential inside a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialFailure {
    pub credential: String,
    pub error: CredentialError,
}

/// Token acquisition errors.
///
/// `Clone` so that every waiter on a shared acquisition observes the same
/// outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// The credential cannot operate on this host at all.
    #[error("{credential} is unsupported in this environment: {reason}")]
    Unsupported { credential: String, reason: String },

    /// Required ambient inputs are missing or the identity source is unreachable.
    #[error("{credential} is unavailable: {message}")]
    Unavailable { credential: String, message: String },

    /// The identity provider rejected the request.
    #[error("{credential} authentication failed: {message}")]
    Denied { credential: String, message: String },

    /// Every constituent of a chain failed.
    #[error("{}", format_failures(.0))]
    Aggregate(Vec<CredentialFailure>),

    /// The caller cancelled token acquisition.
    #[error("token acquisition cancelled")]
    Cancelled,
}

impl CredentialError {
    pub fn unsupported(credential: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            credential: credential.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(credential: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            credential: credential.into(),
            message: message.into(),
        }
    }

    pub fn denied(credential: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Denied {
            credential: credential.into(),
            message: message.into(),
        }
    }

    /// Stable classification string.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unsupported { .. } => "unsupported",
            Self::Unavailable { .. } => "unavailable",
            Self::Denied { .. } => "denied",
            Self::Aggregate(_) => "aggregate",
            Self::Cancelled => "cancelled",
        }
    }

    /// Maps a pipeline error raised while talking to an identity endpoint.
    pub fn from_pipeline(credential: impl Into<String>, err: Error) -> Self {
        match err {
            Error::Cancelled | Error::DeadlineExceeded => Self::Cancelled,
            Error::Credential(inner) => inner,
            other => Self::unavailable(credential, other.to_string()),
        }
    }
}

fn format_failures(failures: &[CredentialFailure]) -> String {
    let mut out = String::from("all credentials in the chain failed:");
    for (index, failure) in failures.iter().enumerate() {
        out.push_str(&format!(
            "\n  {}. {} [{}]: {}",
            index + 1,
            failure.credential,
            failure.error.kind(),
            failure.error
        ));
    }
    out
}
