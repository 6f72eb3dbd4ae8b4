//! Error types for the talkvault client.
//!
//! Two distinct error types reflect two distinct layers:
//!
//! * [`ApiError`]: a single HTTP exchange failed. Produced by
//!   [`crate::transport::Transport`] and carried as a value inside the retry
//!   loops of the reconciliation scanner and the result poller, where it is a
//!   *transient fetch error*: logged, counted against the budget, never
//!   surfaced on its own.
//!
//! * [`TalkVaultError`]: an operation the caller asked for could not be
//!   completed (upload unconfirmed, polling exhausted, session expired, bad
//!   input). Returned as `Err(TalkVaultError)` from the public entry points.
//!
//! `Display` on both types keeps the technical detail (status codes, paths)
//! for diagnostic logs. Anything shown to an end user goes through
//! [`TalkVaultError::user_message`] instead.

use crate::messages;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// What went wrong with a single HTTP exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// No response arrived (connection refused, reset, DNS failure).
    Network,
    /// The request exceeded the configured timeout.
    Timeout,
    /// The server answered with a non-success status.
    Http,
    /// The response arrived but its body could not be decoded.
    Decode,
    /// A 401 could not be recovered by refreshing the access token.
    SessionInvalid,
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApiErrorKind::Network => "network error",
            ApiErrorKind::Timeout => "timeout",
            ApiErrorKind::Http => "HTTP error",
            ApiErrorKind::Decode => "decode error",
            ApiErrorKind::SessionInvalid => "session invalid",
        };
        f.write_str(s)
    }
}

/// A failed HTTP exchange, with the optional status and server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    kind: ApiErrorKind,
    path: String,
    status: Option<u16>,
    message: Option<String>,
}

impl ApiError {
    pub fn network(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Network,
            path: path.into(),
            status: None,
            message: Some(detail.into()),
        }
    }

    pub fn timeout(path: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Timeout,
            path: path.into(),
            status: None,
            message: None,
        }
    }

    pub fn http(path: impl Into<String>, status: u16, message: Option<String>) -> Self {
        Self {
            kind: ApiErrorKind::Http,
            path: path.into(),
            status: Some(status),
            message,
        }
    }

    pub fn decode(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Decode,
            path: path.into(),
            status: None,
            message: Some(detail.into()),
        }
    }

    pub fn session_invalid(path: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::SessionInvalid,
            path: path.into(),
            status: Some(401),
            message: None,
        }
    }

    /// Classify a `reqwest` error raised while sending or reading a request.
    pub(crate) fn from_reqwest(path: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(path)
        } else if err.is_decode() {
            Self::decode(path, err.to_string())
        } else if let Some(status) = err.status() {
            Self::http(path, status.as_u16(), None)
        } else {
            Self::network(path, err.to_string())
        }
    }

    pub fn kind(&self) -> ApiErrorKind {
        self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Message supplied by the server in a JSON error body, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// True when no response was received at all. The server may still have
    /// processed the request, so the outcome is unknown rather than failed.
    pub fn is_network_like(&self) -> bool {
        matches!(self.kind, ApiErrorKind::Network | ApiErrorKind::Timeout)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.kind, self.path)?;
        if let Some(status) = self.status {
            write!(f, " (status {status})")?;
        }
        if let Some(ref message) = self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Why an upload response could not be taken at face value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmbiguityReason {
    /// HTTP success, but the body was empty or not a record with an id.
    EmptyOrMalformedBody,
    /// The request never got a response (connection dropped, timeout).
    NoResponse(ApiError),
}

impl fmt::Display for AmbiguityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmbiguityReason::EmptyOrMalformedBody => f.write_str("empty or malformed response body"),
            AmbiguityReason::NoResponse(e) => write!(f, "no response ({e})"),
        }
    }
}

/// All errors returned by the public talkvault operations.
#[derive(Debug, Error)]
pub enum TalkVaultError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The file exists but could not be read (a directory, an I/O error).
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The caller supplied neither or both of a file and pasted text, or
    /// the text was empty.
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    // ── Upload errors ─────────────────────────────────────────────────────
    /// The upload response could not confirm the outcome. Triggers
    /// reconciliation inside the submitter; only escapes it wrapped in
    /// [`TalkVaultError::UploadFailed`].
    #[error("Upload outcome for '{file_name}' is ambiguous: {reason}")]
    AmbiguousOutcome {
        file_name: String,
        reason: AmbiguityReason,
    },

    /// Reconciliation exhausted its schedule without finding the record.
    #[error("Upload of '{file_name}' could not be confirmed after {attempts} history scans ({reason})")]
    UploadFailed {
        file_name: String,
        attempts: usize,
        reason: AmbiguityReason,
    },

    // ── Poll errors ───────────────────────────────────────────────────────
    /// Polling used its whole schedule without seeing an output artifact.
    #[error("Result for '{key}' not ready after {attempts} attempts")]
    PollTimeout { key: String, attempts: usize },

    /// A fetch failed hard while polling.
    #[error("Polling '{key}' failed: {source}")]
    PollError {
        key: String,
        #[source]
        source: ApiError,
    },

    /// The poll session was cancelled before reaching a terminal state.
    #[error("Polling '{key}' was cancelled")]
    Cancelled { key: String },

    // ── Transport errors ──────────────────────────────────────────────────
    /// The access token expired and could not be refreshed.
    #[error("Session invalid: token refresh failed")]
    SessionInvalid,

    /// A non-ambiguous API failure (e.g. a 4xx with a body).
    #[error("API request failed: {0}")]
    Api(ApiError),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write a downloaded artifact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ApiError> for TalkVaultError {
    fn from(err: ApiError) -> Self {
        match err.kind() {
            ApiErrorKind::SessionInvalid => TalkVaultError::SessionInvalid,
            _ => TalkVaultError::Api(err),
        }
    }
}

impl TalkVaultError {
    /// Human-readable message suitable for end users.
    ///
    /// Never contains status codes or paths; use `Display` for logs.
    pub fn user_message(&self) -> String {
        match self {
            TalkVaultError::FileNotFound { .. } => messages::FILE_NOT_FOUND.to_string(),
            TalkVaultError::PermissionDenied { .. } | TalkVaultError::ReadFailed { .. } => {
                messages::FILE_UNREADABLE.to_string()
            }
            TalkVaultError::InvalidInput { .. } => messages::NO_INPUT.to_string(),
            TalkVaultError::AmbiguousOutcome { .. } | TalkVaultError::UploadFailed { .. } => {
                messages::UPLOAD_UNCONFIRMED.to_string()
            }
            TalkVaultError::PollTimeout { .. } | TalkVaultError::PollError { .. } => {
                messages::STATUS_UNAVAILABLE.to_string()
            }
            TalkVaultError::Cancelled { .. } => messages::POLL_CANCELLED.to_string(),
            TalkVaultError::SessionInvalid => messages::SESSION_EXPIRED.to_string(),
            TalkVaultError::Api(e) => match e.message() {
                Some(m) if !m.trim().is_empty() => m.trim().to_string(),
                _ => messages::REQUEST_FAILED.to_string(),
            },
            TalkVaultError::OutputWriteFailed { .. } => messages::DOWNLOAD_FAILED.to_string(),
            TalkVaultError::InvalidConfig(_) | TalkVaultError::Internal(_) => {
                messages::REQUEST_FAILED.to_string()
            }
        }
    }
}
