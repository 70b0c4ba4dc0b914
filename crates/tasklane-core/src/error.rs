//! Error types for tasklane.

use thiserror::Error;

/// Result type alias using tasklane's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type returned by remote collaborators (REST handlers).
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Core error type for tasklane operations.
///
/// The first four variants are the failure taxonomy of a remote write. Every
/// one of them results in a rollback; they differ only in how the failure is
/// reported to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Transport or connectivity failure. Safe to retry.
    #[error("Network error: {0}")]
    Network(String),

    /// The server rejected the request during validation (4xx).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Session expired or invalid.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// An optimistic assumption was invalidated server-side.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Entity not present in the local cache
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input rejected before any write
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a user-initiated retry of the same action may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// Short user-facing explanation of the failure category.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Network(_) => "check your connection",
            Error::Validation(_) => "the server rejected the change",
            Error::Unauthorized(_) => "please sign in again",
            Error::Conflict(_) => "it was changed elsewhere",
            Error::NotFound(_) => "it no longer exists",
            Error::InvalidInput(_) => "the input is not valid",
            Error::Config(_) | Error::Serialization(_) | Error::Internal(_) => {
                "an unexpected error occurred"
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Rejection carried by a remote call.
///
/// `status` is an HTTP-like status code; `None` means the request never
/// produced a response (transport failure).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("remote call failed ({}): {message}", status_label(.status))]
pub struct RemoteError {
    pub status: Option<u16>,
    pub message: String,
}

fn status_label(status: &Option<u16>) -> String {
    status.map_or_else(|| "no response".to_string(), |s| s.to_string())
}

impl RemoteError {
    /// Transport failure with no response.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Failure with an HTTP-like status code.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl From<RemoteError> for Error {
    fn from(e: RemoteError) -> Self {
        match e.status {
            None | Some(408) | Some(429) => Error::Network(e.message),
            Some(s) if s >= 500 => Error::Network(e.message),
            Some(401) | Some(403) => Error::Unauthorized(e.message),
            Some(404) | Some(409) | Some(410) | Some(412) => Error::Conflict(e.message),
            Some(s) if (400..500).contains(&s) => Error::Validation(e.message),
            Some(_) => Error::Internal(e.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_network() {
        let err = Error::Network("connection reset".to_string());
        assert_eq!(err.to_string(), "Network error: connection reset");
    }

    #[test]
    fn test_error_display_unauthorized() {
        let err = Error::Unauthorized("session expired".to_string());
        assert_eq!(err.to_string(), "Unauthorized: session expired");
    }

    #[test]
    fn test_remote_error_without_status_is_network() {
        let err: Error = RemoteError::network("offline").into();
        assert_eq!(err, Error::Network("offline".to_string()));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_remote_error_server_failure_is_network() {
        let err: Error = RemoteError::status(503, "unavailable").into();
        assert!(matches!(err, Error::Network(_)));
    }

    #[test]
    fn test_remote_error_auth_statuses() {
        for status in [401, 403] {
            let err: Error = RemoteError::status(status, "nope").into();
            assert!(matches!(err, Error::Unauthorized(_)), "status {status}");
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_remote_error_conflict_statuses() {
        for status in [404, 409, 410, 412] {
            let err: Error = RemoteError::status(status, "gone").into();
            assert!(matches!(err, Error::Conflict(_)), "status {status}");
        }
    }

    #[test]
    fn test_remote_error_other_client_errors_are_validation() {
        let err: Error = RemoteError::status(422, "title required").into();
        assert_eq!(err, Error::Validation("title required".to_string()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_remote_error_display() {
        assert_eq!(
            RemoteError::network("offline").to_string(),
            "remote call failed (no response): offline"
        );
        assert_eq!(
            RemoteError::status(422, "bad").to_string(),
            "remote call failed (422): bad"
        );
    }

    #[test]
    fn test_category_differs_per_failure_kind() {
        let network = Error::Network(String::new()).category();
        let validation = Error::Validation(String::new()).category();
        let auth = Error::Unauthorized(String::new()).category();
        assert_ne!(network, validation);
        assert_ne!(validation, auth);
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
        assert_send::<RemoteError>();
    }
}
