//! Error types for LimitRange conformance runs
//!
//! Errors are structured with fields so a failed run says exactly which
//! resource, which field, and which values disagreed.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Placeholder rendered for a quantity that is missing from one side of a comparison
pub const MISSING_QUANTITY: &str = "<none>";

/// Main error type for conformance operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A quantity string could not be parsed
    #[error("invalid quantity '{value}': {message}")]
    Quantity {
        /// The raw quantity string
        value: String,
        /// What was wrong with it
        message: String,
    },

    /// Expected and observed resource requirements disagree
    #[error("{field}: resource {resource} expected {expected} actual {actual}")]
    Mismatch {
        /// Which side of the requirements (`requests` or `limits`)
        field: String,
        /// Resource kind (cpu, memory, ephemeral-storage)
        resource: String,
        /// Expected quantity, or `<none>`
        expected: String,
        /// Observed quantity, or `<none>`
        actual: String,
    },

    /// A request that should have been rejected by admission was accepted
    #[error("{operation} was admitted but should have been rejected")]
    UnexpectedAdmission {
        /// What was attempted (e.g. "create pod pod-over-max")
        operation: String,
    },

    /// A watch produced something other than the event that was awaited
    #[error("unexpected watch event for {resource}: expected {expected}, got {actual}")]
    UnexpectedEvent {
        /// The watched resource
        resource: String,
        /// Event type that was awaited
        expected: String,
        /// Event type (or stream condition) that arrived instead
        actual: String,
    },

    /// An observed state contradicts what the run expected
    #[error("assertion failed: {message}")]
    Assertion {
        /// What was expected and what was seen
        message: String,
    },

    /// A bounded wait expired
    #[error("timeout after {timeout:?} waiting for: {description}")]
    Timeout {
        /// What was never observed
        description: String,
        /// How long we waited
        timeout: Duration,
    },

    /// Configuration could not be loaded or is inconsistent
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "create_client", "namespace")
        context: String,
    },
}

impl Error {
    /// Create a quantity parse error
    pub fn quantity(value: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Quantity {
            value: value.into(),
            message: msg.into(),
        }
    }

    /// Create a comparison mismatch error. `None` renders as `<none>`.
    pub fn mismatch(
        field: impl Into<String>,
        resource: impl Into<String>,
        expected: Option<&str>,
        actual: Option<&str>,
    ) -> Self {
        Self::Mismatch {
            field: field.into(),
            resource: resource.into(),
            expected: expected.unwrap_or(MISSING_QUANTITY).to_string(),
            actual: actual.unwrap_or(MISSING_QUANTITY).to_string(),
        }
    }

    /// Create an error for a request that admission should have refused
    pub fn unexpected_admission(operation: impl Into<String>) -> Self {
        Self::UnexpectedAdmission {
            operation: operation.into(),
        }
    }

    /// Create an error for a watch event of the wrong kind
    pub fn unexpected_event(
        resource: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::UnexpectedEvent {
            resource: resource.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an assertion failure
    pub fn assertion(msg: impl Into<String>) -> Self {
        Self::Assertion {
            message: msg.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(description: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            description: description.into(),
            timeout,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is transient
    ///
    /// Connection failures, 5xx and 429 responses may clear up on their own.
    /// Everything else (other 4xx, client setup, bad quantities, mismatches,
    /// timeouts) is a verdict and must not be polled away.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => ae.code == 429 || ae.code >= 500,
                // Client configuration, credentials and malformed payloads
                kube::Error::InferConfig(_)
                | kube::Error::Auth(_)
                | kube::Error::BuildRequest(_)
                | kube::Error::HttpError(_)
                | kube::Error::RustlsTls(_)
                | kube::Error::TlsRequired
                | kube::Error::ProxyProtocolUnsupported { .. }
                | kube::Error::ProxyProtocolDisabled { .. }
                | kube::Error::Discovery(_)
                | kube::Error::SerdeError(_)
                | kube::Error::FromUtf8(_)
                | kube::Error::LinesCodecMaxLineLengthExceeded => false,
                _ => true,
            },
            Error::Internal { .. } => true,
            Error::Quantity { .. }
            | Error::Mismatch { .. }
            | Error::UnexpectedAdmission { .. }
            | Error::UnexpectedEvent { .. }
            | Error::Assertion { .. }
            | Error::Timeout { .. }
            | Error::Config { .. } => false,
        }
    }

    /// HTTP status code when this wraps an API error response
    pub fn api_code(&self) -> Option<u16> {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str) -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} error", reason),
            reason: reason.to_string(),
            code,
        }))
    }

    /// Story: A mismatch names the field, the resource, and both values
    #[test]
    fn story_mismatch_reports_both_sides() {
        let err = Error::mismatch("requests", "cpu", Some("300m"), Some("100m"));
        let msg = err.to_string();
        assert!(msg.contains("requests"));
        assert!(msg.contains("resource cpu"));
        assert!(msg.contains("expected 300m"));
        assert!(msg.contains("actual 100m"));
    }

    /// Story: A quantity missing on one side renders as <none>
    #[test]
    fn story_missing_quantity_is_explicit() {
        let err = Error::mismatch("limits", "memory", Some("500Mi"), None);
        assert!(err.to_string().ends_with("actual <none>"));

        let err = Error::mismatch("limits", "memory", None, Some("500Mi"));
        assert!(err.to_string().contains("expected <none>"));
    }

    /// Story: Transient API failures keep a poll going, verdicts stop it
    #[test]
    fn story_retryable_classification() {
        assert!(api_error(503, "ServiceUnavailable").is_retryable());
        assert!(api_error(500, "InternalError").is_retryable());
        assert!(api_error(429, "TooManyRequests").is_retryable());

        assert!(!api_error(403, "Forbidden").is_retryable());
        assert!(!api_error(404, "NotFound").is_retryable());
        assert!(!api_error(422, "Invalid").is_retryable());

        assert!(!Error::quantity("12xyz", "unknown suffix").is_retryable());
        assert!(!Error::mismatch("limits", "cpu", None, None).is_retryable());
        assert!(!Error::timeout("deletion", Duration::from_secs(30)).is_retryable());
        assert!(!Error::assertion("list not empty").is_retryable());
        assert!(Error::internal("connection reset").is_retryable());
    }

    /// Story: A broken client setup aborts a poll instead of running out the clock
    #[test]
    fn story_client_setup_errors_are_permanent() {
        let auth = Error::from(kube::Error::Auth(kube::client::AuthError::ExecPluginFailed));
        assert!(!auth.is_retryable());
        assert!(!Error::from(kube::Error::TlsRequired).is_retryable());

        let utf8 = String::from_utf8(vec![0xff]).unwrap_err();
        assert!(!Error::from(kube::Error::FromUtf8(utf8)).is_retryable());

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(Error::from(kube::Error::ReadEvents(reset)).is_retryable());
    }

    /// Story: The API status code is reachable for admission checks
    #[test]
    fn story_api_code_exposed() {
        assert_eq!(api_error(403, "Forbidden").api_code(), Some(403));
        assert_eq!(Error::config("bad").api_code(), None);
    }

    #[test]
    fn test_timeout_message_includes_description() {
        let err = Error::timeout("LimitRange limit-range deletion", Duration::from_secs(30));
        let msg = err.to_string();
        assert!(msg.contains("30s"));
        assert!(msg.contains("LimitRange limit-range deletion"));
    }

    #[test]
    fn test_internal_context() {
        match Error::internal_with_context("namespace", "boom") {
            Error::Internal { context, message } => {
                assert_eq!(context, "namespace");
                assert_eq!(message, "boom");
            }
            _ => panic!("Expected Internal variant"),
        }
        match Error::internal("boom") {
            Error::Internal { context, .. } => assert_eq!(context, UNKNOWN_CONTEXT),
            _ => panic!("Expected Internal variant"),
        }
    }
}
