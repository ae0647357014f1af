//! Error types for the end-to-end support layer.

use core::error::Error;
use std::time::Duration;

use derive_more::Display;
use error_stack::Report;

/// Result type for support operations.
pub type SupportResult<T> = Result<T, Report<SupportError>>;

/// Errors raised while driving or observing the cluster under test.
#[derive(Debug, Display)]
pub enum SupportError {
    /// Kubernetes API request failed
    #[display("Kubernetes API error: {message}")]
    Kube { message: String },

    /// Requested object does not exist
    #[display("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// Polling deadline passed before the condition held
    #[display(
        "Timed out after {} waiting for {description}; last observed: {last_observed}",
        humantime::format_duration(*timeout)
    )]
    ConditionNotMet {
        description: String,
        timeout: Duration,
        last_observed: String,
    },

    /// HTTP request/response errors
    #[display("HTTP error: {message}")]
    Http { message: String },

    /// Serialization/deserialization errors
    #[display("Serialization error: {message}")]
    Serialization { message: String },

    /// Configuration errors
    #[display("Configuration error: {message}")]
    Configuration { message: String },

    /// Local filesystem errors
    #[display("I/O error: {message}")]
    Io { message: String },

    /// Observed state differs from the expected one
    #[display("Assertion failed: {message}")]
    Assertion { message: String },
}

impl Error for SupportError {}

impl SupportError {
    pub(crate) fn not_found(kind: &str, name: &str) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }
}

/// Whether a report describes an object that does not exist.
pub fn is_not_found(report: &Report<SupportError>) -> bool {
    matches!(report.current_context(), SupportError::NotFound { .. })
}

/// Maps `kube::Error` into a [`SupportError`] report, turning HTTP 404 into
/// [`SupportError::NotFound`] so polling predicates can wait for absence.
pub(crate) trait KubeResultExt<T> {
    fn or_kube_error(self, kind: &str, name: &str) -> SupportResult<T>;
}

impl<T> KubeResultExt<T> for Result<T, kube::Error> {
    fn or_kube_error(self, kind: &str, name: &str) -> SupportResult<T> {
        self.map_err(|error| {
            let context = match &error {
                kube::Error::Api(response) if response.code == 404 => {
                    SupportError::not_found(kind, name)
                }
                _ => SupportError::Kube {
                    message: format!("request for {kind} {name} failed"),
                },
            };
            Report::new(error).change_context(context)
        })
    }
}
