//! Error taxonomy shared across every component (spec §7).
//!
//! Every error carries a `(category, severity, recovery_hint)` triple so that
//! callers at any layer — an HTTP handler turning this into an OAuth error
//! body, a transport deciding whether a failed write is retryable — can make
//! that decision without string-matching on a message.

use std::fmt;

/// Result type alias used across the RelayMCP crate family.
pub type Result<T> = std::result::Result<T, Error>;

/// High-level classification of an error's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed or semantically invalid caller input.
    Validation,
    /// Missing or invalid credentials.
    Authentication,
    /// Valid credentials, insufficient permission.
    Authorization,
    /// The referenced entity does not exist (or has expired).
    NotFound,
    /// The operation conflicts with existing state (e.g. duplicate client_id).
    Conflict,
    /// Caller exceeded an allowed rate.
    RateLimit,
    /// A third-party API (upstream OAuth provider, etc.) failed.
    ExternalApi,
    /// The KV store or another persistence layer failed.
    Storage,
    /// The transport layer (HTTP/stdio) failed.
    Transport,
    /// A workflow step failed.
    Workflow,
    /// Invalid or missing configuration.
    Configuration,
    /// Lower-level network failure distinct from the transport protocol itself.
    Network,
    /// An operation exceeded its deadline.
    Timeout,
    /// Unclassified internal error; should be rare.
    Internal,
}

/// Severity of an error, independent of its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// What the caller (or an automated retry policy) should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryHint {
    Retry,
    RetryWithBackoff,
    RefreshToken,
    Reconfigure,
    UserActionRequired,
    Fallback,
    Ignore,
    ContactSupport,
}

/// The single error type used across the RelayMCP crate family.
#[derive(Debug, thiserror::Error)]
pub struct Error {
    category: ErrorCategory,
    severity: Severity,
    recovery: RecoveryHint,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.category, self.message)
    }
}

impl Error {
    /// Build an error from its full taxonomy triple.
    pub fn new(
        category: ErrorCategory,
        severity: Severity,
        recovery: RecoveryHint,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            severity,
            recovery,
            message: message.into(),
            source: None,
        }
    }

    /// Attach a source error for `source()`/`{:?}` chains without changing
    /// the taxonomy.
    #[must_use]
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn recovery_hint(&self) -> RecoveryHint {
        self.recovery
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    // --- Convenience constructors for the common cases ---------------------

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Validation,
            Severity::Low,
            RecoveryHint::UserActionRequired,
            message,
        )
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Authentication,
            Severity::Medium,
            RecoveryHint::UserActionRequired,
            message,
        )
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Authorization,
            Severity::Medium,
            RecoveryHint::UserActionRequired,
            message,
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::NotFound,
            Severity::Low,
            RecoveryHint::Ignore,
            message,
        )
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Conflict,
            Severity::Medium,
            RecoveryHint::UserActionRequired,
            message,
        )
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::RateLimit,
            Severity::Medium,
            RecoveryHint::RetryWithBackoff,
            message,
        )
    }

    pub fn external_api(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::ExternalApi,
            Severity::High,
            RecoveryHint::RetryWithBackoff,
            message,
        )
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Storage,
            Severity::High,
            RecoveryHint::Retry,
            message,
        )
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Transport,
            Severity::High,
            RecoveryHint::RetryWithBackoff,
            message,
        )
    }

    pub fn workflow(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Workflow,
            Severity::Medium,
            RecoveryHint::Fallback,
            message,
        )
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Configuration,
            Severity::Critical,
            RecoveryHint::Reconfigure,
            message,
        )
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Network,
            Severity::High,
            RecoveryHint::RetryWithBackoff,
            message,
        )
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Timeout,
            Severity::Medium,
            RecoveryHint::Retry,
            message,
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Internal,
            Severity::Critical,
            RecoveryHint::ContactSupport,
            message,
        )
    }

    /// Whether this error's category is, by nature, something a caller should
    /// fix rather than retry (spec §7: "validation errors ... never retried
    /// internally").
    pub fn is_non_retryable(&self) -> bool {
        matches!(
            self.category,
            ErrorCategory::Validation | ErrorCategory::Authentication | ErrorCategory::Authorization
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::storage(e.to_string()).with_source(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::validation(format!("serialization error: {e}")).with_source(e)
    }
}
