use thiserror::Error;

/// Coarse error category used by retry classification and the degradation
/// policy.
///
/// Every [`Error`] maps to exactly one category, so policy code can match
/// exhaustively instead of sniffing error shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connectivity failure: DNS, connect, reset, timeout.
    Network,
    /// Missing or expired credentials; requires re-login, never retried.
    Authentication,
    /// Backend returned a 5xx-style failure.
    Server,
    /// Backend asked us to slow down.
    RateLimit,
    /// The request itself is malformed; retrying cannot help.
    Validation,
    /// Cooperative cancellation. Not an error for reporting purposes.
    Cancelled,
    /// Anything that does not fit the buckets above.
    Unknown,
}

/// Unified error type for the portal data layer.
///
/// `Clone` because settled outcomes are broadcast to every deduplicated
/// subscriber of an in-flight request.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("authentication required: {message}")]
    Authentication { message: String },

    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("rate limited{}", retry_after_ms.map(|ms| format!(" (retry after {}ms)", ms)).unwrap_or_default())]
    RateLimit { retry_after_ms: Option<u64> },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("unknown error: {message}")]
    Unknown { message: String },
}

impl Error {
    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network { message: msg.into() }
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Error::Authentication { message: msg.into() }
    }

    pub fn server(status: u16, msg: impl Into<String>) -> Self {
        Error::Server {
            status,
            message: msg.into(),
        }
    }

    pub fn rate_limit(retry_after_ms: Option<u64>) -> Self {
        Error::RateLimit { retry_after_ms }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation { message: msg.into() }
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Error::Unknown { message: msg.into() }
    }

    /// The declared category of this error.
    ///
    /// `RetriesExhausted` reports the category of the final underlying
    /// failure, since that is what the caller has to react to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Network { .. } => ErrorCategory::Network,
            Error::Authentication { .. } => ErrorCategory::Authentication,
            Error::Server { .. } => ErrorCategory::Server,
            Error::RateLimit { .. } => ErrorCategory::RateLimit,
            Error::Validation { .. } | Error::Serialization { .. } => ErrorCategory::Validation,
            Error::Cancelled => ErrorCategory::Cancelled,
            Error::RetriesExhausted { source, .. } => source.category(),
            Error::Unknown { .. } => ErrorCategory::Unknown,
        }
    }

    /// Whether the retry executor may attempt this failure again.
    ///
    /// Exhaustive over [`ErrorCategory`] so a new category cannot silently
    /// fall into the wrong bucket.
    pub fn is_retryable(&self) -> bool {
        match self.category() {
            ErrorCategory::Network | ErrorCategory::Server | ErrorCategory::RateLimit => true,
            ErrorCategory::Authentication
            | ErrorCategory::Validation
            | ErrorCategory::Cancelled
            | ErrorCategory::Unknown => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Rate-limit hint from the backend, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Error::RateLimit { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        // Carried as a message so the variant stays Clone.
        Error::Serialization {
            message: e.to_string(),
        }
    }
}
