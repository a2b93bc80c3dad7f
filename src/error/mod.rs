use thiserror::Error;

/// Typed error surface for every exchange-facing operation.
///
/// Variants carry enough structure for classification to work on kinds
/// instead of message substrings; the human-readable payload is only for
/// logs and dashboards.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// Credentials missing or malformed before any exchange call was made
    #[error("Credential Error: {0}")]
    Credential(String),

    /// The exchange rejected the API key or signature
    #[error("Authentication Rejected: {0}")]
    Auth(String),

    /// Upstream call exceeded its deadline
    #[error("Timeout Error: {0}")]
    Timeout(String),

    /// Exchange rate limit hit (HTTP 418/429)
    #[error("Rate limit exceeded")]
    RateLimit { retry_after_secs: Option<u64> },

    /// Transport-level failure (DNS, TLS, connection reset)
    #[error("Network Error: {0}")]
    Network(String),

    /// Exchange API answered with an error payload
    #[error("Exchange API Error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Order placement rejected or failed
    #[error("Order Error: {0}")]
    Order(String),

    /// Response payload could not be parsed
    #[error("Parse Error: {0}")]
    Parse(String),

    /// Exchange name not known to any configured client factory
    #[error("Unsupported Exchange: {0}")]
    UnsupportedExchange(String),

    /// Configuration errors
    #[error("Config Error: {0}")]
    Config(String),

    /// Internal coordination failures (dropped in-flight slot, closed channel)
    #[error("Internal Error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::Parse(format!("JSON serialization/deserialization error: {}", err))
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout(format!("HTTP request timed out: {}", err))
        } else if err.is_decode() {
            ExchangeError::Parse(format!("HTTP response decode error: {}", err))
        } else {
            ExchangeError::Network(format!("HTTP transport error: {}", err))
        }
    }
}

impl From<url::ParseError> for ExchangeError {
    fn from(err: url::ParseError) -> Self {
        ExchangeError::Config(format!("Invalid URL: {}", err))
    }
}

/// Classification bucket of an error, independent of its message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Credential,
    Auth,
    Timeout,
    RateLimit,
    Network,
    Api,
    Order,
    Parse,
    Unsupported,
    Config,
    Internal,
}

/// Whether an operation that produced the error is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retry,
    Fatal,
}

/// How heavily a failure counts toward a connection's degradation threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureWeight {
    /// Advances the consecutive-failure counter
    Standard,
    /// Recorded and logged but does not advance the counter
    Light,
    /// Not a health signal at all
    None,
}

/// Outcome of classifying one error: a stable user-facing reason, a
/// retry-or-fatal verdict, and the counting weight the registry applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub reason: &'static str,
    pub verdict: Verdict,
    pub weight: FailureWeight,
}

impl ExchangeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExchangeError::Credential(_) => ErrorKind::Credential,
            ExchangeError::Auth(_) => ErrorKind::Auth,
            ExchangeError::Timeout(_) => ErrorKind::Timeout,
            ExchangeError::RateLimit { .. } => ErrorKind::RateLimit,
            ExchangeError::Network(_) => ErrorKind::Network,
            ExchangeError::Api { .. } => ErrorKind::Api,
            ExchangeError::Order(_) => ErrorKind::Order,
            ExchangeError::Parse(_) => ErrorKind::Parse,
            ExchangeError::UnsupportedExchange(_) => ErrorKind::Unsupported,
            ExchangeError::Config(_) => ErrorKind::Config,
            ExchangeError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Maps the error kind to reason, verdict and counting weight.
    ///
    /// Buckets, checked in order: timeouts and unreachable hosts are
    /// standard failures; auth rejections are fatal and surface their own
    /// message instead of the generic fallback one; rate limits are
    /// expected load-shedding, not a health signal; credential problems
    /// are configuration faults the caller must fix; everything else is a
    /// standard exchange failure.
    pub fn classify(&self) -> Classification {
        match self.kind() {
            ErrorKind::Timeout | ErrorKind::Network => Classification {
                kind: self.kind(),
                reason: "network timeout, using fallback",
                verdict: Verdict::Retry,
                weight: FailureWeight::Standard,
            },
            ErrorKind::Auth => Classification {
                kind: ErrorKind::Auth,
                reason: "exchange rejected credentials",
                verdict: Verdict::Fatal,
                weight: FailureWeight::None,
            },
            ErrorKind::RateLimit => Classification {
                kind: ErrorKind::RateLimit,
                reason: "rate limited, retry later",
                verdict: Verdict::Retry,
                weight: FailureWeight::Light,
            },
            ErrorKind::Credential | ErrorKind::Config => Classification {
                kind: self.kind(),
                reason: "credentials unavailable or invalid",
                verdict: Verdict::Fatal,
                weight: FailureWeight::None,
            },
            ErrorKind::Api
            | ErrorKind::Order
            | ErrorKind::Parse
            | ErrorKind::Unsupported
            | ErrorKind::Internal => Classification {
                kind: self.kind(),
                reason: "exchange error, using fallback",
                verdict: Verdict::Retry,
                weight: FailureWeight::Standard,
            },
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.classify().verdict == Verdict::Fatal
    }

    pub fn should_retry(&self) -> bool {
        self.classify().verdict == Verdict::Retry
    }
}

// Convenience type alias
pub type Result<T> = std::result::Result<T, ExchangeError>;
