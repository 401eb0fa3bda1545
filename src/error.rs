//! Domain error taxonomy for portfolio composition.
//!
//! Hard errors are rendered as structured `{kind, message}` objects via [`ErrorBody`].

use serde::Serialize;
use thiserror::Error;

/// Machine-readable error category
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or rejected API credential
    InvalidCredential,
    /// Target allocation cannot be normalized
    InvalidAllocation,
    /// Malformed request input (amount, ticker)
    InvalidRequest,
    /// No instrument could be priced
    EmptyPortfolio,
    /// Price or fundamentals could not be obtained
    DataUnavailable,
    /// Upstream provider rejected the call for frequency reasons
    RateLimitExceeded,
    /// Configuration is out of range or unreadable
    Config,
}

impl ErrorKind {
    /// Errors caused by the caller's input rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidAllocation | Self::InvalidRequest)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCredential => "invalid_credential",
            Self::InvalidAllocation => "invalid_allocation",
            Self::InvalidRequest => "invalid_request",
            Self::EmptyPortfolio => "empty_portfolio",
            Self::DataUnavailable => "data_unavailable",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::Config => "config",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ComposerError {
    #[error("invalid credential for {provider}: {reason}")]
    InvalidCredential { provider: String, reason: String },

    #[error("invalid allocation: {0}")]
    InvalidAllocation(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("empty portfolio: {0}")]
    EmptyPortfolio(String),

    #[error("data unavailable for {ticker}: {cause}")]
    DataUnavailable { ticker: String, cause: String },

    #[error("rate limit exceeded by {provider}")]
    RateLimitExceeded {
        provider: String,
        retry_after_secs: Option<u32>,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl ComposerError {
    pub fn invalid_credential(provider: &str, reason: &str) -> Self {
        Self::InvalidCredential {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn data_unavailable(ticker: &str, cause: impl ToString) -> Self {
        Self::DataUnavailable {
            ticker: ticker.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn rate_limited(provider: &str, retry_after_secs: Option<u32>) -> Self {
        Self::RateLimitExceeded {
            provider: provider.to_string(),
            retry_after_secs,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCredential { .. } => ErrorKind::InvalidCredential,
            Self::InvalidAllocation(_) => ErrorKind::InvalidAllocation,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::EmptyPortfolio(_) => ErrorKind::EmptyPortfolio,
            Self::DataUnavailable { .. } => ErrorKind::DataUnavailable,
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u32> {
        match self {
            Self::RateLimitExceeded {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody::from(self)
    }
}

/// Structured wire form of a hard error
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u32>,
}

impl From<&ComposerError> for ErrorBody {
    fn from(err: &ComposerError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            retry_after_secs: err.retry_after_secs(),
        }
    }
}

pub type Result<T, E = ComposerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = ComposerError::data_unavailable("AAPL", "timeout");
        assert_eq!(err.kind(), ErrorKind::DataUnavailable);
        assert_eq!(err.to_string(), "data unavailable for AAPL: timeout");

        let err = ComposerError::InvalidAllocation("sum is zero".into());
        assert!(err.kind().is_client_error());
        assert!(!ComposerError::EmptyPortfolio("x".into()).kind().is_client_error());
    }

    #[test]
    fn test_error_body_serialization() {
        let err = ComposerError::rate_limited("AlphaVantage", Some(60));
        let json = serde_json::to_value(err.to_body()).unwrap();
        assert_eq!(json["kind"], "rate_limit_exceeded");
        assert_eq!(json["retryAfterSecs"], 60);

        let json = serde_json::to_value(ComposerError::InvalidRequest("bad".into()).to_body()).unwrap();
        assert_eq!(json["kind"], "invalid_request");
        assert!(json.get("retryAfterSecs").is_none());
    }

    #[test]
    fn test_kind_as_str_matches_serde() {
        for kind in [
            ErrorKind::InvalidCredential,
            ErrorKind::InvalidAllocation,
            ErrorKind::InvalidRequest,
            ErrorKind::EmptyPortfolio,
            ErrorKind::DataUnavailable,
            ErrorKind::RateLimitExceeded,
            ErrorKind::Config,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
        }
    }
}
