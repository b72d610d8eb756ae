//! Error types for unseal

use std::fmt;
use thiserror::Error;

/// Failure to isolate a payload from a page body
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("No payload matched: {0}")]
    NotFound(String),

    #[error("Ambiguous payload: {count} disjoint candidates matched")]
    AmbiguousMatch { count: usize },

    #[error("Invalid extraction rule: {0}")]
    InvalidRule(String),
}

/// Main error type for unseal operations
#[derive(Debug, Error)]
pub enum UnsealError {
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Token not found at hop '{hop}': {reason}")]
    TokenNotFound { hop: String, reason: String },

    #[error("Extraction failed: {0}")]
    ExtractionFailed(#[from] ExtractionError),

    #[error("Unsupported scheme version {version} for provider '{provider}'")]
    UnsupportedSchemeVersion { provider: String, version: u32 },

    #[error("Key derivation failed for '{provider}' v{version}: {reason}")]
    KeyDerivationFailed {
        provider: String,
        version: u32,
        reason: String,
    },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("All providers exhausted: {0}")]
    Exhausted(AttemptLog),

    #[error("Cancelled")]
    Cancelled,

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Provider disabled: {0}")]
    ProviderDisabled(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("Base64 error: {0}")]
    Base64Error(#[from] base64::DecodeError),
}

impl UnsealError {
    /// Check if the cached key behind this error must be evicted
    pub fn evicts_key(&self) -> bool {
        matches!(self, UnsealError::KeyDerivationFailed { .. })
    }
}

/// One provider/scheme combination that was tried and failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub provider: String,
    /// `None` when the provider failed before any scheme ran
    pub scheme: Option<String>,
    pub reason: String,
}

impl AttemptRecord {
    pub fn new(provider: &str, scheme: Option<&str>, reason: impl fmt::Display) -> Self {
        Self {
            provider: provider.to_string(),
            scheme: scheme.map(str::to_string),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scheme {
            Some(scheme) => write!(f, "{}/{}: {}", self.provider, scheme, self.reason),
            None => write!(f, "{}: {}", self.provider, self.reason),
        }
    }
}

/// Every failed attempt of a resolution request, in completion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptLog {
    pub attempts: Vec<AttemptRecord>,
}

impl AttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: AttemptRecord) {
        self.attempts.push(record);
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = AttemptRecord>) {
        self.attempts.extend(records);
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttemptRecord> {
        self.attempts.iter()
    }
}

impl fmt::Display for AttemptLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts.is_empty() {
            return write!(f, "no providers attempted");
        }
        let lines: Vec<String> = self.attempts.iter().map(|a| a.to_string()).collect();
        write!(f, "{} attempts [{}]", self.attempts.len(), lines.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_key() {
        let err = UnsealError::KeyDerivationFailed {
            provider: "p".into(),
            version: 2,
            reason: "mismatch".into(),
        };
        assert!(err.evicts_key());
        assert!(!UnsealError::ValidationFailed("x".into()).evicts_key());
    }

    #[test]
    fn test_attempt_log_display() {
        let mut log = AttemptLog::new();
        assert_eq!(log.to_string(), "no providers attempted");

        log.push(AttemptRecord::new("alpha", None, "Upstream unavailable: 503"));
        log.push(AttemptRecord::new("beta", Some("rc4@v1"), "Validation failed"));
        assert_eq!(log.len(), 2);
        assert_eq!(
            log.to_string(),
            "2 attempts [alpha: Upstream unavailable: 503; beta/rc4@v1: Validation failed]"
        );
    }
}
