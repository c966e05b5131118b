//! Error taxonomy for the message pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    /// The message had no text to classify
    #[error("message is empty")]
    EmptyMessage,

    /// Classifier unreachable, timed out, or returned an unusable response
    #[error("classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    /// Ledger sink unreachable or rejected the append
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// The append request timed out; the row may or may not have been written
    #[error("ledger write outcome unknown: {0}")]
    LedgerOutcomeUnknown(String),

    /// Credential bundle could not be used to obtain access
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Chat platform API call failed
    #[error("telegram api error: {0}")]
    Telegram(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_detail() {
        let err = RelayError::ClassifierUnavailable("timed out".to_string());
        assert_eq!(err.to_string(), "classifier unavailable: timed out");
    }
}
