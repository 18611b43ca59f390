use thiserror::Error;

/// Errors raised by the exchange adapter.
///
/// Transport failures on 429/5xx are retried by the client; an `Api` error
/// (non-zero retCode in the response body) is an application-level rejection
/// and is never retried.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("exchange rejected request (retCode {ret_code}): {message}")]
    Api { ret_code: i64, message: String },

    #[error("request failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("invalid exchange response: {0}")]
    InvalidResponse(String),
}

impl ExchangeError {
    /// Application errors are final; everything else may be worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExchangeError::Api { .. } => false,
            ExchangeError::Transport(e) => e
                .status()
                .map(|s| s.as_u16() == 429 || s.is_server_error())
                .unwrap_or(true),
            ExchangeError::RetriesExhausted { .. } | ExchangeError::InvalidResponse(_) => false,
        }
    }
}

/// Invariant violations inside the risk layer. These are not trade
/// rejections; they indicate a wiring bug and are logged as fatal for the
/// offending signal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RiskError {
    #[error("va_not_registered: {0}")]
    VaNotRegistered(String),
}
