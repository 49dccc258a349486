use thiserror::Error;

/// Single error type shared across every gateway subsystem.
///
/// Callers never need to know which crate raised a failure, only which
/// kind of failure it was — admission, transport, protocol, or exchange
/// rejection.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("authentication transport unavailable: {0}")]
    AuthUnavailable(String),

    #[error("authentication rejected by exchange: {0}")]
    AuthRejected(String),

    #[error("authentication response malformed: {0}")]
    AuthMalformed(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("risk check rejected order: {reason}")]
    RiskRejected { reason: String },

    #[error("price unknown for market order, no order book snapshot")]
    PriceUnknown,

    #[error("transport failed: {0}")]
    TransportFailed(String),

    #[error("protocol response malformed: {0}")]
    ProtocolMalformed(String),

    #[error("exchange rejected request: [{code}] {message}")]
    ExchangeRejected { code: i64, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::TransportFailed(err.to_string())
    }
}
