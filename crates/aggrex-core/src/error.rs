use thiserror::Error;

/// Validation and contract errors exposed by `aggrex-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("native market id cannot be empty")]
    EmptyNativeId,
    #[error("native market id length {len} exceeds max {max}")]
    NativeIdTooLong { len: usize, max: usize },
    #[error("attribute '{field}' cannot be empty when provided")]
    EmptyAttribute { field: &'static str },
    #[error("sports markets require '{field}'")]
    MissingSportsAttribute { field: &'static str },

    #[error("invalid exchange '{value}', expected one of polymarket, kalshi, bitmex, sports")]
    InvalidExchange { value: String },
    #[error(
        "invalid market type '{value}', expected one of binary, categorical, scalar, perpetual, future, moneyline, spread, total"
    )]
    InvalidMarketType { value: String },
    #[error("invalid canonical uuid '{value}'")]
    InvalidUuid { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("config field '{field}' is invalid: {reason}")]
    InvalidConfig { field: String, reason: String },
}

/// Top-level error type for core operations that are not part of the fetch flow.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
