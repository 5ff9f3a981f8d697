use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid converter pair: {0}")]
    InvalidConverterPair(String),

    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),

    #[error("Currency not found: {0}")]
    CurrencyNotFound(String),

    #[error("Currency already exists: {0}")]
    CurrencyAlreadyExists(String),

    #[error("Converter pair not found: {0}")]
    ConverterPairNotFound(String),

    #[error("Converter pair already exists: {0}")]
    ConverterPairAlreadyExists(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not authorized")]
    NotAuthorized,

    #[error("No active transaction in request scope")]
    TransactionNotFound,

    #[error("External provider error: {0}")]
    ExternalProvider(String),

    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    /// Stable machine-readable kind, used by transports in their error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidConverterPair(_) => "INVALID_CONVERTER_PAIR",
            Error::InvalidCurrency(_) => "INVALID_CURRENCY",
            Error::CurrencyNotFound(_) => "CURRENCY_NOT_FOUND",
            Error::CurrencyAlreadyExists(_) => "CURRENCY_ALREADY_EXISTS",
            Error::ConverterPairNotFound(_) => "CONVERTER_PAIR_NOT_FOUND",
            Error::ConverterPairAlreadyExists(_) => "CONVERTER_PAIR_ALREADY_EXISTS",
            Error::BadRequest(_) => "BAD_REQUEST",
            Error::NotAuthorized => "NOT_AUTHORIZED",
            Error::TransactionNotFound => "TRANSACTION_NOT_FOUND",
            Error::ExternalProvider(_) => "EXTERNAL_PROVIDER_ERROR",
            Error::NotImplemented(_) => "NOT_IMPLEMENTED",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Config(_) => "CONFIGURATION_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Cancelled => "CANCELLED",
            Error::DeadlineExceeded => "DEADLINE_EXCEEDED",
        }
    }
}
