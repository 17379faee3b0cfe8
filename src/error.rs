//! Error types for the WS-Security preprocessor.

use thiserror::Error;

/// WS-Security preprocessor errors.
///
/// `Config` is the only variant raised while settings are edited; every other
/// variant surfaces from a single `process()` call and leaves the payload
/// untouched.
#[derive(Error, Debug)]
pub enum WssError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Crypto initialization error: {0}")]
    CryptoInit(String),

    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("XML serialization error: {0}")]
    Serialize(String),

    #[error("Invalid SOAP envelope: {0}")]
    InvalidEnvelope(String),

    #[error("WS-Security error: {0}")]
    SecurityApply(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WssError {
    /// Get the stable string code for this error, used in log records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIGURATION_ERROR",
            Self::CryptoInit(_) => "CRYPTO_INIT_ERROR",
            Self::XmlParse(_) => "PARSE_ERROR",
            Self::Serialize(_) => "SERIALIZE_ERROR",
            Self::InvalidEnvelope(_) => "INVALID_ENVELOPE",
            Self::SecurityApply(_) => "SECURITY_APPLY_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Whether the error was caused by the operator's settings rather than
    /// by the payload or the keystore contents at run time.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Result type for preprocessor operations.
pub type WssResult<T> = Result<T, WssError>;
