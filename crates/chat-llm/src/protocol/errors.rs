//! Error types for protocol conversion.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid content format: {0}")]
    InvalidContent(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unsupported feature '{feature}' for protocol '{protocol}'")]
    UnsupportedFeature { feature: String, protocol: String },
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
