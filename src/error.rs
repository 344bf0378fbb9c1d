//! Gateway error taxonomy

use crate::registry::StoreError;
use crate::transport::TransportError;
use garden_shared::codec::CodecError;
use garden_shared::crypto::CryptoError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Bad input size or format; nothing was changed
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Unknown device or coordinator
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed inbound payload
    #[error("Decode failed: {0}")]
    Decode(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Fragment ordering violation
    #[error("Fragment sequence error: {0}")]
    Sequence(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CodecError> for GatewayError {
    fn from(e: CodecError) -> Self {
        GatewayError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
