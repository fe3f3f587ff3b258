//! Object storage signer error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("Presign failed for {key}: {message}")]
    Presign { key: String, message: String },

    #[error("Invalid signer configuration: {0}")]
    Config(String),
}
