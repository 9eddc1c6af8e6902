//! Error types for certificate lifecycle operations.
//!
//! Every builder and verifier operation fails with exactly one [`PkiError`].
//! Callers that only care about the category can match on [`PkiError::kind`].

use thiserror::Error;

/// Result type alias using [`PkiError`].
pub type Result<T> = std::result::Result<T, PkiError>;

/// Errors that can occur while issuing, signing or verifying certificates.
#[derive(Debug, Error)]
pub enum PkiError {
    /// An artifact with this name already exists in the workspace.
    #[error("name collision: {0}")]
    NameCollision(String),

    /// The name cannot be used as a file name stem inside a role directory.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// RSA key pair generation failed or the requested size is invalid.
    #[error("key generation failed: {0}")]
    KeyGenFailure(String),

    /// PEM/ASN.1 data is malformed, or an artifact could not be read or written.
    #[error("encoding failure: {0}")]
    EncodingFailure(String),

    /// The CA private key could not be decrypted or does not belong to the CA.
    #[error("failed to decrypt CA key: {0}")]
    CaKeyDecryptFailure(String),

    /// The CA trust policy rejected the signing request.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// The certificate used as a CA does not have a CA role.
    #[error("invalid CA type: {0}")]
    InvalidCaType(String),

    /// The requested signing would break the Root -> Intermediate -> leaf hierarchy.
    #[error("invalid hierarchy: {0}")]
    InvalidHierarchy(String),

    /// The signer's chain of trust could not be read.
    #[error("failed to read chain: {0}")]
    ChainReadFailure(String),

    /// Certificate path validation failed.
    #[error("verification failed: {0}")]
    VerificationFailure(String),

    /// The workspace configuration file is unreadable or invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Fieldless category of a [`PkiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NameCollision,
    InvalidName,
    KeyGenFailure,
    EncodingFailure,
    CaKeyDecryptFailure,
    PolicyViolation,
    InvalidCaType,
    InvalidHierarchy,
    ChainReadFailure,
    VerificationFailure,
    Config,
}

impl PkiError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NameCollision(_) => ErrorKind::NameCollision,
            Self::InvalidName(_) => ErrorKind::InvalidName,
            Self::KeyGenFailure(_) => ErrorKind::KeyGenFailure,
            Self::EncodingFailure(_) => ErrorKind::EncodingFailure,
            Self::CaKeyDecryptFailure(_) => ErrorKind::CaKeyDecryptFailure,
            Self::PolicyViolation(_) => ErrorKind::PolicyViolation,
            Self::InvalidCaType(_) => ErrorKind::InvalidCaType,
            Self::InvalidHierarchy(_) => ErrorKind::InvalidHierarchy,
            Self::ChainReadFailure(_) => ErrorKind::ChainReadFailure,
            Self::VerificationFailure(_) => ErrorKind::VerificationFailure,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Create an encoding failure with the given message.
    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::EncodingFailure(msg.into())
    }

    /// Create a key generation failure with the given message.
    pub fn key_gen(msg: impl Into<String>) -> Self {
        Self::KeyGenFailure(msg.into())
    }

    /// Create a CA key decryption failure with the given message.
    pub fn ca_key_decrypt(msg: impl Into<String>) -> Self {
        Self::CaKeyDecryptFailure(msg.into())
    }

    /// Create a chain read failure with the given message.
    pub fn chain_read(msg: impl Into<String>) -> Self {
        Self::ChainReadFailure(msg.into())
    }

    /// Create a verification failure with the given message.
    pub fn verification(msg: impl Into<String>) -> Self {
        Self::VerificationFailure(msg.into())
    }
}

impl From<openssl::error::ErrorStack> for PkiError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Self::EncodingFailure(err.to_string())
    }
}
