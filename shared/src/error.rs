//! Error types shared by both ends of the connection

use thiserror::Error;

/// Failures converting a packet to or from its wire layout
#[derive(Error, Debug)]
pub enum WireError {
    #[error("unknown packet type {0}")]
    UnknownType(u8),

    #[error("truncated packet type {kind}: need {expected} bytes, have {actual}")]
    Truncated {
        kind: u8,
        expected: usize,
        actual: usize,
    },

    #[error("packet type {kind} must be {expected} bytes, got {actual}")]
    SizeMismatch {
        kind: u8,
        expected: usize,
        actual: usize,
    },

    #[error("field too long: {field} holds {max} bytes, got {actual}")]
    FieldTooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Failures in key handling, key agreement and session encryption
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("malformed public key: {0}")]
    PublicKey(String),

    #[error("public key encoding failed: {0}")]
    Encode(String),

    #[error("shared secret derivation failed: {0}")]
    Derive(String),

    #[error("invalid session key material: {0}")]
    KeyMaterial(String),

    #[error("decryption failed")]
    Decrypt,

    #[error("private key error: {0}")]
    PrivateKey(String),

    #[error("private key is encrypted and no passphrase was given")]
    PassphraseRequired,

    #[error("key file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures sealing or opening an on-the-wire frame
#[derive(Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
