use shared::{CryptoError, FrameError, WireError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} pool is full")]
    PoolFull(&'static str),

    #[error("{0} pool is shut down")]
    PoolClosed(&'static str),

    #[error("peer {0} is not connected")]
    PeerGone(String),

    #[error("frame of {0} bytes is too large for the stream transport")]
    FrameTooLarge(usize),

    #[error("database error: {0}")]
    Database(String),

    #[error("zone error: {0}")]
    Zone(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Frame(#[from] FrameError),
}
