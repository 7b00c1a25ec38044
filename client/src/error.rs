use shared::{CryptoError, FrameError, WireError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommError {
    #[error("socket setup failed: {0}")]
    Socket(#[source] std::io::Error),

    #[error("failed to start {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("comm engine is shut down")]
    Closed,

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Frame(#[from] FrameError),
}
