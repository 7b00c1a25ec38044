//! # Virtual World Client Library
//!
//! Client side of the virtual-world protocol: a small communication engine
//! that logs a user in, keeps an encrypted session with the server and feeds
//! world updates to whatever renders them.
//!
//! ## Architecture Overview
//!
//! ```text
//!   caller ──send_*()──► FIFO queue ──► send worker ──► UDP socket ──► server
//!                                                          │
//!   ObjectCache ◄── dispatch table ◄── receive worker ◄────┘
//! ```
//!
//! Two OS threads do all the I/O. The send worker sleeps on a condition
//! variable until a packet is queued, stamps nothing itself (sequence numbers
//! are assigned at enqueue time so queue order and sequence order agree) and
//! encrypts the body once a session is established. The receive worker
//! accepts datagrams from the configured server address only, decrypts them
//! when a session exists and routes each packet through a per-type handler.
//!
//! ### Session Establishment
//! `send_login` sends the client's public key in the clear. The server answers
//! with a `SRVKEY` packet carrying its own public key and an IV; the handler
//! derives the shared key and installs it in one step. A bad server key is
//! logged and leaves the previous session (or lack of one) untouched.
//!
//! ### Rendering Seam
//! The engine knows nothing about drawing. Position updates and object
//! deletions are forwarded to an [`ObjectCache`]; [`ObjectStore`] is a plain
//! in-memory implementation.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::{Comm, ObjectStore};
//! use shared::KeyPair;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let comm = Comm::new(
//!     "127.0.0.1:4500".parse()?,
//!     KeyPair::generate(),
//!     Arc::new(ObjectStore::new()),
//! )?;
//! comm.send_login("alice", "Alice")?;
//! // ... later
//! comm.send_logout()?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod comm;
mod dispatch;
pub mod error;

pub use cache::{CachedObject, ObjectCache, ObjectStore};
pub use comm::{Comm, StatsSnapshot};
pub use error::CommError;
