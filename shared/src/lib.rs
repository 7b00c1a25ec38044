//! # Shared Protocol Library
//!
//! Code linked by both the client and the server: the fixed-layout wire
//! protocol, the session key agreement and the frame sealing that joins the
//! two. Nothing in here owns a socket or a thread.
//!
//! ## Module Organization
//!
//! ### Wire Format (`proto`)
//! Packet type tags, fixed sizes per tag, the [`Packet`] sum type and the
//! big-endian conversion functions [`hton_packet`] / [`ntoh_packet`].
//!
//! ### Crypto Handshake (`crypto`)
//! P-256 key pairs, DER public key (de)serialisation, ECDH + SHA-256 session
//! key derivation, AES-256-CBC payload encryption and passphrase protected
//! key files.
//!
//! ### Framing (`frame`)
//! Turns a packet plus an optional session into the bytes put on the wire,
//! and back.
//!
//! ## Handshake Overview
//!
//! ```text
//! Client                                   Server
//!   |--- LOGREQ (username, DER pubkey) ----->|  authenticate, fresh key pair
//!   |<-- SRVKEY (DER pubkey, IV) ------------|  derive session
//!   |  derive session                        |
//!   |<-- ACKPKT (access level) [encrypted] --|
//!   |=== all other traffic encrypted ========|
//! ```

pub mod crypto;
pub mod error;
pub mod frame;
pub mod proto;

pub use crypto::{KeyPair, SessionCipher};
pub use error::{CryptoError, FrameError, WireError};
pub use proto::{hton_packet, ntoh_packet, packet_size, Header, Packet};
