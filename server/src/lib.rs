//! # Virtual World Server Library
//!
//! Authoritative side of the virtual-world protocol. The server authenticates
//! users against a pluggable database, hands each one an encrypted session
//! and a [`control::Control`] over at most one game object, runs player
//! actions against the zone and streams position updates to everyone within
//! range.
//!
//! ## Architecture Overview
//!
//! ```text
//!            ┌──────────── ListenSocket ─────────────┐
//!  frames ──►│ handle_frame ─► access pool (login)   │
//!            │              └► zone.submit_action ───┼──► action pool
//!            │ send pool ◄── PacketSink ◄────────────┼─── update pool
//!            │ reaper thread                         │    motion pool
//!            └───────────────────────────────────────┘
//! ```
//!
//! All work runs on OS threads. Each pool is a fixed set of workers draining
//! a bounded queue; a full queue rejects the job instead of blocking the
//! caller. Transports (UDP datagrams or length-prefixed TCP streams) only move
//! bytes: everything protocol-aware lives in [`listen::ListenSocket`].
//!
//! ## Module Organization
//!
//! ### Session Engine (`listen`, `access`, `reaper`, `user`)
//! Inbound routing, login/logout on the access pool, ordered delivery on the
//! send pool, the user table and the idle sweep that pings quiet users and
//! removes dead ones.
//!
//! ### World (`zone`, `actions`, `control`)
//! Game objects, the action registry with its loadable modules, and the
//! per-user control binding objects to the users that drive them.
//!
//! ### Transports (`udp`, `tcp`)
//! One receive thread for datagrams; an accept loop plus a reader thread per
//! connection for streams.
//!
//! ### Support (`config`, `database`, `pool`, `runtime`, `error`)
//! TOML configuration, the database trait and its backends, the thread pool,
//! startup wiring and the crate error type.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::runtime::{Server, World};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::load("server.toml")?;
//! let world = World::bootstrap(&config)?;
//! let server = Server::start(&config, &world)?;
//! println!("listening on {}", server.local_addr());
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod actions;
pub mod config;
pub mod control;
pub mod database;
pub mod error;
pub mod listen;
pub mod pool;
pub mod reaper;
pub mod runtime;
pub mod tcp;
pub mod udp;
pub mod user;
pub mod zone;

pub use error::ServerError;
