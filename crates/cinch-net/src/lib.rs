//! CINCH connection runtime.
//!
//! Builds the live transport on top of `cinch-core` (wire format) and
//! `cinch-crypto` (session ciphers, handshake): a [`Connection`] owns a
//! TCP socket, runs the handshake, spawns a background reader thread,
//! rotates session keys on age, and delivers application packets by
//! callback (push) or bounded queue (pull).

#![forbid(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod queue;

pub use config::{ConnectionConfig, DeliveryMode};
pub use connection::{ConnState, Connection};
pub use error::{DisconnectReason, IoFailure, NetError};
pub use queue::DeliveryQueue;
