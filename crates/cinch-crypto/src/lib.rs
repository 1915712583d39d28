//! Cryptographic primitives for CINCH.
//!
//! This crate provides:
//! - AES-256-CBC session ciphers with length-embedding padding
//! - RSA identity keys with chunked encrypt-to-text for large payloads
//! - A key-store service for the long-lived identity key pair
//! - The handshake coordinator that negotiates one cipher per direction
//!
//! # Design
//!
//! Session traffic uses one independently keyed cipher per direction;
//! the handshake bootstraps both by exchanging fresh key material under
//! the peers' long-term RSA keys. Key material is zeroed deterministically
//! when its owner is dropped.

#![forbid(unsafe_code)]

pub mod cipher;
pub mod handshake;
pub mod identity;
pub mod keystore;

pub use cipher::{BlockCipher, KeyMaterial, BLOCK_SIZE};
pub use handshake::{Handshake, SessionCiphers};
pub use identity::{RemotePublicKey, RsaIdentity};
pub use keystore::{FileKeyStore, KeyStore, MemoryKeyStore};
