//! Core CINCH protocol types, framing, and constants.
//!
//! This crate provides:
//! - The wire packet type with its binary codec
//! - Reserved control-packet type ids
//! - Length-prefixed, block-aligned stream framing

#![forbid(unsafe_code)]

pub mod frame;
pub mod packet;

pub use frame::{read_frame, write_frame, MAX_FRAME_BYTES};
pub use packet::{control, Packet};

/// Protocol version carried nowhere on the wire yet; bumped when the
/// frame or packet layout changes incompatibly.
pub const CINCH_VERSION: u16 = 1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),
    #[error("payload length {declared} exceeds remaining {remaining} bytes")]
    TruncatedPayload { declared: usize, remaining: usize },
    #[error("trailing garbage after packet: {0} bytes")]
    TrailingBytes(usize),
    #[error("payload is not valid text")]
    NotText,
    #[error("text is not ASCII")]
    NotAscii,
}
