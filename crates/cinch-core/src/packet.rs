//! The CINCH wire packet and its binary codec.
//!
//! A packet is the unit of exchange between two peers. On the wire it is
//! always carried inside one encrypted frame (see [`crate::frame`]).
//!
//! # Layout (little-endian)
//!
//! ```text
//! [source_id (4)][type_id (4)][destination_id (4)][data_len (4)]
//! [data (data_len)][channel_id (4)]
//! ```
//!
//! `channel_id` is deliberately placed last: it is covered by the same
//! encrypted frame but not contiguous with the other identifiers.
//!
//! # Zero identifiers
//!
//! `source_id`, `destination_id`, and `channel_id` never serialize as 0.
//! A 0 value is replaced with a fresh random nonzero `i32` immediately
//! before encoding, so unset fields do not produce patterned plaintext.
//! Applications must therefore never use 0 as a meaningful id; a packet
//! that round-trips through the codec will carry a random value instead.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::Rng;

use crate::CoreError;

/// Reserved control-packet type ids, consumed internally by the
/// connection state machine and never delivered to the application.
pub mod control {
    /// Handshake step carrier (public keys, session-key bundles, probes).
    pub const HANDSHAKE: u32 = 0;
    /// A peer's session keys reached `max_key_age`; it wants a re-key.
    pub const HANDSHAKE_REQUEST: u32 = 1;
    /// The driving side is about to run a full handshake.
    pub const INIT_HANDSHAKE: u32 = 2;
    /// Final barrier of a successful full handshake.
    pub const END_HANDSHAKE: u32 = 3;
    /// A re-key attempt was abandoned; keep the old keys.
    pub const CANCEL_HANDSHAKE: u32 = 4;
    /// Unidirectional session-key refresh, carrying the new key bundle.
    pub const INIT_PARTIAL_HANDSHAKE: u32 = 5;
    /// Confirmation that the refreshed decryptor is installed.
    pub const END_PARTIAL_HANDSHAKE: u32 = 6;
    /// Advertisement of the sender's 16-byte connection id.
    pub const CONNECTION_ID_EXCHANGE: u32 = 7;
    /// Graceful disconnect notification.
    pub const DISCONNECT_NOTIFICATION: u32 = 8;

    /// Upper bound (inclusive) of the reserved control range.
    pub const RESERVED_MAX: u32 = 15;

    /// Returns true for type ids the connection layer consumes itself.
    pub fn is_control(type_id: u32) -> bool {
        type_id <= RESERVED_MAX
    }
}

/// Sentinel type id for UTF-8 text packets built by [`Packet::utf8`].
pub const TEXT_UTF8: u32 = u32::MAX;
/// Sentinel type id for ASCII text packets built by [`Packet::ascii`].
pub const TEXT_ASCII: u32 = u32::MAX - 1;

/// Fixed per-packet overhead: four `u32`/`i32` header fields plus the
/// trailing channel id.
pub const PACKET_OVERHEAD: usize = 20;

/// A CINCH wire packet.
///
/// Pure data container: the only side effect of encoding is the zero-id
/// randomization described in the module docs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub source_id: i32,
    pub type_id: u32,
    pub destination_id: i32,
    pub data: Vec<u8>,
    pub channel_id: i32,
}

impl Packet {
    /// Create a packet with the given type id and payload; all
    /// identifier fields start at 0 and will be randomized on encode.
    pub fn new(type_id: u32, data: Vec<u8>) -> Self {
        Self {
            source_id: 0,
            type_id,
            destination_id: 0,
            data,
            channel_id: 0,
        }
    }

    /// Create a UTF-8 text packet using the reserved sentinel type id.
    pub fn utf8(text: &str) -> Self {
        Self::new(TEXT_UTF8, text.as_bytes().to_vec())
    }

    /// Create an ASCII text packet using the reserved sentinel type id.
    ///
    /// # Errors
    /// Rejects input containing non-ASCII characters.
    pub fn ascii(text: &str) -> Result<Self, CoreError> {
        if !text.is_ascii() {
            return Err(CoreError::NotAscii);
        }
        Ok(Self::new(TEXT_ASCII, text.as_bytes().to_vec()))
    }

    /// Interpret the payload as text for the two sentinel type ids.
    ///
    /// # Errors
    /// Fails for non-text type ids or invalid UTF-8 payloads.
    pub fn text(&self) -> Result<&str, CoreError> {
        match self.type_id {
            TEXT_UTF8 | TEXT_ASCII => {
                std::str::from_utf8(&self.data).map_err(|_| CoreError::NotText)
            }
            _ => Err(CoreError::NotText),
        }
    }

    /// True if this packet's type id falls in the reserved control range.
    pub fn is_control(&self) -> bool {
        control::is_control(self.type_id)
    }

    /// Encode to the wire layout, replacing any zero identifier field
    /// with a fresh random nonzero value first.
    pub fn encode(&mut self) -> Bytes {
        let mut rng = rand::thread_rng();
        if self.source_id == 0 {
            self.source_id = nonzero_i32(&mut rng);
        }
        if self.destination_id == 0 {
            self.destination_id = nonzero_i32(&mut rng);
        }
        if self.channel_id == 0 {
            self.channel_id = nonzero_i32(&mut rng);
        }

        let mut buf = BytesMut::with_capacity(PACKET_OVERHEAD + self.data.len());
        buf.put_i32_le(self.source_id);
        buf.put_u32_le(self.type_id);
        buf.put_i32_le(self.destination_id);
        buf.put_u32_le(self.data.len() as u32);
        buf.put_slice(&self.data);
        buf.put_i32_le(self.channel_id);
        buf.freeze()
    }

    /// Decode a packet from its exact wire representation.
    ///
    /// # Errors
    /// Rejects buffers that are too short, declare more payload than
    /// they carry, or have bytes left over after the channel id.
    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() < PACKET_OVERHEAD {
            return Err(CoreError::TooShort(bytes.len()));
        }

        let mut buf = bytes;
        let source_id = buf.get_i32_le();
        let type_id = buf.get_u32_le();
        let destination_id = buf.get_i32_le();
        let data_len = buf.get_u32_le() as usize;

        if buf.remaining() < data_len + 4 {
            return Err(CoreError::TruncatedPayload {
                declared: data_len,
                remaining: buf.remaining().saturating_sub(4),
            });
        }

        let data = buf.copy_to_bytes(data_len).to_vec();
        let channel_id = buf.get_i32_le();

        if buf.has_remaining() {
            return Err(CoreError::TrailingBytes(buf.remaining()));
        }

        Ok(Self {
            source_id,
            type_id,
            destination_id,
            data,
            channel_id,
        })
    }

    /// Encoded size of this packet.
    pub fn wire_len(&self) -> usize {
        PACKET_OVERHEAD + self.data.len()
    }
}

fn nonzero_i32(rng: &mut impl Rng) -> i32 {
    loop {
        let v: i32 = rng.gen();
        if v != 0 {
            return v;
        }
    }
}
