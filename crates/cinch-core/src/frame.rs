//! Length-prefixed, block-aligned stream framing.
//!
//! Every unit on the wire — handshake steps in cleartext and encrypted
//! application traffic alike — travels as one frame:
//!
//! ```text
//! [payload length (4 bytes LE)][payload][random padding]
//! ```
//!
//! The padding extends the whole frame to a multiple of the cipher block
//! size, so an observer sees only block-aligned writes regardless of
//! payload length. Padding bytes are random, never zero-filled.
//!
//! Errors are surfaced as `io::Error` with their original `ErrorKind`
//! preserved, so the connection layer can classify timeouts, resets, and
//! shutdowns; malformed lengths map to `InvalidData`.

use std::io::{self, Read, Write};

use rand::RngCore;

/// Upper bound for a single frame payload. Prevents memory exhaustion
/// from a malformed or malicious length prefix.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Write one frame and return the total number of bytes put on the wire.
pub fn write_frame<W: Write>(w: &mut W, payload: &[u8], align: usize) -> io::Result<usize> {
    debug_assert!(align > 0);
    if payload.len() > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame payload too large: {} bytes", payload.len()),
        ));
    }

    let unpadded = 4 + payload.len();
    let padding = (align - unpadded % align) % align;

    let mut frame = Vec::with_capacity(unpadded + padding);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    if padding > 0 {
        let start = frame.len();
        frame.resize(start + padding, 0);
        rand::thread_rng().fill_bytes(&mut frame[start..]);
    }

    w.write_all(&frame)?;
    w.flush()?;
    Ok(frame.len())
}

/// Read one frame; returns the payload and the on-wire frame length.
pub fn read_frame<R: Read>(r: &mut R, align: usize) -> io::Result<(Vec<u8>, usize)> {
    debug_assert!(align > 0);

    let mut len_bytes = [0u8; 4];
    r.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("declared frame length {len} exceeds maximum"),
        ));
    }

    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;

    // Discard the padding the writer appended for block alignment.
    let unpadded = 4 + len;
    let padding = (align - unpadded % align) % align;
    if padding > 0 {
        let mut scratch = [0u8; 64];
        let mut left = padding;
        while left > 0 {
            let take = left.min(scratch.len());
            r.read_exact(&mut scratch[..take])?;
            left -= take;
        }
    }

    Ok((payload, unpadded + padding))
}
