//! Handshake coordinator: negotiates one session cipher per direction.
//!
//! The same three-step exchange runs for the initial connect and for a
//! full re-key, and it is symmetric — both sides execute the identical
//! sequence, writing before reading at every step:
//!
//! 1. **Public-key exchange** — each side sends its long-term RSA public
//!    key as a cleartext-framed packet and receives the peer's.
//! 2. **Session-key negotiation** — each side creates a fresh
//!    [`BlockCipher`], RSA-encrypts its IV then its key under the peer's
//!    public key, and decrypts the peer's bundle into the cipher used
//!    for *incoming* traffic. Each direction ends up independently keyed.
//! 3. **Verification** — each side sends one encrypted probe packet and
//!    expects one back of the same type, then exchanges an end-of-
//!    handshake barrier.
//!
//! Failure at any step aborts the whole handshake; no partial state is
//! handed to the caller.
//!
//! The *partial* handshake ([`partial_offer`] / [`partial_accept`]) is a
//! lighter, unidirectional variant that refreshes only the requesting
//! side's decrypt-direction cipher and skips the identity-key exchange.
//! The asymmetry is deliberate and preserved.

use std::io::{self, Read, Write};

use bytes::{Buf, BufMut};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, trace, warn};

use cinch_core::packet::control;
use cinch_core::{read_frame, write_frame, CoreError, Packet};

use crate::cipher::{BlockCipher, CipherError, BLOCK_SIZE, IV_SIZE, KEY_SIZE};
use crate::identity::{RemotePublicKey, RsaIdentity};

/// Handshake errors. Any of these aborts the attempt.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("I/O failure during handshake: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected packet type {got} (expected {expected})")]
    UnexpectedPacket { expected: u32, got: u32 },

    #[error("malformed packet: {0}")]
    Codec(#[from] CoreError),

    #[error("cipher failure: {0}")]
    Cipher(#[from] CipherError),

    #[error("asymmetric crypto failure: {0}")]
    Crypto(String),

    #[error("malformed session-key bundle: {0}")]
    BadBundle(String),

    #[error("verification probe mismatch")]
    Probe,
}

impl From<anyhow::Error> for HandshakeError {
    fn from(err: anyhow::Error) -> Self {
        Self::Crypto(format!("{err:#}"))
    }
}

/// Output of a successful full handshake.
pub struct SessionCiphers {
    /// Cipher for outgoing traffic (we generated its keys).
    pub encryptor: BlockCipher,
    /// Cipher for incoming traffic (keyed from the peer's bundle).
    pub decryptor: BlockCipher,
    /// The peer's long-term public key, for later partial re-keys.
    pub remote_key: RemotePublicKey,
}

/// Coordinator for one handshake attempt over a bidirectional stream.
pub struct Handshake<'a, S: Read + Write> {
    stream: &'a mut S,
    identity: &'a RsaIdentity,
    compress: bool,
}

impl<'a, S: Read + Write> Handshake<'a, S> {
    pub fn new(stream: &'a mut S, identity: &'a RsaIdentity) -> Self {
        Self {
            stream,
            identity,
            compress: false,
        }
    }

    /// Negotiate session ciphers that apply gzip before encryption.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Run the full three-step handshake.
    pub fn full(mut self) -> Result<SessionCiphers, HandshakeError> {
        let remote_key = self.exchange_public_keys()?;
        let (encryptor, decryptor) = self.negotiate_session_keys(&remote_key)?;
        self.verify(&encryptor, &decryptor)?;
        debug!("handshake complete");
        Ok(SessionCiphers {
            encryptor,
            decryptor,
            remote_key,
        })
    }

    fn exchange_public_keys(&mut self) -> Result<RemotePublicKey, HandshakeError> {
        let pem = self.identity.public_key_pem()?;
        self.send_clear(Packet::new(control::HANDSHAKE, pem.into_bytes()))?;

        let packet = self.recv_clear()?;
        expect_type(&packet, control::HANDSHAKE)?;
        let pem = String::from_utf8(packet.data)
            .map_err(|_| HandshakeError::BadBundle("public key is not UTF-8".into()))?;
        let remote = RemotePublicKey::from_pem(&pem)?;
        trace!("received peer public key");
        Ok(remote)
    }

    fn negotiate_session_keys(
        &mut self,
        remote: &RemotePublicKey,
    ) -> Result<(BlockCipher, BlockCipher), HandshakeError> {
        let encryptor = BlockCipher::random().with_compression(self.compress);
        let bundle = encode_bundle(&encryptor, remote)?;
        self.send_clear(Packet::new(control::HANDSHAKE, bundle))?;

        let packet = self.recv_clear()?;
        expect_type(&packet, control::HANDSHAKE)?;
        let decryptor = decode_bundle(self.identity, &packet.data, self.compress)?;
        trace!("session keys negotiated");
        Ok((encryptor, decryptor))
    }

    fn verify(
        &mut self,
        encryptor: &BlockCipher,
        decryptor: &BlockCipher,
    ) -> Result<(), HandshakeError> {
        let mut probe = [0u8; 16];
        OsRng.fill_bytes(&mut probe);
        self.send_encrypted(encryptor, Packet::new(control::HANDSHAKE, probe.to_vec()))?;

        let reply = self.recv_encrypted(decryptor)?;
        if reply.type_id != control::HANDSHAKE {
            warn!(got = reply.type_id, "verification probe mismatch");
            return Err(HandshakeError::Probe);
        }

        // Final barrier: both sides confirm the new ciphers work.
        self.send_encrypted(encryptor, Packet::new(control::END_HANDSHAKE, Vec::new()))?;
        let end = self.recv_encrypted(decryptor)?;
        expect_type(&end, control::END_HANDSHAKE)?;
        Ok(())
    }

    fn send_clear(&mut self, mut packet: Packet) -> Result<(), HandshakeError> {
        let bytes = packet.encode();
        write_frame(self.stream, &bytes, BLOCK_SIZE)?;
        Ok(())
    }

    fn recv_clear(&mut self) -> Result<Packet, HandshakeError> {
        let (payload, _) = read_frame(self.stream, BLOCK_SIZE)?;
        Ok(Packet::decode(&payload)?)
    }

    fn send_encrypted(
        &mut self,
        cipher: &BlockCipher,
        mut packet: Packet,
    ) -> Result<(), HandshakeError> {
        let ciphertext = cipher.encrypt(&packet.encode())?;
        write_frame(self.stream, &ciphertext, BLOCK_SIZE)?;
        Ok(())
    }

    fn recv_encrypted(&mut self, cipher: &BlockCipher) -> Result<Packet, HandshakeError> {
        let (ciphertext, _) = read_frame(self.stream, BLOCK_SIZE)?;
        let plaintext = cipher.decrypt(&ciphertext)?;
        Ok(Packet::decode(&plaintext)?)
    }
}

fn expect_type(packet: &Packet, expected: u32) -> Result<(), HandshakeError> {
    if packet.type_id != expected {
        return Err(HandshakeError::UnexpectedPacket {
            expected,
            got: packet.type_id,
        });
    }
    Ok(())
}

/// Build a key bundle: RSA-encrypt the cipher's IV, then its key (in
/// that order), each as a length-prefixed base64 string.
fn encode_bundle(
    cipher: &BlockCipher,
    remote: &RemotePublicKey,
) -> Result<Vec<u8>, HandshakeError> {
    let iv_b64 = remote.encrypt_to_base64(cipher.iv())?;
    let key_b64 = remote.encrypt_to_base64(cipher.key())?;

    let mut bundle = Vec::with_capacity(8 + iv_b64.len() + key_b64.len());
    bundle.put_u32_le(iv_b64.len() as u32);
    bundle.put_slice(iv_b64.as_bytes());
    bundle.put_u32_le(key_b64.len() as u32);
    bundle.put_slice(key_b64.as_bytes());
    Ok(bundle)
}

/// Decrypt a peer's key bundle into a cipher for incoming traffic.
fn decode_bundle(
    identity: &RsaIdentity,
    bundle: &[u8],
    compress: bool,
) -> Result<BlockCipher, HandshakeError> {
    let mut buf = bundle;
    let iv_b64 = take_string(&mut buf)?;
    let key_b64 = take_string(&mut buf)?;
    if buf.has_remaining() {
        return Err(HandshakeError::BadBundle(format!(
            "{} trailing bytes",
            buf.remaining()
        )));
    }

    let iv_bytes = identity.decrypt_base64(&iv_b64)?;
    let key_bytes = identity.decrypt_base64(&key_b64)?;

    let mut iv: [u8; IV_SIZE] = iv_bytes
        .try_into()
        .map_err(|v: Vec<u8>| HandshakeError::BadBundle(format!("IV length {}", v.len())))?;
    let mut key: [u8; KEY_SIZE] = key_bytes
        .try_into()
        .map_err(|v: Vec<u8>| HandshakeError::BadBundle(format!("key length {}", v.len())))?;

    Ok(BlockCipher::new(&mut key, &mut iv).with_compression(compress))
}

fn take_string(buf: &mut &[u8]) -> Result<String, HandshakeError> {
    if buf.remaining() < 4 {
        return Err(HandshakeError::BadBundle("truncated length prefix".into()));
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(HandshakeError::BadBundle("truncated string".into()));
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec())
        .map_err(|_| HandshakeError::BadBundle("string is not UTF-8".into()))
}

/// Partial handshake, offering side: the peer of the re-key requester
/// creates a fresh cipher for its outgoing direction and a bundle to
/// carry inside an `INIT_PARTIAL_HANDSHAKE` control packet. The caller
/// installs the returned cipher as its encryptor only after the bundle
/// has been written to the stream.
pub fn partial_offer(
    remote: &RemotePublicKey,
    compress: bool,
) -> Result<(BlockCipher, Vec<u8>), HandshakeError> {
    let cipher = BlockCipher::random().with_compression(compress);
    let bundle = encode_bundle(&cipher, remote)?;
    Ok((cipher, bundle))
}

/// Partial handshake, accepting side: the re-key requester installs the
/// offered cipher as its new decryptor.
pub fn partial_accept(
    identity: &RsaIdentity,
    bundle: &[u8],
    compress: bool,
) -> Result<BlockCipher, HandshakeError> {
    decode_bundle(identity, bundle, compress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Condvar, Mutex};

    const TEST_BITS: usize = 2048;

    /// One direction of an in-memory duplex: a blocking byte queue.
    #[derive(Clone, Default)]
    struct Pipe {
        inner: Arc<(Mutex<VecDeque<u8>>, Condvar)>,
    }

    impl Pipe {
        fn push(&self, bytes: &[u8]) {
            let (lock, cvar) = &*self.inner;
            lock.lock().unwrap().extend(bytes.iter().copied());
            cvar.notify_all();
        }

        fn pull(&self, buf: &mut [u8]) -> usize {
            let (lock, cvar) = &*self.inner;
            let mut queue = lock.lock().unwrap();
            while queue.is_empty() {
                queue = cvar.wait(queue).unwrap();
            }
            let n = buf.len().min(queue.len());
            for slot in buf.iter_mut().take(n) {
                *slot = queue.pop_front().unwrap();
            }
            n
        }
    }

    /// In-memory bidirectional stream for driving both handshake sides.
    struct Duplex {
        rx: Pipe,
        tx: Pipe,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            Ok(self.rx.pull(buf))
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.tx.push(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn duplex_pair() -> (Duplex, Duplex) {
        let a_to_b = Pipe::default();
        let b_to_a = Pipe::default();
        (
            Duplex {
                rx: b_to_a.clone(),
                tx: a_to_b.clone(),
            },
            Duplex {
                rx: a_to_b,
                tx: b_to_a,
            },
        )
    }

    fn run_full_pair() -> (SessionCiphers, SessionCiphers) {
        let (mut side_a, mut side_b) = duplex_pair();

        let handle = std::thread::spawn(move || {
            let identity = RsaIdentity::generate_with_bits(TEST_BITS).unwrap();
            Handshake::new(&mut side_b, &identity).full().unwrap()
        });

        let identity = RsaIdentity::generate_with_bits(TEST_BITS).unwrap();
        let a = Handshake::new(&mut side_a, &identity).full().unwrap();
        let b = handle.join().unwrap();
        (a, b)
    }

    #[test]
    fn full_handshake_converges() {
        let (a, b) = run_full_pair();

        // A's encryptor pairs with B's decryptor and vice versa.
        let ct = a.encryptor.encrypt(b"from a to b").unwrap();
        assert_eq!(b.decryptor.decrypt(&ct).unwrap(), b"from a to b");

        let ct = b.encryptor.encrypt(b"from b to a").unwrap();
        assert_eq!(a.decryptor.decrypt(&ct).unwrap(), b"from b to a");

        // The two directions are independently keyed.
        assert_ne!(a.encryptor.key(), b.encryptor.key());
    }

    #[test]
    fn partial_refresh_rekeys_one_direction() {
        let (a, b) = run_full_pair();

        // B offers a fresh cipher for its outgoing direction; A (the
        // requester) installs it as its new decryptor.
        let identity_a = RsaIdentity::generate_with_bits(TEST_BITS).unwrap();
        let (new_b_encryptor, bundle) = partial_offer(&identity_a.public_key(), false).unwrap();
        let new_a_decryptor = partial_accept(&identity_a, &bundle, false).unwrap();

        assert_ne!(new_b_encryptor.key(), b.encryptor.key());
        let ct = new_b_encryptor.encrypt(b"refreshed direction").unwrap();
        assert_eq!(
            new_a_decryptor.decrypt(&ct).unwrap(),
            b"refreshed direction"
        );

        // The opposite direction is untouched.
        let ct = a.encryptor.encrypt(b"old direction").unwrap();
        assert_eq!(b.decryptor.decrypt(&ct).unwrap(), b"old direction");
    }

    #[test]
    fn bundle_rejects_tampering() {
        let identity = RsaIdentity::generate_with_bits(TEST_BITS).unwrap();
        let (_, mut bundle) = partial_offer(&identity.public_key(), false).unwrap();
        // Corrupt a ciphertext byte inside the first base64 string.
        bundle[20] = bundle[20].wrapping_add(1);
        assert!(partial_accept(&identity, &bundle, false).is_err());

        assert!(matches!(
            partial_accept(&identity, &[1, 2, 3], false),
            Err(HandshakeError::BadBundle(_))
        ));
    }
}
