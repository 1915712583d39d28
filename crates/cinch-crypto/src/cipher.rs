//! AES-256-CBC session cipher with length-embedding padding.
//!
//! One [`BlockCipher`] instance owns the key material for exactly one
//! traffic direction; the handshake creates an independent pair per peer.
//!
//! # Buffer layout
//!
//! ```text
//! [plaintext length (4 bytes LE)][plaintext][random padding]
//! ```
//!
//! The whole buffer is padded to a multiple of the block size and
//! CBC-encrypted as one unit. The four length bytes are always present,
//! so even an already block-aligned plaintext grows by at least one
//! block worth of reserved space, and the padding is random rather than
//! structured — decrypted garbage never reveals payload boundaries.
//!
//! # Key scrubbing
//!
//! [`KeyMaterial`] zeroes itself on drop. The arrays a caller hands to
//! [`BlockCipher::new`] are overwritten with fresh random bytes before
//! the constructor returns, so the only live copy of the key afterwards
//! is the one inside the provider.

use std::io::{Read, Write};

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Cipher block size in bytes; frames and encrypted buffers are always
/// a multiple of this.
pub const BLOCK_SIZE: usize = 16;

/// AES-256 key length in bytes.
pub const KEY_SIZE: usize = 32;

/// CBC initialization vector length in bytes.
pub const IV_SIZE: usize = 16;

/// Symmetric cipher errors.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("ciphertext length {0} is not a block multiple")]
    NotAligned(usize),
    #[error("embedded length {declared} exceeds buffer capacity {capacity}")]
    BadLengthPrefix { declared: usize, capacity: usize },
    #[error("cipher transform failed")]
    Transform,
    #[error("compression failed: {0}")]
    Compression(String),
}

/// Key and IV for one cipher direction. Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    key: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        write!(f, "KeyMaterial([REDACTED])")
    }
}

/// Symmetric session cipher provider for one traffic direction.
#[derive(Clone)]
pub struct BlockCipher {
    material: KeyMaterial,
    compress: bool,
}

impl BlockCipher {
    /// Create a provider with freshly generated random key material.
    pub fn random() -> Self {
        let mut key = [0u8; KEY_SIZE];
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        Self {
            material: KeyMaterial { key, iv },
            compress: false,
        }
    }

    /// Create a provider from explicit key material.
    ///
    /// The caller's arrays are scrubbed with fresh random bytes before
    /// this returns; the provider holds the only remaining copy.
    pub fn new(key: &mut [u8; KEY_SIZE], iv: &mut [u8; IV_SIZE]) -> Self {
        let material = KeyMaterial { key: *key, iv: *iv };
        OsRng.fill_bytes(key);
        OsRng.fill_bytes(iv);
        Self {
            material,
            compress: false,
        }
    }

    /// Derive a provider deterministically from a password.
    ///
    /// The SHA-256 digest of the password is the key and its first 16
    /// bytes are the IV. Key and IV are therefore not independent; this
    /// matches the documented contract and is accepted as a weakening
    /// for the password path only.
    pub fn from_password(password: &str) -> Self {
        let digest: [u8; 32] = Sha256::digest(password.as_bytes()).into();
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&digest[..IV_SIZE]);
        Self {
            material: KeyMaterial { key: digest, iv },
            compress: false,
        }
    }

    /// Enable or disable the gzip compress-then-encrypt path.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Raw key bytes. Handle with care; never log.
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.material.key
    }

    /// Raw IV bytes.
    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.material.iv
    }

    /// Block size the output is aligned to.
    pub fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    /// Whether the compress-then-encrypt path is active.
    pub fn compression(&self) -> bool {
        self.compress
    }

    /// Encrypt a payload; output length is always a block multiple.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let body = if self.compress {
            gzip(plaintext)?
        } else {
            plaintext.to_vec()
        };

        let unpadded = 4 + body.len();
        let total = unpadded.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;

        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);
        if total > unpadded {
            let start = buf.len();
            buf.resize(total, 0);
            OsRng.fill_bytes(&mut buf[start..]);
        }

        let enc = Aes256CbcEnc::new_from_slices(&self.material.key, &self.material.iv)
            .map_err(|_| CipherError::Transform)?;
        enc.encrypt_padded_mut::<NoPadding>(&mut buf, total)
            .map_err(|_| CipherError::Transform)?;
        Ok(buf)
    }

    /// Decrypt a buffer produced by [`BlockCipher::encrypt`] on the
    /// matching provider.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CipherError::NotAligned(ciphertext.len()));
        }

        let mut buf = ciphertext.to_vec();
        let dec = Aes256CbcDec::new_from_slices(&self.material.key, &self.material.iv)
            .map_err(|_| CipherError::Transform)?;
        dec.decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| CipherError::Transform)?;

        let declared = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if declared > buf.len() - 4 {
            return Err(CipherError::BadLengthPrefix {
                declared,
                capacity: buf.len() - 4,
            });
        }

        let body = &buf[4..4 + declared];
        if self.compress {
            gunzip(body)
        } else {
            Ok(body.to_vec())
        }
    }
}

impl std::fmt::Debug for BlockCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCipher")
            .field("compress", &self.compress)
            .finish_non_exhaustive()
    }
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, CipherError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|()| encoder.finish())
        .map_err(|e| CipherError::Compression(e.to_string()))
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>, CipherError> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| CipherError::Compression(e.to_string()))?;
    Ok(out)
}
