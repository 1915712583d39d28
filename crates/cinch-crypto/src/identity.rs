//! RSA identity keys with chunked encrypt-to-text.
//!
//! Each endpoint owns one long-lived RSA key pair used to protect
//! session-key bundles during the handshake. Generation at the default
//! 4096-bit modulus is expensive; callers are expected to pre-warm via
//! [`RsaIdentity::load_or_generate`] before latency-sensitive use.
//!
//! Payloads larger than one OAEP block are split into chunks, each
//! encrypted independently, the ciphertexts concatenated and base64
//! encoded. The chunk capacity is `(modulus_bits - 384) / 8 + 6` bytes,
//! which is exactly the OAEP-SHA1 payload bound for the modulus.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rsa::pkcs1::{
    DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding,
};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use tracing::{debug, info};

use crate::keystore::KeyStore;

/// Default modulus size for generated identities.
pub const RSA_BITS: usize = 4096;

/// A long-lived RSA identity: private key plus derived public key.
pub struct RsaIdentity {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl RsaIdentity {
    /// Generate a fresh identity at the default modulus size.
    ///
    /// Expensive; prefer [`RsaIdentity::load_or_generate`].
    pub fn generate() -> Result<Self> {
        Self::generate_with_bits(RSA_BITS)
    }

    /// Generate a fresh identity at an explicit modulus size.
    pub fn generate_with_bits(bits: usize) -> Result<Self> {
        info!(bits, "generating RSA identity key pair");
        let private =
            RsaPrivateKey::new(&mut OsRng, bits).context("RSA key generation failed")?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Load the named identity from the store, generating and persisting
    /// a new one on first use.
    pub fn load_or_generate(store: &dyn KeyStore, name: &str) -> Result<Self> {
        if let Some(pem) = store.load(name)? {
            debug!(name, "loaded identity from key store");
            return Self::from_private_pem(&pem);
        }

        let identity = Self::generate()?;
        store.save(name, identity.private_key_pem()?.as_str())?;
        debug!(name, "generated and stored new identity");
        Ok(identity)
    }

    /// Restore an identity from a PKCS#1 PEM private key.
    pub fn from_private_pem(pem: &str) -> Result<Self> {
        let private =
            RsaPrivateKey::from_pkcs1_pem(pem).context("invalid RSA private key PEM")?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Export the private key as PKCS#1 PEM (zeroized on drop).
    pub fn private_key_pem(&self) -> Result<zeroize::Zeroizing<String>> {
        self.private
            .to_pkcs1_pem(LineEnding::LF)
            .context("failed to encode private key")
    }

    /// Export the public key as a PKCS#1 PEM string for the wire.
    pub fn public_key_pem(&self) -> Result<String> {
        self.public
            .to_pkcs1_pem(LineEnding::LF)
            .context("failed to encode public key")
    }

    /// The public-only view of this identity.
    pub fn public_key(&self) -> RemotePublicKey {
        RemotePublicKey {
            public: self.public.clone(),
        }
    }

    /// Encrypt to a base64 string under this identity's own public key.
    pub fn encrypt_to_base64(&self, data: &[u8]) -> Result<String> {
        encrypt_chunked(&self.public, data)
    }

    /// Decrypt a base64 string produced by [`RemotePublicKey::encrypt_to_base64`]
    /// against this identity's public key.
    ///
    /// # Errors
    /// Malformed base64, ciphertext that is not a whole number of
    /// modulus-sized chunks, and OAEP failures all surface as errors;
    /// there is no silent fallback.
    pub fn decrypt_base64(&self, encoded: &str) -> Result<Vec<u8>> {
        let ciphertext = BASE64
            .decode(encoded)
            .context("invalid base64 ciphertext")?;

        let chunk_len = self.public.size();
        if ciphertext.is_empty() || ciphertext.len() % chunk_len != 0 {
            anyhow::bail!(
                "ciphertext length {} is not a multiple of the {}-byte modulus",
                ciphertext.len(),
                chunk_len
            );
        }

        let mut plaintext = Vec::new();
        for chunk in ciphertext.chunks(chunk_len) {
            let part = self
                .private
                .decrypt(Oaep::new::<Sha1>(), chunk)
                .context("OAEP decryption failed")?;
            plaintext.extend_from_slice(&part);
        }
        Ok(plaintext)
    }
}

impl std::fmt::Debug for RsaIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaIdentity")
            .field("modulus_bits", &(self.public.size() * 8))
            .finish_non_exhaustive()
    }
}

/// A peer's public key, constructed from its exported text form.
///
/// Supports encryption to the peer without ever holding a private key.
#[derive(Clone)]
pub struct RemotePublicKey {
    public: RsaPublicKey,
}

impl RemotePublicKey {
    /// Parse a PKCS#1 PEM public key received from the peer.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let public = RsaPublicKey::from_pkcs1_pem(pem).context("invalid RSA public key PEM")?;
        Ok(Self { public })
    }

    /// Export back to the PEM wire form.
    pub fn to_pem(&self) -> Result<String> {
        self.public
            .to_pkcs1_pem(LineEnding::LF)
            .context("failed to encode public key")
    }

    /// Encrypt to a base64 string under the peer's public key.
    pub fn encrypt_to_base64(&self, data: &[u8]) -> Result<String> {
        encrypt_chunked(&self.public, data)
    }
}

impl std::fmt::Debug for RemotePublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePublicKey")
            .field("modulus_bits", &(self.public.size() * 8))
            .finish()
    }
}

/// Largest plaintext chunk one OAEP block can carry for this modulus.
fn chunk_capacity(public: &RsaPublicKey) -> usize {
    let modulus_bits = public.size() * 8;
    (modulus_bits - 384) / 8 + 6
}

fn encrypt_chunked(public: &RsaPublicKey, data: &[u8]) -> Result<String> {
    let capacity = chunk_capacity(public);
    let mut ciphertext = Vec::new();

    // chunks() yields nothing for empty input, but an empty payload must
    // still round-trip as one (empty) OAEP block.
    let chunks: Box<dyn Iterator<Item = &[u8]>> = if data.is_empty() {
        Box::new(std::iter::once(&data[0..0]))
    } else {
        Box::new(data.chunks(capacity))
    };

    for chunk in chunks {
        let part = public
            .encrypt(&mut OsRng, Oaep::new::<Sha1>(), chunk)
            .context("OAEP encryption failed")?;
        ciphertext.extend_from_slice(&part);
    }
    Ok(BASE64.encode(ciphertext))
}
