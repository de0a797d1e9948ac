//! Administrator key pair.
//!
//! X25519 static keys. The secret half lives only on admin nodes; everyone
//! else holds at most the public half, distributed out of band. Keys travel
//! and persist as base64 strings.

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{error::CryptoError, PUBLIC_KEY_LEN};

/// Public half of an administrator key pair.
#[derive(Clone)]
pub struct AdminPublicKey(pub(crate) PublicKey);

/// Secret half of an administrator key pair. Zeroized on drop by the
/// underlying `StaticSecret`.
#[derive(Clone)]
pub struct AdminSecretKey(pub(crate) StaticSecret);

/// A complete administrator key pair.
#[derive(Clone)]
pub struct AdminKeyPair {
    /// Public half, safe to publish.
    pub public: AdminPublicKey,
    /// Secret half, admin nodes only.
    pub secret: AdminSecretKey,
}

impl AdminKeyPair {
    /// Generate a fresh key pair from the OS RNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { public: AdminPublicKey(public), secret: AdminSecretKey(secret) }
    }

    /// Reconstruct a key pair from its persisted base64 halves.
    pub fn from_base64(public: &str, secret: &str) -> Result<Self, CryptoError> {
        Ok(Self {
            public: AdminPublicKey::from_base64(public)?,
            secret: AdminSecretKey::from_base64(secret)?,
        })
    }
}

impl AdminPublicKey {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        self.0.as_bytes()
    }

    /// Base64 form for persistence and publication.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0.as_bytes())
    }

    /// Parse from the persisted base64 form.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = decode_32(encoded)?;
        Ok(Self(PublicKey::from(bytes)))
    }
}

impl AdminSecretKey {
    /// Base64 form for persistence. Never log this.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0.to_bytes())
    }

    /// Parse from the persisted base64 form.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = decode_32(encoded)?;
        Ok(Self(StaticSecret::from(bytes)))
    }

    /// Public key corresponding to this secret.
    pub fn public(&self) -> AdminPublicKey {
        AdminPublicKey(PublicKey::from(&self.0))
    }
}

impl std::fmt::Debug for AdminPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AdminPublicKey({})", self.to_base64())
    }
}

impl std::fmt::Debug for AdminSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminSecretKey(..)")
    }
}

fn decode_32(encoded: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = STANDARD.decode(encoded)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidLength { expected: 32, got: len })
}
