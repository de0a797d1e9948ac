//! Seal and open operations for the dual-path envelope.
//!
//! `seal` is the sender side: it produces the two base64 blobs that become a
//! message envelope's `payload` and the paired key envelope's `wrappedKey`.
//! `unwrap_session_key` and `open_payload` are the admin side, run when both
//! halves have arrived.

use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

use crate::{
    error::CryptoError,
    keys::{AdminPublicKey, AdminSecretKey},
    MIN_PAYLOAD_LEN, NONCE_LEN, PUBLIC_KEY_LEN, SESSION_KEY_LEN, WRAPPED_KEY_LEN,
};

/// HKDF domain separation for the key-wrap derivation.
const WRAP_INFO: &[u8] = b"lantern-key-wrap-v1";

/// A session key, zeroized when dropped.
pub type SessionKey = Zeroizing<[u8; SESSION_KEY_LEN]>;

/// The two halves produced by [`seal`], ready for their envelopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    /// base64(nonce | ciphertext + tag) — message-path payload.
    pub payload: String,
    /// base64(ephemeral pub | nonce | box(session key) + tag) — key-path blob.
    pub wrapped_key: String,
}

/// Seal a plaintext to the administrator.
///
/// Generates a fresh session key, encrypts the plaintext under it, then wraps
/// the session key to `admin` with an ephemeral X25519 key agreement. The
/// session key never leaves this function unencrypted.
pub fn seal(plaintext: &[u8], admin: &AdminPublicKey) -> Result<SealedMessage, CryptoError> {
    let mut session_key: SessionKey = Zeroizing::new([0u8; SESSION_KEY_LEN]);
    OsRng.fill_bytes(session_key.as_mut_slice());

    let payload = seal_with(&session_key, plaintext)?;

    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_pub = PublicKey::from(&ephemeral);
    let wrap_key = derive_wrap_key(ephemeral.diffie_hellman(&admin.0).as_bytes());

    let boxed = seal_with(&wrap_key, session_key.as_ref())?;

    let mut wrapped = Vec::with_capacity(WRAPPED_KEY_LEN);
    wrapped.extend_from_slice(ephemeral_pub.as_bytes());
    wrapped.extend_from_slice(&boxed);

    Ok(SealedMessage {
        payload: STANDARD.encode(payload),
        wrapped_key: STANDARD.encode(wrapped),
    })
}

/// Recover the session key from a `wrappedKey` blob using the admin secret.
///
/// Length prefixes are checked exactly: the decoded blob must be an X25519
/// public key, a nonce, and a sealed 32-byte key, nothing more or less.
pub fn unwrap_session_key(
    wrapped_key: &str,
    secret: &AdminSecretKey,
) -> Result<SessionKey, CryptoError> {
    let blob = STANDARD.decode(wrapped_key)?;
    if blob.len() != WRAPPED_KEY_LEN {
        return Err(CryptoError::InvalidLength { expected: WRAPPED_KEY_LEN, got: blob.len() });
    }

    let (pub_bytes, boxed) = blob.split_at(PUBLIC_KEY_LEN);
    let ephemeral_pub = PublicKey::from(
        <[u8; PUBLIC_KEY_LEN]>::try_from(pub_bytes)
            .map_err(|_| CryptoError::InvalidKey("ephemeral public key".into()))?,
    );

    let wrap_key = derive_wrap_key(secret.0.diffie_hellman(&ephemeral_pub).as_bytes());
    let key_bytes = open_with(&wrap_key, boxed)?;

    if key_bytes.len() != SESSION_KEY_LEN {
        return Err(CryptoError::InvalidLength {
            expected: SESSION_KEY_LEN,
            got: key_bytes.len(),
        });
    }

    let mut session_key: SessionKey = Zeroizing::new([0u8; SESSION_KEY_LEN]);
    session_key.copy_from_slice(&key_bytes);
    Ok(session_key)
}

/// Open a message-path `payload` blob with a recovered session key.
pub fn open_payload(payload: &str, session_key: &SessionKey) -> Result<Vec<u8>, CryptoError> {
    let blob = STANDARD.decode(payload)?;
    if blob.len() < MIN_PAYLOAD_LEN {
        return Err(CryptoError::InvalidLength { expected: MIN_PAYLOAD_LEN, got: blob.len() });
    }
    open_with(session_key, &blob).map(|plain| plain.to_vec())
}

/// Encrypt with a random nonce, producing `nonce | ciphertext + tag`.
fn seal_with(key: &Zeroizing<[u8; 32]>, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        XChaCha20Poly1305::new_from_slice(key.as_ref()).map_err(|_| CryptoError::Seal)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);

    let ciphertext = cipher.encrypt(&nonce, plaintext).map_err(|_| CryptoError::Seal)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt `nonce | ciphertext + tag`.
fn open_with(key: &Zeroizing<[u8; 32]>, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if blob.len() < MIN_PAYLOAD_LEN {
        return Err(CryptoError::Open);
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let nonce = XNonce::from_slice(nonce_bytes);

    let cipher =
        XChaCha20Poly1305::new_from_slice(key.as_ref()).map_err(|_| CryptoError::Open)?;

    let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|_| CryptoError::Open)?;
    Ok(Zeroizing::new(plaintext))
}

/// Run the raw shared secret through HKDF-SHA256 to get the wrap key.
fn derive_wrap_key(shared: &[u8; 32]) -> Zeroizing<[u8; 32]> {
    let hkdf = Hkdf::<Sha256>::new(None, shared);
    let mut okm = Zeroizing::new([0u8; 32]);

    // Expand cannot fail for a 32-byte output with SHA-256.
    #[allow(clippy::expect_used)]
    hkdf.expand(WRAP_INFO, okm.as_mut_slice())
        .expect("invariant: 32-byte HKDF output is within expansion bounds");

    okm
}
