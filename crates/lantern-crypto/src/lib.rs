//! Cryptographic envelope scheme for end-to-end messages.
//!
//! A sender seals a plaintext under a fresh 256-bit session key and wraps
//! that session key to the administrator's X25519 public key with an
//! ephemeral-static key agreement. The two outputs travel independently
//! through the mesh (ciphertext on the message path, wrapped key on the key
//! path) and are joined again only on an admin node.
//!
//! One primitive pair is used and advertised: X25519 for the key agreement
//! and XChaCha20-Poly1305 for both the payload and the key wrap. The wrap key
//! is derived from the raw shared secret with HKDF-SHA256.
//!
//! Wire forms (both base64, standard alphabet with padding):
//!
//! ```text
//! payload    = b64( nonce (24) | ciphertext + tag )
//! wrappedKey = b64( ephemeral pub (32) | nonce (24) | box(session key) + tag )
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod keys;
mod sealed;

pub use error::CryptoError;
pub use keys::{AdminKeyPair, AdminPublicKey, AdminSecretKey};
pub use sealed::{open_payload, seal, unwrap_session_key, SealedMessage, SessionKey};

/// Advertised KEM + AEAD pair. This tag is honest: the implementation is
/// exactly what it names.
pub const ALGORITHM: &str = "x25519+xchacha20-poly1305";

/// X25519 public key length in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// XChaCha20-Poly1305 nonce length in bytes.
pub const NONCE_LEN: usize = 24;

/// Poly1305 authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Session key length in bytes.
pub const SESSION_KEY_LEN: usize = 32;

/// Exact length of a decoded `wrappedKey` blob: ephemeral public key, nonce,
/// and the sealed 32-byte session key with its tag.
pub const WRAPPED_KEY_LEN: usize = PUBLIC_KEY_LEN + NONCE_LEN + SESSION_KEY_LEN + TAG_LEN;

/// Minimum length of a decoded `payload` blob: nonce plus an empty
/// ciphertext's tag.
pub const MIN_PAYLOAD_LEN: usize = NONCE_LEN + TAG_LEN;
