//! Node identity: the persistent node id and optional admin key pair.

use lantern_core::Environment;
use lantern_crypto::{AdminKeyPair, AdminPublicKey, AdminSecretKey, CryptoError};
use lantern_proto::NodeId;
use serde::{Deserialize, Serialize};

/// Persistent identity of a node, created once at first start.
///
/// Presence of the key fields marks the node as an administrator. The key
/// halves are stored base64-encoded, matching their published form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeIdentity {
    /// Stable node identifier, hex.
    pub node_id: NodeId,
    /// Admin public key, base64. Present on admin nodes.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub admin_public_key: Option<String>,
    /// Admin secret key, base64. Present on admin nodes only.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub admin_private_key: Option<String>,
}

impl NodeIdentity {
    /// Mint a fresh non-admin identity.
    pub fn generate<E: Environment>(env: &E) -> Self {
        Self {
            node_id: NodeId::from_bits(env.random_u128()),
            admin_public_key: None,
            admin_private_key: None,
        }
    }

    /// Attach a freshly generated admin key pair. No-op if keys exist.
    pub fn ensure_admin_keys(&mut self) {
        if self.admin_private_key.is_some() {
            return;
        }
        let pair = AdminKeyPair::generate();
        self.admin_public_key = Some(pair.public.to_base64());
        self.admin_private_key = Some(pair.secret.to_base64());
    }

    /// True when this identity holds the admin secret.
    pub fn is_admin(&self) -> bool {
        self.admin_private_key.is_some()
    }

    /// Decoded admin public key, if present.
    pub fn admin_public(&self) -> Result<Option<AdminPublicKey>, CryptoError> {
        self.admin_public_key.as_deref().map(AdminPublicKey::from_base64).transpose()
    }

    /// Decoded admin secret key, if present.
    pub fn admin_secret(&self) -> Result<Option<AdminSecretKey>, CryptoError> {
        self.admin_private_key.as_deref().map(AdminSecretKey::from_base64).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SystemEnv;

    #[test]
    fn generate_is_not_admin() {
        let identity = NodeIdentity::generate(&SystemEnv::new());
        assert!(!identity.is_admin());
        assert!(identity.admin_secret().unwrap().is_none());
    }

    #[test]
    fn ensure_admin_keys_is_idempotent() {
        let mut identity = NodeIdentity::generate(&SystemEnv::new());
        identity.ensure_admin_keys();
        assert!(identity.is_admin());

        let first_pub = identity.admin_public_key.clone();
        identity.ensure_admin_keys();
        assert_eq!(identity.admin_public_key, first_pub);
    }

    #[test]
    fn keys_round_trip_through_base64() {
        let mut identity = NodeIdentity::generate(&SystemEnv::new());
        identity.ensure_admin_keys();

        let public = identity.admin_public().unwrap().unwrap();
        let secret = identity.admin_secret().unwrap().unwrap();
        assert_eq!(secret.public().as_bytes(), public.as_bytes());
    }

    #[test]
    fn serde_round_trip() {
        let mut identity = NodeIdentity::generate(&SystemEnv::new());
        identity.ensure_admin_keys();

        let json = serde_json::to_string(&identity).unwrap();
        let back: NodeIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, identity);
    }
}
