// Network keypair management

use anyhow::Result;
use ed25519_dalek::SigningKey;
use zeroize::{Zeroize, Zeroizing};

/// Ed25519 keypair backing the node's network identity
///
/// The transport derives its peer identifier from this keypair, so persisting
/// it keeps the node addressable under the same PeerId across launches.
#[derive(Clone)]
pub struct NetworkKeys {
    pub signing_key: SigningKey,
}

impl NetworkKeys {
    /// Generate new network keys
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut secret_key_bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut secret_key_bytes);
        let signing_key = SigningKey::from_bytes(&secret_key_bytes);
        secret_key_bytes.zeroize();
        Self { signing_key }
    }

    /// Get public key as hex
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Short fingerprint (Blake3 of public key) for log lines
    pub fn fingerprint(&self) -> String {
        let public_key = self.signing_key.verifying_key().to_bytes();
        let hash = blake3::hash(&public_key);
        hex::encode(&hash.as_bytes()[..8])
    }

    /// Serialize keys to bytes.
    /// Returns a `Zeroizing<Vec<u8>>` that automatically wipes secret key material on drop.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.signing_key.to_bytes().to_vec())
    }

    /// Deserialize keys from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let signing_key = SigningKey::from_bytes(
            bytes
                .try_into()
                .map_err(|_| anyhow::anyhow!("Invalid key bytes"))?,
        );
        Ok(Self { signing_key })
    }

    /// Convert to a libp2p keypair so the swarm's PeerId is derived from
    /// the same Ed25519 secret
    pub fn to_libp2p_keypair(&self) -> Result<libp2p::identity::Keypair> {
        let secret = self.signing_key.to_bytes();
        libp2p::identity::Keypair::ed25519_from_bytes(secret)
            .map_err(|e| anyhow::anyhow!("Failed to derive libp2p keypair: {e}"))
    }
}
