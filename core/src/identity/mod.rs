// Device identity - persisted UUID plus network keypair

mod keys;

pub use keys::NetworkKeys;

use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use crate::store::StorageBackend;

const DEVICE_ID_KEY: &[u8] = b"device_id";
const NETWORK_KEYS_KEY: &[u8] = b"network_keys";

/// The node's persistent identity
///
/// Two pieces, both created lazily on first run and reused afterwards:
/// a UUID that names this device to humans (it doubles as the default
/// display name) and an Ed25519 keypair the transport derives its PeerId
/// from. Either piece is regenerated if its stored bytes are missing or
/// unreadable; regeneration of one never touches the other.
pub struct DeviceIdentity {
    device_id: Uuid,
    keys: NetworkKeys,
}

impl DeviceIdentity {
    /// Load identity from storage, generating and persisting any missing piece
    pub fn load_or_generate(store: &Arc<dyn StorageBackend>) -> Result<Self> {
        let device_id = match Self::load_device_id(store) {
            Some(id) => {
                tracing::info!("🔑 Loaded device identity {}", id);
                id
            }
            None => {
                let id = Uuid::new_v4();
                store
                    .put(DEVICE_ID_KEY, id.to_string().as_bytes())
                    .map_err(|e| anyhow::anyhow!(e))?;
                tracing::info!("🔑 Generated new device identity {}", id);
                id
            }
        };

        let keys = match Self::load_keys(store) {
            Some(keys) => {
                tracing::info!("🔑 Loaded network keys {}", keys.fingerprint());
                keys
            }
            None => {
                let keys = NetworkKeys::generate();
                store
                    .put(NETWORK_KEYS_KEY, &keys.to_bytes())
                    .map_err(|e| anyhow::anyhow!(e))?;
                tracing::info!("🔑 Generated new network keys {}", keys.fingerprint());
                keys
            }
        };

        store.flush().map_err(|e| anyhow::anyhow!(e))?;

        Ok(Self { device_id, keys })
    }

    fn load_device_id(store: &Arc<dyn StorageBackend>) -> Option<Uuid> {
        let bytes = match store.get(DEVICE_ID_KEY) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Device id read failed, regenerating: {}", e);
                return None;
            }
        };

        match std::str::from_utf8(&bytes).ok().and_then(|s| Uuid::parse_str(s).ok()) {
            Some(id) => Some(id),
            None => {
                tracing::warn!("Stored device id unreadable, regenerating");
                None
            }
        }
    }

    fn load_keys(store: &Arc<dyn StorageBackend>) -> Option<NetworkKeys> {
        let bytes = match store.get(NETWORK_KEYS_KEY) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Network keys read failed, regenerating: {}", e);
                return None;
            }
        };

        match NetworkKeys::from_bytes(&bytes) {
            Ok(keys) => Some(keys),
            Err(e) => {
                tracing::warn!("Stored network keys unreadable, regenerating: {}", e);
                None
            }
        }
    }

    /// The persisted device UUID
    pub fn device_id(&self) -> Uuid {
        self.device_id
    }

    /// Network keys backing the transport identity
    pub fn keys(&self) -> &NetworkKeys {
        &self.keys
    }

    /// libp2p keypair derived from the network keys
    pub fn libp2p_keypair(&self) -> Result<libp2p::identity::Keypair> {
        self.keys.to_libp2p_keypair()
    }
}
