// Capability tokens — opaque ranging credentials and their wire frame

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Maximum token blob size: 4 KB
/// Hardware discovery tokens are small; the cap stops oversized garbage
/// from a hostile peer before deserialization.
pub const MAX_TOKEN_SIZE: usize = 4 * 1024;

/// Maximum encoded frame size
pub const MAX_FRAME_SIZE: usize = 8 * 1024;

/// Wire frame version, bumped if the token container format ever changes
pub const TOKEN_FRAME_VERSION: u8 = 1;

/// An opaque ranging-capability token
///
/// Produced by a ranging provider and consumed only by a ranging provider.
/// The node never interprets the blob; it moves it between peers intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityToken {
    blob: Vec<u8>,
}

impl CapabilityToken {
    /// Wrap raw provider bytes as a token
    pub fn from_bytes(blob: Vec<u8>) -> Result<Self> {
        if blob.is_empty() {
            bail!("Empty capability token");
        }
        if blob.len() > MAX_TOKEN_SIZE {
            bail!(
                "Capability token too large: {} bytes (max {})",
                blob.len(),
                MAX_TOKEN_SIZE
            );
        }
        Ok(Self { blob })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.blob
    }

    pub fn len(&self) -> usize {
        self.blob.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blob.is_empty()
    }

    /// Short Blake3 fingerprint for log lines; token contents never appear in logs
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.blob);
        hex::encode(&hash.as_bytes()[..8])
    }
}

/// The container that actually goes on the wire
#[derive(Serialize, Deserialize)]
struct TokenFrame {
    version: u8,
    blob: Vec<u8>,
}

/// Serialize a token for transmission
pub fn encode_token(token: &CapabilityToken) -> Result<Vec<u8>> {
    let frame = TokenFrame {
        version: TOKEN_FRAME_VERSION,
        blob: token.blob.clone(),
    };

    let bytes = bincode::serialize(&frame)?;

    if bytes.len() > MAX_FRAME_SIZE {
        bail!(
            "Encoded token frame too large: {} bytes (max {})",
            bytes.len(),
            MAX_FRAME_SIZE
        );
    }

    Ok(bytes)
}

/// Deserialize a received payload into a token
pub fn decode_token(bytes: &[u8]) -> Result<CapabilityToken> {
    if bytes.len() > MAX_FRAME_SIZE {
        bail!(
            "Token frame too large: {} bytes (max {})",
            bytes.len(),
            MAX_FRAME_SIZE
        );
    }

    let frame: TokenFrame = bincode::deserialize(bytes)?;

    if frame.version != TOKEN_FRAME_VERSION {
        bail!(
            "Unsupported token frame version {} (expected {})",
            frame.version,
            TOKEN_FRAME_VERSION
        );
    }

    CapabilityToken::from_bytes(frame.blob)
}
