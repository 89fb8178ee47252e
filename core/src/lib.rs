// Nearwave core — nearby peer pairing and ranging
//
// "Can two devices on the same network find each other, pair, and
//  tell how far apart they are?"
//
// Everything in this crate serves that question.

pub mod config;
pub mod identity;
pub mod node;
pub mod peer;
pub mod ranging;
pub mod store;
pub mod token;
pub mod transport;

use thiserror::Error;

pub use config::{ConfigError, NodeConfig};
pub use identity::DeviceIdentity;
pub use node::{NearwaveNode, NodeEvent};
pub use peer::{PeerPhase, PeerRoster, SessionState};
pub use ranging::{
    NearbyReading, RangingError, RangingProvider, RangingReading, Readout, SimulatedRanging,
    UnsupportedRanging,
};
pub use store::{MemoryStorage, SledStorage, StorageBackend};
pub use token::CapabilityToken;
pub use transport::{
    start_lan_transport, LanTransport, MemoryHub, MemoryTransport, Transport, TransportError,
    TransportEvent,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error)]
pub enum NearwaveError {
    #[error("Node already started")]
    AlreadyRunning,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

// ============================================================================
// LOGGING
// ============================================================================

/// Initialize tracing (idempotent). Binaries that want a different
/// subscriber should install it before touching the crate.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}
