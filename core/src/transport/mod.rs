// Transport layer — how the node reaches nearby peers
//
// The Transport trait is the session seam of the node: advertise/browse,
// invite, reliable delivery, plus a stream of typed events the node drains
// on its single event loop. Two implementations live here: the LAN transport
// over a libp2p swarm and an in-process transport for demos and tests.

mod behaviour;
mod lan;
mod memory;

pub use lan::{start_lan_transport, LanTransport};
pub use memory::{MemoryHub, MemoryTransport};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use libp2p::PeerId;
use thiserror::Error;

use crate::peer::SessionState;

/// Events from the transport layer to the node
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Browsing noticed a peer advertising our service
    PeerDiscovered { peer: PeerId },
    /// Browsing stopped seeing the peer
    PeerLost { peer: PeerId },
    /// The identify exchange confirmed the peer and supplied its display name
    PeerIdentified { peer: PeerId, display_name: String },
    /// The session with a peer changed state
    SessionStateChanged { peer: PeerId, state: SessionState },
    /// An outgoing invitation gave up
    InviteFailed { peer: PeerId, reason: String },
    /// Reliable payload arrived from a connected peer
    DataReceived { peer: PeerId, payload: Vec<u8> },
    /// Peer offered a byte stream; the node does not consume streams
    StreamOffered { peer: PeerId, name: String },
    /// Peer offered a resource transfer; the node does not consume resources
    ResourceOffered { peer: PeerId, name: String },
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::PeerDiscovered { peer } => {
                write!(f, "PeerDiscovered {{ peer: {peer} }}")
            }
            TransportEvent::PeerLost { peer } => write!(f, "PeerLost {{ peer: {peer} }}"),
            TransportEvent::PeerIdentified { peer, display_name } => {
                write!(f, "PeerIdentified {{ peer: {peer}, display_name: {display_name} }}")
            }
            TransportEvent::SessionStateChanged { peer, state } => {
                write!(f, "SessionStateChanged {{ peer: {peer}, state: {state:?} }}")
            }
            TransportEvent::InviteFailed { peer, reason } => {
                write!(f, "InviteFailed {{ peer: {peer}, reason: {reason} }}")
            }
            TransportEvent::DataReceived { peer, payload } => {
                write!(f, "DataReceived {{ peer: {peer}, payload_len: {} }}", payload.len())
            }
            TransportEvent::StreamOffered { peer, name } => {
                write!(f, "StreamOffered {{ peer: {peer}, name: {name} }}")
            }
            TransportEvent::ResourceOffered { peer, name } => {
                write!(f, "ResourceOffered {{ peer: {peer}, name: {name} }}")
            }
        }
    }
}

/// Errors that can occur in the transport layer
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Advertising failed: {0}")]
    AdvertisingFailed(String),

    #[error("Browsing failed: {0}")]
    BrowsingFailed(String),

    #[error("Invite failed: {0}")]
    InviteFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transport shut down")]
    ShutDown,
}

/// The encrypted point-to-point session transport the node pairs over
///
/// Implementations own their network machinery and surface everything that
/// happens as TransportEvents on the channel handed over at construction.
/// Calls are fire-and-forget where the underlying operation completes
/// asynchronously; failures after the call surface as events or log lines.
#[async_trait]
pub trait Transport: Send + Sync {
    /// This node's identifier on the transport
    fn local_peer_id(&self) -> PeerId;

    /// Start advertising presence under the service identifier
    async fn start_advertising(&self) -> Result<(), TransportError>;

    /// Stop advertising
    async fn stop_advertising(&self) -> Result<(), TransportError>;

    /// Start browsing for peers advertising the service identifier
    async fn start_browsing(&self) -> Result<(), TransportError>;

    /// Stop browsing
    async fn stop_browsing(&self) -> Result<(), TransportError>;

    /// Invite a discovered peer to a session, giving up after `timeout`
    async fn invite(&self, peer: PeerId, timeout: Duration) -> Result<(), TransportError>;

    /// Reliably deliver a payload to the given connected peers
    async fn send(&self, payload: Vec<u8>, peers: &[PeerId]) -> Result<(), TransportError>;

    /// Tear down sessions and stop all network activity
    async fn shutdown(&self) -> Result<(), TransportError>;
}
