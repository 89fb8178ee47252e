// Combined NetworkBehaviour for the LAN transport
//
// Three protocols:
// - request_response: reliable capability-token delivery
// - mdns: advertise/browse on the LAN
// - identify: service confirmation + display-name exchange
//
// Every protocol name embeds the service identifier, so nodes of a
// different service never get past protocol negotiation.

use libp2p::{
    identify, mdns,
    request_response::{self, ProtocolSupport},
    swarm::behaviour::toggle::Toggle,
    swarm::NetworkBehaviour,
    StreamProtocol,
};
use std::time::Duration;

/// The pairing network behaviour
#[derive(NetworkBehaviour)]
pub struct PairingBehaviour {
    /// Reliable token delivery (request-response pattern)
    pub tokens: request_response::cbor::Behaviour<TokenPush, TokenAck>,
    /// LAN advertise/browse; disabled when the mDNS socket cannot be opened
    pub mdns: Toggle<mdns::tokio::Behaviour>,
    /// Peer identification
    pub identify: identify::Behaviour,
}

/// A capability-token frame pushed to a peer
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TokenPush {
    /// Encoded token frame bytes
    pub frame: Vec<u8>,
}

/// A response to a token push
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TokenAck {
    /// Whether the token was accepted
    pub accepted: bool,
    /// Optional error message
    pub error: Option<String>,
}

/// Identify protocol string peers must present to count as the same service
pub fn service_protocol(service_id: &str) -> String {
    format!("/{service_id}/pair/1.0.0")
}

impl PairingBehaviour {
    /// Create a new behaviour scoped to the given service identifier
    pub fn new(
        keypair: &libp2p::identity::Keypair,
        service_id: &str,
        display_name: &str,
    ) -> anyhow::Result<Self> {
        let peer_id = keypair.public().to_peer_id();

        // Request-response for token delivery
        let token_protocol = StreamProtocol::try_from_owned(format!("/{service_id}/token/1.0.0"))
            .map_err(|e| anyhow::anyhow!("Invalid token protocol name: {e}"))?;
        let tokens = request_response::cbor::Behaviour::new(
            [(token_protocol, ProtocolSupport::Full)],
            request_response::Config::default().with_request_timeout(Duration::from_secs(30)),
        );

        // mDNS for LAN advertise/browse. A node that cannot open the mDNS
        // socket still runs; it just never discovers anyone.
        let mdns = match mdns::tokio::Behaviour::new(mdns::Config::default(), peer_id) {
            Ok(behaviour) => Toggle::from(Some(behaviour)),
            Err(e) => {
                tracing::warn!("mDNS unavailable, LAN discovery disabled: {}", e);
                Toggle::from(None)
            }
        };

        // Identify protocol carries the service string and our display name
        let identify = identify::Behaviour::new(
            identify::Config::new(service_protocol(service_id), keypair.public())
                .with_agent_version(display_name.to_string())
                .with_interval(Duration::from_secs(60)),
        );

        Ok(Self {
            tokens,
            mdns,
            identify,
        })
    }
}
