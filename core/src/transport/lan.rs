// LAN transport — the libp2p swarm task behind the Transport trait
//
// Advertising maps to a TCP listener (mDNS only announces addresses we
// actually listen on) and browsing gates whether mDNS sightings are
// surfaced. An invite is a dial with a deadline. A session only reaches
// Connected once identify has confirmed the peer runs the same service
// identifier.

use super::behaviour::{
    service_protocol, PairingBehaviour, PairingBehaviourEvent, TokenAck, TokenPush,
};
use super::{Transport, TransportError, TransportEvent};
use crate::config::NodeConfig;
use crate::peer::SessionState;
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use libp2p::core::transport::ListenerId;
use libp2p::swarm::dial_opts::{DialOpts, PeerCondition};
use libp2p::swarm::{DialError, SwarmEvent};
use libp2p::{identify, mdns, multiaddr::Protocol, request_response, Multiaddr, PeerId};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant};

/// How often pending invites are checked against their deadline
const INVITE_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Commands that can be sent to the transport task
#[derive(Debug)]
pub enum LanCommand {
    /// Open the TCP listener so mDNS starts announcing us
    StartAdvertising {
        reply: mpsc::Sender<Result<(), String>>,
    },
    /// Close the listener
    StopAdvertising {
        reply: mpsc::Sender<Result<(), String>>,
    },
    /// Surface mDNS sightings as discovery events
    StartBrowsing {
        reply: mpsc::Sender<Result<(), String>>,
    },
    /// Stop surfacing discovery events
    StopBrowsing {
        reply: mpsc::Sender<Result<(), String>>,
    },
    /// Dial a discovered peer, giving up after `timeout`
    Invite {
        peer: PeerId,
        timeout: Duration,
        reply: mpsc::Sender<Result<(), String>>,
    },
    /// Deliver a payload to the given peers
    Send {
        payload: Vec<u8>,
        peers: Vec<PeerId>,
        reply: mpsc::Sender<Result<(), String>>,
    },
    /// Shut down the transport
    Shutdown,
}

/// Handle to communicate with the running transport task
#[derive(Clone)]
pub struct LanTransport {
    local_peer_id: PeerId,
    command_tx: mpsc::Sender<LanCommand>,
}

#[async_trait]
impl Transport for LanTransport {
    fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    async fn start_advertising(&self) -> Result<(), TransportError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(LanCommand::StartAdvertising { reply: reply_tx })
            .await
            .map_err(|_| TransportError::ShutDown)?;
        reply_rx
            .recv()
            .await
            .ok_or(TransportError::ShutDown)?
            .map_err(TransportError::AdvertisingFailed)
    }

    async fn stop_advertising(&self) -> Result<(), TransportError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(LanCommand::StopAdvertising { reply: reply_tx })
            .await
            .map_err(|_| TransportError::ShutDown)?;
        reply_rx
            .recv()
            .await
            .ok_or(TransportError::ShutDown)?
            .map_err(TransportError::AdvertisingFailed)
    }

    async fn start_browsing(&self) -> Result<(), TransportError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(LanCommand::StartBrowsing { reply: reply_tx })
            .await
            .map_err(|_| TransportError::ShutDown)?;
        reply_rx
            .recv()
            .await
            .ok_or(TransportError::ShutDown)?
            .map_err(TransportError::BrowsingFailed)
    }

    async fn stop_browsing(&self) -> Result<(), TransportError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(LanCommand::StopBrowsing { reply: reply_tx })
            .await
            .map_err(|_| TransportError::ShutDown)?;
        reply_rx
            .recv()
            .await
            .ok_or(TransportError::ShutDown)?
            .map_err(TransportError::BrowsingFailed)
    }

    async fn invite(&self, peer: PeerId, timeout: Duration) -> Result<(), TransportError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(LanCommand::Invite {
                peer,
                timeout,
                reply: reply_tx,
            })
            .await
            .map_err(|_| TransportError::ShutDown)?;
        reply_rx
            .recv()
            .await
            .ok_or(TransportError::ShutDown)?
            .map_err(TransportError::InviteFailed)
    }

    async fn send(&self, payload: Vec<u8>, peers: &[PeerId]) -> Result<(), TransportError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(LanCommand::Send {
                payload,
                peers: peers.to_vec(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| TransportError::ShutDown)?;
        reply_rx
            .recv()
            .await
            .ok_or(TransportError::ShutDown)?
            .map_err(TransportError::SendFailed)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.command_tx
            .send(LanCommand::Shutdown)
            .await
            .map_err(|_| TransportError::ShutDown)
    }
}

/// Build and start the LAN transport, returning a handle for communication.
///
/// This spawns a tokio task that runs the swarm event loop. Discovery,
/// session and data events are delivered on `event_tx` in the order the
/// swarm produced them.
pub async fn start_lan_transport(
    keypair: libp2p::identity::Keypair,
    config: &NodeConfig,
    display_name: String,
    event_tx: mpsc::Sender<TransportEvent>,
) -> Result<LanTransport> {
    let behaviour = PairingBehaviour::new(&keypair, &config.service_id, &display_name)?;
    let local_peer_id = keypair.public().to_peer_id();
    let expected_protocol = service_protocol(&config.service_id);
    let listen_port = config.listen_port;

    let mut swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            libp2p::tcp::Config::default(),
            libp2p::noise::Config::new,
            libp2p::yamux::Config::default,
        )?
        .with_behaviour(|_| behaviour)?
        .with_swarm_config(|cfg| {
            cfg.with_idle_connection_timeout(std::time::Duration::from_secs(300))
        })
        .build();

    let (command_tx, mut command_rx) = mpsc::channel::<LanCommand>(256);
    let handle = LanTransport {
        local_peer_id,
        command_tx,
    };

    // Spawn the swarm event loop
    tokio::spawn(async move {
        // Advertising is the TCP listener; None means not advertising
        let mut listener_id: Option<ListenerId> = None;
        // Whether mDNS sightings are forwarded as discovery events
        let mut browsing = false;
        // Addresses learned from mDNS, used when dialing invites
        let mut peer_addrs: HashMap<PeerId, Vec<Multiaddr>> = HashMap::new();
        // Outstanding invites and their deadlines
        let mut pending_invites: HashMap<PeerId, Instant> = HashMap::new();
        // Peers identify has confirmed for our service
        let mut confirmed: HashSet<PeerId> = HashSet::new();
        // Peers with at least one live connection
        let mut connected: HashSet<PeerId> = HashSet::new();

        let mut sweep = interval(INVITE_SWEEP_INTERVAL);

        loop {
            tokio::select! {
                // Process incoming swarm events
                event = swarm.select_next_some() => {
                    match event {
                        SwarmEvent::Behaviour(PairingBehaviourEvent::Tokens(
                            request_response::Event::Message { peer, message, .. }
                        )) => {
                            match message {
                                request_response::Message::Request { request, channel, .. } => {
                                    // Ack first so the sender is never left waiting
                                    let _ = swarm.behaviour_mut().tokens.send_response(
                                        channel,
                                        TokenAck { accepted: true, error: None },
                                    );
                                    let _ = event_tx.send(TransportEvent::DataReceived {
                                        peer,
                                        payload: request.frame,
                                    }).await;
                                }
                                request_response::Message::Response { .. } => {
                                    // Delivery ack, nothing to do
                                }
                            }
                        }

                        SwarmEvent::Behaviour(PairingBehaviourEvent::Tokens(
                            request_response::Event::OutboundFailure { peer, error, .. }
                        )) => {
                            tracing::warn!("Token delivery to {} failed: {}", peer, error);
                        }

                        SwarmEvent::Behaviour(PairingBehaviourEvent::Mdns(
                            mdns::Event::Discovered(peers)
                        )) => {
                            for (peer_id, addr) in peers {
                                let addrs = peer_addrs.entry(peer_id).or_default();
                                if !addrs.contains(&addr) {
                                    addrs.push(addr);
                                }
                                if browsing {
                                    tracing::debug!("mDNS discovered peer: {}", peer_id);
                                    let _ = event_tx.send(TransportEvent::PeerDiscovered {
                                        peer: peer_id,
                                    }).await;
                                }
                            }
                        }

                        SwarmEvent::Behaviour(PairingBehaviourEvent::Mdns(
                            mdns::Event::Expired(peers)
                        )) => {
                            for (peer_id, addr) in peers {
                                let gone = match peer_addrs.get_mut(&peer_id) {
                                    Some(addrs) => {
                                        addrs.retain(|a| *a != addr);
                                        addrs.is_empty()
                                    }
                                    None => false,
                                };
                                if gone {
                                    peer_addrs.remove(&peer_id);
                                    if browsing {
                                        tracing::debug!("mDNS peer expired: {}", peer_id);
                                        let _ = event_tx.send(TransportEvent::PeerLost {
                                            peer: peer_id,
                                        }).await;
                                    }
                                }
                            }
                        }

                        SwarmEvent::Behaviour(PairingBehaviourEvent::Identify(
                            identify::Event::Received { peer_id, info, .. }
                        )) => {
                            if info.protocol_version == expected_protocol {
                                confirmed.insert(peer_id);
                                let _ = event_tx.send(TransportEvent::PeerIdentified {
                                    peer: peer_id,
                                    display_name: info.agent_version,
                                }).await;
                                // Connection plus service confirmation makes a session
                                if connected.contains(&peer_id) {
                                    let _ = event_tx.send(TransportEvent::SessionStateChanged {
                                        peer: peer_id,
                                        state: SessionState::Connected,
                                    }).await;
                                }
                            } else {
                                tracing::warn!(
                                    "Peer {} runs service {:?}, not ours; disconnecting",
                                    peer_id,
                                    info.protocol_version
                                );
                                let _ = swarm.disconnect_peer_id(peer_id);
                            }
                        }

                        SwarmEvent::NewListenAddr { address, .. } => {
                            tracing::info!("Advertising on {}", address);
                        }

                        SwarmEvent::ConnectionEstablished { peer_id, endpoint, num_established, .. } => {
                            tracing::info!("Connected to {} via {}", peer_id, endpoint.get_remote_address());
                            connected.insert(peer_id);
                            let invited = pending_invites.remove(&peer_id).is_some();
                            if num_established.get() == 1 {
                                if confirmed.contains(&peer_id) {
                                    // Reconnect of an already confirmed peer
                                    let _ = event_tx.send(TransportEvent::SessionStateChanged {
                                        peer: peer_id,
                                        state: SessionState::Connected,
                                    }).await;
                                } else if !invited && endpoint.is_listener() {
                                    // Inbound invite, auto-accepted
                                    let _ = event_tx.send(TransportEvent::SessionStateChanged {
                                        peer: peer_id,
                                        state: SessionState::Connecting,
                                    }).await;
                                }
                            }
                        }

                        SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
                            if num_established == 0 {
                                tracing::info!("Disconnected from {}", peer_id);
                                connected.remove(&peer_id);
                                confirmed.remove(&peer_id);
                                let _ = event_tx.send(TransportEvent::SessionStateChanged {
                                    peer: peer_id,
                                    state: SessionState::NotConnected,
                                }).await;
                            }
                        }

                        SwarmEvent::OutgoingConnectionError { peer_id: Some(peer), error, .. } => {
                            if pending_invites.remove(&peer).is_some() {
                                let _ = event_tx.send(TransportEvent::InviteFailed {
                                    peer,
                                    reason: error.to_string(),
                                }).await;
                            } else {
                                tracing::debug!("Dial to {} failed: {}", peer, error);
                            }
                        }

                        _ => {}
                    }
                }

                // Expire invites whose deadline passed
                _ = sweep.tick() => {
                    let now = Instant::now();
                    let expired: Vec<PeerId> = pending_invites
                        .iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(peer, _)| *peer)
                        .collect();
                    for peer in expired {
                        pending_invites.remove(&peer);
                        let _ = event_tx.send(TransportEvent::InviteFailed {
                            peer,
                            reason: "Invite timed out".to_string(),
                        }).await;
                    }
                }

                // Process commands from the application layer
                Some(command) = command_rx.recv() => {
                    match command {
                        LanCommand::StartAdvertising { reply } => {
                            if listener_id.is_some() {
                                let _ = reply.send(Ok(())).await;
                                continue;
                            }
                            let addr = Multiaddr::empty()
                                .with(Protocol::Ip4(Ipv4Addr::UNSPECIFIED))
                                .with(Protocol::Tcp(listen_port));
                            match swarm.listen_on(addr) {
                                Ok(id) => {
                                    listener_id = Some(id);
                                    let _ = reply.send(Ok(())).await;
                                }
                                Err(e) => {
                                    let _ = reply.send(Err(e.to_string())).await;
                                }
                            }
                        }

                        LanCommand::StopAdvertising { reply } => {
                            if let Some(id) = listener_id.take() {
                                swarm.remove_listener(id);
                            }
                            let _ = reply.send(Ok(())).await;
                        }

                        LanCommand::StartBrowsing { reply } => {
                            if swarm.behaviour().mdns.is_enabled() {
                                browsing = true;
                                let _ = reply.send(Ok(())).await;
                            } else {
                                let _ = reply.send(Err("mDNS unavailable on this host".to_string())).await;
                            }
                        }

                        LanCommand::StopBrowsing { reply } => {
                            browsing = false;
                            let _ = reply.send(Ok(())).await;
                        }

                        LanCommand::Invite { peer, timeout, reply } => {
                            let addrs = peer_addrs.get(&peer).cloned().unwrap_or_default();
                            if addrs.is_empty() {
                                let _ = reply.send(Err("No known addresses for peer".to_string())).await;
                                continue;
                            }
                            let opts = DialOpts::peer_id(peer)
                                .addresses(addrs)
                                .condition(PeerCondition::Disconnected)
                                .build();
                            match swarm.dial(opts) {
                                Ok(()) => {
                                    pending_invites.insert(peer, Instant::now() + timeout);
                                    let _ = event_tx.send(TransportEvent::SessionStateChanged {
                                        peer,
                                        state: SessionState::Connecting,
                                    }).await;
                                    let _ = reply.send(Ok(())).await;
                                }
                                Err(DialError::DialPeerConditionFalse(_)) => {
                                    // Already connected or dialing, not an error
                                    let _ = reply.send(Ok(())).await;
                                }
                                Err(e) => {
                                    let _ = reply.send(Err(e.to_string())).await;
                                }
                            }
                        }

                        LanCommand::Send { payload, peers, reply } => {
                            for peer in &peers {
                                if connected.contains(peer) && confirmed.contains(peer) {
                                    swarm.behaviour_mut().tokens.send_request(
                                        peer,
                                        TokenPush { frame: payload.clone() },
                                    );
                                } else {
                                    tracing::debug!("Skipping send to {}: no session", peer);
                                }
                            }
                            let _ = reply.send(Ok(())).await;
                        }

                        LanCommand::Shutdown => {
                            tracing::info!("LAN transport shutting down");
                            break;
                        }
                    }
                }
            }
        }
    });

    Ok(handle)
}
