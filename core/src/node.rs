// Nearwave node — the single place peer and ranging state is written
//
// One task drains transport and ranging events in arrival order and
// owns the roster and the readout outright. Everything the outside
// world sees is a published snapshot or a hint on the event channel,
// so observers never race the state machine.

use crate::config::NodeConfig;
use crate::identity::DeviceIdentity;
use crate::peer::{short_peer_id, DiscoveryOutcome, PeerPhase, PeerRoster, SessionOutcome};
use crate::ranging::{NearbyReading, RangingError, RangingProvider, RangingReading, Readout};
use crate::token::{decode_token, encode_token};
use crate::transport::{Transport, TransportEvent};
use crate::NearwaveError;
use libp2p::PeerId;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Capacity of the node event channel; hints beyond it are dropped
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Hints emitted to observers. Dropping one is harmless; the snapshot
/// getters always carry the current state.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// The list of connected peer names changed
    RosterChanged { connected: Vec<String> },
    /// A new measurement was published
    ReadingChanged { reading: RangingReading },
    /// A peer's capability token was accepted and ranging started
    RangingConfigured { peer: PeerId },
}

/// Receivers handed to the drain task on start
struct Inbound {
    transport_rx: mpsc::Receiver<TransportEvent>,
    ranging_rx: mpsc::Receiver<Vec<NearbyReading>>,
    roster: PeerRoster,
    readout: Readout,
}

/// A nearby-ranging node: discovery, session pairing and measurement
/// readout behind one handle.
pub struct NearwaveNode {
    config: NodeConfig,
    identity: DeviceIdentity,
    transport: Arc<dyn Transport>,
    ranging: Arc<dyn RangingProvider>,
    inbound: Mutex<Option<Inbound>>,
    events_tx: mpsc::Sender<NodeEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<NodeEvent>>>,
    connected: Arc<RwLock<Vec<String>>>,
    reading: Arc<RwLock<RangingReading>>,
    running: Arc<RwLock<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NearwaveNode {
    /// Assemble a node from its parts. The receivers must be the ones
    /// feeding `transport` and `ranging`.
    pub fn new(
        config: NodeConfig,
        identity: DeviceIdentity,
        transport: Arc<dyn Transport>,
        transport_rx: mpsc::Receiver<TransportEvent>,
        ranging: Arc<dyn RangingProvider>,
        ranging_rx: mpsc::Receiver<Vec<NearbyReading>>,
    ) -> Result<Self, NearwaveError> {
        config.validate()?;

        let readout = Readout::new(ranging.is_supported());
        let reading = readout.reading_handle();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            identity,
            transport,
            ranging,
            inbound: Mutex::new(Some(Inbound {
                transport_rx,
                ranging_rx,
                roster: PeerRoster::new(),
                readout,
            })),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            connected: Arc::new(RwLock::new(Vec::new())),
            reading,
            running: Arc::new(RwLock::new(false)),
            task: Mutex::new(None),
        })
    }

    /// Take the event receiver. Returns None after the first call.
    pub fn events(&self) -> Option<mpsc::Receiver<NodeEvent>> {
        self.events_rx.lock().take()
    }

    /// Begin advertising, browsing and pairing.
    ///
    /// Advertising or browsing failures are logged and the node keeps
    /// running; it just will not see (or be seen by) anyone until the
    /// underlying cause clears on a later start.
    pub async fn start(&self) -> Result<(), NearwaveError> {
        let inbound = {
            let mut running = self.running.write();
            if *running {
                return Err(NearwaveError::AlreadyRunning);
            }
            let inbound = match self.inbound.lock().take() {
                Some(inbound) => inbound,
                None => return Err(NearwaveError::AlreadyRunning),
            };
            *running = true;
            inbound
        };

        tracing::info!(
            "Nearwave node starting as {} ({})",
            self.display_name(),
            self.identity.device_id()
        );

        if let Err(e) = self.transport.start_advertising().await {
            tracing::warn!("Advertising unavailable: {}", e);
        }
        if let Err(e) = self.transport.start_browsing().await {
            tracing::warn!("Browsing unavailable: {}", e);
        }

        let event_loop = EventLoop {
            transport: self.transport.clone(),
            ranging: self.ranging.clone(),
            roster: inbound.roster,
            readout: inbound.readout,
            connected: self.connected.clone(),
            events_tx: self.events_tx.clone(),
            invite_timeout: self.config.invite_timeout,
            auto_invite: self.config.auto_invite,
        };
        let task = tokio::spawn(event_loop.run(inbound.transport_rx, inbound.ranging_rx));
        *self.task.lock() = Some(task);

        tracing::info!("Nearwave node started");
        Ok(())
    }

    /// Tear down sessions, stop ranging and wait for the drain task.
    /// Safe to call more than once.
    pub async fn stop(&self) {
        {
            let mut running = self.running.write();
            if !*running {
                return;
            }
            *running = false;
        }

        tracing::info!("Nearwave node stopping...");
        if let Err(e) = self.transport.shutdown().await {
            tracing::debug!("Transport already down: {}", e);
        }
        self.ranging.invalidate().await;

        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        tracing::info!("Nearwave node stopped");
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    /// Names of currently connected peers, in connection order
    pub fn connected_peers(&self) -> Vec<String> {
        self.connected.read().clone()
    }

    /// The most recent measurement
    pub fn current_reading(&self) -> RangingReading {
        *self.reading.read()
    }

    /// The persisted device identifier
    pub fn device_id(&self) -> Uuid {
        self.identity.device_id()
    }

    /// The name advertised to peers
    pub fn display_name(&self) -> String {
        self.config.effective_display_name(self.identity.device_id())
    }

    /// This node's identifier on the transport
    pub fn local_peer_id(&self) -> PeerId {
        self.transport.local_peer_id()
    }
}

/// State owned by the drain task. Nothing else writes the roster or
/// the readout once the task is running.
struct EventLoop {
    transport: Arc<dyn Transport>,
    ranging: Arc<dyn RangingProvider>,
    roster: PeerRoster,
    readout: Readout,
    connected: Arc<RwLock<Vec<String>>>,
    events_tx: mpsc::Sender<NodeEvent>,
    invite_timeout: Duration,
    auto_invite: bool,
}

impl EventLoop {
    async fn run(
        mut self,
        mut transport_rx: mpsc::Receiver<TransportEvent>,
        mut ranging_rx: mpsc::Receiver<Vec<NearbyReading>>,
    ) {
        loop {
            tokio::select! {
                maybe_event = transport_rx.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_transport(event).await,
                        // Transport gone; the node is shutting down
                        None => break,
                    }
                }
                Some(batch) = ranging_rx.recv() => {
                    self.handle_readings(&batch);
                }
            }
        }
        self.readout.invalidate();
        tracing::debug!("Node event loop ended");
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerDiscovered { peer } => {
                match self.roster.note_discovered(peer) {
                    DiscoveryOutcome::Added | DiscoveryOutcome::Rediscovered => {
                        tracing::info!("Discovered peer {}", short_peer_id(&peer));
                        if self.auto_invite {
                            self.invite(peer).await;
                        }
                    }
                    DiscoveryOutcome::AlreadyKnown => {}
                }
            }

            TransportEvent::PeerLost { peer } => {
                match self.roster.note_lost(peer) {
                    Some(_) => tracing::info!("Lost sight of {}", short_peer_id(&peer)),
                    // Connected sessions outlive discovery visibility
                    None => tracing::debug!("Ignoring loss of {}", short_peer_id(&peer)),
                }
            }

            TransportEvent::PeerIdentified { peer, display_name } => {
                self.roster.note_display_name(peer, display_name);
                if self.roster.phase(&peer) == Some(PeerPhase::Connected) {
                    self.publish_roster();
                }
            }

            TransportEvent::SessionStateChanged { peer, state } => {
                match self.roster.apply_session_state(peer, state) {
                    SessionOutcome::BecameConnected => {
                        tracing::info!("Session connected with {}", self.roster.display_name(&peer));
                        self.publish_roster();
                        self.deliver_token().await;
                    }
                    SessionOutcome::BecameDisconnected => {
                        tracing::info!("Session with {} ended", self.roster.display_name(&peer));
                        self.publish_roster();
                    }
                    SessionOutcome::InviteRejected => {
                        tracing::info!("Invite declined by {}", short_peer_id(&peer));
                    }
                    SessionOutcome::Progressing => {
                        tracing::debug!("Session with {} connecting", short_peer_id(&peer));
                    }
                    SessionOutcome::NoChange => {}
                }
            }

            TransportEvent::InviteFailed { peer, reason } => {
                tracing::warn!("Invite to {} failed: {}", short_peer_id(&peer), reason);
                self.roster.note_invite_failed(peer);
            }

            TransportEvent::DataReceived { peer, payload } => {
                self.accept_token(peer, &payload).await;
            }

            TransportEvent::StreamOffered { peer, name } => {
                tracing::warn!(
                    "Rejecting stream {:?} from {}: streams are not supported",
                    name,
                    short_peer_id(&peer)
                );
            }

            TransportEvent::ResourceOffered { peer, name } => {
                tracing::warn!(
                    "Rejecting resource {:?} from {}: transfers are not supported",
                    name,
                    short_peer_id(&peer)
                );
            }
        }
    }

    /// Invite a freshly discovered peer. Failure puts it back in the
    /// discovered pool; a later sighting retries.
    async fn invite(&mut self, peer: PeerId) {
        if !self.roster.note_inviting(peer) {
            return;
        }
        tracing::info!("Inviting {}", short_peer_id(&peer));
        if let Err(e) = self.transport.invite(peer, self.invite_timeout).await {
            tracing::warn!("Could not invite {}: {}", short_peer_id(&peer), e);
            self.roster.note_invite_failed(peer);
        }
    }

    /// Send our capability token to every connected peer. Receipt is
    /// idempotent on the other side, so resending on each new
    /// connection is fine.
    async fn deliver_token(&mut self) {
        let token = match self.ranging.discovery_token() {
            Some(token) => token,
            None => {
                tracing::debug!("No local capability token to share");
                return;
            }
        };
        let frame = match encode_token(&token) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Could not encode capability token: {}", e);
                return;
            }
        };
        let peers = self.roster.connected_peers();
        if peers.is_empty() {
            return;
        }
        match self.transport.send(frame, &peers).await {
            Ok(()) => tracing::info!(
                "Sent capability token {} to {} peer(s)",
                token.fingerprint(),
                peers.len()
            ),
            Err(e) => tracing::warn!("Could not send capability token: {}", e),
        }
    }

    /// Feed a received capability token to the ranging provider. A
    /// malformed payload is discarded with a warning; the session and
    /// roster are untouched either way.
    async fn accept_token(&mut self, peer: PeerId, payload: &[u8]) {
        let token = match decode_token(payload) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(
                    "Discarding malformed token from {}: {}",
                    short_peer_id(&peer),
                    e
                );
                return;
            }
        };
        tracing::info!(
            "Received capability token {} from {}",
            token.fingerprint(),
            short_peer_id(&peer)
        );

        match self.ranging.run_with_peer(&token).await {
            Ok(()) => {
                if self.readout.begin_run() {
                    tracing::info!("Ranging with {}", self.roster.display_name(&peer));
                    let _ = self
                        .events_tx
                        .try_send(NodeEvent::RangingConfigured { peer });
                } else {
                    tracing::debug!("Readout not accepting runs; token ignored");
                }
            }
            Err(RangingError::Unsupported) => {
                tracing::debug!("Ranging unsupported on this device; token ignored");
            }
            Err(e) => {
                tracing::warn!("Could not start ranging: {}", e);
            }
        }
    }

    fn handle_readings(&mut self, batch: &[NearbyReading]) {
        if self.readout.apply_update(batch) {
            let _ = self.events_tx.try_send(NodeEvent::ReadingChanged {
                reading: self.readout.current(),
            });
        }
    }

    fn publish_roster(&mut self) {
        let names = self.roster.connected_names();
        *self.connected.write() = names.clone();
        let _ = self
            .events_tx
            .try_send(NodeEvent::RosterChanged { connected: names });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::DeviceIdentity;
    use crate::ranging::UnsupportedRanging;
    use crate::store::{MemoryStorage, StorageBackend};
    use crate::transport::MemoryHub;

    fn build_node(hub: &MemoryHub, name: &str) -> NearwaveNode {
        let store: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let identity = DeviceIdentity::load_or_generate(&store).unwrap();
        let (transport_tx, transport_rx) = mpsc::channel(64);
        let transport = hub.endpoint(name, transport_tx);
        let (_ranging_tx, ranging_rx) = mpsc::channel(8);
        NearwaveNode::new(
            NodeConfig::new("nearwave").with_display_name(name),
            identity,
            Arc::new(transport),
            transport_rx,
            Arc::new(UnsupportedRanging::new()),
            ranging_rx,
        )
        .unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let hub = MemoryHub::new();
        let store: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let identity = DeviceIdentity::load_or_generate(&store).unwrap();
        let (transport_tx, transport_rx) = mpsc::channel(64);
        let transport = hub.endpoint("bad", transport_tx);
        let (_ranging_tx, ranging_rx) = mpsc::channel(8);

        let result = NearwaveNode::new(
            NodeConfig::new("Not Valid!"),
            identity,
            Arc::new(transport),
            transport_rx,
            Arc::new(UnsupportedRanging::new()),
            ranging_rx,
        );
        assert!(matches!(result, Err(NearwaveError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn lifecycle() {
        let hub = MemoryHub::new();
        let node = build_node(&hub, "solo");

        assert!(!node.is_running());
        node.start().await.unwrap();
        assert!(node.is_running());

        // Double-start should fail
        assert!(matches!(
            node.start().await,
            Err(NearwaveError::AlreadyRunning)
        ));

        node.stop().await;
        assert!(!node.is_running());

        // Stop is idempotent, restart is not supported
        node.stop().await;
        assert!(matches!(
            node.start().await,
            Err(NearwaveError::AlreadyRunning)
        ));
    }

    #[tokio::test]
    async fn event_receiver_is_taken_once() {
        let hub = MemoryHub::new();
        let node = build_node(&hub, "solo");
        assert!(node.events().is_some());
        assert!(node.events().is_none());
    }

    #[tokio::test]
    async fn unsupported_ranging_reports_zero_distance() {
        let hub = MemoryHub::new();
        let node = build_node(&hub, "inert");
        node.start().await.unwrap();

        let reading = node.current_reading();
        assert_eq!(reading.distance_m, 0.0);
        assert!(reading.direction.is_none());

        node.stop().await;
    }
}
