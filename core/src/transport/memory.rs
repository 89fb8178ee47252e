// In-memory transport — a process-local hub wiring endpoints together
//
// Used by tests and the demo command. Advertising and browsing are
// plain flags; an invite links both endpoints instantly and delivery
// is an event pushed on the receiver's channel. Events are collected
// under the hub lock and sent after it is released.

use super::{Transport, TransportError, TransportEvent};
use crate::peer::SessionState;
use async_trait::async_trait;
use libp2p::PeerId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

type Outbox = Vec<(mpsc::Sender<TransportEvent>, TransportEvent)>;

async fn flush(outbox: Outbox) {
    for (tx, event) in outbox {
        let _ = tx.send(event).await;
    }
}

struct Endpoint {
    display_name: String,
    advertising: bool,
    browsing: bool,
    connected_to: HashSet<PeerId>,
    events: mpsc::Sender<TransportEvent>,
}

#[derive(Default)]
struct Shared {
    endpoints: HashMap<PeerId, Endpoint>,
}

/// A hub connecting in-memory transports within one process
#[derive(Clone, Default)]
pub struct MemoryHub {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new endpoint on the hub
    pub fn endpoint(
        &self,
        display_name: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> MemoryTransport {
        let peer_id = PeerId::random();
        self.shared.lock().endpoints.insert(
            peer_id,
            Endpoint {
                display_name: display_name.to_string(),
                advertising: false,
                browsing: false,
                connected_to: HashSet::new(),
                events,
            },
        );
        MemoryTransport {
            peer_id,
            shared: self.shared.clone(),
        }
    }

    /// Sever an established link, as if the connection dropped
    pub async fn drop_link(&self, a: PeerId, b: PeerId) {
        let mut outbox = Outbox::new();
        {
            let mut shared = self.shared.lock();
            if let Some(ep) = shared.endpoints.get_mut(&a) {
                if ep.connected_to.remove(&b) {
                    outbox.push((
                        ep.events.clone(),
                        TransportEvent::SessionStateChanged {
                            peer: b,
                            state: SessionState::NotConnected,
                        },
                    ));
                }
            }
            if let Some(ep) = shared.endpoints.get_mut(&b) {
                if ep.connected_to.remove(&a) {
                    outbox.push((
                        ep.events.clone(),
                        TransportEvent::SessionStateChanged {
                            peer: a,
                            state: SessionState::NotConnected,
                        },
                    ));
                }
            }
        }
        flush(outbox).await;
    }

    /// Present a byte-stream offer to a peer
    pub async fn offer_stream(&self, from: PeerId, to: PeerId, name: &str) {
        let mut outbox = Outbox::new();
        {
            let shared = self.shared.lock();
            if let Some(ep) = shared.endpoints.get(&to) {
                outbox.push((
                    ep.events.clone(),
                    TransportEvent::StreamOffered {
                        peer: from,
                        name: name.to_string(),
                    },
                ));
            }
        }
        flush(outbox).await;
    }

    /// Present a resource transfer offer to a peer
    pub async fn offer_resource(&self, from: PeerId, to: PeerId, name: &str) {
        let mut outbox = Outbox::new();
        {
            let shared = self.shared.lock();
            if let Some(ep) = shared.endpoints.get(&to) {
                outbox.push((
                    ep.events.clone(),
                    TransportEvent::ResourceOffered {
                        peer: from,
                        name: name.to_string(),
                    },
                ));
            }
        }
        flush(outbox).await;
    }
}

/// One endpoint on a [`MemoryHub`]
#[derive(Clone)]
pub struct MemoryTransport {
    peer_id: PeerId,
    shared: Arc<Mutex<Shared>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_peer_id(&self) -> PeerId {
        self.peer_id
    }

    async fn start_advertising(&self) -> Result<(), TransportError> {
        let mut outbox = Outbox::new();
        {
            let mut shared = self.shared.lock();
            match shared.endpoints.get_mut(&self.peer_id) {
                None => return Err(TransportError::ShutDown),
                Some(me) if me.advertising => return Ok(()),
                Some(me) => me.advertising = true,
            }
            for (peer, ep) in &shared.endpoints {
                if *peer != self.peer_id && ep.browsing {
                    outbox.push((
                        ep.events.clone(),
                        TransportEvent::PeerDiscovered { peer: self.peer_id },
                    ));
                }
            }
        }
        flush(outbox).await;
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), TransportError> {
        let mut outbox = Outbox::new();
        {
            let mut shared = self.shared.lock();
            match shared.endpoints.get_mut(&self.peer_id) {
                None => return Err(TransportError::ShutDown),
                Some(me) if !me.advertising => return Ok(()),
                Some(me) => me.advertising = false,
            }
            for (peer, ep) in &shared.endpoints {
                if *peer != self.peer_id && ep.browsing {
                    outbox.push((
                        ep.events.clone(),
                        TransportEvent::PeerLost { peer: self.peer_id },
                    ));
                }
            }
        }
        flush(outbox).await;
        Ok(())
    }

    async fn start_browsing(&self) -> Result<(), TransportError> {
        let mut outbox = Outbox::new();
        {
            let mut shared = self.shared.lock();
            let my_events = match shared.endpoints.get_mut(&self.peer_id) {
                None => return Err(TransportError::ShutDown),
                Some(me) if me.browsing => return Ok(()),
                Some(me) => {
                    me.browsing = true;
                    me.events.clone()
                }
            };
            for (peer, ep) in &shared.endpoints {
                if *peer != self.peer_id && ep.advertising {
                    outbox.push((
                        my_events.clone(),
                        TransportEvent::PeerDiscovered { peer: *peer },
                    ));
                }
            }
        }
        flush(outbox).await;
        Ok(())
    }

    async fn stop_browsing(&self) -> Result<(), TransportError> {
        let mut shared = self.shared.lock();
        match shared.endpoints.get_mut(&self.peer_id) {
            None => Err(TransportError::ShutDown),
            Some(me) => {
                me.browsing = false;
                Ok(())
            }
        }
    }

    async fn invite(&self, peer: PeerId, _timeout: Duration) -> Result<(), TransportError> {
        let mut outbox = Outbox::new();
        {
            let mut shared = self.shared.lock();
            let (my_events, my_name) = match shared.endpoints.get(&self.peer_id) {
                None => return Err(TransportError::ShutDown),
                Some(me) => (me.events.clone(), me.display_name.clone()),
            };
            let target_advertising = shared
                .endpoints
                .get(&peer)
                .map(|ep| ep.advertising)
                .unwrap_or(false);
            if !target_advertising {
                outbox.push((
                    my_events,
                    TransportEvent::InviteFailed {
                        peer,
                        reason: "Peer is not advertising".to_string(),
                    },
                ));
            } else {
                if let Some(me) = shared.endpoints.get_mut(&self.peer_id) {
                    me.connected_to.insert(peer);
                }
                let (peer_events, peer_name) = match shared.endpoints.get_mut(&peer) {
                    None => return Err(TransportError::ShutDown),
                    Some(ep) => {
                        ep.connected_to.insert(self.peer_id);
                        (ep.events.clone(), ep.display_name.clone())
                    }
                };
                outbox.push((
                    my_events.clone(),
                    TransportEvent::PeerIdentified {
                        peer,
                        display_name: peer_name,
                    },
                ));
                outbox.push((
                    my_events.clone(),
                    TransportEvent::SessionStateChanged {
                        peer,
                        state: SessionState::Connecting,
                    },
                ));
                outbox.push((
                    my_events,
                    TransportEvent::SessionStateChanged {
                        peer,
                        state: SessionState::Connected,
                    },
                ));
                outbox.push((
                    peer_events.clone(),
                    TransportEvent::PeerIdentified {
                        peer: self.peer_id,
                        display_name: my_name,
                    },
                ));
                outbox.push((
                    peer_events.clone(),
                    TransportEvent::SessionStateChanged {
                        peer: self.peer_id,
                        state: SessionState::Connecting,
                    },
                ));
                outbox.push((
                    peer_events,
                    TransportEvent::SessionStateChanged {
                        peer: self.peer_id,
                        state: SessionState::Connected,
                    },
                ));
            }
        }
        flush(outbox).await;
        Ok(())
    }

    async fn send(&self, payload: Vec<u8>, peers: &[PeerId]) -> Result<(), TransportError> {
        let mut outbox = Outbox::new();
        {
            let shared = self.shared.lock();
            let me = match shared.endpoints.get(&self.peer_id) {
                None => return Err(TransportError::ShutDown),
                Some(me) => me,
            };
            for peer in peers {
                if me.connected_to.contains(peer) {
                    if let Some(ep) = shared.endpoints.get(peer) {
                        outbox.push((
                            ep.events.clone(),
                            TransportEvent::DataReceived {
                                peer: self.peer_id,
                                payload: payload.clone(),
                            },
                        ));
                    }
                }
            }
        }
        flush(outbox).await;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        let mut outbox = Outbox::new();
        {
            let mut shared = self.shared.lock();
            let me = match shared.endpoints.remove(&self.peer_id) {
                Some(ep) => ep,
                None => return Ok(()),
            };
            for ep in shared.endpoints.values_mut() {
                if ep.connected_to.remove(&self.peer_id) {
                    outbox.push((
                        ep.events.clone(),
                        TransportEvent::SessionStateChanged {
                            peer: self.peer_id,
                            state: SessionState::NotConnected,
                        },
                    ));
                }
                if me.advertising && ep.browsing {
                    outbox.push((
                        ep.events.clone(),
                        TransportEvent::PeerLost { peer: self.peer_id },
                    ));
                }
            }
        }
        flush(outbox).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    async fn next_event(rx: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn browsing_sees_advertising_peer() {
        let hub = MemoryHub::new();
        let (a_tx, _a_rx) = mpsc::channel(16);
        let (b_tx, mut b_rx) = mpsc::channel(16);
        let a = hub.endpoint("alice", a_tx);
        let b = hub.endpoint("bob", b_tx);

        a.start_advertising().await.unwrap();
        b.start_browsing().await.unwrap();

        match next_event(&mut b_rx).await {
            TransportEvent::PeerDiscovered { peer } => assert_eq!(peer, a.local_peer_id()),
            other => panic!("expected discovery, got {other}"),
        }
    }

    #[tokio::test]
    async fn invite_connects_both_sides() {
        let hub = MemoryHub::new();
        let (a_tx, mut a_rx) = mpsc::channel(16);
        let (b_tx, mut b_rx) = mpsc::channel(16);
        let a = hub.endpoint("alice", a_tx);
        let b = hub.endpoint("bob", b_tx);

        a.start_advertising().await.unwrap();
        b.invite(a.local_peer_id(), Duration::from_secs(30))
            .await
            .unwrap();

        // Inviter sees the name, then the connection forming
        match next_event(&mut b_rx).await {
            TransportEvent::PeerIdentified { peer, display_name } => {
                assert_eq!(peer, a.local_peer_id());
                assert_eq!(display_name, "alice");
            }
            other => panic!("expected identification, got {other}"),
        }
        match next_event(&mut b_rx).await {
            TransportEvent::SessionStateChanged { state, .. } => {
                assert_eq!(state, SessionState::Connecting)
            }
            other => panic!("expected connecting, got {other}"),
        }
        match next_event(&mut b_rx).await {
            TransportEvent::SessionStateChanged { state, .. } => {
                assert_eq!(state, SessionState::Connected)
            }
            other => panic!("expected connected, got {other}"),
        }

        // Invitee sees the mirror image
        match next_event(&mut a_rx).await {
            TransportEvent::PeerIdentified { display_name, .. } => {
                assert_eq!(display_name, "bob")
            }
            other => panic!("expected identification, got {other}"),
        }
    }

    #[tokio::test]
    async fn data_flows_over_a_link() {
        let hub = MemoryHub::new();
        let (a_tx, mut a_rx) = mpsc::channel(16);
        let (b_tx, _b_rx) = mpsc::channel(16);
        let a = hub.endpoint("alice", a_tx);
        let b = hub.endpoint("bob", b_tx);

        a.start_advertising().await.unwrap();
        b.invite(a.local_peer_id(), Duration::from_secs(30))
            .await
            .unwrap();
        b.send(vec![1, 2, 3], &[a.local_peer_id()]).await.unwrap();

        loop {
            match next_event(&mut a_rx).await {
                TransportEvent::DataReceived { peer, payload } => {
                    assert_eq!(peer, b.local_peer_id());
                    assert_eq!(payload, vec![1, 2, 3]);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn invite_to_absent_peer_reports_failure() {
        let hub = MemoryHub::new();
        let (b_tx, mut b_rx) = mpsc::channel(16);
        let b = hub.endpoint("bob", b_tx);

        b.invite(PeerId::random(), Duration::from_secs(30))
            .await
            .unwrap();

        match next_event(&mut b_rx).await {
            TransportEvent::InviteFailed { .. } => {}
            other => panic!("expected invite failure, got {other}"),
        }
    }

    #[tokio::test]
    async fn shutdown_disconnects_links() {
        let hub = MemoryHub::new();
        let (a_tx, _a_rx) = mpsc::channel(16);
        let (b_tx, mut b_rx) = mpsc::channel(16);
        let a = hub.endpoint("alice", a_tx);
        let b = hub.endpoint("bob", b_tx);

        a.start_advertising().await.unwrap();
        b.invite(a.local_peer_id(), Duration::from_secs(30))
            .await
            .unwrap();
        while b_rx.try_recv().is_ok() {}

        a.shutdown().await.unwrap();

        match next_event(&mut b_rx).await {
            TransportEvent::SessionStateChanged { peer, state } => {
                assert_eq!(peer, a.local_peer_id());
                assert_eq!(state, SessionState::NotConnected);
            }
            other => panic!("expected disconnect, got {other}"),
        }

        // The endpoint is gone; further calls report shutdown
        assert!(matches!(
            a.start_advertising().await,
            Err(TransportError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn dropped_link_notifies_both_sides() {
        let hub = MemoryHub::new();
        let (a_tx, mut a_rx) = mpsc::channel(16);
        let (b_tx, mut b_rx) = mpsc::channel(16);
        let a = hub.endpoint("alice", a_tx);
        let b = hub.endpoint("bob", b_tx);

        a.start_advertising().await.unwrap();
        b.invite(a.local_peer_id(), Duration::from_secs(30))
            .await
            .unwrap();
        while a_rx.try_recv().is_ok() {}
        while b_rx.try_recv().is_ok() {}

        hub.drop_link(a.local_peer_id(), b.local_peer_id()).await;

        match next_event(&mut a_rx).await {
            TransportEvent::SessionStateChanged { state, .. } => {
                assert_eq!(state, SessionState::NotConnected)
            }
            other => panic!("expected disconnect, got {other}"),
        }
        match next_event(&mut b_rx).await {
            TransportEvent::SessionStateChanged { state, .. } => {
                assert_eq!(state, SessionState::NotConnected)
            }
            other => panic!("expected disconnect, got {other}"),
        }
    }
}
