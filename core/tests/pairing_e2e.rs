//! End-to-end pairing tests over the in-memory transport
//!
//! These walk the full flow two devices go through:
//! 1. Both nodes advertise and browse
//! 2. Discovery triggers automatic invitations
//! 3. Connected peers exchange capability tokens
//! 4. Tokens start ranging and measurements get published
//!
//! Run with: cargo test --test pairing_e2e

use async_trait::async_trait;
use nearwave_core::token::encode_token;
use nearwave_core::{
    CapabilityToken, DeviceIdentity, MemoryHub, MemoryStorage, NearbyReading, NearwaveNode,
    NodeConfig, RangingError, RangingProvider, StorageBackend, Transport,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

/// A provider that emits one fixed reading whenever a token arrives
struct ScriptedRanging {
    token: CapabilityToken,
    updates: mpsc::Sender<Vec<NearbyReading>>,
    reading: NearbyReading,
    runs: AtomicUsize,
}

impl ScriptedRanging {
    fn new(
        label: u8,
        updates: mpsc::Sender<Vec<NearbyReading>>,
        reading: NearbyReading,
    ) -> Arc<Self> {
        Arc::new(Self {
            token: CapabilityToken::from_bytes(vec![label; 32]).unwrap(),
            updates,
            reading,
            runs: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl RangingProvider for ScriptedRanging {
    fn is_supported(&self) -> bool {
        true
    }

    fn discovery_token(&self) -> Option<CapabilityToken> {
        Some(self.token.clone())
    }

    async fn run_with_peer(&self, _token: &CapabilityToken) -> Result<(), RangingError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let _ = self.updates.send(vec![self.reading]).await;
        Ok(())
    }

    async fn invalidate(&self) {}
}

struct TestRig {
    node: NearwaveNode,
    provider: Arc<ScriptedRanging>,
}

fn build_node(hub: &MemoryHub, name: &str, reading: NearbyReading, label: u8) -> TestRig {
    let store: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
    let identity = DeviceIdentity::load_or_generate(&store).unwrap();
    let (transport_tx, transport_rx) = mpsc::channel(64);
    let transport = hub.endpoint(name, transport_tx);
    let (ranging_tx, ranging_rx) = mpsc::channel(8);
    let provider = ScriptedRanging::new(label, ranging_tx, reading);
    let node = NearwaveNode::new(
        NodeConfig::new("nearwave").with_display_name(name),
        identity,
        Arc::new(transport),
        transport_rx,
        provider.clone(),
        ranging_rx,
    )
    .unwrap();
    TestRig { node, provider }
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn two_nodes_pair_and_range() {
    let hub = MemoryHub::new();
    let reading = NearbyReading::new(Some(1.23), Some([0.1, 0.2, 0.97]));

    let alice = build_node(&hub, "alice", reading, 0xA1);
    let bob = build_node(&hub, "bob", reading, 0xB2);

    // Step 1: both sides come up; discovery and invites are automatic
    alice.node.start().await.unwrap();
    bob.node.start().await.unwrap();

    // Step 2: rosters converge on each other's display names
    wait_until("alice to see bob", || {
        alice.node.connected_peers() == vec!["bob".to_string()]
    })
    .await;
    wait_until("bob to see alice", || {
        bob.node.connected_peers() == vec!["alice".to_string()]
    })
    .await;

    // Step 3: tokens crossed and started ranging on both sides
    wait_until("alice to publish a measurement", || {
        alice.node.current_reading().distance_m > 0.0
    })
    .await;
    wait_until("bob to publish a measurement", || {
        bob.node.current_reading().distance_m > 0.0
    })
    .await;

    // Step 4: published values carry through unchanged
    let published = alice.node.current_reading();
    assert_eq!(published.distance_m, 1.23);
    assert_eq!(published.direction, Some([0.1, 0.2, 0.97]));
    assert!(alice.provider.runs.load(Ordering::SeqCst) >= 1);

    // Step 5: shutdown on one side empties the other's roster
    alice.node.stop().await;
    wait_until("bob to lose alice", || bob.node.connected_peers().is_empty()).await;

    bob.node.stop().await;
    assert!(!alice.node.is_running());
    assert!(!bob.node.is_running());
}

#[tokio::test]
async fn malformed_token_leaves_session_intact() {
    let hub = MemoryHub::new();
    let reading = NearbyReading::new(Some(1.23), Some([0.1, 0.2, 0.97]));

    let alice = build_node(&hub, "alice", reading, 0xA1);
    alice.node.start().await.unwrap();

    // A bare endpoint that pairs with alice but speaks garbage
    let (rogue_tx, mut rogue_rx) = mpsc::channel(64);
    let rogue = hub.endpoint("rogue", rogue_tx);
    rogue
        .invite(alice.node.local_peer_id(), Duration::from_secs(5))
        .await
        .unwrap();

    wait_until("alice to connect to the rogue", || {
        alice.node.connected_peers() == vec!["rogue".to_string()]
    })
    .await;

    // Garbage payload: discarded with a warning, nothing else changes
    rogue
        .send(b"not a token frame".to_vec(), &[alice.node.local_peer_id()])
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;

    assert_eq!(alice.node.connected_peers(), vec!["rogue".to_string()]);
    assert_eq!(alice.node.current_reading().distance_m, 0.0);
    assert_eq!(alice.provider.runs.load(Ordering::SeqCst), 0);

    // The rogue still receives alice's own (valid) token
    let mut saw_token = false;
    while let Ok(event) = rogue_rx.try_recv() {
        if let nearwave_core::TransportEvent::DataReceived { .. } = event {
            saw_token = true;
        }
    }
    assert!(saw_token, "alice should have shared her token on connect");

    alice.node.stop().await;
}

#[tokio::test]
async fn duplicate_token_is_idempotent() {
    let hub = MemoryHub::new();
    let reading = NearbyReading::new(Some(1.23), Some([0.1, 0.2, 0.97]));

    let alice = build_node(&hub, "alice", reading, 0xA1);
    alice.node.start().await.unwrap();

    let (rogue_tx, _rogue_rx) = mpsc::channel(64);
    let rogue = hub.endpoint("rogue", rogue_tx);
    rogue
        .invite(alice.node.local_peer_id(), Duration::from_secs(5))
        .await
        .unwrap();
    wait_until("alice to connect to the rogue", || {
        !alice.node.connected_peers().is_empty()
    })
    .await;

    let token = CapabilityToken::from_bytes(vec![0xC3; 48]).unwrap();
    let frame = encode_token(&token).unwrap();

    rogue
        .send(frame.clone(), &[alice.node.local_peer_id()])
        .await
        .unwrap();
    wait_until("the first token to start ranging", || {
        alice.provider.runs.load(Ordering::SeqCst) == 1
    })
    .await;

    // Same token again: accepted again, readout keeps publishing
    rogue
        .send(frame, &[alice.node.local_peer_id()])
        .await
        .unwrap();
    wait_until("the second token to restart ranging", || {
        alice.provider.runs.load(Ordering::SeqCst) == 2
    })
    .await;

    assert_eq!(alice.node.current_reading().distance_m, 1.23);
    assert_eq!(alice.node.connected_peers(), vec!["rogue".to_string()]);

    alice.node.stop().await;
}
