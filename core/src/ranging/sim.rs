// Simulated ranging — drives the full pipeline on hardware-less hosts

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{NearbyReading, RangingError, RangingProvider};
use crate::token::CapabilityToken;

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(300);
const SIM_TOKEN_LEN: usize = 64;

struct RunSlot {
    handle: Option<JoinHandle<()>>,
    invalidated: bool,
}

/// Fabricates plausible distance/direction updates on a timer
///
/// The emitted values follow a bounded random walk, so a demo readout
/// drifts the way a hand-held device does instead of jumping around.
pub struct SimulatedRanging {
    token: CapabilityToken,
    updates: mpsc::Sender<Vec<NearbyReading>>,
    interval: Duration,
    run: Mutex<RunSlot>,
}

impl SimulatedRanging {
    /// Create a simulator that emits into the given channel
    pub fn new(updates: mpsc::Sender<Vec<NearbyReading>>) -> Result<Self> {
        use rand::RngCore;
        let mut blob = vec![0u8; SIM_TOKEN_LEN];
        rand::rngs::OsRng.fill_bytes(&mut blob);
        let token = CapabilityToken::from_bytes(blob)?;

        Ok(Self {
            token,
            updates,
            interval: DEFAULT_UPDATE_INTERVAL,
            run: Mutex::new(RunSlot {
                handle: None,
                invalidated: false,
            }),
        })
    }

    /// Override the emission interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn abort_current(slot: &mut RunSlot) {
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl RangingProvider for SimulatedRanging {
    fn is_supported(&self) -> bool {
        true
    }

    fn discovery_token(&self) -> Option<CapabilityToken> {
        Some(self.token.clone())
    }

    async fn run_with_peer(&self, token: &CapabilityToken) -> Result<(), RangingError> {
        let mut slot = self.run.lock();
        if slot.invalidated {
            return Err(RangingError::Session(
                "provider already invalidated".to_string(),
            ));
        }
        Self::abort_current(&mut slot);

        tracing::debug!("Simulated run targeting token {}", token.fingerprint());

        let updates = self.updates.clone();
        let interval = self.interval;
        slot.handle = Some(tokio::spawn(async move {
            let mut rng = rand::rngs::StdRng::from_entropy();
            let mut distance: f32 = rng.gen_range(0.8..3.0);
            let mut direction = [
                rng.gen_range(-1.0f32..1.0),
                rng.gen_range(-1.0f32..1.0),
                rng.gen_range(-1.0f32..1.0),
            ];

            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;

                distance = (distance + rng.gen_range(-0.08f32..0.08)).clamp(0.2, 8.0);
                for c in direction.iter_mut() {
                    *c += rng.gen_range(-0.05f32..0.05);
                }
                let norm = direction.iter().map(|c| c * c).sum::<f32>().sqrt();
                if norm > f32::EPSILON {
                    for c in direction.iter_mut() {
                        *c /= norm;
                    }
                }

                let reading = NearbyReading::new(Some(distance), Some(direction));
                if updates.send(vec![reading]).await.is_err() {
                    break;
                }
            }
        }));

        Ok(())
    }

    async fn invalidate(&self) {
        let mut slot = self.run.lock();
        Self::abort_current(&mut slot);
        slot.invalidated = true;
        tracing::debug!("Simulated ranging invalidated");
    }
}

/// Provider for devices without ranging hardware
///
/// Never produces a token and never starts a run, so the readout stays
/// inert for the node's whole lifetime.
#[derive(Default)]
pub struct UnsupportedRanging;

impl UnsupportedRanging {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RangingProvider for UnsupportedRanging {
    fn is_supported(&self) -> bool {
        false
    }

    fn discovery_token(&self) -> Option<CapabilityToken> {
        None
    }

    async fn run_with_peer(&self, _token: &CapabilityToken) -> Result<(), RangingError> {
        Err(RangingError::Unsupported)
    }

    async fn invalidate(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer_token() -> CapabilityToken {
        CapabilityToken::from_bytes(vec![9u8; 32]).unwrap()
    }

    #[tokio::test]
    async fn test_simulator_advertises_stable_token() {
        let (tx, _rx) = mpsc::channel(8);
        let sim = SimulatedRanging::new(tx).unwrap();

        assert!(sim.is_supported());
        let a = sim.discovery_token().unwrap();
        let b = sim.discovery_token().unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_simulator_emits_readings() {
        let (tx, mut rx) = mpsc::channel(8);
        let sim = SimulatedRanging::new(tx)
            .unwrap()
            .with_interval(Duration::from_millis(10));

        sim.run_with_peer(&peer_token()).await.unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no reading within timeout")
            .expect("channel closed");

        assert_eq!(batch.len(), 1);
        let reading = batch[0];
        assert!(reading.distance_m.unwrap() > 0.0);
        assert!(reading.direction.is_some());
    }

    #[tokio::test]
    async fn test_retarget_is_allowed() {
        let (tx, _rx) = mpsc::channel(8);
        let sim = SimulatedRanging::new(tx).unwrap();

        sim.run_with_peer(&peer_token()).await.unwrap();
        sim.run_with_peer(&peer_token()).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalidate_is_terminal() {
        let (tx, _rx) = mpsc::channel(8);
        let sim = SimulatedRanging::new(tx).unwrap();

        sim.run_with_peer(&peer_token()).await.unwrap();
        sim.invalidate().await;

        assert!(sim.run_with_peer(&peer_token()).await.is_err());
    }

    #[tokio::test]
    async fn test_unsupported_provider_refuses_everything() {
        let provider = UnsupportedRanging::new();

        assert!(!provider.is_supported());
        assert!(provider.discovery_token().is_none());
        assert!(matches!(
            provider.run_with_peer(&peer_token()).await,
            Err(RangingError::Unsupported)
        ));
        provider.invalidate().await;
    }
}
