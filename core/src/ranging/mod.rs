// Ranging subsystem
//
// The hardware seam is the RangingProvider trait. Providers push measurement
// batches into an mpsc channel handed over at construction; the node drains
// that channel on its event loop and feeds the Readout publisher. Platform
// bindings implement the trait over real UWB hardware; this crate ships a
// simulator and an always-unsupported provider.

mod readout;
mod sim;

pub use readout::{RangingReading, Readout, ReadoutState};
pub use sim::{SimulatedRanging, UnsupportedRanging};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::token::CapabilityToken;

/// Errors from the ranging hardware seam
#[derive(Error, Debug, Clone)]
pub enum RangingError {
    #[error("Ranging unsupported on this device")]
    Unsupported,
    #[error("Ranging session error: {0}")]
    Session(String),
}

/// One nearby-object measurement as the hardware reports it
///
/// Fields are independently optional: hardware may refresh distance without
/// a direction fix and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NearbyReading {
    pub distance_m: Option<f32>,
    pub direction: Option<[f32; 3]>,
}

impl NearbyReading {
    pub fn new(distance_m: Option<f32>, direction: Option<[f32; 3]>) -> Self {
        Self {
            distance_m,
            direction,
        }
    }
}

/// Hardware ranging capability
///
/// One run at a time: `run_with_peer` on an already-running provider
/// retargets it, implicitly ending the previous run.
#[async_trait]
pub trait RangingProvider: Send + Sync {
    /// Whether this device can range at all
    fn is_supported(&self) -> bool;

    /// This device's discovery credential; None when ranging is unsupported
    fn discovery_token(&self) -> Option<CapabilityToken>;

    /// Start or retarget a ranging run against a peer's token
    async fn run_with_peer(&self, token: &CapabilityToken) -> Result<(), RangingError>;

    /// Tear down the active run and release the hardware
    async fn invalidate(&self);
}
