// Readout — publishes the latest distance/direction measurement

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::NearbyReading;

/// The published measurement, overwritten as a whole on every accepted update
///
/// Direction stays absent until the hardware reports a fix; a reading that
/// omits a field leaves the previously published value in place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangingReading {
    /// Distance to the ranged peer in meters
    pub distance_m: f32,
    /// Unit-ish direction vector toward the ranged peer
    pub direction: Option<[f32; 3]>,
}

impl Default for RangingReading {
    fn default() -> Self {
        Self {
            distance_m: 0.0,
            direction: None,
        }
    }
}

/// Lifecycle of the readout component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadoutState {
    /// Hardware unsupported; the readout never leaves this state
    Inert,
    /// Ready, no active run
    Idle,
    /// A run is active and updates are being published
    Ranging,
    /// Torn down; terminal
    Invalidated,
}

/// Single-target measurement publisher
///
/// Ranges one peer at a time: each update batch is reduced to its first
/// reported object and everything after it is ignored. Multi-peer ranging
/// is out of scope for this component.
///
/// Owned and mutated by the node's event loop only; presentation reads the
/// published value through the shared handle.
pub struct Readout {
    state: ReadoutState,
    reading: Arc<RwLock<RangingReading>>,
}

impl Readout {
    pub fn new(supported: bool) -> Self {
        let state = if supported {
            ReadoutState::Idle
        } else {
            tracing::info!("Ranging unsupported on this device; readout stays inert");
            ReadoutState::Inert
        };
        Self {
            state,
            reading: Arc::new(RwLock::new(RangingReading::default())),
        }
    }

    pub fn state(&self) -> ReadoutState {
        self.state
    }

    /// Shared handle to the published measurement
    pub fn reading_handle(&self) -> Arc<RwLock<RangingReading>> {
        Arc::clone(&self.reading)
    }

    /// Snapshot of the published measurement
    pub fn current(&self) -> RangingReading {
        *self.reading.read()
    }

    /// Note that a run was started or retargeted
    ///
    /// Returns false when the readout cannot range (inert or invalidated).
    pub fn begin_run(&mut self) -> bool {
        match self.state {
            ReadoutState::Idle | ReadoutState::Ranging => {
                self.state = ReadoutState::Ranging;
                true
            }
            ReadoutState::Inert | ReadoutState::Invalidated => false,
        }
    }

    /// Apply a measurement batch; returns true if the published value changed
    pub fn apply_update(&mut self, readings: &[NearbyReading]) -> bool {
        if self.state != ReadoutState::Ranging {
            return false;
        }

        // Single-target policy: only the first reported object counts
        let Some(first) = readings.first() else {
            return false;
        };

        let mut next = *self.reading.read();
        if let Some(distance) = first.distance_m {
            next.distance_m = distance;
        }
        if let Some(direction) = first.direction {
            next.direction = Some(direction);
        }

        let changed = next != *self.reading.read();
        if changed {
            *self.reading.write() = next;
        }
        changed
    }

    /// Tear the readout down; inert readouts stay inert
    pub fn invalidate(&mut self) {
        if self.state != ReadoutState::Inert {
            self.state = ReadoutState::Invalidated;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(distance: Option<f32>, direction: Option<[f32; 3]>) -> NearbyReading {
        NearbyReading::new(distance, direction)
    }

    #[test]
    fn test_supported_readout_starts_idle() {
        let readout = Readout::new(true);
        assert_eq!(readout.state(), ReadoutState::Idle);
        assert_eq!(readout.current(), RangingReading::default());
    }

    #[test]
    fn test_unsupported_readout_is_inert() {
        let mut readout = Readout::new(false);
        assert_eq!(readout.state(), ReadoutState::Inert);
        assert!(!readout.begin_run());

        let changed = readout.apply_update(&[reading(Some(2.5), Some([1.0, 0.0, 0.0]))]);
        assert!(!changed);
        assert_eq!(readout.current().distance_m, 0.0);
        assert_eq!(readout.current().direction, None);
    }

    #[test]
    fn test_updates_before_run_are_ignored() {
        let mut readout = Readout::new(true);

        assert!(!readout.apply_update(&[reading(Some(1.0), None)]));
        assert_eq!(readout.current().distance_m, 0.0);
    }

    #[test]
    fn test_first_object_wins() {
        let mut readout = Readout::new(true);
        assert!(readout.begin_run());

        let batch = [
            reading(Some(1.5), Some([0.0, 1.0, 0.0])),
            reading(Some(9.9), Some([1.0, 0.0, 0.0])),
        ];
        assert!(readout.apply_update(&batch));

        assert_eq!(readout.current().distance_m, 1.5);
        assert_eq!(readout.current().direction, Some([0.0, 1.0, 0.0]));
    }

    #[test]
    fn test_empty_batch_changes_nothing() {
        let mut readout = Readout::new(true);
        readout.begin_run();
        readout.apply_update(&[reading(Some(3.0), None)]);

        assert!(!readout.apply_update(&[]));
        assert_eq!(readout.current().distance_m, 3.0);
    }

    #[test]
    fn test_distance_only_update_retains_direction() {
        let mut readout = Readout::new(true);
        readout.begin_run();
        readout.apply_update(&[reading(Some(2.0), Some([0.1, 0.2, 0.97]))]);

        readout.apply_update(&[reading(Some(2.4), None)]);

        assert_eq!(readout.current().distance_m, 2.4);
        assert_eq!(readout.current().direction, Some([0.1, 0.2, 0.97]));
    }

    #[test]
    fn test_direction_only_update_retains_distance() {
        let mut readout = Readout::new(true);
        readout.begin_run();
        readout.apply_update(&[reading(Some(2.0), Some([0.1, 0.2, 0.97]))]);

        readout.apply_update(&[reading(None, Some([0.0, 0.0, 1.0]))]);

        assert_eq!(readout.current().distance_m, 2.0);
        assert_eq!(readout.current().direction, Some([0.0, 0.0, 1.0]));
    }

    #[test]
    fn test_retarget_keeps_publishing() {
        let mut readout = Readout::new(true);
        readout.begin_run();
        readout.apply_update(&[reading(Some(1.0), None)]);

        // Retarget: still Ranging, values keep flowing
        assert!(readout.begin_run());
        assert_eq!(readout.state(), ReadoutState::Ranging);
        readout.apply_update(&[reading(Some(5.0), None)]);
        assert_eq!(readout.current().distance_m, 5.0);
    }

    #[test]
    fn test_invalidate_stops_updates() {
        let mut readout = Readout::new(true);
        readout.begin_run();
        readout.apply_update(&[reading(Some(1.0), None)]);

        readout.invalidate();
        assert_eq!(readout.state(), ReadoutState::Invalidated);
        assert!(!readout.begin_run());
        assert!(!readout.apply_update(&[reading(Some(8.0), None)]));
        assert_eq!(readout.current().distance_m, 1.0);
    }

    #[test]
    fn test_invalidate_on_inert_readout_stays_inert() {
        let mut readout = Readout::new(false);
        readout.invalidate();
        assert_eq!(readout.state(), ReadoutState::Inert);
    }

    #[test]
    fn test_identical_update_reports_no_change() {
        let mut readout = Readout::new(true);
        readout.begin_run();
        assert!(readout.apply_update(&[reading(Some(1.0), Some([0.0, 0.0, 1.0]))]));
        assert!(!readout.apply_update(&[reading(Some(1.0), Some([0.0, 0.0, 1.0]))]));
    }
}
