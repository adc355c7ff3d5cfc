// src/detectors/random.rs
//
// Chance caution. Each tick draws uniformly in [0, 1); below the configured
// probability it emits one driverless event and burns one unit of its
// occurrence budget. The budget caps *attempted* trips — the supervisor's
// caution ceiling is the hard cap on delivered ones.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::events::{DetectionEvent, DetectionKind};
use crate::fleet::SnapshotPair;

use super::{Detector, DetectorState};

pub struct RandomDetector {
    probability: f64,
    remaining:   u32,
    rng:         StdRng,
}

impl RandomDetector {
    pub fn new(probability: f64, budget: u32) -> Self {
        Self::with_rng(probability, budget, StdRng::from_entropy())
    }

    /// Deterministic construction for tests.
    pub fn with_rng(probability: f64, budget: u32, rng: StdRng) -> Self {
        Self { probability, remaining: budget, rng }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl Detector for RandomDetector {
    fn kind(&self) -> DetectionKind {
        DetectionKind::Random
    }

    fn should_run(&self, state: &DetectorState) -> bool {
        self.remaining > 0 && state.race_start.is_some() && state.in_window
    }

    fn detect(&mut self, _pair: SnapshotPair<'_>, now: DateTime<Utc>) -> Vec<DetectionEvent> {
        if self.rng.gen::<f64>() >= self.probability {
            return Vec::new();
        }
        self.remaining -= 1;
        info!("random caution draw hit ({} attempts left)", self.remaining);
        vec![DetectionEvent::driverless(DetectionKind::Random, now)]
    }
}
