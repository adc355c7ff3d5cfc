// src/detectors/stopped.rs
//
// Zero-delta probe. A car whose composite progress is bitwise-identical
// across two frames has not moved at all — the feed updates progress every
// sample, so even a crawling car shows a delta. Cars anywhere in the pit
// area are exempt (stationary on purpose).
//
// Stall guard: when the whole field reads as stopped the feed itself has
// stalled, not the race. Above the lag threshold the tick's events are
// suppressed wholesale.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::events::{DetectionEvent, DetectionKind};
use crate::fleet::SnapshotPair;

use super::Detector;

pub struct StoppedDetector {
    /// 0 = auto: three quarters of the eligible fleet.
    lag_threshold: usize,
}

impl StoppedDetector {
    pub fn new(lag_threshold: usize) -> Self {
        Self { lag_threshold }
    }

    fn effective_threshold(&self, fleet_size: usize) -> usize {
        if self.lag_threshold > 0 {
            self.lag_threshold
        } else {
            fleet_size * 3 / 4
        }
    }
}

impl Detector for StoppedDetector {
    fn kind(&self) -> DetectionKind {
        DetectionKind::Stopped
    }

    fn detect(&mut self, pair: SnapshotPair<'_>, now: DateTime<Utc>) -> Vec<DetectionEvent> {
        let mut stopped = Vec::new();

        for current in &pair.current.drivers {
            if current.in_pit_area() {
                continue;
            }
            let Some(previous) = pair.previous.get(current.slot) else {
                continue;
            };
            if current.total_progress.to_bits() == previous.total_progress.to_bits() {
                debug!(
                    slot = current.slot,
                    car = %current.car_number,
                    progress = current.total_progress,
                    "zero progress delta",
                );
                stopped.push(current.clone());
            }
        }

        let threshold = self.effective_threshold(pair.current.drivers.len());
        if stopped.len() > threshold {
            warn!(
                "{} of {} drivers report zero delta (threshold {}); suspecting a \
                 telemetry stall and suppressing this tick's stopped events",
                stopped.len(),
                pair.current.drivers.len(),
                threshold,
            );
            return Vec::new();
        }

        stopped
            .into_iter()
            .map(|d| DetectionEvent::for_driver(DetectionKind::Stopped, d, now))
            .collect()
    }
}
