// src/detectors/meatball.rs
//
// Repair-flag probe: a car shown the meatball must pit for repairs, which
// usually means it is trailing debris or limping on the racing line.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::events::{DetectionEvent, DetectionKind};
use crate::fleet::SnapshotPair;
use crate::telemetry::FLAG_REPAIR;

use super::Detector;

pub struct MeatballDetector;

impl Detector for MeatballDetector {
    fn kind(&self) -> DetectionKind {
        DetectionKind::Meatball
    }

    fn detect(&mut self, pair: SnapshotPair<'_>, now: DateTime<Utc>) -> Vec<DetectionEvent> {
        pair.current
            .drivers
            .iter()
            .filter(|d| d.flags & FLAG_REPAIR != 0)
            .map(|d| {
                debug!("car #{} (slot {}) has the meatball flag ({:#010x})",
                       d.car_number, d.slot, d.flags);
                DetectionEvent::for_driver(DetectionKind::Meatball, d.clone(), now)
            })
            .collect()
    }
}
