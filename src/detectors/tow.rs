// src/detectors/tow.rs
//
// Teleport probe. A car that jumps straight to its pit stall without ever
// being classified as approaching the pits has used the tow interface — it
// left a wreck somewhere on track. The emitted event carries the *previous*
// frame's record so the lap position reflects the incident location, not the
// pit stall, which is what proximity clustering needs.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::events::{DetectionEvent, DetectionKind};
use crate::fleet::SnapshotPair;
use crate::telemetry::Surface;

use super::Detector;

pub struct TowDetector;

impl Detector for TowDetector {
    fn kind(&self) -> DetectionKind {
        DetectionKind::Tow
    }

    fn detect(&mut self, pair: SnapshotPair<'_>, now: DateTime<Utc>) -> Vec<DetectionEvent> {
        let mut events = Vec::new();

        for current in &pair.current.drivers {
            if current.surface != Surface::InPitStall {
                continue;
            }
            let Some(previous) = pair.previous.get(current.slot) else {
                continue;
            };
            let drove_in = matches!(
                previous.surface,
                Surface::InPitStall | Surface::ApproachingPits
            ) || previous.on_pit_road;
            if drove_in {
                continue;
            }
            debug!(
                slot = current.slot,
                car = %current.car_number,
                from = ?previous.surface,
                lap_progress = previous.lap_progress,
                "towed to pits",
            );
            events.push(DetectionEvent::for_driver(
                DetectionKind::Tow,
                previous.clone(),
                now,
            ));
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::testkit::{make_driver, snapshot_of};

    #[test]
    fn teleport_to_stall_is_a_tow_carrying_the_incident_position() {
        let wrecked_on_track = make_driver(1, 8, 0.42);
        let mut now_in_stall = make_driver(1, 8, 0.42);
        now_in_stall.surface = Surface::InPitStall;
        now_in_stall.lap_progress = 0.95;

        let previous = snapshot_of(vec![wrecked_on_track]);
        let current  = snapshot_of(vec![now_in_stall]);

        let mut det = TowDetector;
        let events = det.detect(SnapshotPair { current: &current, previous: &previous }, Utc::now());

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DetectionKind::Tow);
        // Incident location, not the stall.
        assert_eq!(events[0].driver.as_ref().unwrap().lap_progress, 0.42);
    }

    #[test]
    fn normal_pit_entry_is_not_a_tow() {
        let mut approaching = make_driver(1, 8, 0.90);
        approaching.surface = Surface::ApproachingPits;
        let mut stalled = make_driver(1, 8, 0.95);
        stalled.surface = Surface::InPitStall;

        let previous = snapshot_of(vec![approaching]);
        let current  = snapshot_of(vec![stalled]);

        let mut det = TowDetector;
        assert!(det
            .detect(SnapshotPair { current: &current, previous: &previous }, Utc::now())
            .is_empty());
    }

    #[test]
    fn pit_road_entry_is_not_a_tow() {
        let mut on_pit_road = make_driver(1, 8, 0.93);
        on_pit_road.on_pit_road = true;
        let mut stalled = make_driver(1, 8, 0.95);
        stalled.surface = Surface::InPitStall;

        let previous = snapshot_of(vec![on_pit_road]);
        let current  = snapshot_of(vec![stalled]);

        let mut det = TowDetector;
        assert!(det
            .detect(SnapshotPair { current: &current, previous: &previous }, Utc::now())
            .is_empty());
    }
}
