// src/detectors/off_track.rs
//
// Surface-classification probe: any car the feed classifies as off the
// racing surface, excluding cars on pit road (grass next to the pit lane is
// not an incident).

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::events::{DetectionEvent, DetectionKind};
use crate::fleet::SnapshotPair;
use crate::telemetry::Surface;

use super::Detector;

pub struct OffTrackDetector;

impl Detector for OffTrackDetector {
    fn kind(&self) -> DetectionKind {
        DetectionKind::OffTrack
    }

    fn detect(&mut self, pair: SnapshotPair<'_>, now: DateTime<Utc>) -> Vec<DetectionEvent> {
        pair.current
            .drivers
            .iter()
            .filter(|d| d.surface == Surface::OffTrack && !d.on_pit_road)
            .map(|d| {
                debug!(slot = d.slot, car = %d.car_number, "off track");
                DetectionEvent::for_driver(DetectionKind::OffTrack, d.clone(), now)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::testkit::{make_driver, snapshot_of};

    #[test]
    fn flags_off_track_cars_only() {
        let mut off = make_driver(1, 4, 0.30);
        off.surface = Surface::OffTrack;
        let mut off_but_pitting = make_driver(2, 4, 0.31);
        off_but_pitting.surface = Surface::OffTrack;
        off_but_pitting.on_pit_road = true;
        let racing = make_driver(3, 4, 0.32);

        let snap = snapshot_of(vec![off, off_but_pitting, racing]);
        let mut det = OffTrackDetector;
        let events = det.detect(SnapshotPair { current: &snap, previous: &snap }, Utc::now());

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].slot(), Some(1));
        assert_eq!(events[0].kind, DetectionKind::OffTrack);
    }
}
