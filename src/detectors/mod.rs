// src/detectors/mod.rs
//
// Detection probes. Each detector inspects the (previous, current) snapshot
// pair and emits typed events for affected drivers; none of them mutates the
// snapshots. `should_run` lets the supervisor skip a probe outside its window
// without the probe carrying scheduling logic of its own.

pub mod meatball;
pub mod off_track;
pub mod random;
pub mod stopped;
pub mod tow;

use chrono::{DateTime, Utc};

use crate::config::Settings;
use crate::events::{DetectionEvent, DetectionKind, SupervisorState};
use crate::fleet::SnapshotPair;

/// Scheduling context handed to `should_run` each tick.
#[derive(Debug, Clone, Copy)]
pub struct DetectorState {
    pub now:              DateTime<Utc>,
    pub race_start:       Option<DateTime<Utc>>,
    pub laps_since_start: i32,
    /// Whether the current minute falls inside the earliest/latest caution
    /// window. Probes that only make sense when a trip could land (random)
    /// skip themselves outside it.
    pub in_window:        bool,
    pub supervisor:       SupervisorState,
}

pub trait Detector: Send {
    fn kind(&self) -> DetectionKind;

    fn should_run(&self, _state: &DetectorState) -> bool {
        true
    }

    fn detect(&mut self, pair: SnapshotPair<'_>, now: DateTime<Utc>) -> Vec<DetectionEvent>;
}

/// Assemble the enabled probe set from the settings snapshot.
pub fn build_detectors(cfg: &Settings) -> Vec<Box<dyn Detector>> {
    let mut set: Vec<Box<dyn Detector>> = Vec::new();
    if cfg.random_enabled {
        set.push(Box::new(random::RandomDetector::new(
            cfg.random_probability,
            cfg.random_max_occurrences,
        )));
    }
    if cfg.stopped_enabled {
        set.push(Box::new(stopped::StoppedDetector::new(cfg.stopped_lag_threshold)));
    }
    if cfg.off_track_enabled {
        set.push(Box::new(off_track::OffTrackDetector));
    }
    if cfg.meatball_enabled {
        set.push(Box::new(meatball::MeatballDetector));
    }
    if cfg.tow_enabled {
        set.push(Box::new(tow::TowDetector));
    }
    set
}

/// Run every eligible probe against the pair and collect the events.
pub fn run_all(
    detectors: &mut [Box<dyn Detector>],
    state: &DetectorState,
    pair: SnapshotPair<'_>,
) -> Vec<DetectionEvent> {
    let mut events = Vec::new();
    for detector in detectors.iter_mut() {
        if !detector.should_run(state) {
            continue;
        }
        events.extend(detector.detect(pair, state.now));
    }
    events
}
