// src/fleet.rs
//
// Double-buffered fleet state. Each tick rebuilds a wholesale snapshot of
// every driver from the telemetry frame; the (previous, current) pair is the
// only state a delta detector needs. No driver object lives across ticks.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::telemetry::{Surface, TelemetryFrame};

// ── Driver record ─────────────────────────────────────────────────────────────

/// Value snapshot of one fleet slot at one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub slot:               usize,
    pub car_number:         String,
    pub class_id:           u32,
    pub class_est_lap_time: f32,
    pub is_pace_car:        bool,
    pub laps_completed:     i32,
    pub lap_started:        i32,
    pub lap_progress:       f32,
    /// laps_completed + lap_progress — the canonical running-order key.
    pub total_progress:     f64,
    pub surface:            Surface,
    pub on_pit_road:        bool,
    pub flags:              u32,
}

impl Driver {
    /// On pit road, in a stall, or on the way in — excluded from delta-based
    /// detection.
    pub fn in_pit_area(&self) -> bool {
        self.on_pit_road
            || matches!(self.surface, Surface::InPitStall | Surface::ApproachingPits)
    }
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// One tick's view of the fleet. `drivers` holds only detection-eligible
/// records: the pace car, not-in-world slots, and slots reporting negative
/// lap progress are elided. The pace car is retained out-of-band because the
/// procedure sequencer orders the field relative to it.
#[derive(Debug, Clone, Default)]
pub struct FleetSnapshot {
    pub drivers:  Vec<Driver>,
    pub pace_car: Option<Driver>,
}

impl FleetSnapshot {
    pub fn from_frame(frame: &TelemetryFrame) -> Self {
        let mut snapshot = Self::default();

        for entry in &frame.roster {
            let slot = entry.slot;
            let laps_completed = frame.laps_completed.get(slot).copied().unwrap_or(-1);
            let lap_progress   = frame.lap_progress.get(slot).copied().unwrap_or(-1.0);
            let surface        = frame.surface.get(slot).copied().unwrap_or_default();

            let driver = Driver {
                slot,
                car_number:         entry.car_number.clone(),
                class_id:           entry.class_id,
                class_est_lap_time: entry.class_est_lap_time,
                is_pace_car:        entry.is_pace_car,
                laps_completed,
                lap_started:        frame.lap_started.get(slot).copied().unwrap_or(0),
                lap_progress,
                total_progress:     laps_completed as f64 + lap_progress as f64,
                surface,
                on_pit_road:        frame.on_pit_road.get(slot).copied().unwrap_or(false),
                flags:              frame.car_flags.get(slot).copied().unwrap_or(0),
            };

            if driver.is_pace_car {
                snapshot.pace_car = Some(driver);
                continue;
            }
            if surface == Surface::NotInWorld {
                continue;
            }
            if lap_progress < 0.0 {
                debug!(slot, lap_progress, "eliding slot with negative lap progress");
                continue;
            }
            snapshot.drivers.push(driver);
        }

        snapshot
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&Driver> {
        self.drivers.iter().find(|d| d.slot == slot)
    }

    /// Highest completed lap across non-pit drivers — the reference lap for
    /// procedure gating.
    pub fn max_laps_completed(&self) -> i32 {
        self.drivers
            .iter()
            .filter(|d| !d.on_pit_road)
            .map(|d| d.laps_completed)
            .max()
            .unwrap_or(0)
    }

    /// Overall leader by composite progress.
    pub fn leader(&self) -> Option<&Driver> {
        self.drivers
            .iter()
            .max_by(|a, b| {
                a.total_progress
                    .partial_cmp(&b.total_progress)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

// ── Snapshotter ───────────────────────────────────────────────────────────────

/// Owns the (previous, current) pair. On the first tick previous equals
/// current, so no deltas are possible.
#[derive(Debug, Default)]
pub struct Snapshotter {
    current:  FleetSnapshot,
    previous: FleetSnapshot,
    primed:   bool,
}

/// Borrowed view handed to detectors.
#[derive(Clone, Copy)]
pub struct SnapshotPair<'a> {
    pub current:  &'a FleetSnapshot,
    pub previous: &'a FleetSnapshot,
}

impl Snapshotter {
    pub fn update(&mut self, frame: &TelemetryFrame) {
        let next = FleetSnapshot::from_frame(frame);
        if self.primed {
            self.previous = std::mem::take(&mut self.current);
        } else {
            self.previous = next.clone();
            self.primed = true;
        }
        self.current = next;
    }

    pub fn current(&self) -> &FleetSnapshot {
        &self.current
    }

    pub fn pair(&self) -> SnapshotPair<'_> {
        SnapshotPair { current: &self.current, previous: &self.previous }
    }
}

// ── Test fixtures ─────────────────────────────────────────────────────────────
