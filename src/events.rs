// src/events.rs
//
// Shared domain types flowing through paceward: detection events emitted by
// the probes, the supervisor state observable, and caution-cycle bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fleet::Driver;

// ── Detection types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DetectionKind {
    Random,
    Stopped,
    OffTrack,
    Meatball,
    Tow,
}

impl DetectionKind {
    pub const ALL: [DetectionKind; 5] = [
        Self::Random,
        Self::Stopped,
        Self::OffTrack,
        Self::Meatball,
        Self::Tow,
    ];
}

impl std::fmt::Display for DetectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Random   => write!(f, "random"),
            Self::Stopped  => write!(f, "stopped"),
            Self::OffTrack => write!(f, "off-track"),
            Self::Meatball => write!(f, "meatball"),
            Self::Tow      => write!(f, "tow"),
        }
    }
}

/// One observation from a detector. `driver` is None for driverless trips
/// (the random detector) — the aggregator treats those as cluster-neutral.
#[derive(Debug, Clone)]
pub struct DetectionEvent {
    pub kind:   DetectionKind,
    pub driver: Option<Driver>,
    pub at:     DateTime<Utc>,
}

impl DetectionEvent {
    pub fn for_driver(kind: DetectionKind, driver: Driver, at: DateTime<Utc>) -> Self {
        Self { kind, driver: Some(driver), at }
    }

    pub fn driverless(kind: DetectionKind, at: DateTime<Utc>) -> Self {
        Self { kind, driver: None, at }
    }

    /// Fleet slot of the offending driver, if any.
    pub fn slot(&self) -> Option<usize> {
        self.driver.as_ref().map(|d| d.slot)
    }
}

// ── Supervisor state observable ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Connecting,
    Connected,
    AwaitingRaceSession,
    AwaitingGreen,
    Monitoring,
    CautionActive,
    Faulted,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped             => write!(f, "STOPPED"),
            Self::Connecting          => write!(f, "CONNECTING"),
            Self::Connected           => write!(f, "CONNECTED"),
            Self::AwaitingRaceSession => write!(f, "AWAITING_RACE_SESSION"),
            Self::AwaitingGreen       => write!(f, "AWAITING_GREEN"),
            Self::Monitoring          => write!(f, "MONITORING"),
            Self::CautionActive       => write!(f, "CAUTION_ACTIVE"),
            Self::Faulted             => write!(f, "FAULTED"),
        }
    }
}

// ── Caution-cycle counters ────────────────────────────────────────────────────

/// Mutated only by the supervisor during a trip.
#[derive(Debug, Clone, Default)]
pub struct CautionLog {
    pub total:          u32,
    pub last_trigger:   Option<DateTime<Utc>>,
    pub lap_at_trigger: i32,
}
