// src/telemetry.rs
//
// The inbound telemetry interface: an advisory, pollable view of the session
// and every fleet slot. Reads may tear slightly — the snapshotter derives its
// own composite progress from the two primary fields rather than trusting any
// precomputed total.
//
// Two sources ship with the crate:
//   ReplaySource   — NDJSON frame file, one frame per line (offline runs)
//   ScriptedSource — in-memory frame sequence (tests, dry runs)
// The live shared-memory reader is an external collaborator behind the same
// trait.

use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

// ── Session flag bits ─────────────────────────────────────────────────────────

pub const FLAG_CHECKERED: u32 = 0x0000_0001;
pub const FLAG_WHITE: u32     = 0x0000_0002;
pub const FLAG_GREEN: u32     = 0x0000_0004;
pub const FLAG_YELLOW: u32    = 0x0000_0008;
pub const FLAG_CAUTION: u32   = 0x0000_4000;
/// Per-car bit: repairs required before rejoining (the "meatball").
pub const FLAG_REPAIR: u32    = 0x0010_0000;

// ── Session descriptors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    #[default]
    Practice,
    Qualify,
    Warmup,
    Race,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Invalid,
    GetInCar,
    Warmup,
    ParadeLaps,
    Racing,
    Checkered,
    CoolDown,
}

/// Track-surface classification for a fleet slot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    #[default]
    NotInWorld,
    OffTrack,
    InPitStall,
    ApproachingPits,
    OnTrack,
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// Static driver-info table entry, keyed by fleet slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    pub slot:               usize,
    pub car_number:         String,
    pub class_id:           u32,
    pub class_est_lap_time: f32,
    #[serde(default)]
    pub is_pace_car:        bool,
}

/// One advisory sample of the world. Per-slot vectors are indexed by fleet
/// slot; `lap_progress` may be negative as a feed quirk (treated as missing).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub session_num:    usize,
    pub session_kind:   SessionKind,
    pub session_state:  SessionState,
    pub session_flags:  u32,
    pub laps_completed: Vec<i32>,
    pub lap_started:    Vec<i32>,
    pub lap_progress:   Vec<f32>,
    pub surface:        Vec<Surface>,
    pub on_pit_road:    Vec<bool>,
    pub class_id:       Vec<u32>,
    #[serde(default)]
    pub car_flags:      Vec<u32>,
    pub roster:         Vec<RosterEntry>,
}

impl TelemetryFrame {
    pub fn green_flag(&self) -> bool {
        self.session_flags & FLAG_GREEN != 0
    }

    /// True when the race is underway: green bit set, or the session-state
    /// word already reports racing (green cleared after the start).
    pub fn race_underway(&self) -> bool {
        self.green_flag() || self.session_state == SessionState::Racing
    }
}

// ── Source trait ──────────────────────────────────────────────────────────────

pub trait TelemetrySource: Send {
    /// Sample the feed. None means the feed is unavailable this tick; the
    /// supervisor treats that as a transient disconnect.
    fn poll(&mut self) -> Option<TelemetryFrame>;

    /// Whether the underlying transport is up at all.
    fn connected(&self) -> bool;
}

// ── Replay source ─────────────────────────────────────────────────────────────

/// Replays an NDJSON frame dump, one frame per poll. Exhaustion reads as a
/// disconnect.
pub struct ReplaySource {
    frames: VecDeque<TelemetryFrame>,
}

impl ReplaySource {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading frame dump {}", path.display()))?;

        let mut frames = VecDeque::new();
        for (n, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<TelemetryFrame>(line) {
                Ok(frame) => frames.push_back(frame),
                Err(e) => warn!("skipping unparseable frame at line {}: {}", n + 1, e),
            }
        }
        Ok(Self { frames })
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl TelemetrySource for ReplaySource {
    fn poll(&mut self) -> Option<TelemetryFrame> {
        self.frames.pop_front()
    }

    fn connected(&self) -> bool {
        !self.frames.is_empty()
    }
}

// ── Scripted source ───────────────────────────────────────────────────────────

/// In-memory frame sequence for tests and dry runs. `None` entries simulate
/// transient feed loss; when the script runs out, the last frame repeats so a
/// procedure in flight keeps observing a stable world.
#[derive(Default)]
pub struct ScriptedSource {
    frames: VecDeque<Option<TelemetryFrame>>,
    last:   Option<TelemetryFrame>,
}

impl ScriptedSource {
    pub fn new(frames: impl IntoIterator<Item = Option<TelemetryFrame>>) -> Self {
        Self { frames: frames.into_iter().collect(), last: None }
    }

    pub fn push(&mut self, frame: TelemetryFrame) {
        self.frames.push_back(Some(frame));
    }

    pub fn push_gap(&mut self) {
        self.frames.push_back(None);
    }
}

impl TelemetrySource for ScriptedSource {
    fn poll(&mut self) -> Option<TelemetryFrame> {
        match self.frames.pop_front() {
            Some(Some(frame)) => {
                self.last = Some(frame.clone());
                Some(frame)
            }
            Some(None) => None,
            None => self.last.clone(),
        }
    }

    fn connected(&self) -> bool {
        !self.frames.is_empty() || self.last.is_some()
    }
}
