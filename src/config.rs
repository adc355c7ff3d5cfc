// src/config.rs
//
// In-memory configuration surface. The settings file is JSON read once at
// startup; every caution cycle re-reads the shared cell exactly once at cycle
// start, so a mid-cycle change never perturbs an in-flight procedure.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::engine::wave_arounds::WaveRule;
use crate::events::DetectionKind;

pub type SharedSettings = Arc<RwLock<Settings>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Detectors
    pub random_enabled:         bool,
    /// Per-tick draw probability in [0, 1].
    pub random_probability:     f64,
    /// Soft cap on attempted random trips per race.
    pub random_max_occurrences: u32,
    pub stopped_enabled:        bool,
    /// Zero-delta driver count above which a tick's stopped events are
    /// suppressed as a suspected telemetry stall. 0 = three quarters of the
    /// eligible fleet.
    pub stopped_lag_threshold:  usize,
    pub off_track_enabled:      bool,
    pub meatball_enabled:       bool,
    pub tow_enabled:            bool,

    // Threshold aggregation
    pub per_type_thresholds:    HashMap<DetectionKind, u32>,
    pub per_type_weights:       HashMap<DetectionKind, f64>,
    pub accumulative_threshold: f64,
    pub window_seconds:         u32,
    pub proximity_enabled:      bool,
    /// Cluster distance in lap fractions, (0, 1].
    pub proximity_distance:     f64,
    /// Threshold multiplier (>= 1) applied inside the race-start window.
    pub race_start_multiplier:         f64,
    pub race_start_multiplier_seconds: u32,

    // Eligibility
    /// 0 = unlimited.
    pub max_cautions:           u32,
    pub earliest_minute:        f64,
    pub latest_minute:          f64,
    pub minimum_minutes_between: f64,

    // Procedure
    pub laps_under_safety_car:  u32,
    pub wave_arounds_enabled:   bool,
    /// Laps behind the safety car before wave-arounds go out.
    pub wave_delay_laps:        u32,
    pub wave_rule:              WaveRule,
    pub class_split_enabled:    bool,
}

impl Default for Settings {
    fn default() -> Self {
        let per_type_thresholds = HashMap::from([
            (DetectionKind::Random, 1),
            (DetectionKind::Stopped, 2),
            (DetectionKind::OffTrack, 4),
            (DetectionKind::Meatball, 2),
            (DetectionKind::Tow, 2),
        ]);
        let per_type_weights = HashMap::from([
            (DetectionKind::Random, 1.0),
            (DetectionKind::Stopped, 2.0),
            (DetectionKind::OffTrack, 1.0),
            (DetectionKind::Meatball, 1.0),
            (DetectionKind::Tow, 2.0),
        ]);

        Self {
            random_enabled:         false,
            random_probability:     0.01,
            random_max_occurrences: 1,
            stopped_enabled:        true,
            stopped_lag_threshold:  0,
            off_track_enabled:      true,
            meatball_enabled:       false,
            tow_enabled:            false,

            per_type_thresholds,
            per_type_weights,
            accumulative_threshold: 7.0,
            window_seconds:         5,
            proximity_enabled:      false,
            proximity_distance:     0.05,
            race_start_multiplier:  1.5,
            race_start_multiplier_seconds: 300,

            max_cautions:            2,
            earliest_minute:         0.0,
            latest_minute:           999.0,
            minimum_minutes_between: 5.0,

            laps_under_safety_car: 3,
            wave_arounds_enabled:  true,
            wave_delay_laps:       1,
            wave_rule:             WaveRule::LappedCars,
            class_split_enabled:   false,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing settings file {}", path.display()))
    }

    pub fn shared(self) -> SharedSettings {
        Arc::new(RwLock::new(self))
    }

    pub fn threshold_for(&self, kind: DetectionKind) -> u32 {
        self.per_type_thresholds.get(&kind).copied().unwrap_or(u32::MAX)
    }

    pub fn weight_for(&self, kind: DetectionKind) -> f64 {
        self.per_type_weights.get(&kind).copied().unwrap_or(0.0)
    }

    /// Field-level validation with the severity split the settings UI
    /// expects: errors block startup, warnings are operator advisories.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.latest_minute <= self.earliest_minute {
            issues.push(ValidationIssue::error(
                "latest_minute",
                "Latest minute must be greater than the earliest minute",
            ));
        }
        if self.earliest_minute < 0.0 {
            issues.push(ValidationIssue::warning(
                "earliest_minute",
                "Negative earliest minute is treated as race start",
            ));
        }
        if self.minimum_minutes_between < 0.0 {
            issues.push(ValidationIssue::warning(
                "minimum_minutes_between",
                "Negative spacing disables the gap between cautions",
            ));
        }
        if self.laps_under_safety_car < 1 {
            issues.push(ValidationIssue::warning(
                "laps_under_safety_car",
                "Less than 1 lap defers the pace-lap count to the simulator",
            ));
        }
        if self.wave_arounds_enabled && self.wave_delay_laps >= self.laps_under_safety_car {
            issues.push(ValidationIssue::warning(
                "wave_delay_laps",
                "Wave arounds will never happen: delay is not under the pace-lap count",
            ));
        }
        if !(0.0..=1.0).contains(&self.random_probability) {
            issues.push(ValidationIssue::warning(
                "random_probability",
                "Outside 0-1 range; the draw clamps to certainty or never",
            ));
        }
        if self.race_start_multiplier < 1.0 {
            issues.push(ValidationIssue::error(
                "race_start_multiplier",
                "Race-start multiplier must be at least 1",
            ));
        }
        if self.proximity_enabled && !(self.proximity_distance > 0.0 && self.proximity_distance <= 1.0) {
            issues.push(ValidationIssue::error(
                "proximity_distance",
                "Proximity distance must be a lap fraction in (0, 1]",
            ));
        }
        if self.window_seconds == 0 {
            issues.push(ValidationIssue::error(
                "window_seconds",
                "Event window must be at least one second",
            ));
        }

        issues
    }
}

// ── Validation issues ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub field:    &'static str,
    pub severity: Severity,
    pub message:  &'static str,
}

impl ValidationIssue {
    fn error(field: &'static str, message: &'static str) -> Self {
        Self { field, severity: Severity::Error, message }
    }

    fn warning(field: &'static str, message: &'static str) -> Self {
        Self { field, severity: Severity::Warning, message }
    }
}
