// src/engine/sequencer.rs
//
// The multi-phase caution procedure. Once the supervisor trips:
//
//   A  throw the yellow, record the reference lap L0
//   B  after L0 + wave_delay + 1 laps, send the wave-arounds
//   C  optional class split, gated on operator confirmation
//   D  at L0 + 2 laps and past half distance, set the pace-lap count
//   E  hand control back to the supervisor, which waits for green
//
// Lap gates are observed from telemetry; an empty snapshot holds the current
// phase (no phase advances on stale data). There are no internal timeouts —
// the shutdown signal is the only escape, checked every tick and between
// commands.

use tracing::{debug, info};

use crate::commands::{self, ChatCommander};
use crate::config::Settings;
use crate::engine::{class_split, wave_arounds};
use crate::engine::wave_arounds::WaveRule;
use crate::fleet::Snapshotter;
use crate::supervisor::{Signals, TICK_INTERVAL};
use crate::telemetry::TelemetrySource;

// ── Settings view ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SequencerSettings {
    pub wave_arounds_enabled:  bool,
    pub wave_rule:             WaveRule,
    pub wave_delay_laps:       u32,
    pub class_split_enabled:   bool,
    pub laps_under_safety_car: u32,
}

impl SequencerSettings {
    pub fn from_settings(cfg: &Settings) -> Self {
        Self {
            wave_arounds_enabled:  cfg.wave_arounds_enabled,
            wave_rule:             cfg.wave_rule,
            wave_delay_laps:       cfg.wave_delay_laps,
            class_split_enabled:   cfg.class_split_enabled,
            laps_under_safety_car: cfg.laps_under_safety_car,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CautionOutcome {
    Completed,
    /// Shutdown observed mid-procedure; the supervisor unwinds.
    Interrupted,
}

// ── Procedure ─────────────────────────────────────────────────────────────────

pub async fn run_caution(
    message: &str,
    cfg: &SequencerSettings,
    commander: &mut ChatCommander,
    source: &mut dyn TelemetrySource,
    fleet: &mut Snapshotter,
    signals: &Signals,
) -> CautionOutcome {
    // Phase A — yellow.
    commander.send(&commands::yellow(message)).await;
    let lap_at_yellow = fleet.current().max_laps_completed();
    info!("yellow is out at lap {lap_at_yellow}: {message}");

    // Phase B — wave-arounds, one lap after the configured delay.
    if cfg.wave_arounds_enabled {
        let wave_lap = lap_at_yellow + cfg.wave_delay_laps as i32 + 1;
        loop {
            if signals.shutdown_requested() {
                return CautionOutcome::Interrupted;
            }
            let snap = fleet.current();
            if !snap.is_empty() && snap.max_laps_completed() >= wave_lap {
                break;
            }
            tick(source, fleet).await;
        }

        let waves = wave_arounds::wave_commands(cfg.wave_rule, fleet.current());
        info!("waving {} cars around the safety car", waves.len());
        commander.send_all(&waves, || signals.shutdown_requested()).await;
        if signals.shutdown_requested() {
            return CautionOutcome::Interrupted;
        }
    }

    // Phase C — class split, if the operator confirms before the pace-lap
    // gate is reached.
    let mut class_split_pending = cfg.class_split_enabled;
    if class_split_pending && signals.take_class_split_confirmation() {
        if send_class_split(commander, fleet, signals).await {
            return CautionOutcome::Interrupted;
        }
        class_split_pending = false;
    }

    // Phase D — pace laps. Gated two laps past the yellow and on the leader
    // being past half distance, so the pit lane never closes mid-pitlane.
    let pace_lap = lap_at_yellow + 2;
    loop {
        if signals.shutdown_requested() {
            return CautionOutcome::Interrupted;
        }
        let snap = fleet.current();
        let leader_past_half = snap.leader().map(|l| l.lap_progress > 0.5).unwrap_or(false);
        if !snap.is_empty() && snap.max_laps_completed() >= pace_lap && leader_past_half {
            break;
        }
        if class_split_pending && signals.take_class_split_confirmation() {
            if send_class_split(commander, fleet, signals).await {
                return CautionOutcome::Interrupted;
            }
            class_split_pending = false;
        }
        tick(source, fleet).await;
    }
    if class_split_pending {
        debug!("class split not confirmed within the phase; skipping");
    }

    let remaining = cfg.laps_under_safety_car.saturating_sub(1);
    if remaining == 1 {
        debug!("a pace-lap count of 1 is ignored by the simulator; passing through");
    }
    commander.send(&commands::pace_laps(remaining)).await;
    info!("pace laps set to {remaining} (0 defers to the simulator default)");

    // Phase E — hand-off; the supervisor waits out the green.
    CautionOutcome::Completed
}

/// Returns true when shutdown interrupted the batch.
async fn send_class_split(
    commander: &mut ChatCommander,
    fleet: &Snapshotter,
    signals: &Signals,
) -> bool {
    let commands = class_split::split_class_commands(fleet.current());
    info!("class split confirmed; sending {} end-of-line commands", commands.len());
    commander.send_all(&commands, || signals.shutdown_requested()).await;
    signals.shutdown_requested()
}

async fn tick(source: &mut dyn TelemetrySource, fleet: &mut Snapshotter) {
    tokio::time::sleep(TICK_INTERVAL).await;
    match source.poll() {
        Some(frame) => fleet.update(&frame),
        None => debug!("telemetry unavailable; holding the current phase"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::MockSink;
    use crate::telemetry::{RosterEntry, ScriptedSource, Surface, TelemetryFrame};
    use std::time::Duration;

    /// Three slots: pace car at 0, leader at 1, a lapped car at 2.
    fn frame(leader_laps: i32, leader_progress: f32, lapped_laps: i32) -> TelemetryFrame {
        TelemetryFrame {
            laps_completed: vec![leader_laps, leader_laps, lapped_laps],
            lap_started:    vec![leader_laps + 1; 3],
            lap_progress:   vec![0.0, leader_progress, 0.2],
            surface:        vec![Surface::OnTrack; 3],
            on_pit_road:    vec![false; 3],
            class_id:       vec![11, 0, 0],
            car_flags:      vec![0; 3],
            roster: vec![
                RosterEntry {
                    slot: 0,
                    car_number: "0".into(),
                    class_id: 11,
                    class_est_lap_time: 38.0,
                    is_pace_car: true,
                },
                RosterEntry {
                    slot: 1,
                    car_number: "1".into(),
                    class_id: 0,
                    class_est_lap_time: 40.0,
                    is_pace_car: false,
                },
                RosterEntry {
                    slot: 2,
                    car_number: "2".into(),
                    class_id: 0,
                    class_est_lap_time: 40.0,
                    is_pace_car: false,
                },
            ],
            ..Default::default()
        }
    }

    fn settings() -> SequencerSettings {
        SequencerSettings {
            wave_arounds_enabled:  true,
            wave_rule:             WaveRule::LappedCars,
            wave_delay_laps:       0,
            class_split_enabled:   false,
            laps_under_safety_car: 3,
        }
    }

    fn commander(sink: &MockSink) -> ChatCommander {
        ChatCommander::with_pacing(Box::new(sink.clone()), Duration::ZERO, Duration::ZERO)
    }

    #[tokio::test(start_paused = true)]
    async fn full_procedure_in_order_with_half_lap_guard() {
        let sink = MockSink::new();
        let mut commander = commander(&sink);
        let signals = Signals::default();

        let mut fleet = Snapshotter::default();
        fleet.update(&frame(5, 0.30, 4));

        // Lap 6 releases the wave; lap 7 at 0.35 is short of the half-lap
        // guard; 0.60 releases the pace-lap command.
        let mut source = ScriptedSource::default();
        source.push(frame(6, 0.40, 4));
        source.push(frame(7, 0.35, 5));
        source.push(frame(7, 0.60, 5));

        let outcome = run_caution(
            "2 stopped cars",
            &settings(),
            &mut commander,
            &mut source,
            &mut fleet,
            &signals,
        )
        .await;

        assert_eq!(outcome, CautionOutcome::Completed);
        assert_eq!(sink.log(), vec!["!y 2 stopped cars", "!w 2", "!p 2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_snapshots_hold_the_phase_instead_of_advancing() {
        let sink = MockSink::new();
        let mut commander = commander(&sink);
        let signals = Signals::default();

        let mut fleet = Snapshotter::default();
        fleet.update(&frame(5, 0.30, 4));

        let mut source = ScriptedSource::default();
        source.push_gap();
        source.push_gap();
        source.push(frame(6, 0.40, 4));
        source.push(frame(7, 0.60, 5));

        let outcome = run_caution(
            "debris",
            &settings(),
            &mut commander,
            &mut source,
            &mut fleet,
            &signals,
        )
        .await;

        assert_eq!(outcome, CautionOutcome::Completed);
        assert_eq!(sink.log(), vec!["!y debris", "!w 2", "!p 2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_before_the_wave_phase_completes() {
        let sink = MockSink::new();
        let mut commander = commander(&sink);
        let signals = Signals::default();
        signals.request_shutdown();

        let mut fleet = Snapshotter::default();
        fleet.update(&frame(5, 0.30, 4));

        let mut source = ScriptedSource::default();
        source.push(frame(6, 0.40, 4));

        let outcome = run_caution(
            "stopped car",
            &settings(),
            &mut commander,
            &mut source,
            &mut fleet,
            &signals,
        )
        .await;

        assert_eq!(outcome, CautionOutcome::Interrupted);
        // The in-flight yellow is finished; nothing after it goes out.
        assert_eq!(sink.log(), vec!["!y stopped car"]);
    }

    #[tokio::test(start_paused = true)]
    async fn pace_lap_zero_defers_to_the_simulator() {
        let sink = MockSink::new();
        let mut commander = commander(&sink);
        let signals = Signals::default();

        let mut fleet = Snapshotter::default();
        fleet.update(&frame(5, 0.30, 4));

        let mut source = ScriptedSource::default();
        source.push(frame(6, 0.40, 4));
        source.push(frame(7, 0.60, 5));

        let mut cfg = settings();
        cfg.laps_under_safety_car = 0;
        let outcome = run_caution(
            "tow",
            &cfg,
            &mut commander,
            &mut source,
            &mut fleet,
            &signals,
        )
        .await;

        assert_eq!(outcome, CautionOutcome::Completed);
        assert_eq!(sink.log().last().unwrap(), "!p 0");
    }
}
