// src/supervisor.rs
//
// The supervisory state machine. Owns the telemetry connection, the
// snapshotter, the detector set, the aggregator, and the command sink; gates
// activity on session type and flags; enforces the eligibility window; and
// drives the one-second tick.
//
// Control-plane coupling is three polled signals plus one observable: the UI
// task sets shutdown / manual-trip / skip-wait-for-green (and the class-split
// confirmation), the supervisor consumes them at its own pace, and the state
// value flows the other way through a watch channel. Nothing re-enters the
// core from outside.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::commands::ChatCommander;
use crate::config::{Settings, SharedSettings};
use crate::detectors::{self, Detector, DetectorState};
use crate::engine::sequencer::{self, CautionOutcome, SequencerSettings};
use crate::engine::threshold::{ThresholdAggregator, ThresholdSettings};
use crate::events::{CautionLog, SupervisorState};
use crate::fleet::Snapshotter;
use crate::telemetry::{SessionKind, TelemetryFrame, TelemetrySource};

/// Nominal tick cadence; jitter is acceptable.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

// ── Control signals ───────────────────────────────────────────────────────────

/// Latching flags shared with the control task. Set from outside, polled and
/// (where noted) consumed by the supervisor.
#[derive(Debug, Default)]
pub struct Signals {
    shutdown:            AtomicBool,
    manual_trip:         AtomicBool,
    skip_wait_for_green: AtomicBool,
    class_split_confirm: AtomicBool,
}

impl Signals {
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn request_manual_trip(&self) {
        self.manual_trip.store(true, Ordering::SeqCst);
    }

    /// Consumes the signal.
    pub fn take_manual_trip(&self) -> bool {
        self.manual_trip.swap(false, Ordering::SeqCst)
    }

    pub fn request_skip_wait_for_green(&self) {
        self.skip_wait_for_green.store(true, Ordering::SeqCst);
    }

    /// Consumes the signal.
    pub fn take_skip_wait_for_green(&self) -> bool {
        self.skip_wait_for_green.swap(false, Ordering::SeqCst)
    }

    pub fn confirm_class_split(&self) {
        self.class_split_confirm.store(true, Ordering::SeqCst);
    }

    /// Consumes the signal.
    pub fn take_class_split_confirmation(&self) -> bool {
        self.class_split_confirm.swap(false, Ordering::SeqCst)
    }
}

// ── Supervisor ────────────────────────────────────────────────────────────────

pub struct Supervisor {
    source:     Box<dyn TelemetrySource>,
    commander:  ChatCommander,
    settings:   SharedSettings,
    signals:    std::sync::Arc<Signals>,
    state_tx:   watch::Sender<SupervisorState>,
    fleet:      Snapshotter,
    detectors:  Vec<Box<dyn Detector>>,
    aggregator: ThresholdAggregator,
    counters:   CautionLog,
    race_start: Option<DateTime<Utc>>,
    lap_at_green: Option<i32>,
}

impl Supervisor {
    pub fn new(
        source: Box<dyn TelemetrySource>,
        commander: ChatCommander,
        settings: SharedSettings,
        signals: std::sync::Arc<Signals>,
    ) -> (Self, watch::Receiver<SupervisorState>) {
        let (state_tx, state_rx) = watch::channel(SupervisorState::Stopped);
        let cfg = settings.read().clone();
        let supervisor = Self {
            source,
            commander,
            settings,
            signals,
            state_tx,
            fleet:      Snapshotter::default(),
            detectors:  detectors::build_detectors(&cfg),
            aggregator: ThresholdAggregator::new(ThresholdSettings::from_settings(&cfg)),
            counters:   CautionLog::default(),
            race_start: None,
            lap_at_green: None,
        };
        (supervisor, state_rx)
    }

    pub fn counters(&self) -> &CautionLog {
        &self.counters
    }

    fn set_state(&self, state: SupervisorState) {
        info!("supervisor state -> {state}");
        self.state_tx.send_replace(state);
    }

    /// Run to completion. Any unhandled fault surfaces as the FAULTED state;
    /// everything else unwinds to STOPPED.
    pub async fn run(mut self) -> Result<()> {
        match self.drive().await {
            Ok(()) => {
                self.set_state(SupervisorState::Stopped);
                Ok(())
            }
            Err(e) => {
                error!("supervisor fault: {e:#}");
                self.set_state(SupervisorState::Faulted);
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<()> {
        // stopped -> connecting -> connected
        self.set_state(SupervisorState::Connecting);
        let mut frame = loop {
            if self.signals.shutdown_requested() {
                return Ok(());
            }
            if let Some(frame) = self.source.poll() {
                break frame;
            }
            debug!("telemetry not up yet");
            tokio::time::sleep(TICK_INTERVAL).await;
        };
        self.set_state(SupervisorState::Connected);

        // connected -> awaiting-race-session
        self.set_state(SupervisorState::AwaitingRaceSession);
        while frame.session_kind != SessionKind::Race {
            if self.signals.shutdown_requested() {
                return Ok(());
            }
            tokio::time::sleep(TICK_INTERVAL).await;
            if let Some(next) = self.source.poll() {
                frame = next;
            }
        }

        // awaiting-race-session -> awaiting-green
        self.set_state(SupervisorState::AwaitingGreen);
        self.wait_for_race_start(frame).await;
        if self.signals.shutdown_requested() {
            return Ok(());
        }

        self.monitor().await
    }

    /// Releases on the green bit, on a session already reporting racing
    /// (attached mid-race), or on the developer skip signal.
    async fn wait_for_race_start(&mut self, mut frame: TelemetryFrame) {
        loop {
            if self.signals.shutdown_requested() {
                return;
            }
            if self.signals.take_skip_wait_for_green() {
                info!("skip-wait-for-green signal consumed");
                break;
            }
            if frame.green_flag() {
                info!("green flag detected; race is on");
                break;
            }
            if frame.race_underway() {
                info!("race already in progress; joining mid-race");
                break;
            }
            tokio::time::sleep(TICK_INTERVAL).await;
            if let Some(next) = self.source.poll() {
                frame = next;
            }
        }

        let now = Utc::now();
        self.race_start = Some(now);
        self.aggregator.race_started(now);
        self.fleet.update(&frame);
        self.lap_at_green = Some(self.fleet.current().max_laps_completed());
        self.set_state(SupervisorState::Monitoring);
    }

    async fn monitor(&mut self) -> Result<()> {
        loop {
            if self.signals.shutdown_requested() {
                return Ok(());
            }
            let now = Utc::now();

            let Some(frame) = self.source.poll() else {
                debug!("transient telemetry loss; skipping detection this tick");
                tokio::time::sleep(TICK_INTERVAL).await;
                continue;
            };
            self.fleet.update(&frame);

            // Snapshot -> detect -> aggregate, strictly in order.
            let state = DetectorState {
                now,
                race_start: self.race_start,
                laps_since_start: self
                    .lap_at_green
                    .map(|base| self.fleet.current().max_laps_completed() - base)
                    .unwrap_or(0),
                in_window: self.within_detection_window(now),
                supervisor: SupervisorState::Monitoring,
            };
            let events = detectors::run_all(&mut self.detectors, &state, self.fleet.pair());

            self.aggregator.age_out(now);
            self.aggregator.ingest(events);

            let manual = self.signals.take_manual_trip();
            let trip = if manual {
                Some("caution requested by race control".to_string())
            } else {
                self.aggregator.evaluate(now)
            };

            if let Some(reason) = trip {
                if self.trip_allowed(now, manual) {
                    self.run_caution_cycle(reason, now).await;
                    if self.signals.shutdown_requested() {
                        return Ok(());
                    }
                } else {
                    debug!("trip suppressed by eligibility gate: {reason}");
                }
            }

            tokio::time::sleep(TICK_INTERVAL).await;
        }
    }

    /// Minutes-since-start bounds only; probes that should not even attempt
    /// outside them (random) consult this through the detector state.
    fn within_detection_window(&self, now: DateTime<Utc>) -> bool {
        let cfg = self.settings.read();
        let Some(start) = self.race_start else {
            return false;
        };
        let minutes = (now - start).num_milliseconds() as f64 / 60_000.0;
        minutes >= cfg.earliest_minute && minutes <= cfg.latest_minute
    }

    /// The eligibility gate, evaluated at trip time. Manual trips bypass
    /// everything except the caution ceiling.
    fn trip_allowed(&self, now: DateTime<Utc>, manual: bool) -> bool {
        let cfg = self.settings.read();

        if cfg.max_cautions > 0 && self.counters.total >= cfg.max_cautions {
            return false;
        }
        if manual {
            return true;
        }
        let Some(start) = self.race_start else {
            return false;
        };
        let minutes = (now - start).num_milliseconds() as f64 / 60_000.0;
        if minutes < cfg.earliest_minute || minutes > cfg.latest_minute {
            return false;
        }
        if let Some(last) = self.counters.last_trigger {
            let since = (now - last).num_milliseconds() as f64 / 60_000.0;
            if since < cfg.minimum_minutes_between {
                return false;
            }
        }
        true
    }

    async fn run_caution_cycle(&mut self, reason: String, now: DateTime<Utc>) {
        // Settings are read exactly once per cycle; a mid-cycle change does
        // not perturb the procedure in flight.
        let cfg: Settings = self.settings.read().clone();
        let sequencer_cfg = SequencerSettings::from_settings(&cfg);

        self.set_state(SupervisorState::CautionActive);
        self.counters.total += 1;
        self.counters.last_trigger = Some(now);
        self.counters.lap_at_trigger = self.fleet.current().max_laps_completed();
        info!(
            "caution #{} tripped at lap {}: {reason}",
            self.counters.total, self.counters.lap_at_trigger,
        );

        let outcome = sequencer::run_caution(
            &reason,
            &sequencer_cfg,
            &mut self.commander,
            self.source.as_mut(),
            &mut self.fleet,
            &self.signals,
        )
        .await;

        // The same events must not retrigger the next cycle.
        self.aggregator.clear();

        if outcome == CautionOutcome::Interrupted {
            warn!("caution procedure interrupted by shutdown");
            return;
        }

        // Phase E: wait out the restart. Only the actual green bit (or the
        // skip signal) releases this wait — the session state already says
        // racing the whole time.
        loop {
            if self.signals.shutdown_requested() {
                return;
            }
            // Consume stray manual trips; one caution cycle at a time.
            let _ = self.signals.take_manual_trip();
            if self.signals.take_skip_wait_for_green() {
                break;
            }
            if let Some(frame) = self.source.poll() {
                self.fleet.update(&frame);
                if frame.green_flag() {
                    info!("green flag restored");
                    break;
                }
            }
            tokio::time::sleep(TICK_INTERVAL).await;
        }
        self.set_state(SupervisorState::Monitoring);
    }
}
