// tests/scenarios.rs
//
// End-to-end scenarios. A deterministic frame replayer runs scripted
// telemetry through the same snapshotter / detector / aggregator pipeline the
// supervisor ticks, and full supervisor runs drive the caution procedure
// against the mock sink under a paused clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use paceward::commands::{ChatCommander, MockSink};
use paceward::config::Settings;
use paceward::detectors::{self, Detector, DetectorState};
use paceward::engine::threshold::{ThresholdAggregator, ThresholdSettings};
use paceward::engine::wave_arounds::{order_behind_safety_car, WaveRule};
use paceward::events::{DetectionKind, SupervisorState};
use paceward::fleet::{FleetSnapshot, Snapshotter};
use paceward::supervisor::{Signals, Supervisor};
use paceward::telemetry::{
    RosterEntry, ScriptedSource, SessionKind, SessionState, Surface, TelemetryFrame, FLAG_GREEN,
};

// ── Frame scripting ───────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
struct Slot {
    slot:    usize,
    laps:    i32,
    prog:    f32,
    surface: Surface,
    pit:     bool,
}

fn slot(slot: usize, laps: i32, prog: f32) -> Slot {
    Slot { slot, laps, prog, surface: Surface::OnTrack, pit: false }
}

fn off_track(slot: usize, laps: i32, prog: f32) -> Slot {
    Slot { slot, laps, prog, surface: Surface::OffTrack, pit: false }
}

/// Pace car lives in slot 0 throughout.
fn frame(slots: &[Slot]) -> TelemetryFrame {
    let n = slots.iter().map(|s| s.slot).max().unwrap_or(0) + 1;
    let mut f = TelemetryFrame {
        session_kind:   SessionKind::Race,
        session_state:  SessionState::Racing,
        session_flags:  FLAG_GREEN,
        laps_completed: vec![-1; n],
        lap_started:    vec![0; n],
        lap_progress:   vec![-1.0; n],
        surface:        vec![Surface::NotInWorld; n],
        on_pit_road:    vec![false; n],
        class_id:       vec![0; n],
        car_flags:      vec![0; n],
        roster:         Vec::new(),
        ..Default::default()
    };
    for s in slots {
        f.laps_completed[s.slot] = s.laps;
        f.lap_started[s.slot] = s.laps + 1;
        f.lap_progress[s.slot] = s.prog;
        f.surface[s.slot] = s.surface;
        f.on_pit_road[s.slot] = s.pit;
        f.roster.push(RosterEntry {
            slot:               s.slot,
            car_number:         s.slot.to_string(),
            class_id:           0,
            class_est_lap_time: 40.0,
            is_pace_car:        s.slot == 0,
        });
    }
    f
}

fn pace() -> Slot {
    slot(0, 10, 0.0)
}

// ── Replayer ──────────────────────────────────────────────────────────────────

/// Feeds frames through snapshotter -> detectors -> aggregator at one frame
/// per second of scripted time, recording every trip.
struct Replayer {
    fleet:      Snapshotter,
    detectors:  Vec<Box<dyn Detector>>,
    aggregator: ThresholdAggregator,
    clock:      DateTime<Utc>,
    trips:      Vec<(usize, String)>,
}

impl Replayer {
    fn new(cfg: &Settings) -> Self {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut aggregator = ThresholdAggregator::new(ThresholdSettings::from_settings(cfg));
        aggregator.race_started(t0);
        Self {
            fleet: Snapshotter::default(),
            detectors: detectors::build_detectors(cfg),
            aggregator,
            clock: t0,
            trips: Vec::new(),
        }
    }

    fn step(&mut self, index: usize, frame: &TelemetryFrame) -> Option<String> {
        self.clock += chrono::Duration::seconds(1);
        self.fleet.update(frame);

        let state = DetectorState {
            now:              self.clock,
            race_start:       Some(self.clock),
            laps_since_start: 0,
            in_window:        true,
            supervisor:       SupervisorState::Monitoring,
        };
        let events = detectors::run_all(&mut self.detectors, &state, self.fleet.pair());

        self.aggregator.age_out(self.clock);
        self.aggregator.ingest(events);

        let trip = self.aggregator.evaluate(self.clock);
        if let Some(reason) = &trip {
            self.trips.push((index, reason.clone()));
            self.aggregator.clear();
        }
        trip
    }

    fn run(&mut self, frames: &[TelemetryFrame]) {
        for (i, frame) in frames.iter().enumerate() {
            self.step(i, frame);
        }
    }

    fn aggregator_len(&self) -> usize {
        self.aggregator.queued()
    }
}

// ── S1: two stopped cars trip the stopped threshold ───────────────────────────

#[test]
fn s1_two_stopped_cars_trip_stopped_threshold() {
    let mut cfg = Settings::default();
    cfg.per_type_thresholds.insert(DetectionKind::Stopped, 2);
    cfg.per_type_thresholds.insert(DetectionKind::OffTrack, 1000);
    cfg.accumulative_threshold = 1000.0;
    cfg.race_start_multiplier = 1.0;

    // Slots 1 and 2 hold at 10.50 across both frames; slot 3 advances.
    let frames = vec![
        frame(&[pace(), slot(1, 10, 0.50), slot(2, 10, 0.50), slot(3, 10, 0.50)]),
        frame(&[pace(), slot(1, 10, 0.50), slot(2, 10, 0.50), slot(3, 10, 0.80)]),
    ];

    let mut replayer = Replayer::new(&cfg);
    replayer.run(&frames);

    assert_eq!(replayer.trips.len(), 1);
    let (at_frame, reason) = &replayer.trips[0];
    assert_eq!(*at_frame, 1, "trip fires on the second frame");
    assert!(reason.contains("stopped"), "reason names the detector: {reason}");
}

// ── S2: off-track alone is insufficient, and events age out ───────────────────

#[test]
fn s2_off_track_below_threshold_never_trips_and_ages_out() {
    let mut cfg = Settings::default();
    cfg.per_type_thresholds.insert(DetectionKind::OffTrack, 3);
    cfg.per_type_thresholds.insert(DetectionKind::Stopped, 2);
    cfg.stopped_enabled = false;
    cfg.accumulative_threshold = 1000.0;
    cfg.race_start_multiplier = 1.0;

    let mut frames = Vec::new();
    // Two drivers off track for five frames; a third keeps moving.
    for i in 0..5u32 {
        let p = i as f32 * 0.01;
        frames.push(frame(&[
            pace(),
            off_track(1, 10, 0.30 + p),
            off_track(2, 10, 0.40 + p),
            slot(3, 10, 0.50 + p),
        ]));
    }
    // Then everyone recovers for seven more frames.
    for i in 0..7u32 {
        let p = i as f32 * 0.01;
        frames.push(frame(&[
            pace(),
            slot(1, 10, 0.40 + p),
            slot(2, 10, 0.50 + p),
            slot(3, 10, 0.60 + p),
        ]));
    }

    let mut replayer = Replayer::new(&cfg);
    replayer.run(&frames);

    assert!(replayer.trips.is_empty(), "two off-track cars never reach 3");
    assert_eq!(replayer.aggregator_len(), 0, "window ages everything out");
}

// ── S3: accumulative trip ─────────────────────────────────────────────────────

#[test]
fn s3_accumulative_weights_sum_to_a_trip() {
    let mut cfg = Settings::default();
    cfg.per_type_thresholds.insert(DetectionKind::Stopped, 1000);
    cfg.per_type_thresholds.insert(DetectionKind::OffTrack, 1000);
    cfg.per_type_weights.insert(DetectionKind::Stopped, 2.0);
    cfg.per_type_weights.insert(DetectionKind::OffTrack, 1.0);
    cfg.accumulative_threshold = 4.0;
    cfg.race_start_multiplier = 1.0;

    // Slot 1 stops; slots 2 and 3 are off track but still crawling; slot 4
    // races on. 2 + 1 + 1 = 4.
    let frames = vec![
        frame(&[
            pace(),
            slot(1, 10, 0.50),
            off_track(2, 10, 0.30),
            off_track(3, 10, 0.60),
            slot(4, 10, 0.70),
        ]),
        frame(&[
            pace(),
            slot(1, 10, 0.50),
            off_track(2, 10, 0.31),
            off_track(3, 10, 0.61),
            slot(4, 10, 0.75),
        ]),
    ];

    let mut replayer = Replayer::new(&cfg);
    replayer.run(&frames);

    assert_eq!(replayer.trips.len(), 1);
    assert_eq!(replayer.trips[0].0, 1);
}

// ── S4: accumulative never double counts a driver ─────────────────────────────

#[test]
fn s4_multi_type_driver_contributes_only_its_highest_weight() {
    let mut cfg = Settings::default();
    cfg.per_type_thresholds.insert(DetectionKind::Stopped, 1000);
    cfg.per_type_thresholds.insert(DetectionKind::OffTrack, 1000);
    cfg.per_type_weights.insert(DetectionKind::Stopped, 2.0);
    cfg.per_type_weights.insert(DetectionKind::OffTrack, 1.0);
    cfg.accumulative_threshold = 4.0;
    cfg.race_start_multiplier = 1.0;

    // Slot 1 is both stopped and off track (max weight 2), slot 2 off track
    // (1): sum 3 — no trip.
    let quiet = vec![
        frame(&[
            pace(),
            off_track(1, 10, 0.50),
            off_track(2, 10, 0.30),
            slot(3, 10, 0.70),
            slot(4, 10, 0.80),
        ]),
        frame(&[
            pace(),
            off_track(1, 10, 0.50),
            off_track(2, 10, 0.31),
            slot(3, 10, 0.72),
            slot(4, 10, 0.82),
        ]),
    ];
    let mut replayer = Replayer::new(&cfg);
    replayer.run(&quiet);
    assert!(replayer.trips.is_empty(), "2 + 1 = 3 stays under 4");

    // Two more off-track drivers: 2 + 1 + 1 + 1 = 5 — trip.
    let escalated = frame(&[
        pace(),
        off_track(1, 10, 0.50),
        off_track(2, 10, 0.32),
        off_track(3, 10, 0.74),
        off_track(4, 10, 0.84),
    ]);
    let trip = replayer.step(2, &escalated);
    assert!(trip.is_some(), "2 + 1 + 1 + 1 = 5 trips");
}

// ── S5: proximity gating ──────────────────────────────────────────────────────

#[test]
fn s5_proximity_clusters_gate_the_trip() {
    let mut cfg = Settings::default();
    cfg.per_type_thresholds.insert(DetectionKind::OffTrack, 3);
    cfg.per_type_thresholds.insert(DetectionKind::Stopped, 1000);
    cfg.accumulative_threshold = 1000.0;
    cfg.proximity_enabled = true;
    cfg.proximity_distance = 0.05;
    cfg.race_start_multiplier = 1.0;

    // Four off-track cars in two pairs: {0.10, 0.12} and {0.60, 0.62}.
    let spread = frame(&[
        pace(),
        off_track(1, 10, 0.10),
        off_track(2, 10, 0.12),
        off_track(3, 10, 0.60),
        off_track(4, 10, 0.62),
        slot(5, 10, 0.90),
    ]);
    let mut replayer = Replayer::new(&cfg);
    assert!(replayer.step(0, &spread).is_none(), "no cluster of 3 yet");

    // The fourth car's latest position moves to 0.14: {0.10, 0.12, 0.14}.
    let clustered = frame(&[
        pace(),
        off_track(1, 10, 0.10),
        off_track(2, 10, 0.12),
        off_track(3, 10, 0.60),
        off_track(4, 10, 0.14),
        slot(5, 10, 0.91),
    ]);
    assert!(replayer.step(1, &clustered).is_some(), "cluster of 3 trips");
}

// ── S6: wave order under multi-class ──────────────────────────────────────────

#[test]
fn s6_wave_order_is_forward_distance_to_the_pace_car() {
    // Pace composite 20.00; A at 20.90 (0.10 back), B at 21.20 (0.80 back,
    // wrapping), C at 19.40 (0.60 back). Expected order: A, C, B.
    let f = frame(&[
        pace(),
        slot(1, 20, 0.90), // A
        slot(2, 21, 0.20), // B
        slot(3, 19, 0.40), // C
    ]);
    let snap = FleetSnapshot::from_frame(&f);
    let queue = order_behind_safety_car(&snap, snap.pace_car.as_ref().unwrap());
    let order: Vec<usize> = queue.iter().map(|d| d.slot).collect();
    assert_eq!(order, vec![1, 3, 2]);
}

// ── Universal properties through the replayer ─────────────────────────────────

#[test]
fn pace_car_and_not_in_world_never_produce_events() {
    let mut cfg = Settings::default();
    cfg.per_type_thresholds.insert(DetectionKind::OffTrack, 1);
    cfg.accumulative_threshold = 1.0;
    cfg.race_start_multiplier = 1.0;

    // The pace car is off track and stationary; a not-in-world slot too.
    // Neither may trip anything.
    let mut ghost = off_track(4, 10, 0.40);
    ghost.surface = Surface::NotInWorld;
    let mut pace_off = pace();
    pace_off.surface = Surface::OffTrack;

    let frames = vec![
        frame(&[pace_off, slot(1, 10, 0.50), ghost]),
        frame(&[pace_off, slot(1, 10, 0.55), ghost]),
        frame(&[pace_off, slot(1, 10, 0.60), ghost]),
    ];

    let mut replayer = Replayer::new(&cfg);
    replayer.run(&frames);
    assert!(replayer.trips.is_empty());
}

#[test]
fn post_trip_clear_prevents_an_immediate_retrigger() {
    let mut cfg = Settings::default();
    cfg.per_type_thresholds.insert(DetectionKind::Stopped, 2);
    cfg.accumulative_threshold = 1000.0;
    cfg.race_start_multiplier = 1.0;

    let stalled = frame(&[pace(), slot(1, 10, 0.50), slot(2, 10, 0.50), slot(3, 10, 0.80)]);
    let mut replayer = Replayer::new(&cfg);
    replayer.step(0, &frame(&[pace(), slot(1, 10, 0.50), slot(2, 10, 0.50), slot(3, 10, 0.70)]));
    assert!(replayer.step(1, &stalled).is_some());

    // The queue was cleared on the trip; the same standing cars need fresh
    // events to re-arm, and a single new tick of two stopped cars does trip
    // again only because they are still stopped now.
    assert_eq!(replayer.aggregator_len(), 0, "queue is empty right after the trip");
}

// ── Supervisor end-to-end ─────────────────────────────────────────────────────

fn supervisor_settings() -> Settings {
    let mut cfg = Settings::default();
    cfg.per_type_thresholds.insert(DetectionKind::Stopped, 2);
    cfg.per_type_thresholds.insert(DetectionKind::OffTrack, 1000);
    cfg.accumulative_threshold = 1000.0;
    cfg.race_start_multiplier = 1.0;
    cfg.earliest_minute = 0.0;
    cfg.latest_minute = 999.0;
    cfg.minimum_minutes_between = 0.0;
    cfg.max_cautions = 2;
    cfg.wave_arounds_enabled = true;
    cfg.wave_delay_laps = 0;
    cfg.wave_rule = WaveRule::LappedCars;
    cfg.laps_under_safety_car = 3;
    cfg
}

async fn wait_for_command(sink: &MockSink, needle: &str) {
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            if sink.log().iter().any(|line| line.starts_with(needle)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {needle}"));
}

#[tokio::test(start_paused = true)]
async fn full_caution_cycle_from_detection_to_green() {
    let cfg = supervisor_settings();

    let mut source = ScriptedSource::default();
    // Connect + race + green, then two cars parked at 10.50 while slot 3
    // advances; slot 4 is a lapped car for the wave phase.
    source.push(frame(&[pace(), slot(1, 10, 0.50), slot(2, 10, 0.50), slot(3, 10, 0.40), slot(4, 8, 0.20)]));
    source.push(frame(&[pace(), slot(1, 10, 0.50), slot(2, 10, 0.50), slot(3, 10, 0.45), slot(4, 8, 0.25)]));
    source.push(frame(&[pace(), slot(1, 10, 0.50), slot(2, 10, 0.50), slot(3, 10, 0.50), slot(4, 8, 0.30)]));
    // Laps advance under the yellow: wave gate at 11, pace gate at 12 with
    // the leader past half distance.
    source.push(frame(&[pace(), slot(1, 11, 0.20), slot(2, 11, 0.25), slot(3, 11, 0.30), slot(4, 9, 0.10)]));
    source.push(frame(&[pace(), slot(1, 12, 0.40), slot(2, 12, 0.45), slot(3, 12, 0.50), slot(4, 10, 0.20)]));
    source.push(frame(&[pace(), slot(1, 12, 0.60), slot(2, 12, 0.65), slot(3, 12, 0.70), slot(4, 10, 0.40)]));
    // Green restored.
    source.push(frame(&[pace(), slot(1, 13, 0.10), slot(2, 13, 0.15), slot(3, 13, 0.20), slot(4, 11, 0.05)]));

    let sink = MockSink::new();
    let commander =
        ChatCommander::with_pacing(Box::new(sink.clone()), Duration::ZERO, Duration::ZERO);
    let signals = Arc::new(Signals::default());
    let (supervisor, state_rx) = Supervisor::new(
        Box::new(source),
        commander,
        cfg.shared(),
        Arc::clone(&signals),
    );
    let handle = tokio::spawn(supervisor.run());

    wait_for_command(&sink, "!p").await;
    signals.request_shutdown();
    handle.await.unwrap().unwrap();

    let log = sink.log();
    assert!(log[0].starts_with("!y "), "yellow goes out first: {log:?}");
    assert!(log[0].contains("stopped"), "yellow message carries the reason");
    assert!(log.contains(&"!w 4".to_string()), "lapped slot 4 is waved: {log:?}");
    assert_eq!(log.last().unwrap(), "!p 2", "three laps under the safety car -> !p 2");

    // Yellow before wave before pace command.
    let yellow_at = log.iter().position(|l| l.starts_with("!y")).unwrap();
    let wave_at = log.iter().position(|l| l.starts_with("!w")).unwrap();
    let pace_at = log.iter().position(|l| l.starts_with("!p")).unwrap();
    assert!(yellow_at < wave_at && wave_at < pace_at);

    assert_eq!(*state_rx.borrow(), SupervisorState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn manual_trip_bypasses_the_window_but_not_the_ceiling() {
    let mut cfg = supervisor_settings();
    cfg.earliest_minute = 60.0; // automatic trips are outside the window
    cfg.max_cautions = 1;
    cfg.wave_arounds_enabled = false;

    let mut source = ScriptedSource::default();
    // Everyone keeps moving: no automatic events. Push plenty of advancing
    // frames so the procedure's lap gates can be met.
    for i in 0..40 {
        let lap = 10 + i / 2;
        let prog = if i % 2 == 0 { 0.30 } else { 0.80 };
        source.push(frame(&[
            pace(),
            slot(1, lap, prog),
            slot(2, lap, prog + 0.01),
            slot(3, lap, prog + 0.02),
        ]));
    }

    let sink = MockSink::new();
    let commander =
        ChatCommander::with_pacing(Box::new(sink.clone()), Duration::ZERO, Duration::ZERO);
    let signals = Arc::new(Signals::default());
    let (supervisor, _state_rx) = Supervisor::new(
        Box::new(source),
        commander,
        cfg.shared(),
        Arc::clone(&signals),
    );

    signals.request_manual_trip();
    let handle = tokio::spawn(supervisor.run());

    // The manual trip lands despite minutes_since_start < earliest_minute.
    wait_for_command(&sink, "!p").await;

    // A second manual trip is blocked by the caution ceiling.
    signals.request_manual_trip();
    tokio::time::sleep(Duration::from_secs(30)).await;
    signals.request_shutdown();
    handle.await.unwrap().unwrap();

    let yellows = sink.log().iter().filter(|l| l.starts_with("!y")).count();
    assert_eq!(yellows, 1, "max_cautions caps delivered cautions");
}

#[tokio::test(start_paused = true)]
async fn eligibility_window_suppresses_automatic_trips() {
    let mut cfg = supervisor_settings();
    cfg.earliest_minute = 60.0;

    let mut source = ScriptedSource::default();
    // A clear two-car stoppage, every frame.
    for i in 0..10 {
        source.push(frame(&[
            pace(),
            slot(1, 10, 0.50),
            slot(2, 10, 0.50),
            slot(3, 10, 0.40 + i as f32 * 0.01),
        ]));
    }

    let sink = MockSink::new();
    let commander =
        ChatCommander::with_pacing(Box::new(sink.clone()), Duration::ZERO, Duration::ZERO);
    let signals = Arc::new(Signals::default());
    let (supervisor, _state_rx) = Supervisor::new(
        Box::new(source),
        commander,
        cfg.shared(),
        Arc::clone(&signals),
    );
    let handle = tokio::spawn(supervisor.run());

    tokio::time::sleep(Duration::from_secs(15)).await;
    signals.request_shutdown();
    handle.await.unwrap().unwrap();

    assert!(
        sink.log().is_empty(),
        "no caution may start outside the eligibility window: {:?}",
        sink.log(),
    );
}
