// src/engine/threshold.rs
//
// Windowed threshold aggregation. Detection events queue up for a bounded
// time; at evaluation the latest event per (slot, kind) is the only
// representative, events optionally group by on-track proximity, and each
// candidate group is tested against the per-type counts and the weighted
// accumulative score. Inside the race-start window every threshold scales up
// by the configured multiplier.
//
// Random events carry no driver: they are cluster-neutral and join every
// candidate group (a driverless trip is a global one).

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::Settings;
use crate::events::{DetectionEvent, DetectionKind};

// ── Settings view ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ThresholdSettings {
    pub window_seconds:     i64,
    pub per_type:           HashMap<DetectionKind, u32>,
    pub weights:            HashMap<DetectionKind, f64>,
    pub accumulative:       f64,
    pub proximity_enabled:  bool,
    pub proximity_distance: f64,
    pub start_multiplier:         f64,
    pub start_multiplier_seconds: i64,
}

impl ThresholdSettings {
    pub fn from_settings(cfg: &Settings) -> Self {
        Self {
            window_seconds:     cfg.window_seconds as i64,
            per_type:           cfg.per_type_thresholds.clone(),
            weights:            cfg.per_type_weights.clone(),
            accumulative:       cfg.accumulative_threshold,
            proximity_enabled:  cfg.proximity_enabled,
            proximity_distance: cfg.proximity_distance,
            start_multiplier:         cfg.race_start_multiplier,
            start_multiplier_seconds: cfg.race_start_multiplier_seconds as i64,
        }
    }
}

// ── Aggregator ────────────────────────────────────────────────────────────────

struct QueuedEvent {
    id:    u64,
    event: DetectionEvent,
}

pub struct ThresholdAggregator {
    cfg:        ThresholdSettings,
    queue:      VecDeque<QueuedEvent>,
    race_start: Option<DateTime<Utc>>,
    next_id:    u64,
}

impl ThresholdAggregator {
    pub fn new(cfg: ThresholdSettings) -> Self {
        Self { cfg, queue: VecDeque::new(), race_start: None, next_id: 0 }
    }

    pub fn race_started(&mut self, at: DateTime<Utc>) {
        self.race_start = Some(at);
    }

    /// Drop everything older than the window.
    pub fn age_out(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(self.cfg.window_seconds);
        while self.queue.front().map(|q| q.event.at < cutoff).unwrap_or(false) {
            self.queue.pop_front();
        }
    }

    pub fn ingest(&mut self, events: Vec<DetectionEvent>) {
        for event in events {
            self.queue.push_back(QueuedEvent { id: self.next_id, event });
            self.next_id += 1;
        }
    }

    /// Discarded after a successful trip so the same events cannot retrigger
    /// the next cycle.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Returns the trip reason when any configured threshold is met.
    pub fn evaluate(&self, now: DateTime<Utc>) -> Option<String> {
        if self.queue.is_empty() {
            return None;
        }
        let scale = self.scale_at(now);

        // Latest event per (slot, kind); driverless events are all kept.
        let mut located: HashMap<(usize, DetectionKind), &QueuedEvent> = HashMap::new();
        let mut randoms: Vec<&QueuedEvent> = Vec::new();
        for queued in &self.queue {
            match queued.event.slot() {
                Some(slot) => {
                    located.insert((slot, queued.event.kind), queued);
                }
                None => randoms.push(queued),
            }
        }

        let mut clusters: Vec<Vec<&QueuedEvent>> = if self.cfg.proximity_enabled {
            self.proximity_clusters(located.into_values().collect())
        } else {
            vec![located.into_values().collect()]
        };
        if clusters.iter().all(|c| c.is_empty()) && !randoms.is_empty() {
            clusters = vec![Vec::new()];
        }

        // Wrap-around duplication can produce the same member set twice;
        // evaluate each identity set at most once.
        let mut seen: HashSet<Vec<u64>> = HashSet::new();
        for cluster in &clusters {
            let mut ids: Vec<u64> =
                cluster.iter().chain(randoms.iter()).map(|q| q.id).collect();
            ids.sort_unstable();
            if !seen.insert(ids) {
                continue;
            }
            if let Some(reason) = self.cluster_trips(cluster, &randoms, scale) {
                return Some(reason);
            }
        }
        None
    }

    /// Sort by lap progress, duplicate each point at +1 lap so clusters can
    /// straddle the start/finish line, and walk with a sliding gap.
    fn proximity_clusters<'a>(&self, events: Vec<&'a QueuedEvent>) -> Vec<Vec<&'a QueuedEvent>> {
        if events.is_empty() {
            return Vec::new();
        }

        let mut points: Vec<(f64, &QueuedEvent)> = Vec::with_capacity(events.len() * 2);
        for queued in events {
            let p = (queued.event.driver.as_ref().expect("located event").lap_progress as f64)
                .rem_euclid(1.0);
            points.push((p, queued));
            points.push((p + 1.0, queued));
        }
        points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut clusters = Vec::new();
        let mut cluster: Vec<&QueuedEvent> = vec![points[0].1];
        let mut members: HashSet<u64> = HashSet::from([points[0].1.id]);
        let mut prev = points[0].0;

        for &(p, queued) in &points[1..] {
            if p - prev > self.cfg.proximity_distance {
                clusters.push(std::mem::take(&mut cluster));
                members.clear();
            }
            if members.insert(queued.id) {
                cluster.push(queued);
            }
            prev = p;
        }
        clusters.push(cluster);
        clusters
    }

    fn cluster_trips(
        &self,
        cluster: &[&QueuedEvent],
        randoms: &[&QueuedEvent],
        scale: f64,
    ) -> Option<String> {
        // Per-type counts.
        let mut counts: HashMap<DetectionKind, u32> = HashMap::new();
        for queued in cluster.iter().chain(randoms.iter()) {
            *counts.entry(queued.event.kind).or_insert(0) += 1;
        }
        for (kind, count) in &counts {
            let Some(&threshold) = self.cfg.per_type.get(kind) else {
                continue;
            };
            if threshold == 0 {
                continue;
            }
            if *count as f64 >= threshold as f64 * scale {
                debug!("per-type threshold met: {count} {kind} (limit {threshold} x{scale})");
                return Some(format!(
                    "{count} {kind} cars within {}s",
                    self.cfg.window_seconds
                ));
            }
        }

        // Accumulative: one contribution per driver, at its highest weight.
        let mut per_driver: HashMap<usize, f64> = HashMap::new();
        for queued in cluster {
            let slot = queued.event.slot().expect("located event");
            let weight = self.weight(queued.event.kind);
            let entry = per_driver.entry(slot).or_insert(0.0);
            if weight > *entry {
                *entry = weight;
            }
        }
        let mut sum: f64 = per_driver.values().sum();
        for queued in randoms {
            sum += self.weight(queued.event.kind);
        }

        if self.cfg.accumulative > 0.0 && sum >= self.cfg.accumulative * scale {
            debug!("accumulative threshold met: {sum:.1} (limit {} x{scale})", self.cfg.accumulative);
            return Some(format!("incident score {sum:.1} within {}s", self.cfg.window_seconds));
        }
        None
    }

    fn weight(&self, kind: DetectionKind) -> f64 {
        self.cfg.weights.get(&kind).copied().unwrap_or(0.0)
    }

    fn scale_at(&self, now: DateTime<Utc>) -> f64 {
        match self.race_start {
            Some(start)
                if now - start <= Duration::seconds(self.cfg.start_multiplier_seconds) =>
            {
                self.cfg.start_multiplier
            }
            _ => 1.0,
        }
    }
}
