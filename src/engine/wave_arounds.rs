// src/engine/wave_arounds.rs
//
// Wave-around planning. The field is ordered by the forward lap-fraction
// each car would travel to catch the pace car from behind (closest first);
// a strategy then picks which of those cars get waved, and commands go out
// in queue order.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::commands;
use crate::fleet::{Driver, FleetSnapshot};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WaveRule {
    /// Cars a lap or more down, per the lapped-cars procedure.
    LappedCars,
    /// Cars queued ahead of their class leader but behind the overall leader.
    AheadOfClassLead,
    /// Union of the other two.
    Combined,
}

/// Forward lap-fraction from `driver` to the pace car.
pub fn distance_to_pace(driver: &Driver, pace: &Driver) -> f64 {
    (pace.total_progress - driver.total_progress).rem_euclid(1.0)
}

/// The field sorted closest-to-the-pace-car first.
pub fn order_behind_safety_car<'a>(snap: &'a FleetSnapshot, pace: &Driver) -> Vec<&'a Driver> {
    let mut queue: Vec<&Driver> = snap.drivers.iter().collect();
    queue.sort_by(|a, b| {
        distance_to_pace(a, pace)
            .partial_cmp(&distance_to_pace(b, pace))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    queue
}

/// Plan the wave commands for the given strategy, in emission order.
pub fn wave_commands(rule: WaveRule, snap: &FleetSnapshot) -> Vec<String> {
    let Some(pace) = snap.pace_car.as_ref() else {
        warn!("no pace car in snapshot; skipping wave arounds");
        return Vec::new();
    };
    let queue = order_behind_safety_car(snap, pace);

    let selected: HashSet<usize> = match rule {
        WaveRule::LappedCars => lapped_cars(snap),
        WaveRule::AheadOfClassLead => ahead_of_class_lead(snap, &queue),
        WaveRule::Combined => {
            let mut set = lapped_cars(snap);
            set.extend(ahead_of_class_lead(snap, &queue));
            set
        }
    };

    queue
        .iter()
        .filter(|d| selected.contains(&d.slot))
        .map(|d| commands::wave(&d.car_number))
        .collect()
}

/// Rank every driver by composite progress; rank 0 is the overall leader.
fn running_positions(snap: &FleetSnapshot) -> HashMap<usize, usize> {
    let mut order: Vec<&Driver> = snap.drivers.iter().collect();
    order.sort_by(|a, b| {
        b.total_progress
            .partial_cmp(&a.total_progress)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.iter().enumerate().map(|(rank, d)| (d.slot, rank)).collect()
}

/// Best-placed driver of each class, by running position.
fn class_leaders(snap: &FleetSnapshot, positions: &HashMap<usize, usize>) -> HashMap<u32, usize> {
    let mut leaders: HashMap<u32, usize> = HashMap::new();
    for driver in &snap.drivers {
        let rank = positions[&driver.slot];
        let improves = match leaders.get(&driver.class_id) {
            Some(&slot) => rank < positions[&slot],
            None => true,
        };
        if improves {
            leaders.insert(driver.class_id, driver.slot);
        }
    }
    leaders
}

fn lapped_cars(snap: &FleetSnapshot) -> HashSet<usize> {
    let Some(max_laps) = snap.drivers.iter().map(|d| d.laps_completed).max() else {
        return HashSet::new();
    };
    let positions = running_positions(snap);
    let leaders = class_leaders(snap, &positions);

    snap.drivers
        .iter()
        .filter(|d| {
            let laps_behind = max_laps - d.laps_completed;
            if laps_behind >= 2 {
                return true;
            }
            laps_behind == 1
                && leaders
                    .get(&d.class_id)
                    .map(|leader| positions[&d.slot] > positions[leader])
                    .unwrap_or(false)
        })
        .map(|d| d.slot)
        .collect()
}

fn ahead_of_class_lead(snap: &FleetSnapshot, queue: &[&Driver]) -> HashSet<usize> {
    let positions = running_positions(snap);
    let leaders = class_leaders(snap, &positions);
    let Some(overall_leader) = snap.drivers.iter().min_by_key(|d| positions[&d.slot]) else {
        return HashSet::new();
    };

    let queue_pos: HashMap<usize, usize> =
        queue.iter().enumerate().map(|(i, d)| (d.slot, i)).collect();
    let leader_queue_pos = queue_pos[&overall_leader.slot];

    snap.drivers
        .iter()
        .filter(|d| {
            let Some(class_leader) = leaders.get(&d.class_id) else {
                return false;
            };
            let mine = queue_pos[&d.slot];
            mine < queue_pos[class_leader] && mine > leader_queue_pos
        })
        .map(|d| d.slot)
        .collect()
}
