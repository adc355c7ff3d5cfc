// src/engine/class_split.rs
//
// Class re-ordering under caution. The desired grid has classes in ascending
// expected lap time (fastest first). Walking the field in
// order-behind-safety-car, any driver whose class shows up early makes that
// class out of order; that class and every slower one get end-of-line
// commands, each class's cars in queue order.
//
// Pit-road cars are ignored when judging order (they will blend in wherever
// pit exit drops them) but still receive EOL commands with their class, so
// they cannot rejoin at the front of it.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::commands;
use crate::engine::wave_arounds::distance_to_pace;
use crate::fleet::FleetSnapshot;

struct ClassInfo {
    est_lap_time: f32,
    /// Cars judged for ordering (pit road excluded).
    racing:       HashSet<usize>,
    /// All cars of the class with their queue position, for command order.
    ordered:      Vec<(f64, usize)>,
}

/// Plan the `!eol` commands needed to sort the field by class. Empty when the
/// field is already in order or only one class is racing.
pub fn split_class_commands(snap: &FleetSnapshot) -> Vec<String> {
    let Some(pace) = snap.pace_car.as_ref() else {
        return Vec::new();
    };

    let position: HashMap<usize, f64> = snap
        .drivers
        .iter()
        .map(|d| (d.slot, distance_to_pace(d, pace)))
        .collect();

    let mut classes: BTreeMap<u32, ClassInfo> = BTreeMap::new();
    let mut class_of: HashMap<usize, u32> = HashMap::new();
    for driver in &snap.drivers {
        let info = classes.entry(driver.class_id).or_insert_with(|| ClassInfo {
            est_lap_time: driver.class_est_lap_time,
            racing:       HashSet::new(),
            ordered:      Vec::new(),
        });
        if !driver.on_pit_road {
            info.racing.insert(driver.slot);
        }
        info.ordered.push((position[&driver.slot], driver.slot));
        class_of.insert(driver.slot, driver.class_id);
    }

    if classes.len() <= 1 {
        return Vec::new();
    }

    // Fastest class first; class id breaks est-lap-time ties for determinism.
    let mut classes_sorted: Vec<(u32, ClassInfo)> = classes.into_iter().collect();
    classes_sorted.sort_by(|a, b| {
        a.1.est_lap_time
            .partial_cmp(&b.1.est_lap_time)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });

    // The field in queue order.
    let mut grid: Vec<usize> = snap.drivers.iter().map(|d| d.slot).collect();
    grid.sort_by(|a, b| {
        position[a]
            .partial_cmp(&position[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Walk the grid class by class; a car met before its class's turn is out
    // of order, and so is its whole class.
    let mut classes_out_of_order: HashSet<u32> = HashSet::new();
    let mut drivers_out_of_order: HashSet<usize> = HashSet::new();
    let mut cursor = 0usize;

    for (_, info) in &classes_sorted {
        let mut remaining: HashSet<usize> = info
            .racing
            .iter()
            .copied()
            .filter(|slot| !drivers_out_of_order.contains(slot))
            .collect();

        while !remaining.is_empty() && cursor < grid.len() {
            let slot = grid[cursor];
            cursor += 1;
            if snap.get(slot).map(|d| d.on_pit_road).unwrap_or(true) {
                continue;
            }
            if remaining.remove(&slot) {
                continue;
            }
            classes_out_of_order.insert(class_of[&slot]);
            drivers_out_of_order.insert(slot);
        }
    }

    if classes_out_of_order.is_empty() {
        return Vec::new();
    }
    debug!("classes out of order: {:?}", classes_out_of_order);

    // From the first out-of-order class onward, every slower class goes to
    // the end of the line too, in queue order within each class.
    let mut commands = Vec::new();
    let mut add_rest = false;
    for (class_id, mut info) in classes_sorted {
        if !add_rest && !classes_out_of_order.contains(&class_id) {
            continue;
        }
        add_rest = true;
        info.ordered.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        for (_, slot) in info.ordered {
            if let Some(driver) = snap.get(slot) {
                commands.push(commands::end_of_line(&driver.car_number));
            }
        }
    }
    commands
}
