// src/lib.rs
//
// Paceward — supervisory full-course-caution controller for a racing
// simulator. Watches the telemetry feed, decides when the track needs a
// safety car, and drives the simulator's race-control chat interface
// through the full caution procedure.

pub mod commands;
pub mod config;
pub mod detectors;
pub mod engine;
pub mod events;
pub mod fleet;
pub mod supervisor;
pub mod telemetry;
