// src/model/mod.rs
//! Data model: recordings, grid layouts and motor units

pub mod motor_unit;
pub mod signal;

pub use motor_unit::{MotorUnit, UnitId, UnitState};
pub use signal::{GridLayout, Recording, SignalType};
