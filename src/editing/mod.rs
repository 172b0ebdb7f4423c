// src/editing/mod.rs
//! Manual editing of decomposed motor units

pub mod selection;
pub mod session;
pub mod undo;

pub use selection::SelectionRegion;
pub use session::EditingSession;
pub use undo::{Snapshot, UndoStack};
