//! Storage module for Relay
//!
//! - `json`: JSON file load/save (configuration only; the engine persists no state)

mod json;

pub use json::{load_file, JsonStore};
