//! Periphery agent protocol types
//!
//! Shared by the core (as client) and the periphery agent (as server).

pub mod models;

pub use models::*;
