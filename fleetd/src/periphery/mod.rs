//! Periphery agent mode

pub mod routes;

pub use routes::{router, PeripheryState};
