//! Process wiring for the core and periphery modes

pub mod options;
pub mod run;
pub mod state;
