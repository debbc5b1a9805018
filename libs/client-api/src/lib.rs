//! Client channel types
//!
//! Resource models, audit records and the command/event envelopes exchanged
//! over the live client connection.

pub mod models;

pub use models::*;
