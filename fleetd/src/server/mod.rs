//! Core HTTP server and command channel

pub mod handlers;
pub mod serve;
pub mod state;
pub mod ws;
