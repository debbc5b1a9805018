//! fleetd library
//!
//! Control plane for a fleet of container hosts: the core node dispatches
//! client commands to local or remote executors, tracks per-resource action
//! state and broadcasts audited results; periphery agents execute git and
//! docker operations on behalf of the core.

pub mod action;
pub mod app;
pub mod audit;
pub mod dispatch;
pub mod errors;
pub mod exec;
pub mod filesys;
pub mod logs;
pub mod periphery;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
