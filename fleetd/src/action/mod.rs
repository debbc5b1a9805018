//! Advisory per-resource concurrency guard

pub mod registry;

pub use registry::{ActionFlag, ActionGuard, ActionRegistry, ResourceKind};
