//! Audit records and event fan-out

pub mod hub;
pub mod pipeline;

pub use hub::{BroadcastHub, Identity, Subscription, Visibility};
pub use pipeline::AuditPipeline;
