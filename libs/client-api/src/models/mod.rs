//! Client API models

mod command;
mod event;
mod resources;
mod update;

pub use command::{Command, CommandEnvelope, Operation};
pub use event::Event;
pub use resources::{Build, Deployment, Owned, Server, User};
pub use update::{Update, UpdateTarget};
