//! Command dispatch: permissions, busy checks, execution and audit

mod builds;
mod deployments;
pub mod dispatcher;
pub mod permissions;
mod queries;
mod servers;

pub use deployments::container_spec;
pub use dispatcher::{Ctx, Dispatcher, Outcome};
pub use queries::UPDATES_PAGE_SIZE;
