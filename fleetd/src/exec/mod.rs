//! Execution of git and docker operations on fleet nodes

pub mod cancel;
pub mod docker;
pub mod git;
pub mod local;
pub mod node;
pub mod remote;
pub mod result;
pub mod shell;
pub mod stats;

pub use local::LocalHost;
pub use node::{Executor, NodeExecutor, NodeOp, NodeOutput, NodeRef};
pub use remote::{PeripheryClient, PeripheryTimeouts, RemoteNode};
pub use result::{merge_results, Step};
