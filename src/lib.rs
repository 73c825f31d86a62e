#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod cache;
mod data;
mod error;
mod executor;
mod goal;
mod meta;
mod name;
mod task;
mod utils;
mod workspace;

pub use crate::cache::{Cache, CacheValue, IdentityFn};
pub use crate::data::{Data, DataNode, DataNodeBuilder};
pub use crate::error::{CacheError, GoalError, NameError, SharedError, WorkspaceError};
pub use crate::executor::Executor;
pub use crate::goal::{DynGoal, Goal, Outcome};
pub use crate::meta::{Meta, Value};
pub use crate::name::Name;
pub use crate::task::{Dependency, PipeTask, Task, TaskContext, TaskModel, TaskModelBuilder};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
pub use crate::workspace::{Workspace, WorkspaceBuilder};
