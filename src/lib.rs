pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod merge;
pub mod orchestration;
pub mod report;
pub mod sandbox;

pub use crate::core::{Task, TaskDAG, TaskId, TaskStatus};
pub use error::{Error, Result};
