//! Core domain models for shade orchestration.
//!
//! This module contains the fundamental data structures used throughout
//! the scheduler, including tasks and the execution DAG.

pub mod dag;
pub mod task;

pub use dag::{DependencyType, TaskDAG};
pub use task::{Task, TaskId, TaskOutcome, TaskStatus};
