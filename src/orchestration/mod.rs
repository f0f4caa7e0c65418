//! Goal decomposition and concurrent task orchestration.

pub mod correction;
pub mod decomposer;
pub mod pool;
pub mod scheduler;

pub use correction::{CommandPlanner, CorrectionLoop, CorrectionOutcome, RetrySamePlanner};
pub use decomposer::Decomposer;
pub use pool::{WorkerEvent, WorkerHandle, WorkerId, WorkerPool};
pub use scheduler::{Scheduler, SchedulerEvent};
