//! Task data model for the execution DAG.
//!
//! Tasks are the atomic units of work dispatched to sandbox workers. Each
//! task tracks its status, command, retry count, and shadow-run outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for a task within a run.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task status in its lifecycle.
///
/// The legal transitions form a small state machine:
/// `Pending -> Ready -> Running -> {Succeeded | Failed}`. A failed task may
/// be re-queued (`Failed -> Ready`) by the self-correction loop, and any
/// non-terminal task may be abandoned. `Succeeded` and `Abandoned` are
/// terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Task created but dependencies not yet satisfied.
    Pending,
    /// Dependencies satisfied, eligible for dispatch.
    Ready,
    /// A worker is executing the task's shadow-run.
    Running,
    /// Shadow-run verified and hydrated to the host.
    Succeeded,
    /// Shadow-run rejected or hydration failed.
    Failed {
        /// Description of the failure.
        error: String,
    },
    /// Retry budget exhausted, or a dependency was abandoned.
    Abandoned {
        /// Reason the task was abandoned.
        reason: String,
    },
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    /// Short status name without any attached message.
    pub fn name(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed { .. } => "failed",
            TaskStatus::Abandoned { .. } => "abandoned",
        }
    }

    /// Check whether a transition to `next` is legal.
    ///
    /// `Failed -> Ready` is the retry re-queue path; it is only reachable
    /// through the self-correction loop, which bounds it.
    pub fn can_transition(&self, next: &TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Ready) => true,
            (Ready, Running) => true,
            (Running, Succeeded) => true,
            (Running, Failed { .. }) => true,
            (Failed { .. }, Ready) => true,
            (Pending, Abandoned { .. }) => true,
            (Ready, Abandoned { .. }) => true,
            (Running, Abandoned { .. }) => true,
            (Failed { .. }, Abandoned { .. }) => true,
            _ => false,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Abandoned { .. })
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Abandoned { reason } => write!(f, "abandoned: {}", reason),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// The captured result of a task's last shadow-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Exit code of the command, if it ran to completion.
    pub exit_code: Option<i32>,
    /// Combined stdout/stderr of the command.
    pub output: String,
    /// Files the command changed inside the sandbox.
    pub changed_files: Vec<PathBuf>,
}

/// A single task in the execution DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Declaration ordinal (0-based input position). Drives the
    /// deterministic dispatch tie-break among equally-ready tasks.
    pub seq: usize,
    /// Human-readable name for the task.
    pub name: String,
    /// Detailed description of what the task should accomplish.
    pub description: String,
    /// The command to execute inside the sandbox.
    pub command: String,
    /// Resource tags used by dependency inference.
    pub resources: Vec<String>,
    /// Optional substring the captured output must contain for the
    /// shadow-run to verify, in addition to exit code 0.
    pub success_pattern: Option<String>,
    /// Current execution status.
    pub status: TaskStatus,
    /// Number of shadow-run attempts so far.
    pub attempts: u32,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task started its first attempt.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Result of the last shadow-run attempt.
    pub outcome: Option<TaskOutcome>,
}

impl Task {
    /// Create a new task with the given name and command.
    ///
    /// The task is created with Pending status, a generated ID, ordinal 0,
    /// and current timestamp.
    pub fn new(name: &str, command: &str) -> Self {
        Self {
            id: TaskId::new(),
            seq: 0,
            name: name.to_string(),
            description: command.to_string(),
            command: command.to_string(),
            resources: Vec::new(),
            success_pattern: None,
            status: TaskStatus::Pending,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            outcome: None,
        }
    }

    /// Set the declaration ordinal.
    pub fn with_seq(mut self, seq: usize) -> Self {
        self.seq = seq;
        self
    }

    /// Attach resource tags.
    pub fn with_resources(mut self, resources: Vec<String>) -> Self {
        self.resources = resources;
        self
    }

    /// Require the captured output to contain `pattern` for verification.
    pub fn with_success_pattern(mut self, pattern: &str) -> Self {
        self.success_pattern = Some(pattern.to_string());
        self
    }

    /// Replace the command, as done by the self-correction loop when the
    /// planner proposes a revision.
    pub fn set_command(&mut self, command: &str) {
        self.command = command.to_string();
    }

    /// Record the result of a shadow-run attempt.
    pub fn record_outcome(&mut self, outcome: TaskOutcome) {
        self.outcome = Some(outcome);
    }

    /// Check if the task is in a terminal state.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}
