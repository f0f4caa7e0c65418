//! Incidents and the persisted run report.
//!
//! Every run terminates with a [`RunReport`]: the terminal status of every
//! task, every hydration record, every incident, and the merge resolution.
//! Reports are written as pretty JSON under `~/.shade/runs/` with a
//! `latest.json` copy, which is what `swarm merge` replays.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::Config;
use crate::core::{TaskDAG, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::merge::MergeReport;
use crate::sandbox::HydrationRecord;
use crate::shlog_warn;

/// A recorded task abandonment or hydration failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    /// The task involved.
    pub task_id: TaskId,
    /// Name of the task.
    pub task_name: String,
    /// Why the incident was raised.
    pub reason: String,
    /// Last captured output of the task, if any.
    pub output: String,
    /// When the incident was recorded.
    pub at: DateTime<Utc>,
}

impl Incident {
    /// Record a new incident now.
    pub fn new(task_id: TaskId, task_name: &str, reason: &str, output: &str) -> Self {
        Self {
            task_id,
            task_name: task_name.to_string(),
            reason: reason.to_string(),
            output: output.to_string(),
            at: Utc::now(),
        }
    }
}

/// Sink for incidents as they are raised during a run.
pub trait Notifier: Send + Sync {
    /// Deliver one incident.
    fn notify(&self, incident: &Incident);
}

/// Default notifier: incidents go to the log file at WARN.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, incident: &Incident) {
        shlog_warn!(
            "Incident: task {} - {}",
            incident.task_name,
            incident.reason
        );
    }
}

/// Terminal state of one task, as persisted in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    /// The task's identifier.
    pub task_id: TaskId,
    /// Name of the task.
    pub name: String,
    /// The command as last attempted (including planner revisions).
    pub command: String,
    /// Terminal (or last observed) status.
    pub status: TaskStatus,
    /// Number of shadow-run attempts.
    pub attempts: u32,
    /// Captured output of the last attempt, if any ran.
    pub output: Option<String>,
    /// Files the last attempt changed in its workspace.
    pub changed_files: Vec<PathBuf>,
}

/// Full record of one swarm run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run identifier.
    pub run_id: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Per-task terminal states, in declaration order.
    pub tasks: Vec<TaskReport>,
    /// Every hydration applied, in application order.
    pub hydrations: Vec<HydrationRecord>,
    /// Incidents raised during the run.
    pub incidents: Vec<Incident>,
    /// Merge resolution over the hydrations.
    pub merge: MergeReport,
}

impl RunReport {
    /// Assemble a report from a finished run.
    pub fn from_run(
        dag: &TaskDAG,
        hydrations: Vec<HydrationRecord>,
        incidents: Vec<Incident>,
        merge: MergeReport,
        started_at: DateTime<Utc>,
    ) -> Self {
        let mut tasks: Vec<&crate::core::Task> = dag.all_tasks();
        tasks.sort_by_key(|t| t.seq);

        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at,
            finished_at: Utc::now(),
            tasks: tasks
                .into_iter()
                .map(|task| TaskReport {
                    task_id: task.id,
                    name: task.name.clone(),
                    command: task.command.clone(),
                    status: task.status.clone(),
                    attempts: task.attempts,
                    output: task.outcome.as_ref().map(|o| o.output.clone()),
                    changed_files: task
                        .outcome
                        .as_ref()
                        .map(|o| o.changed_files.clone())
                        .unwrap_or_default(),
                })
                .collect(),
            hydrations,
            incidents,
            merge,
        }
    }

    /// Persist the report under `~/.shade/runs/`, updating `latest.json`.
    pub fn save(&self) -> Result<PathBuf> {
        Config::ensure_dirs()?;
        self.save_to(&Config::runs_dir()?)
    }

    /// Persist the report under an explicit directory.
    pub fn save_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let json = serde_json::to_string_pretty(self)?;
        let path = dir.join(format!("{}.json", self.run_id));
        fs::write(&path, &json)?;
        fs::write(dir.join("latest.json"), &json)?;
        Ok(path)
    }

    /// Load the most recent run's report.
    pub fn load_latest() -> Result<Self> {
        Self::load_latest_from(&Config::runs_dir()?)
    }

    /// Load `latest.json` from an explicit directory.
    pub fn load_latest_from(dir: &Path) -> Result<Self> {
        let path = dir.join("latest.json");
        if !path.exists() {
            return Err(Error::RunNotFound(format!(
                "no recorded run at {}",
                path.display()
            )));
        }
        Ok(serde_json::from_str(&fs::read_to_string(&path)?)?)
    }

    /// Count of tasks that reached `Succeeded`.
    pub fn succeeded_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Succeeded))
            .count()
    }

    /// Count of tasks that reached `Abandoned`.
    pub fn abandoned_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Abandoned { .. }))
            .count()
    }

    /// Render a human-readable summary for the CLI.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Run {} - {} task(s): {} succeeded, {} abandoned\n",
            self.run_id,
            self.tasks.len(),
            self.succeeded_count(),
            self.abandoned_count()
        ));
        for task in &self.tasks {
            out.push_str(&format!(
                "  [{}] {} ({} attempt(s))",
                task.status.name(),
                task.name,
                task.attempts
            ));
            if let TaskStatus::Abandoned { reason } = &task.status {
                out.push_str(&format!(" - {}", reason));
            }
            out.push('\n');
        }
        if !self.hydrations.is_empty() {
            out.push_str(&format!("Hydrations: {}\n", self.hydrations.len()));
        }
        if !self.incidents.is_empty() {
            out.push_str(&format!("Incidents: {}\n", self.incidents.len()));
            for incident in &self.incidents {
                out.push_str(&format!(
                    "  {} - {}\n",
                    incident.task_name, incident.reason
                ));
            }
        }
        if self.merge.has_conflicts() {
            out.push_str(&format!("Merge conflicts: {}\n", self.merge.conflicts.len()));
            for conflict in &self.merge.conflicts {
                out.push_str(&format!("  {}\n", conflict));
            }
        } else if !self.merge.superseded.is_empty() {
            out.push_str(&format!(
                "Merge: clean ({} superseded write(s))\n",
                self.merge.superseded.len()
            ));
        } else {
            out.push_str("Merge: clean\n");
        }
        out
    }
}
