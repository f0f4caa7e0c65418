//! Shadow-run protocol: mirror-in, execute, verify, hydrate-or-discard.
//!
//! A shadow-run never lets a command touch the host tree. The command runs
//! against an isolated mirror; only after its outcome verifies do the
//! changed files get copied back (hydration), and hydration itself is
//! all-or-nothing: a mid-flight failure restores every file it had already
//! overwritten.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{Task, TaskId};
use crate::error::{Error, Result};
use crate::sandbox::isolation::{Isolation, Workspace};
use crate::sandbox::snapshot::{hash_bytes, FileChange, TreeSnapshot};
use crate::{shlog_debug, shlog_warn};

/// Verdict of a shadow-run's verify phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "verdict")]
pub enum Verdict {
    /// Exit code 0 and the success predicate held.
    Verified,
    /// The run failed verification; the staged workspace was discarded.
    Rejected {
        /// Why the run was rejected.
        reason: String,
    },
}

impl Verdict {
    /// True for a verified run.
    pub fn is_verified(&self) -> bool {
        matches!(self, Verdict::Verified)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Verified => write!(f, "verified"),
            Verdict::Rejected { reason } => write!(f, "rejected: {}", reason),
        }
    }
}

/// Immutable record of a completed shadow-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowRunResult {
    /// The task that ran.
    pub task_id: TaskId,
    /// Exit code of the command, if it ran to completion.
    pub exit_code: Option<i32>,
    /// Combined captured output.
    pub output: String,
    /// Files the command changed, relative to the workspace root.
    pub changes: Vec<FileChange>,
    /// Verify-phase verdict.
    pub verdict: Verdict,
}

/// Audit record of one hydration application.
///
/// `seq` is the application order assigned by the scheduler; the merge
/// resolver replays records in this order. `pre_hydration` maps each applied
/// path to the hash of the host file the instant before it was overwritten
/// (`None` if the file did not exist).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HydrationRecord {
    /// The task whose changes were applied.
    pub task_id: TaskId,
    /// Name of the task, for human-readable conflict reports.
    pub task_name: String,
    /// Application sequence number within the run.
    pub seq: u64,
    /// The changes copied to the host, with mirror-in before hashes.
    pub applied: Vec<FileChange>,
    /// Host file hashes captured immediately before overwrite.
    pub pre_hydration: BTreeMap<PathBuf, Option<String>>,
}

/// A completed shadow-run, holding the staged workspace when verified.
///
/// For a verified run the workspace stays alive until [`StagedRun::hydrate`]
/// or [`StagedRun::discard`]; for a rejected run it is already gone and the
/// host is untouched.
pub struct StagedRun {
    /// The run's immutable result.
    pub result: ShadowRunResult,
    /// Name of the task, carried for records and logs.
    pub task_name: String,
    workspace: Option<Box<dyn Workspace>>,
    host_root: PathBuf,
}

impl StagedRun {
    /// Copy the run's changed files back to the host.
    ///
    /// Only files that still exist in the workspace are copied; deletions
    /// are reported in the result but never applied to the host. Each
    /// overwritten host file is byte-snapshotted first, and a failure
    /// partway restores everything already copied before returning
    /// [`Error::Hydration`]. The staged workspace is released either way.
    pub async fn hydrate(&mut self, seq: u64) -> Result<HydrationRecord> {
        if !self.result.verdict.is_verified() {
            return Err(Error::Hydration(format!(
                "task {} was not verified",
                self.task_name
            )));
        }
        let mut workspace = self
            .workspace
            .take()
            .ok_or_else(|| Error::Hydration(format!("task {} already hydrated", self.task_name)))?;

        let applied: Vec<FileChange> = self
            .result
            .changes
            .iter()
            .filter(|c| !c.is_deleted())
            .cloned()
            .collect();

        // (path, host bytes before overwrite); None = file did not exist
        let mut pre_images: Vec<(PathBuf, Option<Vec<u8>>)> = Vec::new();

        for change in &applied {
            let host_path = self.host_root.join(&change.path);
            let staged_path = workspace.path().join(&change.path);

            let outcome = (|| -> std::io::Result<Option<Vec<u8>>> {
                let pre = if host_path.is_file() {
                    Some(fs::read(&host_path)?)
                } else {
                    None
                };
                if let Some(parent) = host_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(&staged_path, &host_path)?;
                Ok(pre)
            })();

            match outcome {
                Ok(pre) => pre_images.push((change.path.clone(), pre)),
                Err(e) => {
                    shlog_warn!(
                        "Hydration of {} failed at {}: {}; rolling back {} file(s)",
                        self.task_name,
                        change.path.display(),
                        e,
                        pre_images.len()
                    );
                    rollback(&self.host_root, &pre_images);
                    workspace.teardown().await?;
                    return Err(Error::Hydration(format!(
                        "task {}: {} at {}",
                        self.task_name,
                        e,
                        change.path.display()
                    )));
                }
            }
        }

        workspace.teardown().await?;

        let pre_hydration = pre_images
            .iter()
            .map(|(path, bytes)| (path.clone(), bytes.as_deref().map(hash_bytes)))
            .collect();

        shlog_debug!(
            "Hydrated task {} seq={} files={}",
            self.task_name,
            seq,
            applied.len()
        );
        Ok(HydrationRecord {
            task_id: self.result.task_id,
            task_name: self.task_name.clone(),
            seq,
            applied,
            pre_hydration,
        })
    }

    /// Release the staged workspace without touching the host.
    pub async fn discard(&mut self) -> Result<()> {
        if let Some(mut workspace) = self.workspace.take() {
            workspace.teardown().await?;
        }
        Ok(())
    }
}

/// Restore host files from their pre-hydration byte snapshots, best effort.
fn rollback(host_root: &std::path::Path, pre_images: &[(PathBuf, Option<Vec<u8>>)]) {
    for (path, bytes) in pre_images.iter().rev() {
        let host_path = host_root.join(path);
        let restored = match bytes {
            Some(bytes) => fs::write(&host_path, bytes),
            None => fs::remove_file(&host_path),
        };
        if let Err(e) = restored {
            shlog_warn!("Rollback of {} failed: {}", host_path.display(), e);
        }
    }
}

/// Executes tasks through the four-phase shadow-run protocol.
#[derive(Clone)]
pub struct SandboxRunner {
    host_root: PathBuf,
    isolation: Arc<dyn Isolation>,
    timeout: Duration,
}

impl SandboxRunner {
    /// Create a runner for the given host subtree.
    pub fn new(host_root: PathBuf, isolation: Arc<dyn Isolation>, timeout: Duration) -> Self {
        Self {
            host_root,
            isolation,
            timeout,
        }
    }

    /// Root of the host subtree this runner mirrors.
    pub fn host_root(&self) -> &std::path::Path {
        &self.host_root
    }

    /// Execute a task as a shadow-run: mirror-in, execute, verify.
    ///
    /// On `Rejected` the workspace is discarded before returning, so the
    /// host is byte-identical to before the call. On `Verified` the staged
    /// workspace is retained for hydration.
    ///
    /// # Errors
    /// [`Error::SandboxProvision`] if the mirror could not be staged; the
    /// scheduler treats this as retryable infrastructure failure, distinct
    /// from a rejection.
    pub async fn shadow_run(&self, task: &Task) -> Result<StagedRun> {
        shlog_debug!(
            "shadow_run task={} attempt={} command={:?}",
            task.name,
            task.attempts,
            task.command
        );

        // Mirror-in
        let before = TreeSnapshot::capture(&self.host_root)?;
        let mut workspace = self.isolation.provision(&self.host_root).await?;

        // Execute
        let exec = match workspace.exec(&task.command, self.timeout).await {
            Ok(exec) => exec,
            Err(e) => {
                let _ = workspace.teardown().await;
                return Err(e);
            }
        };

        let after = match TreeSnapshot::capture(workspace.path()) {
            Ok(after) => after,
            Err(e) => {
                let _ = workspace.teardown().await;
                return Err(e);
            }
        };
        let changes = before.diff(&after);

        // Verify
        let verdict = if exec.timed_out {
            Verdict::Rejected {
                reason: format!("timed out after {:?}", self.timeout),
            }
        } else if exec.exit_code != Some(0) {
            Verdict::Rejected {
                reason: match exec.exit_code {
                    Some(code) => format!("exit code {}", code),
                    None => "terminated by signal".to_string(),
                },
            }
        } else if let Some(pattern) = task
            .success_pattern
            .as_ref()
            .filter(|p| !exec.output.contains(p.as_str()))
        {
            Verdict::Rejected {
                reason: format!("output missing expected pattern {:?}", pattern),
            }
        } else {
            Verdict::Verified
        };

        shlog_debug!(
            "shadow_run task={} verdict={} changes={}",
            task.name,
            verdict,
            changes.len()
        );

        // Hydrate-or-discard: rejected runs surrender the workspace now
        let workspace = if verdict.is_verified() {
            Some(workspace)
        } else {
            workspace.teardown().await?;
            None
        };

        Ok(StagedRun {
            result: ShadowRunResult {
                task_id: task.id,
                exit_code: exec.exit_code,
                output: exec.output,
                changes,
                verdict,
            },
            task_name: task.name.clone(),
            workspace,
            host_root: self.host_root.clone(),
        })
    }
}
