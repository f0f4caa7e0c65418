//! Isolation capability for shadow-runs.
//!
//! The scheduler never talks to an execution backend directly; it provisions
//! a [`Workspace`] through the [`Isolation`] trait and runs commands inside
//! it. The default backend, [`ProcessIsolation`], mirrors the host subtree
//! into a temp directory and runs commands there with `sh -c`. A
//! container-backed workspace can be slotted in without touching the
//! scheduler or merge logic.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::shlog_trace;

/// Directory names never mirrored into a workspace and never hydrated back.
pub const SKIP_DIRS: &[&str] = [".git", "target", "node_modules", ".venv"].as_slice();

/// Captured result of a command execution inside a workspace.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Exit code, if the process ran to completion.
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr.
    pub output: String,
    /// True if the command was cut off by the wall-clock timeout.
    pub timed_out: bool,
}

/// An isolated copy of the host subtree that commands execute against.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Root of the isolated tree.
    fn path(&self) -> &Path;

    /// Run a shell command inside the workspace with a wall-clock timeout.
    ///
    /// A timeout is not an error: it is reported through
    /// [`ExecOutput::timed_out`] so the caller can turn it into a rejection.
    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput>;

    /// Release the workspace and its backing storage.
    async fn teardown(&mut self) -> Result<()>;
}

/// Provisions isolated workspaces from a host subtree.
#[async_trait]
pub trait Isolation: Send + Sync {
    /// Stage an isolated mirror of `host_root`.
    ///
    /// Failures here are [`Error::SandboxProvision`], which the scheduler
    /// retries with backoff; they are never conflated with a command
    /// rejection.
    async fn provision(&self, host_root: &Path) -> Result<Box<dyn Workspace>>;
}

/// Default isolation backend: temp-dir mirror + `sh -c` subprocess.
#[derive(Debug, Default, Clone)]
pub struct ProcessIsolation;

#[async_trait]
impl Isolation for ProcessIsolation {
    async fn provision(&self, host_root: &Path) -> Result<Box<dyn Workspace>> {
        let dir = tempfile::Builder::new()
            .prefix("shade-")
            .tempdir()
            .map_err(|e| Error::SandboxProvision(format!("temp dir: {}", e)))?;

        let src = host_root.to_path_buf();
        let dst = dir.path().to_path_buf();
        tokio::task::spawn_blocking(move || copy_dir_filtered(&src, &dst))
            .await
            .map_err(|e| Error::TaskJoin(e.to_string()))?
            .map_err(|e| Error::SandboxProvision(format!("mirror-in: {}", e)))?;

        shlog_trace!(
            "Provisioned workspace {} from {}",
            dir.path().display(),
            host_root.display()
        );
        Ok(Box::new(ProcessWorkspace { dir: Some(dir) }))
    }
}

/// Workspace backed by a temp directory on the host filesystem.
pub struct ProcessWorkspace {
    dir: Option<TempDir>,
}

#[async_trait]
impl Workspace for ProcessWorkspace {
    fn path(&self) -> &Path {
        // Invariant: dir is Some until teardown, and teardown consumes the
        // workspace from the caller's perspective.
        self.dir
            .as_ref()
            .map(|d| d.path())
            .unwrap_or_else(|| Path::new(""))
    }

    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput> {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(self.path())
            .kill_on_drop(true);

        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(output) => {
                let output = output?;
                let combined = String::from_utf8_lossy(&output.stdout).to_string()
                    + &String::from_utf8_lossy(&output.stderr);
                Ok(ExecOutput {
                    exit_code: output.status.code(),
                    output: combined,
                    timed_out: false,
                })
            }
            // kill_on_drop reaps the child when the output future is dropped
            Err(_) => Ok(ExecOutput {
                exit_code: None,
                output: format!("command timed out after {:?}", timeout),
                timed_out: true,
            }),
        }
    }

    async fn teardown(&mut self) -> Result<()> {
        if let Some(dir) = self.dir.take() {
            shlog_trace!("Tearing down workspace {}", dir.path().display());
            dir.close()?;
        }
        Ok(())
    }
}

/// Copy a directory tree, skipping [`SKIP_DIRS`] components.
pub fn copy_dir_filtered(src: &Path, dest: &Path) -> std::io::Result<()> {
    for entry in walkdir::WalkDir::new(src).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        let rel = match path.strip_prefix(src) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        if rel.as_os_str().is_empty() || should_skip(rel) {
            continue;
        }
        let target_path = dest.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target_path)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(path, &target_path)?;
        }
    }
    Ok(())
}

/// Check whether a relative path contains a skipped component.
pub fn should_skip(path: &Path) -> bool {
    path.components().any(|component| {
        let name = component.as_os_str().to_string_lossy();
        SKIP_DIRS.contains(&name.as_ref())
    })
}
