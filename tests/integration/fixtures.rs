//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Seeded temporary host trees
//! - Building a fully wired scheduler over a plan
//! - Byte-level host tree snapshots

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

use shade::core::TaskDAG;
use shade::orchestration::{
    CorrectionLoop, Decomposer, RetrySamePlanner, Scheduler, SchedulerEvent, WorkerPool,
};
use shade::sandbox::{ProcessIsolation, SandboxRunner};

/// A temporary host tree for shadow-runs to mirror and hydrate into.
pub struct TestHost {
    /// Keeps the directory alive for the test's duration.
    pub temp_dir: TempDir,
    /// Path to the host root.
    pub path: PathBuf,
}

impl TestHost {
    /// Create an empty host tree.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().to_path_buf();
        Self { temp_dir, path }
    }

    /// Write a file into the host tree.
    pub fn seed(&self, name: &str, content: &str) {
        let path = self.path.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(path, content).expect("Failed to seed file");
    }

    /// Read a file from the host tree.
    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.path.join(name)).expect("Failed to read host file")
    }

    /// True if the named file exists in the host tree.
    pub fn exists(&self, name: &str) -> bool {
        self.path.join(name).exists()
    }

    /// Byte-level snapshot of every file under the host root.
    pub fn snapshot(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        let mut files = BTreeMap::new();
        collect_files(&self.path, &self.path, &mut files);
        files
    }
}

fn collect_files(root: &Path, dir: &Path, files: &mut BTreeMap<PathBuf, Vec<u8>>) {
    for entry in fs::read_dir(dir).expect("Failed to read dir") {
        let entry = entry.expect("Failed to read entry");
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, files);
        } else {
            let relative = path.strip_prefix(root).expect("entry under root");
            let content = fs::read(&path).expect("Failed to read file");
            files.insert(relative.to_path_buf(), content);
        }
    }
}

/// Decompose a plan, panicking on grammar errors.
pub fn plan(input: &str) -> TaskDAG {
    Decomposer::new()
        .decompose(input)
        .expect("Failed to decompose plan")
}

/// A fully wired scheduler over a plan, plus its event stream.
pub struct TestSwarm {
    pub scheduler: Scheduler,
    pub events: mpsc::Receiver<SchedulerEvent>,
}

/// Build a scheduler for the given plan against a host tree.
pub fn swarm(input: &str, host: &TestHost, workers: usize, max_retries: u32) -> TestSwarm {
    swarm_over(plan(input), host, workers, max_retries)
}

/// Build a scheduler over an already-decomposed DAG.
pub fn swarm_over(dag: TaskDAG, host: &TestHost, workers: usize, max_retries: u32) -> TestSwarm {
    let (pool_tx, mut pool_rx) = mpsc::channel(1000);
    tokio::spawn(async move { while pool_rx.recv().await.is_some() {} });
    let (event_tx, events) = mpsc::channel(1000);

    let pool = WorkerPool::new(workers, pool_tx);
    let runner = SandboxRunner::new(
        host.path.clone(),
        Arc::new(ProcessIsolation),
        Duration::from_secs(30),
    );
    let correction = CorrectionLoop::new(Arc::new(RetrySamePlanner), max_retries);
    let scheduler = Scheduler::new(dag, pool, runner, correction, event_tx);

    TestSwarm { scheduler, events }
}

/// Drain all buffered scheduler events.
pub fn drain_events(events: &mut mpsc::Receiver<SchedulerEvent>) -> Vec<SchedulerEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}
