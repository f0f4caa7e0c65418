//! Host isolation and hydration guarantees.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use shade::core::{Task, TaskStatus};
use shade::sandbox::{ProcessIsolation, SandboxRunner, Verdict};

use crate::fixtures::{swarm, TestHost};

fn runner(host: &TestHost) -> SandboxRunner {
    SandboxRunner::new(
        host.path.clone(),
        Arc::new(ProcessIsolation),
        Duration::from_secs(30),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rejected_run_leaves_host_byte_identical() {
    let host = TestHost::new();
    host.seed("keep.txt", "original");
    host.seed("nested/deep.txt", "untouched");
    let before = host.snapshot();

    // Writes files, deletes files, then exits non-zero
    let mut swarm = swarm(
        "vandal: sh -c 'echo junk > junk.txt && rm keep.txt && exit 3'",
        &host,
        1,
        1,
    );
    swarm.scheduler.run().await.unwrap();

    let (dag, hydrations, _) = swarm.scheduler.into_parts();
    assert!(hydrations.is_empty());
    assert!(matches!(
        dag.get_by_name("vandal").unwrap().status,
        TaskStatus::Abandoned { .. }
    ));
    assert_eq!(host.snapshot(), before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_verified_run_hydrates_creations_and_modifications() {
    let host = TestHost::new();
    host.seed("config.txt", "old");

    let mut swarm = swarm(
        "writer: sh -c 'echo new > config.txt && echo fresh > created.txt'",
        &host,
        1,
        0,
    );
    swarm.scheduler.run().await.unwrap();

    assert_eq!(host.read("config.txt"), "new\n");
    assert_eq!(host.read("created.txt"), "fresh\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deletions_are_reported_but_never_applied() {
    let host = TestHost::new();
    host.seed("precious.txt", "data");

    let task = Task::new("deleter", "rm precious.txt");
    let mut staged = runner(&host).shadow_run(&task).await.unwrap();

    assert!(staged.result.verdict.is_verified());
    assert!(staged
        .result
        .changes
        .iter()
        .any(|c| c.is_deleted() && c.path.to_str() == Some("precious.txt")));

    let record = staged.hydrate(0).await.unwrap();
    assert!(record.applied.is_empty());
    assert_eq!(host.read("precious.txt"), "data");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_partial_hydration_rolls_back_earlier_writes() {
    let host = TestHost::new();
    host.seed("a.txt", "before");

    let task = Task::new("writer", "echo changed > a.txt && echo other > z.txt");
    let mut staged = runner(&host).shadow_run(&task).await.unwrap();
    assert!(staged.result.verdict.is_verified());

    // A directory squatting on z.txt, appearing after the run was staged,
    // makes that copy fail mid-hydration
    fs::create_dir_all(host.path.join("z.txt")).unwrap();

    let result = staged.hydrate(0).await;
    assert!(result.is_err());
    // a.txt was applied first, then restored
    assert_eq!(host.read("a.txt"), "before");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_skip_dirs_are_not_mirrored() {
    let host = TestHost::new();
    host.seed(".git/HEAD", "ref: refs/heads/main");
    host.seed("node_modules/pkg/index.js", "module.exports = {}");
    host.seed("src/lib.rs", "pub fn f() {}");

    let task = Task::new("lister", "ls -a");
    let mut staged = runner(&host).shadow_run(&task).await.unwrap();

    let output = staged.result.output.clone();
    assert!(output.contains("src"));
    assert!(!output.contains(".git"));
    assert!(!output.contains("node_modules"));
    staged.discard().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeout_is_a_rejection_not_an_error() {
    let host = TestHost::new();
    let runner = SandboxRunner::new(
        host.path.clone(),
        Arc::new(ProcessIsolation),
        Duration::from_millis(200),
    );

    let task = Task::new("slow", "sleep 5");
    let mut staged = runner.shadow_run(&task).await.unwrap();

    match &staged.result.verdict {
        Verdict::Rejected { reason } => assert!(reason.contains("timed out")),
        other => panic!("expected rejection, got {:?}", other),
    }
    staged.discard().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_discarded_workspace_leaves_no_trace() {
    let host = TestHost::new();
    let before = host.snapshot();

    let task = Task::new("writer", "echo data > file.txt");
    let mut staged = runner(&host).shadow_run(&task).await.unwrap();
    assert!(staged.result.verdict.is_verified());

    staged.discard().await.unwrap();
    assert_eq!(host.snapshot(), before);
}
