//! Merge resolution over real runs.

use shade::core::TaskStatus;
use shade::merge::MergeResolver;

use crate::fixtures::{swarm, TestHost};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disjoint_writers_merge_clean() {
    let host = TestHost::new();
    let mut swarm = swarm(
        "a: echo a > a.txt\n\
         b: echo b > b.txt",
        &host,
        2,
        0,
    );
    swarm.scheduler.run().await.unwrap();

    let (_, hydrations, _) = swarm.scheduler.into_parts();
    let report = MergeResolver::new().resolve(&hydrations);
    assert!(report.superseded.is_empty());
    assert!(!report.has_conflicts());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_same_base_writers_are_superseded() {
    let host = TestHost::new();
    host.seed("shared.txt", "base");
    // Both tasks mirror in before either hydrates; the sleeps keep the
    // mirror-ins ahead of the first completion
    let mut swarm = swarm(
        "a: sh -c 'sleep 0.5 && echo from-a > shared.txt'\n\
         b: sh -c 'sleep 0.5 && echo from-b > shared.txt'",
        &host,
        2,
        0,
    );
    swarm.scheduler.run().await.unwrap();

    let (dag, hydrations, _) = swarm.scheduler.into_parts();
    assert_eq!(dag.count_where(|s| matches!(s, TaskStatus::Succeeded)), 2);

    let report = MergeResolver::new().resolve(&hydrations);
    assert!(!report.has_conflicts());
    assert_eq!(report.superseded.len(), 1);

    // The host holds the later hydration's content
    let later = &report.superseded[0].later_task;
    assert_eq!(host.read("shared.txt"), format!("from-{}\n", later));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dependent_writer_with_diverged_base_is_a_conflict() {
    let host = TestHost::new();
    host.seed("shared.txt", "base");
    // b mirrors in after a's hydration, so the two writers saw different
    // bases for the same path
    let mut swarm = swarm(
        "a: echo from-a > shared.txt\n\
         b: echo from-b > shared.txt after: a",
        &host,
        2,
        0,
    );
    swarm.scheduler.run().await.unwrap();

    let (dag, hydrations, _) = swarm.scheduler.into_parts();
    let report = MergeResolver::new().resolve(&hydrations);

    assert_eq!(report.conflicts.len(), 1);
    let conflict = &report.conflicts[0];
    assert_eq!(conflict.earlier_task, "a");
    assert_eq!(conflict.later_task, "b");
    assert_eq!(
        conflict.earlier_task_id,
        dag.get_by_name("a").unwrap().id
    );

    // The host is not rewritten by resolution; it holds the later write
    assert_eq!(host.read("shared.txt"), "from-b\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resolution_is_idempotent_over_a_real_run() {
    let host = TestHost::new();
    host.seed("shared.txt", "base");
    let mut swarm = swarm(
        "a: echo one > shared.txt\n\
         b: echo two > shared.txt after: a\n\
         c: echo c > c.txt",
        &host,
        2,
        0,
    );
    swarm.scheduler.run().await.unwrap();

    let (_, hydrations, _) = swarm.scheduler.into_parts();
    let resolver = MergeResolver::new();
    let first = resolver.resolve(&hydrations);
    let second = resolver.resolve(&hydrations);
    assert_eq!(first, second);

    // Resolution touched nothing on disk
    assert_eq!(host.read("shared.txt"), "two\n");
    assert_eq!(host.read("c.txt"), "c\n");
}
