//! Retry exhaustion, abandonment cascades, and the kill switch.

use tokio_util::sync::CancellationToken;

use shade::core::TaskStatus;
use shade::orchestration::SchedulerEvent;

use crate::fixtures::{drain_events, swarm, TestHost};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retry_budget_allows_exactly_max_retries_plus_one_attempts() {
    let host = TestHost::new();
    let max_retries = 2;
    let mut swarm = swarm("doomed: false", &host, 1, max_retries);

    swarm.scheduler.run().await.unwrap();

    let (dag, _, incidents) = swarm.scheduler.into_parts();
    let doomed = dag.get_by_name("doomed").unwrap();
    assert_eq!(doomed.attempts, max_retries + 1);
    assert!(matches!(doomed.status, TaskStatus::Abandoned { .. }));
    assert_eq!(incidents.len(), 1);
    assert!(incidents[0].reason.contains("retry budget exhausted"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flaky_task_succeeds_on_retry() {
    let host = TestHost::new();
    // The marker lives outside the mirrored root, so it survives between
    // attempts even though rejected runs are discarded
    let marker_dir = tempfile::tempdir().unwrap();
    let marker = marker_dir.path().join("seen");
    let command = format!(
        "sh -c 'if [ -f {m} ]; then echo ok > out.txt; else touch {m}; exit 1; fi'",
        m = marker.display()
    );

    let mut swarm = swarm(&format!("flaky: {}", command), &host, 1, 2);
    swarm.scheduler.run().await.unwrap();

    let (dag, hydrations, _) = swarm.scheduler.into_parts();
    let flaky = dag.get_by_name("flaky").unwrap();
    assert!(matches!(flaky.status, TaskStatus::Succeeded));
    assert_eq!(flaky.attempts, 2);
    assert_eq!(hydrations.len(), 1);
    assert_eq!(host.read("out.txt"), "ok\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abandonment_cascades_transitively_without_running_dependents() {
    let host = TestHost::new();
    let mut swarm = swarm(
        "root: false\n\
         child: echo c > c.txt after: root\n\
         grandchild: echo g > g.txt after: child\n\
         bystander: echo b > b.txt",
        &host,
        2,
        0,
    );

    swarm.scheduler.run().await.unwrap();

    let (dag, hydrations, _) = swarm.scheduler.into_parts();
    assert!(dag.is_complete());

    for name in ["root", "child", "grandchild"] {
        let task = dag.get_by_name(name).unwrap();
        assert!(
            matches!(task.status, TaskStatus::Abandoned { .. }),
            "{} should be abandoned",
            name
        );
    }
    // Dependents never consumed an attempt
    assert_eq!(dag.get_by_name("child").unwrap().attempts, 0);
    assert_eq!(dag.get_by_name("grandchild").unwrap().attempts, 0);

    // The independent task still ran and hydrated
    assert!(matches!(
        dag.get_by_name("bystander").unwrap().status,
        TaskStatus::Succeeded
    ));
    assert_eq!(hydrations.len(), 1);
    assert!(host.exists("b.txt"));
    assert!(!host.exists("c.txt"));
    assert!(!host.exists("g.txt"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cascade_reason_names_the_failed_dependency() {
    let host = TestHost::new();
    let mut swarm = swarm(
        "root: false\n\
         child: echo c after: root",
        &host,
        1,
        0,
    );

    swarm.scheduler.run().await.unwrap();

    let (dag, _, _) = swarm.scheduler.into_parts();
    match &dag.get_by_name("child").unwrap().status {
        TaskStatus::Abandoned { reason } => {
            assert!(reason.contains("root"), "unexpected reason: {}", reason);
        }
        other => panic!("expected abandonment, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_kill_switch_halts_without_hydration() {
    let host = TestHost::new();
    let swarm = swarm(
        "a: echo a > a.txt\n\
         b: echo b > b.txt\n\
         c: echo c > c.txt after: a,b",
        &host,
        2,
        0,
    );

    let token = CancellationToken::new();
    token.cancel();
    let mut scheduler = swarm.scheduler.with_kill_switch(token);
    let mut events = swarm.events;

    scheduler.run().await.unwrap();

    let (dag, hydrations, _) = scheduler.into_parts();
    assert!(dag.is_complete());
    assert!(hydrations.is_empty());
    assert_eq!(
        dag.count_where(|s| matches!(s, TaskStatus::Abandoned { .. })),
        3
    );
    assert!(!host.exists("a.txt"));

    let events = drain_events(&mut events);
    assert!(events
        .iter()
        .all(|e| !matches!(e, SchedulerEvent::TaskSucceeded { .. })));
    assert!(matches!(events.last(), Some(SchedulerEvent::RunComplete)));
}
