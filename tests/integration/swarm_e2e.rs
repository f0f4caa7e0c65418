//! Full swarm runs end to end: plan text in, hydrated host and report out.

use chrono::Utc;
use shade::core::TaskStatus;
use shade::merge::MergeResolver;
use shade::orchestration::SchedulerEvent;
use shade::report::RunReport;

use crate::fixtures::{drain_events, swarm, TestHost};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_workers_run_independents_then_dependent() {
    let host = TestHost::new();
    let mut swarm = swarm(
        "a: echo alpha > a.txt\n\
         b: echo beta > b.txt\n\
         c: cat a.txt b.txt > c.txt after: a,b",
        &host,
        2,
        0,
    );

    swarm.scheduler.run().await.unwrap();

    let (dag, hydrations, incidents) = swarm.scheduler.into_parts();
    assert!(dag.is_complete());
    assert_eq!(dag.count_where(|s| matches!(s, TaskStatus::Succeeded)), 3);
    assert!(incidents.is_empty());

    // c saw both hydrated inputs
    assert_eq!(host.read("c.txt"), "alpha\nbeta\n");

    // c hydrated after both of its dependencies
    let c_id = dag.get_by_name("c").unwrap().id;
    let c_seq = hydrations
        .iter()
        .find(|h| h.task_id == c_id)
        .expect("c hydrated")
        .seq;
    for name in ["a", "b"] {
        let id = dag.get_by_name(name).unwrap().id;
        let seq = hydrations
            .iter()
            .find(|h| h.task_id == id)
            .expect("dependency hydrated")
            .seq;
        assert!(seq < c_seq);
    }

    // c never started before both dependencies succeeded
    let events = drain_events(&mut swarm.events);
    let c_started = events
        .iter()
        .position(|e| matches!(e, SchedulerEvent::TaskStarted { task_id, .. } if *task_id == c_id))
        .expect("c started");
    for name in ["a", "b"] {
        let id = dag.get_by_name(name).unwrap().id;
        let succeeded = events
            .iter()
            .position(
                |e| matches!(e, SchedulerEvent::TaskSucceeded { task_id } if *task_id == id),
            )
            .expect("dependency succeeded");
        assert!(succeeded < c_started);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_report_roundtrips_through_disk() {
    let host = TestHost::new();
    let started_at = Utc::now();
    let mut swarm = swarm(
        "ok: echo fine > out.txt\n\
         bad: false",
        &host,
        2,
        0,
    );

    swarm.scheduler.run().await.unwrap();

    let (dag, hydrations, incidents) = swarm.scheduler.into_parts();
    let merge = MergeResolver::new().resolve(&hydrations);
    let report = RunReport::from_run(&dag, hydrations, incidents, merge, started_at);

    assert_eq!(report.tasks.len(), 2);
    assert_eq!(report.succeeded_count(), 1);
    assert_eq!(report.abandoned_count(), 1);
    assert_eq!(report.incidents.len(), 1);
    assert_eq!(report.incidents[0].task_name, "bad");

    let dir = tempfile::tempdir().unwrap();
    report.save_to(dir.path()).unwrap();
    let loaded = RunReport::load_latest_from(dir.path()).unwrap();
    assert_eq!(loaded.run_id, report.run_id);
    assert_eq!(loaded.succeeded_count(), 1);
    assert_eq!(loaded.hydrations.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_success_pattern_gates_verification() {
    let host = TestHost::new();
    // Same exit code, different outputs; only one matches its pattern
    let dag = {
        use shade::core::{Task, TaskDAG};
        let mut dag = TaskDAG::new();
        dag.add_task(
            Task::new("matching", "echo deploy complete")
                .with_seq(0)
                .with_success_pattern("deploy complete"),
        );
        dag.add_task(
            Task::new("missing", "echo something else")
                .with_seq(1)
                .with_success_pattern("deploy complete"),
        );
        dag
    };
    let mut swarm = crate::fixtures::swarm_over(dag, &host, 2, 0);

    swarm.scheduler.run().await.unwrap();

    let (dag, _, _) = swarm.scheduler.into_parts();
    assert!(matches!(
        dag.get_by_name("matching").unwrap().status,
        TaskStatus::Succeeded
    ));
    assert!(matches!(
        dag.get_by_name("missing").unwrap().status,
        TaskStatus::Abandoned { .. }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_worker_serializes_resource_tagged_tasks() {
    let host = TestHost::new();
    host.seed("log.txt", "");
    // Appends through a shared tag run strictly in declaration order
    let mut swarm = swarm(
        "first: sh -c 'cat log.txt > tmp && echo first >> tmp && mv tmp log.txt' @log\n\
         second: sh -c 'cat log.txt > tmp && echo second >> tmp && mv tmp log.txt' @log",
        &host,
        4,
        0,
    );

    swarm.scheduler.run().await.unwrap();

    let (dag, _, _) = swarm.scheduler.into_parts();
    assert_eq!(dag.count_where(|s| matches!(s, TaskStatus::Succeeded)), 2);
    assert_eq!(host.read("log.txt"), "first\nsecond\n");
}
