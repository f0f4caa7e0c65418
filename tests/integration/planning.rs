//! Decomposition and DAG construction tests.

use crate::fixtures::plan;
use shade::core::{DependencyType, Task, TaskDAG, TaskStatus};
use shade::orchestration::Decomposer;
use shade::Error;

#[test]
fn test_plan_builds_declared_dependencies() {
    let dag = plan(
        "fetch: git pull\n\
         build: cargo build after: fetch\n\
         test: cargo test after: build",
    );

    assert_eq!(dag.task_count(), 3);
    assert_eq!(dag.dependency_count(), 2);

    let fetch = dag.get_by_name("fetch").unwrap().id;
    let build = dag.get_by_name("build").unwrap().id;
    let test = dag.get_by_name("test").unwrap().id;
    assert!(dag.has_dependency(&fetch, &build));
    assert!(dag.has_dependency(&build, &test));
    assert!(!dag.has_dependency(&fetch, &test));
}

#[test]
fn test_shared_resource_tags_serialize_access() {
    let dag = plan(
        "a: echo a @db\n\
         b: echo b @web\n\
         c: echo c @db",
    );

    let a = dag.get_by_name("a").unwrap().id;
    let b = dag.get_by_name("b").unwrap().id;
    let c = dag.get_by_name("c").unwrap().id;

    // c chains behind a on @db; b is independent
    assert!(matches!(
        dag.get_dependency(&a, &c),
        Some(DependencyType::Resource { .. })
    ));
    assert!(!dag.has_dependency(&a, &b));
    assert!(!dag.has_dependency(&b, &c));
}

#[test]
fn test_ready_set_follows_declaration_order() {
    let dag = plan(
        "zeta: echo z\n\
         alpha: echo a\n\
         mid: echo m",
    );

    let ready = dag.ready_set();
    let names: Vec<&str> = ready
        .iter()
        .map(|id| dag.get_task(id).unwrap().name.as_str())
        .collect();
    assert_eq!(names, vec!["zeta", "alpha", "mid"]);
}

#[test]
fn test_declared_cycle_is_rejected() {
    let result = Decomposer::new().decompose(
        "a: echo a after: b\n\
         b: echo b after: a",
    );
    assert!(matches!(result, Err(Error::Decomposition(_))));
}

#[test]
fn test_rejected_edge_leaves_graph_unmodified() {
    let mut dag = TaskDAG::new();
    let a = Task::new("a", "echo a").with_seq(0);
    let b = Task::new("b", "echo b").with_seq(1);
    let a_id = a.id;
    let b_id = b.id;
    dag.add_task(a);
    dag.add_task(b);
    dag.add_dependency(&a_id, &b_id, DependencyType::Declared)
        .unwrap();

    let edges_before = dag.dependency_count();
    let result = dag.add_dependency(&b_id, &a_id, DependencyType::Declared);

    assert!(matches!(result, Err(Error::Cycle { .. })));
    assert_eq!(dag.dependency_count(), edges_before);
    assert!(!dag.has_dependency(&b_id, &a_id));
    // The graph still schedules normally
    assert_eq!(dag.ready_set(), vec![a_id]);
}

#[test]
fn test_self_dependency_is_rejected() {
    let mut dag = TaskDAG::new();
    let a = Task::new("a", "echo a");
    let a_id = a.id;
    dag.add_task(a);

    let result = dag.add_dependency(&a_id, &a_id, DependencyType::Declared);
    assert!(matches!(result, Err(Error::Cycle { .. })));
    assert_eq!(dag.dependency_count(), 0);
}

#[test]
fn test_unknown_dependency_name_is_rejected() {
    let result = Decomposer::new().decompose("build: cargo build after: missing");
    assert!(matches!(result, Err(Error::Decomposition(_))));
}

#[test]
fn test_fresh_plan_starts_fully_pending() {
    let dag = plan("a: echo a\nb: echo b after: a");
    assert_eq!(
        dag.count_where(|s| matches!(s, TaskStatus::Pending)),
        2
    );
    assert!(!dag.is_complete());
}
