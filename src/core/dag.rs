//! Task DAG (Directed Acyclic Graph) for dependency management.
//!
//! This module provides the TaskDAG structure that represents task
//! dependencies as a directed acyclic graph, enabling concurrent shadow-runs
//! of independent tasks. The DAG also owns the task status state machine:
//! every status change flows through [`TaskDAG::mark`], which rejects
//! illegal transitions.

use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Type of dependency between tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DependencyType {
    /// Explicitly declared in the plan (`after:` clause).
    Declared,
    /// Inferred because both tasks touch the same resource tag.
    Resource {
        /// The shared resource tag.
        tag: String,
    },
}

impl Default for DependencyType {
    fn default() -> Self {
        Self::Declared
    }
}

impl std::fmt::Display for DependencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyType::Declared => write!(f, "declared"),
            DependencyType::Resource { tag } => write!(f, "resource: {}", tag),
        }
    }
}

/// The task dependency graph.
///
/// TaskDAG uses petgraph's DiGraph to represent task dependencies.
/// Nodes are tasks, and edges represent dependencies with metadata
/// about how the dependency arose.
pub struct TaskDAG {
    /// The underlying directed graph.
    graph: DiGraph<Task, DependencyType>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    task_index: HashMap<TaskId, NodeIndex>,
    /// Index mapping from task name to TaskId. Names are unique per run.
    name_index: HashMap<String, TaskId>,
}

impl TaskDAG {
    /// Create a new empty TaskDAG.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
            name_index: HashMap::new(),
        }
    }

    /// Add a task to the DAG.
    ///
    /// Returns the NodeIndex for the added task.
    /// If the task already exists (same TaskId), returns the existing NodeIndex.
    pub fn add_task(&mut self, task: Task) -> NodeIndex {
        if let Some(&index) = self.task_index.get(&task.id) {
            return index;
        }

        let id = task.id;
        let name = task.name.clone();
        let index = self.graph.add_node(task);
        self.task_index.insert(id, index);
        self.name_index.insert(name, id);
        index
    }

    /// Add a dependency between two tasks.
    ///
    /// The dependency indicates that `from` must succeed before `to` can
    /// start. The cycle check runs BEFORE the edge is inserted: if the edge
    /// would close a cycle, the graph is left exactly as it was.
    ///
    /// # Errors
    /// Returns an error if either task is not found, or if the edge would
    /// create a cycle (including a self-loop).
    pub fn add_dependency(
        &mut self,
        from: &TaskId,
        to: &TaskId,
        dep_type: DependencyType,
    ) -> Result<()> {
        let from_index = *self
            .task_index
            .get(from)
            .ok_or_else(|| Error::Validation(format!("Task {} not found in DAG", from)))?;

        let to_index = *self
            .task_index
            .get(to)
            .ok_or_else(|| Error::Validation(format!("Task {} not found in DAG", to)))?;

        // The edge from -> to closes a cycle exactly when `to` can already
        // reach `from`. Checking reachability first means a rejected edge
        // never touches the graph.
        if from_index == to_index || has_path_connecting(&self.graph, to_index, from_index, None) {
            return Err(Error::Cycle {
                from: self.task_name(from),
                to: self.task_name(to),
            });
        }

        self.graph.add_edge(from_index, to_index, dep_type);
        Ok(())
    }

    fn task_name(&self, id: &TaskId) -> String {
        self.get_task(id)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Get a reference to a task by its ID.
    pub fn get_task(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// Get a mutable reference to a task by its ID.
    pub fn get_task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        if let Some(&index) = self.task_index.get(id) {
            self.graph.node_weight_mut(index)
        } else {
            None
        }
    }

    /// Look up a task by name.
    pub fn get_by_name(&self, name: &str) -> Option<&Task> {
        self.name_index.get(name).and_then(|id| self.get_task(id))
    }

    /// Get the number of tasks in the DAG.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of dependencies (edges) in the DAG.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Check if a dependency exists between two tasks.
    pub fn has_dependency(&self, from: &TaskId, to: &TaskId) -> bool {
        if let (Some(&from_idx), Some(&to_idx)) =
            (self.task_index.get(from), self.task_index.get(to))
        {
            self.graph.find_edge(from_idx, to_idx).is_some()
        } else {
            false
        }
    }

    /// Get the dependency type between two tasks, if one exists.
    pub fn get_dependency(&self, from: &TaskId, to: &TaskId) -> Option<&DependencyType> {
        let from_idx = self.task_index.get(from)?;
        let to_idx = self.task_index.get(to)?;
        let edge = self.graph.find_edge(*from_idx, *to_idx)?;
        self.graph.edge_weight(edge)
    }

    /// Get all tasks that the given task depends on (predecessors).
    pub fn get_dependencies(&self, id: &TaskId) -> Vec<&Task> {
        if let Some(&index) = self.task_index.get(id) {
            self.graph
                .neighbors_directed(index, petgraph::Direction::Incoming)
                .filter_map(|neighbor| self.graph.node_weight(neighbor))
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Get all tasks that depend on the given task (successors).
    pub fn get_dependents(&self, id: &TaskId) -> Vec<&Task> {
        if let Some(&index) = self.task_index.get(id) {
            self.graph
                .neighbors_directed(index, petgraph::Direction::Outgoing)
                .filter_map(|neighbor| self.graph.node_weight(neighbor))
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Get all tasks in the DAG.
    pub fn all_tasks(&self) -> Vec<&Task> {
        self.graph.node_weights().collect()
    }

    /// Check if the DAG is empty.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Check if the DAG contains a task.
    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    // ========== Status state machine ==========

    /// Transition a task to a new status.
    ///
    /// This is the only mutation path for task status. Illegal transitions
    /// (per [`TaskStatus::can_transition`]) are rejected without modifying
    /// the task. Marking a task `Running` increments its attempt counter
    /// and stamps `started_at` on the first attempt; reaching a terminal
    /// state stamps `completed_at`.
    pub fn mark(&mut self, id: &TaskId, status: TaskStatus) -> Result<()> {
        let task = self
            .get_task_mut(id)
            .ok_or_else(|| Error::Validation(format!("Task {} not found in DAG", id)))?;

        if !task.status.can_transition(&status) {
            return Err(Error::InvalidTransition {
                task: task.name.clone(),
                from: task.status.name().to_string(),
                to: status.name().to_string(),
            });
        }

        if matches!(status, TaskStatus::Running) {
            task.attempts += 1;
            if task.started_at.is_none() {
                task.started_at = Some(chrono::Utc::now());
            }
        }
        if status.is_terminal() {
            task.completed_at = Some(chrono::Utc::now());
        }

        task.status = status;
        Ok(())
    }

    // ========== Scheduling Operations ==========

    /// Get all tasks eligible for dispatch, in declaration order.
    ///
    /// A task is eligible if it is `Ready` (re-queued by the correction
    /// loop), or `Pending` with every dependency `Succeeded`. The result is
    /// sorted by declaration ordinal so that dispatch order is deterministic
    /// for a given plan.
    pub fn ready_set(&self) -> Vec<TaskId> {
        let mut ready: Vec<(usize, TaskId)> = self
            .graph
            .node_indices()
            .filter_map(|index| {
                let task = self.graph.node_weight(index)?;
                let eligible = match task.status {
                    TaskStatus::Ready => true,
                    TaskStatus::Pending => self
                        .graph
                        .neighbors_directed(index, petgraph::Direction::Incoming)
                        .all(|dep_index| {
                            self.graph
                                .node_weight(dep_index)
                                .map(|dep| matches!(dep.status, TaskStatus::Succeeded))
                                .unwrap_or(false)
                        }),
                    _ => false,
                };
                if eligible {
                    Some((task.seq, task.id))
                } else {
                    None
                }
            })
            .collect();

        ready.sort_by_key(|(seq, _)| *seq);
        ready.into_iter().map(|(_, id)| id).collect()
    }

    /// Check if every task is in a terminal state.
    pub fn is_complete(&self) -> bool {
        self.graph.node_weights().all(|task| task.is_finished())
    }

    /// Abandon a task and, transitively, every task that depends on it.
    ///
    /// The cascade walks outgoing edges breadth-first; dependents are
    /// abandoned with a reason naming the task that doomed them. Tasks that
    /// already reached a terminal state are left untouched.
    ///
    /// Returns the IDs of all tasks abandoned by this call, the root first.
    pub fn abandon_with_dependents(&mut self, id: &TaskId, reason: &str) -> Result<Vec<TaskId>> {
        let root_index = *self
            .task_index
            .get(id)
            .ok_or_else(|| Error::Validation(format!("Task {} not found in DAG", id)))?;
        let root_name = self.task_name(id);

        let mut abandoned = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(root_index);

        while let Some(index) = queue.pop_front() {
            let task_id = match self.graph.node_weight(index) {
                Some(task) if !task.is_finished() => task.id,
                _ => continue,
            };

            let why = if index == root_index {
                reason.to_string()
            } else {
                format!("dependency {} abandoned", root_name)
            };
            self.mark(&task_id, TaskStatus::Abandoned { reason: why })?;
            abandoned.push(task_id);

            let dependents: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(index, petgraph::Direction::Outgoing)
                .collect();
            queue.extend(dependents);
        }

        Ok(abandoned)
    }

    /// Get tasks in topological order (respecting dependencies).
    ///
    /// # Errors
    /// Returns an error if the graph contains a cycle (should never happen
    /// since add_dependency rejects cycle-closing edges).
    pub fn topological_order(&self) -> Result<Vec<&Task>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let task_name = self
                .graph
                .node_weight(cycle.node_id())
                .map(|t| t.name.as_str())
                .unwrap_or("unknown");
            Error::Validation(format!("Cycle detected at task: {}", task_name))
        })?;

        Ok(sorted
            .into_iter()
            .filter_map(|index| self.graph.node_weight(index))
            .collect())
    }

    /// Count tasks matching a status predicate.
    pub fn count_where(&self, pred: impl Fn(&TaskStatus) -> bool) -> usize {
        self.graph
            .node_weights()
            .filter(|task| pred(&task.status))
            .count()
    }
}

impl Default for TaskDAG {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskDAG {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDAG")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
