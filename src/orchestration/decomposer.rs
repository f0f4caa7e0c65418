//! Goal decomposition: newline-separated task lists into an execution DAG.
//!
//! Each non-empty line declares one task:
//!
//! ```text
//! [name:] command [@tag ...] [after: name1,name2]
//! ```
//!
//! - `name:` is optional; unnamed tasks get `task-N` by 1-based position.
//! - Trailing `@tag` tokens declare resource tags; an `@` inside the
//!   command is left alone.
//! - `after:` declares explicit dependencies by task name.
//! - Blank lines and lines starting with `#` are ignored.
//! - Command text is taken from the line verbatim, interior whitespace
//!   included.
//!
//! Tasks with disjoint resource tags are independent. Tasks sharing a tag
//! are chained in input order: each depends on the nearest earlier task
//! carrying the same tag. Inferred edges always point backwards in input
//! order, so inference alone can never close a cycle; a cycle always
//! implicates declared `after:` edges.

use std::collections::HashMap;

use crate::core::{DependencyType, Task, TaskDAG, TaskId};
use crate::error::{Error, Result};
use crate::shlog_debug;

/// One parsed plan line, before DAG construction.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TaskSpec {
    name: Option<String>,
    command: String,
    tags: Vec<String>,
    after: Vec<String>,
}

/// Deterministic plan parser producing a [`TaskDAG`].
#[derive(Debug, Default)]
pub struct Decomposer;

impl Decomposer {
    /// Create a new decomposer.
    pub fn new() -> Self {
        Self
    }

    /// Decompose a newline-separated task list into a DAG.
    ///
    /// # Errors
    /// [`Error::Decomposition`] if the input contains no tasks, a task name
    /// is duplicated, an `after:` clause names an unknown task, or the
    /// declared dependencies form a cycle.
    pub fn decompose(&self, input: &str) -> Result<TaskDAG> {
        let mut specs = Vec::new();
        for line in input.lines() {
            if let Some(spec) = parse_line(line)? {
                specs.push(spec);
            }
        }
        if specs.is_empty() {
            return Err(Error::Decomposition(
                "input contains no tasks".to_string(),
            ));
        }

        let mut dag = TaskDAG::new();
        let mut by_name: HashMap<String, TaskId> = HashMap::new();
        let mut ids = Vec::with_capacity(specs.len());

        for (seq, spec) in specs.iter().enumerate() {
            let name = spec
                .name
                .clone()
                .unwrap_or_else(|| format!("task-{}", seq + 1));
            if by_name.contains_key(&name) {
                return Err(Error::Decomposition(format!(
                    "duplicate task name: {}",
                    name
                )));
            }
            let task = Task::new(&name, &spec.command)
                .with_seq(seq)
                .with_resources(spec.tags.clone());
            let id = task.id;
            dag.add_task(task);
            by_name.insert(name, id);
            ids.push(id);
        }

        // Declared dependencies
        for (seq, spec) in specs.iter().enumerate() {
            for dep_name in &spec.after {
                let dep_id = by_name.get(dep_name).ok_or_else(|| {
                    Error::Decomposition(format!(
                        "task {} depends on unknown task: {}",
                        seq + 1,
                        dep_name
                    ))
                })?;
                if dag.has_dependency(dep_id, &ids[seq]) {
                    continue;
                }
                dag.add_dependency(dep_id, &ids[seq], DependencyType::Declared)
                    .map_err(|e| Error::Decomposition(e.to_string()))?;
            }
        }

        // Resource-tag chaining: depend on the nearest earlier task with
        // the same tag.
        let mut last_with_tag: HashMap<&str, TaskId> = HashMap::new();
        for (seq, spec) in specs.iter().enumerate() {
            for tag in &spec.tags {
                if let Some(prev) = last_with_tag.get(tag.as_str()) {
                    if !dag.has_dependency(prev, &ids[seq]) {
                        dag.add_dependency(
                            prev,
                            &ids[seq],
                            DependencyType::Resource { tag: tag.clone() },
                        )
                        .map_err(|e| Error::Decomposition(e.to_string()))?;
                    }
                }
                last_with_tag.insert(tag.as_str(), ids[seq]);
            }
        }

        shlog_debug!(
            "Decomposed plan: {} task(s), {} dependency edge(s)",
            dag.task_count(),
            dag.dependency_count()
        );
        Ok(dag)
    }
}

/// Parse one plan line. Returns `None` for blanks and comments.
///
/// The command is sliced out of the line rather than re-joined from
/// tokens, so interior whitespace survives (quoted arguments depend on
/// it).
fn parse_line(line: &str) -> Result<Option<TaskSpec>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut spans = token_spans(line);

    // Optional leading `name:`
    let name = match spans.first() {
        Some(&(start, end)) if is_name_token(&line[start..end]) => {
            let name = line[start..end - 1].to_string();
            spans.remove(0);
            Some(name)
        }
        _ => None,
    };

    // Trailing `after:` clause; the last occurrence starts the clause
    let mut after = Vec::new();
    if let Some(idx) = spans.iter().rposition(|&(s, e)| &line[s..e] == "after:") {
        let clause_start = spans[idx].1;
        spans.truncate(idx);
        for name in line[clause_start..].split(',') {
            let name = name.trim();
            if !name.is_empty() {
                after.push(name.to_string());
            }
        }
        if after.is_empty() {
            return Err(Error::Decomposition(format!(
                "empty after: clause in line: {}",
                line
            )));
        }
    }

    // Trailing `@tag` tokens, right to left until the command starts
    let mut tags = Vec::new();
    while let Some(&(start, end)) = spans.last() {
        let tag = match line[start..end].strip_prefix('@') {
            Some(tag) => tag,
            None => break,
        };
        if tag.is_empty() {
            return Err(Error::Decomposition(format!(
                "empty resource tag in line: {}",
                line
            )));
        }
        tags.push(tag.to_string());
        spans.pop();
    }
    tags.reverse();

    let command = match (spans.first(), spans.last()) {
        (Some(&(start, _)), Some(&(_, end))) => line[start..end].to_string(),
        _ => {
            return Err(Error::Decomposition(format!(
                "line declares no command: {}",
                line
            )))
        }
    };

    Ok(Some(TaskSpec {
        name,
        command,
        tags,
        after,
    }))
}

/// Byte spans of the whitespace-separated tokens in `s`.
fn token_spans(s: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in s.char_indices() {
        if c.is_whitespace() {
            if let Some(st) = start.take() {
                spans.push((st, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(st) = start {
        spans.push((st, s.len()));
    }
    spans
}

/// True if a token is a `name:` prefix (identifier followed by a colon).
fn is_name_token(token: &str) -> bool {
    token.len() > 1
        && token.ends_with(':')
        && token != "after:"
        && token[..token.len() - 1]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
