//! Merge resolution over a run's hydration records.
//!
//! Hydration applies verified changes last-writer-wins; the resolver's job
//! is to say, after the fact, which overlapping writes were benign and
//! which clobbered unseen work. It is a pure function over the run's
//! [`HydrationRecord`]s: same records in, same report out.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::core::TaskId;
use crate::sandbox::HydrationRecord;

/// An overlapping write where the later task never saw the earlier output.
///
/// Both writers mirrored the same base content, so the later hydration
/// replaced the earlier one wholesale. Reported, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupersededWrite {
    /// The contested path.
    pub path: PathBuf,
    /// Task whose write was replaced.
    pub earlier_task_id: TaskId,
    /// Name of the superseded task.
    pub earlier_task: String,
    /// Task whose write survived.
    pub later_task_id: TaskId,
    /// Name of the surviving task.
    pub later_task: String,
}

/// An overlapping write with divergent bases.
///
/// The host already reflects the later write; the conflict is surfaced for
/// the operator, never silently resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConflict {
    /// The contested path.
    pub path: PathBuf,
    /// The earlier writer.
    pub earlier_task_id: TaskId,
    /// Name of the earlier writer.
    pub earlier_task: String,
    /// The later writer, whose content the host holds.
    pub later_task_id: TaskId,
    /// Name of the later writer.
    pub later_task: String,
}

impl std::fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} and {} diverged (host holds {})",
            self.path.display(),
            self.earlier_task,
            self.later_task,
            self.later_task
        )
    }
}

/// Outcome of merge resolution for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Benign overlaps: later writer replaced an identical base.
    pub superseded: Vec<SupersededWrite>,
    /// Divergent overlaps requiring operator attention.
    pub conflicts: Vec<MergeConflict>,
}

impl MergeReport {
    /// True if any conflict was detected.
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Pure resolver over a run's hydration records.
#[derive(Debug, Default)]
pub struct MergeResolver;

impl MergeResolver {
    /// Create a new resolver.
    pub fn new() -> Self {
        Self
    }

    /// Resolve overlapping writes across the given records.
    ///
    /// Records are ordered by application sequence regardless of input
    /// order. For each path touched by more than one record, each
    /// consecutive writer pair is classified: equal mirror-in base hashes
    /// mean the later write superseded the earlier; differing base hashes
    /// mean the writers diverged and a [`MergeConflict`] is reported.
    pub fn resolve(&self, records: &[HydrationRecord]) -> MergeReport {
        let mut ordered: Vec<&HydrationRecord> = records.iter().collect();
        ordered.sort_by_key(|r| r.seq);

        // path -> writers in application order
        let mut writers: BTreeMap<&std::path::Path, Vec<(&HydrationRecord, Option<&str>)>> =
            BTreeMap::new();
        for record in &ordered {
            for change in &record.applied {
                writers
                    .entry(change.path.as_path())
                    .or_default()
                    .push((record, change.before_hash.as_deref()));
            }
        }

        let mut report = MergeReport::default();
        for (path, writers) in writers {
            for pair in writers.windows(2) {
                let (earlier, earlier_base) = pair[0];
                let (later, later_base) = pair[1];
                if earlier_base == later_base {
                    report.superseded.push(SupersededWrite {
                        path: path.to_path_buf(),
                        earlier_task_id: earlier.task_id,
                        earlier_task: earlier.task_name.clone(),
                        later_task_id: later.task_id,
                        later_task: later.task_name.clone(),
                    });
                } else {
                    report.conflicts.push(MergeConflict {
                        path: path.to_path_buf(),
                        earlier_task_id: earlier.task_id,
                        earlier_task: earlier.task_name.clone(),
                        later_task_id: later.task_id,
                        later_task: later.task_name.clone(),
                    });
                }
            }
        }
        report
    }
}
