//! Shadow-run sandbox: isolation backends, tree snapshots, and the
//! mirror-in / execute / verify / hydrate protocol.

pub mod isolation;
pub mod runner;
pub mod snapshot;

pub use isolation::{ExecOutput, Isolation, ProcessIsolation, Workspace};
pub use runner::{HydrationRecord, SandboxRunner, ShadowRunResult, StagedRun, Verdict};
pub use snapshot::{FileChange, TreeSnapshot};
