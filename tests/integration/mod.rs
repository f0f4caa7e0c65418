//! Integration test suite for shade.
//!
//! These tests exercise the full pipeline from plan text to persisted
//! report, including concurrent execution, sandbox integrity, retry
//! exhaustion, and merge resolution. Shadow-runs use real shell commands
//! against temporary host trees, so no external services are required.
//!
//! # Test Categories
//!
//! - `planning`: Decomposition and DAG construction
//! - `swarm_e2e`: Full swarm runs end to end
//! - `sandbox_integrity`: Host isolation and hydration guarantees
//! - `recovery`: Retry exhaustion, cascades, and the kill switch
//! - `conflict_resolution`: Merge resolution over real runs

mod fixtures;

mod planning;
mod swarm_e2e;
mod sandbox_integrity;
mod recovery;
mod conflict_resolution;
