//! Configuration synchronization
//!
//! Provides:
//! - Catalog, envelope and cycle types
//! - Three-way merge of local edits against the server delta
//! - The per-cycle orchestrator
//!
//! # Cycle Protocol
//!
//! 1. Host gathers the local snapshot, server shadow and software catalog
//! 2. Catalog's `config` record names the server's current revision
//! 3. When that revision is ahead of the shadow, the server document is
//!    fetched and merged into the local file
//! 4. Local edits the server has not seen are pushed under the next revision
//!
//! # Merge Precedence
//!
//! - Objects merge key by key
//! - Local changes win over server changes
//! - Values changed on both sides are reported as conflicts

pub mod merge;
pub mod orchestrator;
pub mod types;

pub use merge::{equals_undistributed, merge, MergeOutcome};
pub use orchestrator::SyncOrchestrator;
pub use types::{CycleInput, CycleMode, CycleOutcome, SoftwareRecord};
