//! OrderDesk sync engine
//!
//! Keeps an installation's configuration and versioned software artifacts in
//! step with the central service. The host binary is in main.rs.
//!
//! # Modules
//!
//! - `document`: Configuration document, schema migration and validation
//! - `store`: Local and server-shadow files with atomic commits
//! - `transport`: Transport capability, HTTP implementation and endpoint client
//! - `versions`: Artifact download, rotation, cleanup and extraction
//! - `sync`: Merge and the per-cycle orchestrator

pub mod config;
pub mod document;
pub mod error;
pub mod store;
pub mod sync;
pub mod transport;
pub mod versions;

#[cfg(test)]
mod testing;
