//! Sync data types
//!
//! Defines the wire and bookkeeping types of a synchronization cycle:
//! - Software catalog records
//! - Server error envelopes
//! - Cycle inputs and outcomes

use serde::{Deserialize, Serialize};

use crate::document::{ConfigDocument, Identity};
use crate::error::SyncError;
use crate::store::SnapshotToken;

/// Catalog record whose version is this installation's server revision
pub const CONFIG_RECORD: &str = "config";

/// Catalog version meaning "no revision assigned yet"
pub const NO_REVISION: &str = "-1";

/// Revision claimed by the first push of a newly registered installation
pub const BASELINE_REVISION: u64 = 0;

/// One entry of the server's software catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwareRecord {
    /// Artifact name (`app`, `invoice-xsl`, `burner-driver`, `config`)
    pub name: String,
    /// Desired version identifier
    pub version: String,
    /// Prefix the version is appended to when downloading
    #[serde(rename = "downloadURL")]
    pub download_url: String,
    /// Exact size in bytes
    pub size: u64,
    /// Obfuscated SHA-256 digest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl SoftwareRecord {
    pub fn download_url(&self) -> String {
        format!("{}{}", self.download_url, self.version)
    }
}

/// Look up a catalog record by name
pub fn find_record<'a>(catalog: &'a [SoftwareRecord], name: &str) -> Option<&'a SoftwareRecord> {
    catalog.iter().find(|record| record.name == name)
}

/// Standard error body returned by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

impl From<ErrorEnvelope> for SyncError {
    fn from(envelope: ErrorEnvelope) -> Self {
        SyncError::ServerRejected {
            code: envelope.error.code,
            message: envelope.error.message,
        }
    }
}

/// Which host moment a cycle runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleMode {
    /// At launch: a newer application may be switched to, since the host relaunches
    Startup,
    /// Scheduled: a newer application is only preloaded
    Periodic,
}

/// Everything the host hands to one synchronization cycle
#[derive(Debug, Clone)]
pub struct CycleInput {
    pub mode: CycleMode,
    /// Current local document, as returned by `ConfigStore::snapshot`
    pub local: ConfigDocument,
    /// Token of that snapshot
    pub token: SnapshotToken,
    /// Last-known server state, absent for a never-registered installation
    pub shadow: Option<ConfigDocument>,
    pub identity: Option<Identity>,
    pub catalog: Vec<SoftwareRecord>,
}

/// What a completed cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Revision of the document fetched from the server
    pub fetched: Option<u64>,
    /// Paths changed on both sides during the merge
    pub conflicts: Vec<String>,
    /// Whether the local file was rewritten
    pub local_written: bool,
    /// Revision claimed by a push
    pub pushed: Option<u64>,
}
