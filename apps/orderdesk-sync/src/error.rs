//! Error types for the OrderDesk sync engine

use thiserror::Error;

/// Engine-wide result type
pub type Result<T> = std::result::Result<T, SyncError>;

/// How a failed cycle should be reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or server-side trouble that may resolve itself
    Temporary,
    /// Broken invariants: bad documents, identity or revision inconsistencies
    Structural,
    /// A transfer was paused or cancelled; nothing happened this cycle
    Interrupted,
}

/// Sync cycle error type
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Server rejected request: {code}: {message}")]
    ServerRejected { code: String, message: String },

    #[error("Request did not complete")]
    Interrupted,

    #[error("Inconsistent sync state: {0}")]
    Inconsistent(String),

    #[error("Server revision went backwards: shadow has {shadow}, catalog reports {expected}")]
    RevisionRegressed { shadow: u64, expected: u64 },

    #[error("Fetched revision {fetched} is older than expected revision {expected}")]
    StaleFetch { fetched: u64, expected: u64 },

    #[error("Identity of fetched document does not match the server shadow")]
    IdentityMismatch,

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Version error: {0}")]
    Version(#[from] VersionError),
}

impl SyncError {
    /// Classify this error for logging and retry purposes
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Transport(_) | SyncError::ServerRejected { .. } => ErrorKind::Temporary,
            SyncError::Interrupted => ErrorKind::Interrupted,
            SyncError::Version(e) => e.kind(),
            SyncError::Inconsistent(_)
            | SyncError::RevisionRegressed { .. }
            | SyncError::StaleFetch { .. }
            | SyncError::IdentityMismatch
            | SyncError::Document(_)
            | SyncError::Validation(_)
            | SyncError::Store(_) => ErrorKind::Structural,
        }
    }
}

/// Errors raised while loading or converting configuration documents
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Document root is not an object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid schema version: {0}")]
    InvalidVersion(String),

    #[error("Unsupported schema version {found} (newest known is {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// A document that parsed but violates a semantic rule
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Persistence errors for the local and server-shadow files
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Document error in {path}: {source}")]
    Document {
        path: String,
        #[source]
        source: DocumentError,
    },

    #[error("Local configuration must not carry identity fields")]
    IdentityInLocal,

    #[error("Server shadow must carry instanceID, passcode and revisionNumber")]
    IncompleteShadow,

    #[error("Snapshot is stale; another writer submitted since it was taken")]
    StaleSnapshot,
}

impl StoreError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Transport-level errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Download size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Artifact download, verification and rotation errors
#[derive(Error, Debug)]
pub enum VersionError {
    #[error("Download of {name} {version} failed: {source}")]
    Download {
        name: String,
        version: String,
        #[source]
        source: TransportError,
    },

    #[error("Download of {name} {version} did not complete")]
    Interrupted { name: String, version: String },

    #[error("Checksum mismatch for {name} {version}")]
    ChecksumMismatch { name: String, version: String },

    #[error("Invalid catalog checksum for {name}: {checksum}")]
    InvalidChecksum { name: String, checksum: String },

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Archive entry {0} escapes the target directory")]
    UnsafeEntry(String),

    #[error("Download worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VersionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VersionError::Download { .. }
            | VersionError::ChecksumMismatch { .. }
            | VersionError::Worker(_) => ErrorKind::Temporary,
            VersionError::Interrupted { .. } => ErrorKind::Interrupted,
            VersionError::InvalidChecksum { .. }
            | VersionError::Archive(_)
            | VersionError::UnsafeEntry(_)
            | VersionError::Io(_) => ErrorKind::Structural,
        }
    }
}
