//! Configuration persistence
//!
//! Owns the two long-lived files of an installation:
//! - the local config file, which never carries identity fields
//! - the server-shadow file, which always does
//!
//! Every write goes through a staged temp file that is renamed into place,
//! so readers never observe a partially written document. Shadow commits are
//! exposed as an explicit two-phase [`StagedWrite`] so callers can run
//! another action between staging and publishing. Local writes are guarded
//! by an optimistic [`SnapshotToken`].

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::document::{self, ConfigDocument};
use crate::error::StoreError;

/// Proof that a caller holds the latest local snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotToken(u64);

struct Snapshot {
    document: ConfigDocument,
    generation: u64,
}

/// Local and server-shadow configuration files
pub struct ConfigStore {
    local_path: PathBuf,
    shadow_path: PathBuf,
    current: Mutex<Snapshot>,
}

impl ConfigStore {
    /// Open the store, loading the local document (defaults when absent)
    pub fn open(
        local_path: impl Into<PathBuf>,
        shadow_path: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let local_path = local_path.into();
        let shadow_path = shadow_path.into();

        let document = match read_document(&local_path)? {
            Some(doc) => doc,
            None => {
                tracing::info!(path = %local_path.display(), "No local configuration, using defaults");
                ConfigDocument::default()
            }
        };
        if !document.has_no_identity() {
            return Err(StoreError::IdentityInLocal);
        }

        Ok(Self {
            local_path,
            shadow_path,
            current: Mutex::new(Snapshot {
                document,
                generation: 0,
            }),
        })
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn shadow_path(&self) -> &Path {
        &self.shadow_path
    }

    /// Current local document and the token needed to replace it
    pub fn snapshot(&self) -> (ConfigDocument, SnapshotToken) {
        let current = self.current.lock();
        (current.document.clone(), SnapshotToken(current.generation))
    }

    /// Replace the local document if `token` is still current
    ///
    /// Returns the token for the newly written snapshot.
    pub fn submit_local(
        &self,
        doc: &ConfigDocument,
        token: SnapshotToken,
    ) -> Result<SnapshotToken, StoreError> {
        if !doc.has_no_identity() {
            return Err(StoreError::IdentityInLocal);
        }

        let mut current = self.current.lock();
        if current.generation != token.0 {
            return Err(StoreError::StaleSnapshot);
        }

        let bytes = serialize(&self.local_path, doc)?;
        StagedWrite::stage(&self.local_path, &bytes)?.finalize()?;

        current.document = doc.clone();
        current.generation += 1;
        tracing::debug!(path = %self.local_path.display(), generation = current.generation, "Local configuration written");
        Ok(SnapshotToken(current.generation))
    }

    /// Last synchronized server state, if this installation ever registered
    pub fn load_shadow(&self) -> Result<Option<ConfigDocument>, StoreError> {
        let shadow = read_document(&self.shadow_path)?;
        match shadow {
            Some(doc) if !doc.has_full_identity() => Err(StoreError::IncompleteShadow),
            other => Ok(other),
        }
    }

    /// Stage a new server-shadow file without publishing it
    pub fn begin_shadow_commit(&self, doc: &ConfigDocument) -> Result<StagedWrite, StoreError> {
        if !doc.has_full_identity() {
            return Err(StoreError::IncompleteShadow);
        }
        let bytes = serialize(&self.shadow_path, doc)?;
        StagedWrite::stage(&self.shadow_path, &bytes)
    }
}

/// A durable but not yet visible file write
///
/// Dropping without [`finalize`](Self::finalize) discards the staged file.
#[must_use = "a staged write is discarded unless finalized"]
pub struct StagedWrite {
    target: PathBuf,
    staging: PathBuf,
    finished: bool,
}

impl StagedWrite {
    /// Write `bytes` next to `target` and flush them to stable storage
    pub fn stage(target: &Path, bytes: &[u8]) -> Result<Self, StoreError> {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging = target.with_file_name(format!("{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        let staged = Self {
            target: target.to_path_buf(),
            staging,
            finished: false,
        };

        let mut file = fs::File::create(&staged.staging).map_err(|e| StoreError::io(&staged.staging, e))?;
        file.write_all(bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| StoreError::io(&staged.staging, e))?;

        Ok(staged)
    }

    /// The file this write will replace
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Publish the staged content at the target path
    pub fn finalize(mut self) -> Result<(), StoreError> {
        fs::rename(&self.staging, &self.target).map_err(|e| StoreError::io(&self.target, e))?;
        self.finished = true;
        Ok(())
    }

    /// Discard the staged content; the target is left untouched
    pub fn abort(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Err(e) = fs::remove_file(&self.staging) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %self.staging.display(), "Failed to remove staged file: {}", e);
            }
        }
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        self.discard();
    }
}

fn serialize(path: &Path, doc: &ConfigDocument) -> Result<Vec<u8>, StoreError> {
    document::to_bytes(doc).map_err(|source| StoreError::Document {
        path: path.display().to_string(),
        source,
    })
}

fn read_document(path: &Path) -> Result<Option<ConfigDocument>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    document::load(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Document {
            path: path.display().to_string(),
            source,
        })
}
