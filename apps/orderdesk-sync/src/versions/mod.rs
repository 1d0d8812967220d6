//! Versioned software artifacts
//!
//! Keeps the application binary, the invoice stylesheet and the burner
//! driver bundle in line with the server catalog. Each artifact version is
//! stored as its own side-car file in the work directory; the
//! [`VersionInfo`] block in the configuration document records which ones
//! are current, kept as backup, or waiting to be deleted.
//!
//! Per artifact a version moves through: desired, downloaded and verified,
//! current, backup, stale, deleted. Only [`VersionManager::clean`] deletes,
//! and only when the file is no longer held open.

use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::document::{AutoUpdate, VersionInfo};
use crate::error::VersionError;
use crate::sync::types::{find_record, SoftwareRecord};
use crate::transport::{PauseSignal, Transport};

pub mod archive;
pub mod checksum;

pub use checksum::Checksum;

/// Fixed name of whichever stylesheet version is active
pub const ACTIVE_STYLESHEET: &str = "invoice.xsl";

/// Directory the driver bundle is extracted into
pub const DRIVER_DIR: &str = "burner";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Application,
    InvoiceStylesheet,
    BurnerDriver,
}

impl Artifact {
    /// Name of this artifact's catalog record
    pub fn catalog_name(self) -> &'static str {
        match self {
            Artifact::Application => "app",
            Artifact::InvoiceStylesheet => "invoice-xsl",
            Artifact::BurnerDriver => "burner-driver",
        }
    }

    /// Side-car file name of one version
    pub fn file_name(self, version: &str) -> String {
        match self {
            Artifact::Application => format!("orderdesk-{}.jar", version),
            Artifact::InvoiceStylesheet => format!("invoice-{}.xsl", version),
            Artifact::BurnerDriver => format!("burner-driver-{}.zip", version),
        }
    }
}

/// Whether `path` holds exactly the artifact `record` describes
///
/// Fails closed: an unreadable file or an undecodable checksum never matches.
pub fn matches(path: &Path, record: &SoftwareRecord) -> bool {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() == record.size => {}
        _ => return false,
    }

    let Some(obfuscated) = &record.checksum else {
        return true;
    };
    let Some(expected) = Checksum::from_catalog(obfuscated) else {
        return false;
    };
    match Checksum::of_file(path) {
        Ok(actual) => actual == expected,
        Err(e) => {
            tracing::debug!(path = %path.display(), "Checksum read failed: {}", e);
            false
        }
    }
}

/// Make `new_version` current, rotating the previous current into backup
///
/// The replaced backup becomes stale. Afterwards the stale list holds neither
/// the current nor the backup version.
pub fn advance(info: &mut VersionInfo, new_version: &str) {
    if info.current_version.as_deref() == Some(new_version) {
        return;
    }

    if let Some(current) = info.current_version.take() {
        if let Some(old_backup) = info.backup_version.replace(current) {
            if !info.stale_versions.contains(&old_backup) {
                info.stale_versions.push(old_backup);
            }
        }
    }
    info.current_version = Some(new_version.to_string());

    let current = info.current_version.clone();
    let backup = info.backup_version.clone();
    info.stale_versions
        .retain(|v| Some(v) != current.as_ref() && Some(v) != backup.as_ref());
}

/// Downloads, verifies, rotates and cleans artifact versions
pub struct VersionManager {
    dir: PathBuf,
    transport: Arc<dyn Transport>,
}

impl VersionManager {
    pub fn new(dir: impl Into<PathBuf>, transport: Arc<dyn Transport>) -> Self {
        Self {
            dir: dir.into(),
            transport,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, artifact: Artifact, version: &str) -> PathBuf {
        self.dir.join(artifact.file_name(version))
    }

    pub fn active_stylesheet_path(&self) -> PathBuf {
        self.dir.join(ACTIVE_STYLESHEET)
    }

    pub fn driver_dir(&self) -> PathBuf {
        self.dir.join(DRIVER_DIR)
    }

    /// Download `record` unless a matching file is already present
    pub async fn fetch_if_needed(
        &self,
        artifact: Artifact,
        record: &SoftwareRecord,
        pause: &PauseSignal,
    ) -> Result<PathBuf, VersionError> {
        self.fetch(artifact, record, pause, false).await
    }

    /// Bring the stylesheet and driver bundle up to the catalog versions
    ///
    /// Returns whether any version history changed.
    pub async fn refresh_dependents(
        &self,
        auto_update: &mut AutoUpdate,
        catalog: &[SoftwareRecord],
        pause: &PauseSignal,
    ) -> Result<bool, VersionError> {
        let mut changed = false;

        if let Some(record) = find_record(catalog, Artifact::InvoiceStylesheet.catalog_name()) {
            let path = self
                .fetch_if_needed(Artifact::InvoiceStylesheet, record, pause)
                .await?;
            let rotated = rotate(Artifact::InvoiceStylesheet, &mut auto_update.invoice_stylesheet, record);
            if rotated || !same_content(&path, &self.active_stylesheet_path()) {
                replace_file(&path, &self.active_stylesheet_path())?;
                tracing::info!(version = %record.version, "Activated invoice stylesheet");
            }
            changed |= rotated;
        }

        if let Some(record) = find_record(catalog, Artifact::BurnerDriver.catalog_name()) {
            let bundle = self.fetch_if_needed(Artifact::BurnerDriver, record, pause).await?;
            changed |= rotate(Artifact::BurnerDriver, &mut auto_update.burner_driver, record);

            let target = self.driver_dir();
            tokio::task::spawn_blocking(move || {
                let names = archive::entry_names(&bundle)?;
                archive::extract_set(&bundle, &names, &target)
            })
            .await
            .map_err(|e| VersionError::Worker(e.to_string()))??;
        }

        changed |= self.clean(Artifact::InvoiceStylesheet, &mut auto_update.invoice_stylesheet);
        changed |= self.clean(Artifact::BurnerDriver, &mut auto_update.burner_driver);

        Ok(changed)
    }

    /// Download a newer application without touching its version history
    ///
    /// The file is ready for the next natural restart.
    pub async fn preload_application(
        &self,
        record: &SoftwareRecord,
        pause: &PauseSignal,
    ) -> Result<PathBuf, VersionError> {
        self.fetch(Artifact::Application, record, pause, false).await
    }

    /// Download the catalog application on a worker and make it current
    ///
    /// Only valid when the host relaunches afterwards. Returns whether the
    /// current version changed.
    pub async fn update_application(
        &self,
        info: &mut VersionInfo,
        record: &SoftwareRecord,
        pause: &PauseSignal,
    ) -> Result<bool, VersionError> {
        self.fetch(Artifact::Application, record, pause, true).await?;
        Ok(rotate(Artifact::Application, info, record))
    }

    /// Delete stale versions that are no longer held open
    ///
    /// Entries that fail to delete stay listed for a later cycle. Returns
    /// whether the list changed.
    pub fn clean(&self, artifact: Artifact, info: &mut VersionInfo) -> bool {
        let before = info.stale_versions.len();

        info.stale_versions.retain(|version| {
            let path = self.artifact_path(artifact, version);
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "Deleted stale version");
                    false
                }
                Err(e) if e.kind() == ErrorKind::NotFound => false,
                Err(e) => {
                    tracing::debug!(path = %path.display(), "Stale version still in use: {}", e);
                    true
                }
            }
        });

        before != info.stale_versions.len()
    }

    async fn fetch(
        &self,
        artifact: Artifact,
        record: &SoftwareRecord,
        pause: &PauseSignal,
        on_worker: bool,
    ) -> Result<PathBuf, VersionError> {
        let expected = match &record.checksum {
            Some(obfuscated) => Some(Checksum::from_catalog(obfuscated).ok_or_else(|| {
                VersionError::InvalidChecksum {
                    name: record.name.clone(),
                    checksum: obfuscated.clone(),
                }
            })?),
            None => None,
        };

        let path = self.artifact_path(artifact, &record.version);
        if matches(&path, record) {
            return Ok(path);
        }

        fs::create_dir_all(&self.dir)?;
        let partial = partial_path(&path);
        tracing::info!(
            name = %record.name,
            version = %record.version,
            size = record.size,
            "Downloading artifact"
        );

        let result = async {
            self.transfer(record, &partial, pause, on_worker).await?;
            if let Some(expected) = expected {
                let verified = Checksum::of_file(&partial).map(|actual| actual == expected);
                if !matches!(verified, Ok(true)) {
                    return Err(VersionError::ChecksumMismatch {
                        name: record.name.clone(),
                        version: record.version.clone(),
                    });
                }
            }
            fs::rename(&partial, &path)?;
            Ok::<(), VersionError>(())
        }
        .await;

        if let Err(e) = &result {
            tracing::warn!(name = %record.name, version = %record.version, "Artifact fetch failed: {}", e);
            discard(&partial);
        }
        result.map(|()| path)
    }

    async fn transfer(
        &self,
        record: &SoftwareRecord,
        dest: &Path,
        pause: &PauseSignal,
        on_worker: bool,
    ) -> Result<(), VersionError> {
        let url = record.download_url();

        let outcome = if on_worker {
            let transport = Arc::clone(&self.transport);
            let (stop, signal) = pause.child();
            // If this future is dropped the worker stops at its next checkpoint.
            let _stop_worker = stop.drop_guard();
            let dest = dest.to_path_buf();
            let size = record.size;
            let worker = tokio::spawn(async move {
                let outcome = transport.download(&url, &dest, size, &signal).await;
                // The caller may be gone; the partial file is ours to remove.
                if !matches!(outcome, Ok(true)) {
                    discard(&dest);
                }
                outcome
            });
            worker.await.map_err(|e| VersionError::Worker(e.to_string()))?
        } else {
            self.transport.download(&url, dest, record.size, pause).await
        };

        match outcome {
            Ok(true) => Ok(()),
            Ok(false) => Err(VersionError::Interrupted {
                name: record.name.clone(),
                version: record.version.clone(),
            }),
            Err(source) => Err(VersionError::Download {
                name: record.name.clone(),
                version: record.version.clone(),
                source,
            }),
        }
    }
}

fn rotate(artifact: Artifact, info: &mut VersionInfo, record: &SoftwareRecord) -> bool {
    if info.current_version.as_deref() == Some(record.version.as_str()) {
        return false;
    }
    let previous = info.current_version.clone();
    advance(info, &record.version);
    tracing::info!(
        artifact = artifact.catalog_name(),
        from = previous.as_deref().unwrap_or("none"),
        to = %record.version,
        "Advanced artifact version"
    );
    true
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), "Failed to remove partial download: {}", e);
        }
    }
}

fn same_content(a: &Path, b: &Path) -> bool {
    match (Checksum::of_file(a), Checksum::of_file(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

/// Copy `source` over `target` through a swap file
fn replace_file(source: &Path, target: &Path) -> io::Result<()> {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".swap");
    let swap = target.with_file_name(name);

    let copied = fs::copy(source, &swap)
        .and_then(|_| File::open(&swap)?.sync_all())
        .and_then(|_| fs::rename(&swap, target));
    if copied.is_err() {
        discard(&swap);
    }
    copied
}
