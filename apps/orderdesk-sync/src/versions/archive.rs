//! Driver bundle extraction
//!
//! Entries are written to a `.swap` sibling and renamed into place, so an
//! interrupted extraction never leaves a truncated target file.

use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use filetime::FileTime;
use zip::ZipArchive;

use crate::error::VersionError;

/// Names of all file entries in a container
pub fn entry_names(container: &Path) -> Result<Vec<String>, VersionError> {
    let archive = ZipArchive::new(File::open(container)?)?;
    Ok(archive
        .file_names()
        .filter(|name| !name.ends_with('/'))
        .map(str::to_string)
        .collect())
}

/// Extract one entry into `target_dir`
///
/// Returns `false` when the target exists and `overwrite` is off.
pub fn extract(
    container: &Path,
    entry_name: &str,
    target_dir: &Path,
    overwrite: bool,
) -> Result<bool, VersionError> {
    let mut archive = ZipArchive::new(File::open(container)?)?;
    extract_entry(&mut archive, entry_name, target_dir, overwrite)
}

/// Extract `entry_names` unless every target already exists with the right size
///
/// Entries are replaced one at a time; a failure part way leaves the earlier
/// entries updated and the later ones at their previous content. Each single
/// file is still replaced atomically. Returns whether anything was extracted.
pub fn extract_set(
    container: &Path,
    entry_names: &[String],
    target_dir: &Path,
) -> Result<bool, VersionError> {
    let mut archive = ZipArchive::new(File::open(container)?)?;

    let mut up_to_date = true;
    for name in entry_names {
        let entry = archive.by_name(name)?;
        let target = target_path(entry.enclosed_name(), name, target_dir)?;
        let current = fs::metadata(&target).ok().map(|m| m.len());
        if current != Some(entry.size()) {
            up_to_date = false;
            break;
        }
    }
    if up_to_date {
        return Ok(false);
    }

    tracing::info!(
        container = %container.display(),
        entries = entry_names.len(),
        "Extracting driver bundle"
    );
    for name in entry_names {
        extract_entry(&mut archive, name, target_dir, true)?;
    }
    Ok(true)
}

fn extract_entry(
    archive: &mut ZipArchive<File>,
    entry_name: &str,
    target_dir: &Path,
    overwrite: bool,
) -> Result<bool, VersionError> {
    let mut entry = archive.by_name(entry_name)?;
    let target = target_path(entry.enclosed_name(), entry_name, target_dir)?;

    if !overwrite && target.exists() {
        return Ok(false);
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let swap = swap_path(&target);
    let written = (|| -> io::Result<()> {
        let mut out = File::create(&swap)?;
        io::copy(&mut entry, &mut out)?;
        out.sync_all()
    })();
    if let Err(e) = written.and_then(|_| fs::rename(&swap, &target)) {
        if let Err(cleanup) = fs::remove_file(&swap) {
            if cleanup.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %swap.display(), "Failed to remove swap file: {}", cleanup);
            }
        }
        return Err(e.into());
    }

    let modified: Option<zip::DateTime> = entry.last_modified().into();
    if let Some(mtime) = modified.and_then(to_file_time) {
        if let Err(e) = filetime::set_file_mtime(&target, mtime) {
            tracing::debug!(path = %target.display(), "Could not preserve timestamp: {}", e);
        }
    }

    Ok(true)
}

fn target_path<P: AsRef<Path>>(
    enclosed: Option<P>,
    name: &str,
    target_dir: &Path,
) -> Result<PathBuf, VersionError> {
    enclosed
        .map(|relative| target_dir.join(relative))
        .ok_or_else(|| VersionError::UnsafeEntry(name.to_string()))
}

fn swap_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".swap");
    target.with_file_name(name)
}

fn to_file_time(dt: zip::DateTime) -> Option<FileTime> {
    let seconds = NaiveDate::from_ymd_opt(dt.year().into(), dt.month().into(), dt.day().into())?
        .and_hms_opt(dt.hour().into(), dt.minute().into(), dt.second().into())?
        .and_utc()
        .timestamp();
    Some(FileTime::from_unix_time(seconds, 0))
}
