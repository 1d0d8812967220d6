//! Configuration merging
//!
//! Replays local edits on top of the newest server document, using the last
//! synchronized server state as the common ancestor.
//!
//! Precedence: JSON objects merge key by key; every other value is atomic.
//! A value the local side changed relative to the base is kept; otherwise the
//! newest server value is taken. When both sides changed the same value to
//! different results the local value wins and the path is reported.
//!
//! Version history blocks are merged as one value, so a merge never mixes
//! the current version of one side with the stale list of the other.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::document::ConfigDocument;
use crate::error::DocumentError;

/// Result of a three-way merge
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Merged document, identity fields stripped
    pub document: ConfigDocument,
    /// Dotted paths both sides changed to different values
    pub conflicts: Vec<String>,
}

/// Merge `local` edits against the server delta from `base` to `latest`
pub fn merge(
    local: &ConfigDocument,
    base: &ConfigDocument,
    latest: &ConfigDocument,
) -> Result<MergeOutcome, DocumentError> {
    // Identity belongs to the server shadow only; it never takes part.
    let local = serde_json::to_value(local.clone().without_identity())?;
    let base = serde_json::to_value(base.clone().without_identity())?;
    let latest = serde_json::to_value(latest.clone().without_identity())?;

    let mut conflicts = Vec::new();
    let merged = three_way(Some(&base), Some(&local), Some(&latest), "", &mut conflicts)
        .unwrap_or(Value::Null);

    let document: ConfigDocument = serde_json::from_value(merged)?;

    for path in &conflicts {
        tracing::warn!(path = %path, "Local and server both changed value; keeping local");
    }

    Ok(MergeOutcome {
        document,
        conflicts,
    })
}

/// Objects that merge as a single value
const ATOMIC_OBJECTS: [&str; 3] = [
    "autoUpdate.application",
    "autoUpdate.invoiceStylesheet",
    "autoUpdate.burnerDriver",
];

/// Merge one value; `None` means the key is absent on that side
pub fn three_way(
    base: Option<&Value>,
    local: Option<&Value>,
    latest: Option<&Value>,
    path: &str,
    conflicts: &mut Vec<String>,
) -> Option<Value> {
    if let (Some(Value::Object(local_map)), Some(Value::Object(latest_map)), false) =
        (local, latest, ATOMIC_OBJECTS.contains(&path))
    {
        let empty = Map::new();
        let base_map = match base {
            Some(Value::Object(map)) => map,
            _ => &empty,
        };

        let keys: BTreeSet<&String> = latest_map
            .keys()
            .chain(local_map.keys())
            .chain(base_map.keys())
            .collect();

        let mut merged = Map::new();
        for key in keys {
            let child = if path.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", path, key)
            };
            if let Some(value) = three_way(
                base_map.get(key),
                local_map.get(key),
                latest_map.get(key),
                &child,
                conflicts,
            ) {
                merged.insert(key.clone(), value);
            }
        }
        return Some(Value::Object(merged));
    }

    if local == base {
        return latest.cloned();
    }
    if latest != base && latest != local {
        conflicts.push(path.to_string());
    }
    local.cloned()
}

/// Fields a running host cannot pick up without a restart
///
/// Returns the names of those that differ between `a` and `b`.
pub fn undistributed_changes(a: &ConfigDocument, b: &ConfigDocument) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if a.network.server_url != b.network.server_url {
        changed.push("network.serverUrl");
    }
    if a.network.listen_port != b.network.listen_port {
        changed.push("network.listenPort");
    }
    if a.network.proxy != b.network.proxy {
        changed.push("network.proxy");
    }
    if a.queue.data_dir != b.queue.data_dir {
        changed.push("queue.dataDir");
    }
    if a.burner.device != b.burner.device {
        changed.push("burner.device");
    }
    if a.integrations != b.integrations {
        changed.push("integrations");
    }
    if a.auto_update.application.current_version != b.auto_update.application.current_version {
        changed.push("autoUpdate.application.currentVersion");
    }
    changed
}

/// Whether `a` and `b` agree on every field that needs a restart to apply
pub fn equals_undistributed(a: &ConfigDocument, b: &ConfigDocument) -> bool {
    undistributed_changes(a, b).is_empty()
}
