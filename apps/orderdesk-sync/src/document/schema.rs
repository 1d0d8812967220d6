//! Declarative document schema
//!
//! Each field of the wire format is described once: its dotted wire path,
//! the schema version that introduced it, whether it must be present, its
//! default, and an optional upgrade hook. [`load`] interprets the table to
//! migrate and check documents before handing them to serde.

use serde_json::{Map, Value};

use super::ConfigDocument;
use crate::error::DocumentError;

/// Schema version written by this build
pub const CURRENT_SCHEMA_VERSION: u32 = 4;

const VERSION_KEY: &str = "schemaVersion";

/// Whether a field must appear once its version is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    Optional,
}

/// Default inserted when migrating a document that predates a field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldDefault {
    Bool(bool),
    Int(u64),
    Str(&'static str),
    EmptyList,
    Absent,
}

impl FieldDefault {
    fn to_value(self) -> Option<Value> {
        match self {
            FieldDefault::Bool(b) => Some(Value::Bool(b)),
            FieldDefault::Int(n) => Some(Value::from(n)),
            FieldDefault::Str(s) => Some(Value::String(s.to_string())),
            FieldDefault::EmptyList => Some(Value::Array(Vec::new())),
            FieldDefault::Absent => None,
        }
    }
}

/// Upgrade hook: receives the document root after defaults were applied
pub type UpgradeFn = fn(&mut Map<String, Value>);

/// One field of the wire format
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    pub path: &'static str,
    pub since: u32,
    pub presence: Presence,
    pub default: FieldDefault,
    pub upgrade: Option<UpgradeFn>,
}

const fn field(path: &'static str, since: u32, default: FieldDefault) -> FieldDescriptor {
    FieldDescriptor {
        path,
        since,
        presence: Presence::Required,
        default,
        upgrade: None,
    }
}

const fn optional(path: &'static str, since: u32) -> FieldDescriptor {
    FieldDescriptor {
        path,
        since,
        presence: Presence::Optional,
        default: FieldDefault::Absent,
        upgrade: None,
    }
}

/// The wire format, in migration order
pub static FIELDS: &[FieldDescriptor] = &[
    field("store.name", 1, FieldDefault::Str("OrderDesk")),
    field("store.locationCode", 1, FieldDefault::Str("0000")),
    field("store.contactEmail", 1, FieldDefault::Str("")),
    field("store.currency", 1, FieldDefault::Str("USD")),
    field("queue.dataDir", 1, FieldDefault::Str("./queue")),
    field("queue.pollIntervalSecs", 1, FieldDefault::Int(30)),
    field("queue.retentionDays", 1, FieldDefault::Int(14)),
    field("invoice.enabled", 1, FieldDefault::Bool(true)),
    field("invoice.printerName", 1, FieldDefault::Str("")),
    field("invoice.copies", 1, FieldDefault::Int(1)),
    field("invoice.showPrices", 1, FieldDefault::Bool(true)),
    FieldDescriptor {
        upgrade: Some(upgrade_paper_size),
        ..field("invoice.paperSize", 3, FieldDefault::Str("letter"))
    },
    field("burner.enabled", 2, FieldDefault::Bool(false)),
    field("burner.device", 2, FieldDefault::Str("")),
    field("burner.verifyAfterBurn", 2, FieldDefault::Bool(true)),
    field("burner.ejectWhenDone", 2, FieldDefault::Bool(true)),
    field("network.serverUrl", 1, FieldDefault::Str("https://sync.orderdesk.example")),
    optional("network.proxy", 1),
    field("network.listenPort", 1, FieldDefault::Int(8420)),
    field("integrations", 1, FieldDefault::EmptyList),
    field("autoUpdate.enabled", 1, FieldDefault::Bool(true)),
    optional("autoUpdate.instanceID", 1),
    optional("autoUpdate.passcode", 1),
    optional("autoUpdate.revisionNumber", 1),
    optional("autoUpdate.application.currentVersion", 1),
    optional("autoUpdate.application.backupVersion", 1),
    field("autoUpdate.application.staleVersions", 1, FieldDefault::EmptyList),
    optional("autoUpdate.invoiceStylesheet.currentVersion", 1),
    optional("autoUpdate.invoiceStylesheet.backupVersion", 1),
    field("autoUpdate.invoiceStylesheet.staleVersions", 1, FieldDefault::EmptyList),
    optional("autoUpdate.burnerDriver.currentVersion", 4),
    optional("autoUpdate.burnerDriver.backupVersion", 4),
    field("autoUpdate.burnerDriver.staleVersions", 4, FieldDefault::EmptyList),
];

/// v1/v2 stored the paper size as `invoice.letterPaper: bool`
fn upgrade_paper_size(root: &mut Map<String, Value>) {
    let Some(invoice) = root.get_mut("invoice").and_then(Value::as_object_mut) else {
        return;
    };
    if let Some(letter) = invoice.remove("letterPaper").and_then(|v| v.as_bool()) {
        let size = if letter { "letter" } else { "a4" };
        invoice.insert("paperSize".to_string(), Value::String(size.to_string()));
    }
}

/// Parse, migrate and check a serialized document
pub fn load(bytes: &[u8]) -> Result<ConfigDocument, DocumentError> {
    let value: Value = serde_json::from_slice(bytes)?;
    from_value(value)
}

/// Migrate and check an already-parsed document
pub fn from_value(mut value: Value) -> Result<ConfigDocument, DocumentError> {
    let root = value.as_object_mut().ok_or(DocumentError::NotAnObject)?;

    let version = match root.get(VERSION_KEY) {
        None => 1,
        Some(v) => v
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| DocumentError::InvalidVersion(v.to_string()))?,
    };
    if version > CURRENT_SCHEMA_VERSION {
        return Err(DocumentError::UnsupportedVersion {
            found: version,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }

    migrate(root, version)?;

    for descriptor in FIELDS {
        if descriptor.presence == Presence::Required && lookup(root, descriptor.path).is_none() {
            return Err(DocumentError::MissingField(descriptor.path.to_string()));
        }
    }

    root.insert(VERSION_KEY.to_string(), Value::from(CURRENT_SCHEMA_VERSION));
    Ok(serde_json::from_value(value)?)
}

/// Serialize a document the way it is written to disk and to the server
pub fn to_bytes(doc: &ConfigDocument) -> Result<Vec<u8>, DocumentError> {
    Ok(serde_json::to_vec_pretty(doc)?)
}

fn migrate(root: &mut Map<String, Value>, from: u32) -> Result<(), DocumentError> {
    if from < CURRENT_SCHEMA_VERSION {
        tracing::debug!(from, to = CURRENT_SCHEMA_VERSION, "Migrating configuration document");
    }

    for descriptor in FIELDS.iter().filter(|d| d.since > from) {
        if lookup(root, descriptor.path).is_none() {
            if let Some(default) = descriptor.default.to_value() {
                insert(root, descriptor.path, default)?;
            }
        }
        if let Some(upgrade) = descriptor.upgrade {
            upgrade(root);
        }
    }
    Ok(())
}

/// Find a non-null value by dotted path
fn lookup<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = root.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    (!current.is_null()).then_some(current)
}

fn insert(root: &mut Map<String, Value>, path: &str, value: Value) -> Result<(), DocumentError> {
    let (parents, leaf) = match path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };

    let mut current = root;
    if let Some(parents) = parents {
        for segment in parents.split('.') {
            current = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()))
                .as_object_mut()
                .ok_or(DocumentError::NotAnObject)?;
        }
    }
    current.insert(leaf.to_string(), value);
    Ok(())
}
