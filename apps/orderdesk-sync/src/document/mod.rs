//! Configuration document
//!
//! The per-installation settings document shared by the local config file,
//! the server-shadow file and the server itself. Loading goes through the
//! declarative [`schema`] table so older files are migrated on the way in.

use serde::{Deserialize, Serialize};

pub mod schema;
pub mod validate;

pub use schema::{load, to_bytes, CURRENT_SCHEMA_VERSION};
pub use validate::validate;

/// Every tunable setting of one installation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    pub schema_version: u32,
    pub store: StoreSettings,
    pub queue: QueueSettings,
    pub invoice: InvoiceSettings,
    pub burner: BurnerSettings,
    pub network: NetworkSettings,
    pub integrations: Vec<IntegrationSettings>,
    pub auto_update: AutoUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSettings {
    pub name: String,
    pub location_code: String,
    pub contact_email: String,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSettings {
    pub data_dir: String,
    pub poll_interval_secs: u64,
    pub retention_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSettings {
    pub enabled: bool,
    pub printer_name: String,
    pub copies: u32,
    pub show_prices: bool,
    pub paper_size: PaperSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperSize {
    A4,
    Letter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnerSettings {
    pub enabled: bool,
    pub device: String,
    pub verify_after_burn: bool,
    pub eject_when_done: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSettings {
    pub server_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    pub listen_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationSettings {
    pub name: String,
    pub enabled: bool,
    pub hot_folder: String,
}

/// The auto-update block: installation identity plus artifact history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoUpdate {
    pub enabled: bool,
    #[serde(
        rename = "instanceID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_number: Option<u64>,
    pub application: VersionInfo,
    pub invoice_stylesheet: VersionInfo,
    pub burner_driver: VersionInfo,
}

/// Version history of one managed artifact
///
/// `stale_versions` never contains `current_version` or `backup_version`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_version: Option<String>,
    pub stale_versions: Vec<String>,
}

impl VersionInfo {
    /// Whether the stale list is disjoint from the current and backup versions
    pub fn is_consistent(&self) -> bool {
        !self.stale_versions.iter().any(|v| {
            Some(v) == self.current_version.as_ref() || Some(v) == self.backup_version.as_ref()
        })
    }
}

/// The (instanceID, passcode) pair identifying one installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "instance")]
    pub instance_id: String,
    pub passcode: String,
}

impl ConfigDocument {
    /// Identity carried by the auto-update block, when both halves are present
    pub fn identity(&self) -> Option<Identity> {
        match (&self.auto_update.instance_id, &self.auto_update.passcode) {
            (Some(instance_id), Some(passcode)) => Some(Identity {
                instance_id: instance_id.clone(),
                passcode: passcode.clone(),
            }),
            _ => None,
        }
    }

    pub fn revision(&self) -> Option<u64> {
        self.auto_update.revision_number
    }

    /// Remove instanceID, passcode and revisionNumber
    pub fn strip_identity(&mut self) {
        self.auto_update.instance_id = None;
        self.auto_update.passcode = None;
        self.auto_update.revision_number = None;
    }

    pub fn without_identity(mut self) -> Self {
        self.strip_identity();
        self
    }

    /// Copy of this document stamped for the server shadow
    pub fn stamped(&self, identity: &Identity, revision: u64) -> Self {
        let mut doc = self.clone();
        doc.auto_update.instance_id = Some(identity.instance_id.clone());
        doc.auto_update.passcode = Some(identity.passcode.clone());
        doc.auto_update.revision_number = Some(revision);
        doc
    }

    /// True when none of the three identity fields is set (local file shape)
    pub fn has_no_identity(&self) -> bool {
        self.auto_update.instance_id.is_none()
            && self.auto_update.passcode.is_none()
            && self.auto_update.revision_number.is_none()
    }

    /// True when all three identity fields are set (server-shadow shape)
    pub fn has_full_identity(&self) -> bool {
        self.auto_update.instance_id.is_some()
            && self.auto_update.passcode.is_some()
            && self.auto_update.revision_number.is_some()
    }
}

impl Default for ConfigDocument {
    fn default() -> Self {
        ConfigDocument {
            schema_version: CURRENT_SCHEMA_VERSION,
            store: StoreSettings {
                name: "OrderDesk".to_string(),
                location_code: "0000".to_string(),
                contact_email: String::new(),
                currency: "USD".to_string(),
            },
            queue: QueueSettings {
                data_dir: "./queue".to_string(),
                poll_interval_secs: 30,
                retention_days: 14,
            },
            invoice: InvoiceSettings {
                enabled: true,
                printer_name: String::new(),
                copies: 1,
                show_prices: true,
                paper_size: PaperSize::Letter,
            },
            burner: BurnerSettings {
                enabled: false,
                device: String::new(),
                verify_after_burn: true,
                eject_when_done: true,
            },
            network: NetworkSettings {
                server_url: "https://sync.orderdesk.example".to_string(),
                proxy: None,
                listen_port: 8420,
            },
            integrations: Vec::new(),
            auto_update: AutoUpdate {
                enabled: true,
                instance_id: None,
                passcode: None,
                revision_number: None,
                application: VersionInfo::default(),
                invoice_stylesheet: VersionInfo::default(),
                burner_driver: VersionInfo::default(),
            },
        }
    }
}
