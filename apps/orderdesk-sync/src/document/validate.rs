//! Semantic validation of configuration documents

use std::collections::HashSet;

use reqwest::Url;

use super::{ConfigDocument, VersionInfo, CURRENT_SCHEMA_VERSION};
use crate::error::ValidationError;

const MAX_INVOICE_COPIES: u32 = 10;

/// Check a document before it is committed; returns the first violation
pub fn validate(doc: &ConfigDocument) -> Result<(), ValidationError> {
    if doc.schema_version != CURRENT_SCHEMA_VERSION {
        return Err(ValidationError::new(
            "schemaVersion",
            format!("expected {}, found {}", CURRENT_SCHEMA_VERSION, doc.schema_version),
        ));
    }

    match Url::parse(&doc.network.server_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => {
            return Err(ValidationError::new(
                "network.serverUrl",
                format!("unsupported scheme {}", url.scheme()),
            ))
        }
        Err(e) => return Err(ValidationError::new("network.serverUrl", e.to_string())),
    }

    if doc.queue.poll_interval_secs == 0 {
        return Err(ValidationError::new(
            "queue.pollIntervalSecs",
            "must be at least one second",
        ));
    }

    if !(1..=MAX_INVOICE_COPIES).contains(&doc.invoice.copies) {
        return Err(ValidationError::new(
            "invoice.copies",
            format!("must be between 1 and {}", MAX_INVOICE_COPIES),
        ));
    }

    let currency = &doc.store.currency;
    if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(ValidationError::new(
            "store.currency",
            "must be a three-letter ISO code",
        ));
    }

    if !doc.has_no_identity() && !doc.has_full_identity() {
        return Err(ValidationError::new(
            "autoUpdate",
            "instanceID, passcode and revisionNumber must be set together",
        ));
    }

    let mut names = HashSet::new();
    for integration in &doc.integrations {
        if integration.name.trim().is_empty() {
            return Err(ValidationError::new("integrations", "name must not be empty"));
        }
        if !names.insert(integration.name.as_str()) {
            return Err(ValidationError::new(
                "integrations",
                format!("duplicate integration {}", integration.name),
            ));
        }
    }

    check_versions("autoUpdate.application", &doc.auto_update.application)?;
    check_versions("autoUpdate.invoiceStylesheet", &doc.auto_update.invoice_stylesheet)?;
    check_versions("autoUpdate.burnerDriver", &doc.auto_update.burner_driver)?;

    Ok(())
}

fn check_versions(field: &str, info: &VersionInfo) -> Result<(), ValidationError> {
    if info.is_consistent() {
        Ok(())
    } else {
        Err(ValidationError::new(
            field,
            "stale versions overlap the current or backup version",
        ))
    }
}
