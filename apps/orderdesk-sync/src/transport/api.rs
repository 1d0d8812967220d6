//! Central service endpoints
//!
//! Builds requests for the fixed endpoints and interprets their responses.
//! A response is parsed as the expected document first and as an
//! [`ErrorEnvelope`] when that fails.

use std::sync::Arc;

use crate::document::{self, ConfigDocument, Identity};
use crate::error::{Result, SyncError, TransportError};
use crate::sync::types::{ErrorEnvelope, SoftwareRecord};

use super::{PauseSignal, Request, Transport};

pub const REGISTER_PATH: &str = "/api/instance/register";
pub const CONFIG_PATH: &str = "/api/config";
pub const SOFTWARE_PATH: &str = "/api/software";

/// Typed client for the central service
#[derive(Clone)]
pub struct ServerApi {
    transport: Arc<dyn Transport>,
}

impl ServerApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Ask the server to allocate an identity for a new installation
    pub async fn register(&self, pause: &PauseSignal) -> Result<Identity> {
        let body = self.call(Request::get(REGISTER_PATH), pause).await?;
        match serde_json::from_slice::<Identity>(&body) {
            Ok(identity) => {
                tracing::info!(instance = %identity.instance_id, "Registered new instance");
                Ok(identity)
            }
            Err(e) => Err(rejection(&body).unwrap_or_else(|| document_error(e))),
        }
    }

    /// Fetch the full server-side configuration document
    pub async fn fetch_config(&self, identity: &Identity, pause: &PauseSignal) -> Result<ConfigDocument> {
        let request = authenticated(Request::get(CONFIG_PATH), identity);
        let body = self.call(request, pause).await?;
        match document::load(&body) {
            Ok(doc) => Ok(doc),
            Err(e) => Err(rejection(&body).unwrap_or(SyncError::Document(e))),
        }
    }

    /// Submit `doc` as the installation's configuration at `revision`
    pub async fn push_config(
        &self,
        identity: &Identity,
        revision: u64,
        doc: &ConfigDocument,
        pause: &PauseSignal,
    ) -> Result<()> {
        let payload = document::to_bytes(doc)?;
        let request = authenticated(Request::post(CONFIG_PATH, payload), identity)
            .param("revision", revision.to_string());
        let body = self.call(request, pause).await?;
        match rejection(&body) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Fetch the software catalog; unregistered installations send no identity
    pub async fn catalog(
        &self,
        identity: Option<&Identity>,
        pause: &PauseSignal,
    ) -> Result<Vec<SoftwareRecord>> {
        let mut request = Request::get(SOFTWARE_PATH);
        if let Some(identity) = identity {
            request = authenticated(request, identity);
        }
        let body = self.call(request, pause).await?;
        match serde_json::from_slice::<Vec<SoftwareRecord>>(&body) {
            Ok(records) => Ok(records),
            Err(e) => Err(rejection(&body).unwrap_or_else(|| document_error(e))),
        }
    }

    async fn call(&self, request: Request, pause: &PauseSignal) -> Result<Vec<u8>> {
        match self.transport.run(&request, pause).await {
            Ok(Some(body)) => Ok(body),
            Ok(None) => Err(SyncError::Interrupted),
            Err(err) => {
                if let TransportError::Status { body, .. } = &err {
                    if let Some(rejected) = rejection(body.as_bytes()) {
                        return Err(rejected);
                    }
                }
                Err(err.into())
            }
        }
    }
}

fn authenticated(request: Request, identity: &Identity) -> Request {
    request
        .param("instance", identity.instance_id.clone())
        .param("passcode", identity.passcode.clone())
}

fn rejection(body: &[u8]) -> Option<SyncError> {
    ErrorEnvelope::parse(body).map(SyncError::from)
}

fn document_error(e: serde_json::Error) -> SyncError {
    SyncError::Document(e.into())
}
