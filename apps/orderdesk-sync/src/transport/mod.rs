//! Transport capability
//!
//! The engine never talks HTTP directly. It hands a [`Request`] to an
//! injected [`Transport`] together with a [`PauseSignal`]; a transport that
//! gives up because the signal was cancelled reports "did not complete"
//! (`Ok(None)` / `Ok(false)`), which is not an error.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

pub mod api;
pub mod http;

pub use api::ServerApi;
pub use http::HttpTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

/// One request against a fixed server endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Endpoint path relative to the server base URL
    pub path: &'static str,
    /// URL query parameters
    pub params: Vec<(&'static str, String)>,
    /// Uncompressed body; transports compress it on the wire
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn get(path: &'static str) -> Self {
        Self {
            method: Method::Get,
            path,
            params: Vec::new(),
            body: None,
        }
    }

    pub fn post(path: &'static str, body: Vec<u8>) -> Self {
        Self {
            method: Method::Post,
            path,
            params: Vec::new(),
            body: Some(body),
        }
    }

    pub fn param(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.params.push((name, value.into()));
        self
    }

    pub fn param_value(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Transport trait
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run one request; `Ok(None)` means it did not complete
    async fn run(
        &self,
        request: &Request,
        pause: &PauseSignal,
    ) -> Result<Option<Vec<u8>>, TransportError>;

    /// Stream `url` into `dest`, enforcing `expected_size` during transfer
    ///
    /// Returns `Ok(false)` when the transfer was cancelled.
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        expected_size: u64,
        pause: &PauseSignal,
    ) -> Result<bool, TransportError>;
}

/// Read side of a pause/cancel affordance offered to the user
#[derive(Debug, Clone)]
pub struct PauseSignal {
    cancel: CancellationToken,
    paused: watch::Receiver<bool>,
}

/// Write side held by whoever supervises the transfer
#[derive(Debug)]
pub struct PauseController {
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
}

/// Create a connected controller and signal
pub fn pause_pair() -> (PauseController, PauseSignal) {
    let cancel = CancellationToken::new();
    let (tx, rx) = watch::channel(false);
    (
        PauseController {
            cancel: cancel.clone(),
            paused: tx,
        },
        PauseSignal { cancel, paused: rx },
    )
}

impl PauseController {
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl PauseSignal {
    /// A signal nobody will ever pause or cancel
    pub fn never() -> Self {
        pause_pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Resolves once the signal is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// A signal that is cancelled with this one, or on its own via the token
    ///
    /// Used to scope a worker: cancelling the child leaves the parent alone.
    pub fn child(&self) -> (CancellationToken, PauseSignal) {
        let token = self.cancel.child_token();
        let signal = PauseSignal {
            cancel: token.clone(),
            paused: self.paused.clone(),
        };
        (token, signal)
    }

    /// Block while paused; returns `false` if cancelled instead of resumed
    pub async fn wait_while_paused(&self) -> bool {
        let mut paused = self.paused.clone();
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if !*paused.borrow_and_update() {
                return true;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                changed = paused.changed() => {
                    if changed.is_err() {
                        // Controller dropped while paused; nobody can resume us.
                        return false;
                    }
                }
            }
        }
    }
}
