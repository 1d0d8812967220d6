//! In-memory transport for tests

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::TransportError;
use crate::transport::{Method, PauseSignal, Request, Transport};

/// Scripted response to one request
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Body(Vec<u8>),
    Incomplete,
    Status(u16, String),
}

/// Transport that answers from scripted replies and in-memory files
///
/// Replies for a route are consumed in order; the last one repeats.
#[derive(Default)]
pub(crate) struct FakeTransport {
    replies: Mutex<HashMap<(Method, &'static str), VecDeque<Reply>>>,
    requests: Mutex<Vec<Request>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    downloads: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn reply(&self, method: Method, path: &'static str, reply: Reply) {
        self.replies
            .lock()
            .entry((method, path))
            .or_default()
            .push_back(reply);
    }

    pub(crate) fn reply_json(&self, method: Method, path: &'static str, value: &impl Serialize) {
        self.reply(method, path, Reply::Body(serde_json::to_vec(value).unwrap()));
    }

    pub(crate) fn serve_file(&self, url: &str, bytes: Vec<u8>) {
        self.files.lock().insert(url.to_string(), bytes);
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub(crate) fn requests_to(&self, method: Method, path: &str) -> Vec<Request> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .cloned()
            .collect()
    }

    pub(crate) fn downloads(&self) -> Vec<String> {
        self.downloads.lock().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn run(
        &self,
        request: &Request,
        pause: &PauseSignal,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        if pause.is_cancelled() {
            return Ok(None);
        }
        self.requests.lock().push(request.clone());

        let reply = {
            let mut replies = self.replies.lock();
            match replies.get_mut(&(request.method, request.path)) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(Reply::Body(body)) => Ok(Some(body)),
            Some(Reply::Incomplete) => Ok(None),
            Some(Reply::Status(status, body)) => Err(TransportError::Status { status, body }),
            None => Err(TransportError::Status {
                status: 404,
                body: format!("no reply scripted for {}", request.path),
            }),
        }
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        expected_size: u64,
        pause: &PauseSignal,
    ) -> Result<bool, TransportError> {
        if pause.is_cancelled() {
            return Ok(false);
        }
        self.downloads.lock().push(url.to_string());

        let Some(bytes) = self.files.lock().get(url).cloned() else {
            return Err(TransportError::Status {
                status: 404,
                body: format!("no file at {}", url),
            });
        };
        if bytes.len() as u64 != expected_size {
            return Err(TransportError::SizeMismatch {
                expected: expected_size,
                actual: bytes.len() as u64,
            });
        }

        tokio::fs::write(dest, &bytes).await?;
        Ok(true)
    }
}
