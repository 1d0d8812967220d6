//! HTTP transport over reqwest

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::StreamExt;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use tokio::io::AsyncWriteExt;

use super::{Method, PauseSignal, Request, Transport};
use crate::error::TransportError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Transport talking to the central service over HTTP
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    /// `timeout` bounds each request; downloads are only bounded by connect time
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .gzip(true)
            .user_agent(concat!("orderdesk-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    async fn exchange(&self, request: &Request) -> Result<Vec<u8>, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        }
        .timeout(self.timeout)
        .query(&request.params);

        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .header(CONTENT_ENCODING, "gzip")
                .body(gzip(body)?);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(body.to_vec())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn run(
        &self,
        request: &Request,
        pause: &PauseSignal,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        if !pause.wait_while_paused().await {
            return Ok(None);
        }

        tracing::debug!(path = request.path, method = ?request.method, "Sending request");
        tokio::select! {
            _ = pause.cancelled() => Ok(None),
            result = self.exchange(request) => result.map(Some),
        }
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        expected_size: u64,
        pause: &PauseSignal,
    ) -> Result<bool, TransportError> {
        if !pause.wait_while_paused().await {
            return Ok(false);
        }

        let response = tokio::select! {
            _ = pause.cancelled() => return Ok(false),
            response = self.client.get(url).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if let Some(length) = response.content_length() {
            if length != expected_size {
                return Err(TransportError::SizeMismatch {
                    expected: expected_size,
                    actual: length,
                });
            }
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        loop {
            if !pause.wait_while_paused().await {
                return Ok(false);
            }
            let next = tokio::select! {
                _ = pause.cancelled() => return Ok(false),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;

            written += chunk.len() as u64;
            if written > expected_size {
                return Err(TransportError::SizeMismatch {
                    expected: expected_size,
                    actual: written,
                });
            }
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        file.sync_all().await?;

        if written != expected_size {
            return Err(TransportError::SizeMismatch {
                expected: expected_size,
                actual: written,
            });
        }

        tracing::debug!(url, bytes = written, "Download complete");
        Ok(true)
    }
}

fn gzip(body: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body)?;
    Ok(encoder.finish()?)
}
