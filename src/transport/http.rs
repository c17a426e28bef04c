// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! reqwest-backed transport.
//!
//! Uploads stream the file through [`ReaderStream`] into a
//! [`reqwest::Body`]; downloads write each response chunk to disk as it
//! arrives. Neither direction holds the whole payload in memory.

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Body, Client, Response, Url};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use super::{EventEmitter, Transport, TransportFailure, TransportHandle, TransportRequest};

/// Default timeout for establishing a connection (in seconds).
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default timeout for a whole transfer (in seconds).
const REQUEST_TIMEOUT_SECS: u64 = 3600;

/// Timeouts applied to every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub connect_timeout_secs: u64,
    /// Zero disables the overall request timeout.
    pub request_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Streaming HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_secs(config.connect_timeout_secs));
        if config.request_timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.request_timeout_secs));
        }
        let client = builder.build().context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn put(&self, request: TransportRequest) -> TransportHandle {
        let cancel = CancellationToken::new();
        let operation = request.operation;
        let emitter = EventEmitter::new(operation, request.events);
        let task = tokio::spawn(run_upload(
            self.client.clone(),
            request.url,
            request.file,
            emitter,
            cancel.clone(),
        ));
        TransportHandle::new(operation, cancel, task)
    }

    fn get(&self, request: TransportRequest) -> TransportHandle {
        let cancel = CancellationToken::new();
        let operation = request.operation;
        let emitter = EventEmitter::new(operation, request.events);
        let task = tokio::spawn(run_download(
            self.client.clone(),
            request.url,
            request.file,
            emitter,
            cancel.clone(),
        ));
        TransportHandle::new(operation, cancel, task)
    }
}

async fn run_upload(
    client: Client,
    url: Url,
    file: File,
    emitter: EventEmitter,
    cancel: CancellationToken,
) {
    tracing::debug!("PUT {}", url);

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportFailure::cancelled()),
        r = stream_upload(&client, url, &file, &emitter) => r,
    };

    if let Err(failure) = result {
        emitter.fail(failure);
    }
    emitter.finish(file);
}

async fn stream_upload(
    client: &Client,
    url: Url,
    file: &File,
    emitter: &EventEmitter,
) -> std::result::Result<(), TransportFailure> {
    let total = file
        .metadata()
        .await
        .map_err(|e| TransportFailure::new(format!("Failed to read file size: {}", e)))?
        .len();

    // The body owns a duplicate descriptor; the original goes back to the
    // session with the terminal event.
    let reader = file
        .try_clone()
        .await
        .map_err(|e| TransportFailure::new(format!("Failed to open upload stream: {}", e)))?;

    let sink = emitter.progress_sink();
    let mut sent = 0u64;
    let stream = ReaderStream::new(reader).inspect_ok(move |chunk| {
        sent += chunk.len() as u64;
        sink.progress(sent, total);
    });

    let response = client
        .put(url.clone())
        .header(CONTENT_LENGTH, total)
        .body(Body::wrap_stream(stream))
        .send()
        .await
        .map_err(|e| request_failure(&url, &e))?;

    check_status(response).await?;
    Ok(())
}

async fn run_download(
    client: Client,
    url: Url,
    mut file: File,
    emitter: EventEmitter,
    cancel: CancellationToken,
) {
    tracing::debug!("GET {}", url);

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportFailure::cancelled()),
        r = stream_download(&client, url, &mut file, &emitter) => r,
    };

    if let Err(failure) = result {
        // Settle any write still in flight before handing the file back
        let _ = file.flush().await;
        emitter.fail(failure);
    }
    emitter.finish(file);
}

async fn stream_download(
    client: &Client,
    url: Url,
    file: &mut File,
    emitter: &EventEmitter,
) -> std::result::Result<(), TransportFailure> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| request_failure(&url, &e))?;
    let response = check_status(response).await?;

    let total = response.content_length().unwrap_or(0);
    let mut received = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| request_failure(&url, &e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| TransportFailure::new(format!("Failed to write download: {}", e)))?;
        received += chunk.len() as u64;
        emitter.progress(received, total);
    }

    file.flush()
        .await
        .map_err(|e| TransportFailure::new(format!("Failed to write download: {}", e)))?;
    Ok(())
}

/// Turn a non-2xx reply into a failure.
async fn check_status(response: Response) -> std::result::Result<Response, TransportFailure> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    let message = if body.is_empty() {
        format!("Server replied: HTTP {}", status)
    } else {
        format!("Server replied: HTTP {} - {}", status, body)
    };
    Err(TransportFailure::new(message))
}

fn request_failure(url: &Url, e: &reqwest::Error) -> TransportFailure {
    if e.is_connect() {
        TransportFailure::new(format!("Cannot connect to {}: {}", origin(url), e))
    } else if e.is_timeout() {
        TransportFailure::new(format!("Request to {} timed out", origin(url)))
    } else {
        TransportFailure::new(format!("Network error: {}", e))
    }
}

fn origin(url: &Url) -> String {
    url.origin().ascii_serialization()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransportConfig::default();
        assert_eq!(config.connect_timeout_secs, CONNECT_TIMEOUT_SECS);
        assert_eq!(config.request_timeout_secs, REQUEST_TIMEOUT_SECS);
    }

    #[test]
    fn test_build_without_request_timeout() {
        let config = TransportConfig {
            connect_timeout_secs: 1,
            request_timeout_secs: 0,
        };
        assert!(HttpTransport::new(&config).is_ok());
    }

    #[test]
    fn test_origin_strips_path() {
        let url = Url::parse("http://host:8080/files/a.txt").unwrap();
        assert_eq!(origin(&url), "http://host:8080");
    }
}
