// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! File service
//!
//! Minimal HTTP file service that a transfer session can talk to. Every path
//! under the served root is addressable:
//!
//! - `GET /{path}` - Stream the file back (404 if it does not exist)
//! - `PUT /{path}` - Stream the request body into the file, creating parent
//!   directories as needed
//!
//! Paths containing `..` or absolute components are rejected with 400.
//!
//! # Example
//!
//! ```no_run
//! use filelink::server::FileServer;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let server = FileServer::new("/srv/files").with_port(8080);
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path as UrlPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::StreamExt;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tower_http::timeout::TimeoutLayer;

/// Default port of the file service.
pub const DEFAULT_PORT: u16 = 8080;

/// Upper bound on a single request, including the body.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3600);

/// State shared across handlers.
struct AppState {
    root: PathBuf,
}

/// File service configuration.
#[derive(Debug, Clone)]
pub struct FileServer {
    root: PathBuf,
    port: u16,
    /// Address to bind to (defaults to 127.0.0.1).
    bind_address: String,
}

impl FileServer {
    /// Serve `root` on the default port, localhost only.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            port: DEFAULT_PORT,
            bind_address: "127.0.0.1".to_string(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Use "0.0.0.0" to allow network access.
    pub fn with_bind_address(mut self, addr: impl Into<String>) -> Self {
        self.bind_address = addr.into();
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build the router with all routes.
    pub fn build_router(&self) -> Router {
        let state = Arc::new(AppState {
            root: self.root.clone(),
        });

        Router::new()
            .route("/*path", get(get_handler).put(put_handler))
            .layer(DefaultBodyLimit::disable())
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
            .with_state(state)
    }

    /// Bind and serve until Ctrl+C.
    pub async fn start(&self) -> Result<()> {
        if !self.root.is_dir() {
            anyhow::bail!("{} is not a directory", self.root.display());
        }

        let addr = format!("{}:{}", self.bind_address, self.port);
        if self.bind_address == "0.0.0.0" {
            tracing::warn!("File service is binding to 0.0.0.0 and is reachable from the network");
        }

        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                anyhow::anyhow!(
                    "Port {} is already in use. Pick another one with --port <PORT>",
                    self.port
                )
            } else {
                anyhow::anyhow!("Failed to bind to {}: {}", addr, e)
            }
        })?;

        tracing::info!("Serving {} on {}", self.root.display(), addr);
        self.serve_with_shutdown(listener, shutdown_signal()).await
    }

    /// Serve on an already-bound listener until `signal` resolves.
    pub async fn serve_with_shutdown<F>(&self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(signal)
            .await?;
        Ok(())
    }

    /// Serve on an already-bound listener forever.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }
}

/// Map a request path onto the served root.
///
/// Only plain name components are accepted.
fn resolve(root: &Path, requested: &str) -> Option<PathBuf> {
    let relative = Path::new(requested);
    let mut resolved = root.to_path_buf();
    let mut any = false;
    for component in relative.components() {
        match component {
            Component::Normal(name) => {
                resolved.push(name);
                any = true;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    any.then_some(resolved)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, message.into()).into_response()
}

async fn get_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(path): UrlPath<String>,
) -> Response {
    let Some(target) = resolve(&state.root, &path) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid path");
    };

    let file = match File::open(&target).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return error_response(StatusCode::NOT_FOUND, format!("{} not found", path));
        }
        Err(e) => {
            tracing::warn!("Failed to open {}: {}", target.display(), e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let len = match file.metadata().await {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => return error_response(StatusCode::NOT_FOUND, format!("{} is not a file", path)),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    tracing::debug!("GET {} ({} bytes)", path, len);
    (
        [
            (header::CONTENT_LENGTH, len.to_string()),
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}

async fn put_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(path): UrlPath<String>,
    body: Body,
) -> Response {
    let Some(target) = resolve(&state.root, &path) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid path");
    };

    match write_body(&target, body).await {
        Ok(written) => {
            tracing::debug!("PUT {} ({} bytes)", path, written);
            StatusCode::CREATED.into_response()
        }
        Err(e) => {
            tracing::warn!("Failed to store {}: {:#}", target.display(), e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn write_body(target: &Path, body: Body) -> Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut file = File::create(target).await?;
    let mut stream = body.into_data_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

/// Resolves on Ctrl+C (and SIGTERM on Unix).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
                    _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl+C, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_creation() {
        let server = FileServer::new("/srv/files");
        assert_eq!(server.port(), DEFAULT_PORT);
        assert_eq!(server.root(), Path::new("/srv/files"));
    }

    #[test]
    fn test_server_with_port() {
        let server = FileServer::new("/srv").with_port(3000).with_bind_address("0.0.0.0");
        assert_eq!(server.port(), 3000);
        assert_eq!(server.bind_address, "0.0.0.0");
    }

    #[test]
    fn test_resolve_plain_paths() {
        let root = Path::new("/srv");
        assert_eq!(resolve(root, "a.txt"), Some(PathBuf::from("/srv/a.txt")));
        assert_eq!(resolve(root, "sub/./b.txt"), Some(PathBuf::from("/srv/sub/b.txt")));
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let root = Path::new("/srv");
        assert_eq!(resolve(root, "../etc/passwd"), None);
        assert_eq!(resolve(root, "sub/../../x"), None);
        assert_eq!(resolve(root, "/etc/passwd"), None);
        assert_eq!(resolve(root, ""), None);
    }
}
