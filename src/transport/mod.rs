// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Network transport abstraction.
//!
//! A transport runs exactly one streamed PUT or GET per call and reports back
//! over a channel:
//!
//! ```text
//! put()/get() ──▶ Progress* ──▶ Failed? ──▶ Finished
//! ```
//!
//! `Finished` is always the last event for an operation, including after a
//! cancellation, and hands the local file back to the session so it can be
//! released. [`EventEmitter::finish`] consumes the emitter, so an
//! implementation cannot send two terminal events.

pub mod http;

use reqwest::Url;
use tokio::fs::File;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use http::{HttpTransport, TransportConfig};

/// Identifies one transport operation within a session.
pub type OperationId = u64;

/// Message reported when an operation was cancelled on request.
pub const CANCELLED_MESSAGE: &str = "Operation canceled";

/// A failure reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    /// Transport-specific description.
    pub message: String,
    /// True when the failure is the result of `abort()`.
    pub cancelled: bool,
}

impl TransportFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cancelled: false,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            message: CANCELLED_MESSAGE.to_string(),
            cancelled: true,
        }
    }
}

impl std::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TransportFailure {}

/// What happened on an operation.
#[derive(Debug)]
pub enum TransportEventKind {
    /// Bytes moved so far and the expected total (0 when unknown).
    Progress { transferred: u64, total: u64 },
    /// Precedes `Finished` when the operation did not succeed.
    Failed(TransportFailure),
    /// Terminal event; returns ownership of the local file.
    Finished { file: File },
}

/// An event tagged with the operation that raised it.
#[derive(Debug)]
pub struct TransportEvent {
    pub operation: OperationId,
    pub kind: TransportEventKind,
}

/// Channel the session listens on.
pub type TransportSender = mpsc::UnboundedSender<TransportEvent>;

/// Everything a transport needs to start one operation.
#[derive(Debug)]
pub struct TransportRequest {
    pub operation: OperationId,
    pub url: Url,
    /// Opened for reading (PUT) or writing (GET).
    pub file: File,
    pub events: TransportSender,
}

/// Streaming HTTP client as seen by the session.
pub trait Transport: Send + Sync {
    /// Stream `request.file` as the body of `PUT request.url`.
    fn put(&self, request: TransportRequest) -> TransportHandle;

    /// Stream the body of `GET request.url` into `request.file`.
    fn get(&self, request: TransportRequest) -> TransportHandle;
}

/// Sends the events of a single operation.
#[derive(Debug)]
pub struct EventEmitter {
    operation: OperationId,
    tx: TransportSender,
}

impl EventEmitter {
    pub fn new(operation: OperationId, tx: TransportSender) -> Self {
        Self { operation, tx }
    }

    /// A cloneable sender limited to progress events.
    pub fn progress_sink(&self) -> ProgressSink {
        ProgressSink {
            operation: self.operation,
            tx: self.tx.clone(),
        }
    }

    pub fn progress(&self, transferred: u64, total: u64) {
        self.send(TransportEventKind::Progress { transferred, total });
    }

    pub fn fail(&self, failure: TransportFailure) {
        self.send(TransportEventKind::Failed(failure));
    }

    /// Emit the terminal event. Consumes the emitter.
    pub fn finish(self, file: File) {
        self.send(TransportEventKind::Finished { file });
    }

    fn send(&self, kind: TransportEventKind) {
        // The receiver only goes away when the session is being torn down
        if self
            .tx
            .send(TransportEvent {
                operation: self.operation,
                kind,
            })
            .is_err()
        {
            tracing::debug!(operation = self.operation, "Transport event dropped, session gone");
        }
    }
}

/// Progress-only half of an [`EventEmitter`], usable inside body streams.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    operation: OperationId,
    tx: TransportSender,
}

impl ProgressSink {
    pub fn progress(&self, transferred: u64, total: u64) {
        let _ = self.tx.send(TransportEvent {
            operation: self.operation,
            kind: TransportEventKind::Progress { transferred, total },
        });
    }
}

/// Handle to an outstanding operation, owned by the session.
#[derive(Debug)]
pub struct TransportHandle {
    operation: OperationId,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TransportHandle {
    /// Handle for an operation running on its own task.
    pub fn new(operation: OperationId, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            operation,
            cancel,
            task: Some(task),
        }
    }

    /// Handle for an operation driven from elsewhere (no task to track).
    pub fn detached(operation: OperationId, cancel: CancellationToken) -> Self {
        Self {
            operation,
            cancel,
            task: None,
        }
    }

    pub fn operation(&self) -> OperationId {
        self.operation
    }

    /// Request cooperative cancellation. The terminal event still follows.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn is_abort_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Release the handle after the terminal event.
    pub fn release(mut self) {
        // The task has already sent its last event; dropping the JoinHandle
        // detaches whatever is left of it.
        drop(self.task.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_constructors() {
        let failure = TransportFailure::new("connection refused");
        assert!(!failure.cancelled);
        assert_eq!(failure.to_string(), "connection refused");

        let cancelled = TransportFailure::cancelled();
        assert!(cancelled.cancelled);
        assert_eq!(cancelled.message, CANCELLED_MESSAGE);
    }

    #[tokio::test]
    async fn test_emitter_tags_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let emitter = EventEmitter::new(7, tx);

        emitter.progress(1, 2);
        emitter.progress_sink().progress(2, 2);
        emitter.fail(TransportFailure::new("boom"));

        for _ in 0..3 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.operation, 7);
        }
    }

    #[test]
    fn test_handle_abort_sets_token() {
        let cancel = CancellationToken::new();
        let handle = TransportHandle::detached(3, cancel.clone());
        assert!(!handle.is_abort_requested());

        handle.abort();
        assert!(cancel.is_cancelled());
        assert!(handle.is_abort_requested());
        assert_eq!(handle.operation(), 3);
        handle.release();
    }
}
