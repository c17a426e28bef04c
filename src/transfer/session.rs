// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transfer session: the state machine behind upload/download/abort.
//!
//! The session owns the descriptor, the staging area, the active transport
//! handle and, through the transport's terminal event, the local file. It is
//! driven from a single sequential consumer: callers invoke the start/abort
//! operations and feed every [`TransportEvent`] to
//! [`TransferSession::handle_transport_event`] in arrival order.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use reqwest::Url;
use tokio::fs::File;
use tokio::sync::{broadcast, mpsc};

use crate::config::{to_file_uri, to_local_path};
use crate::transport::{
    OperationId, Transport, TransportEvent, TransportEventKind, TransportHandle, TransportRequest,
    TransportSender,
};
use crate::types::{
    SessionEvent, TransferDirection, TransferError, TransferSnapshot, TransferState,
};

use super::classify::{self, Classified};
use super::progress::ProgressReporter;
use super::staging::StagingArea;

/// Capacity of the observer broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Receiving end of the transport event channel.
pub type TransportReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// What a start call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Transport operation begun
    Started,
    /// Preconditions not met; nothing changed
    Rejected,
    /// Local pre-flight failure recorded; no transport operation
    Failed,
}

/// Everything the session knows about the current transfer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferDescriptor {
    pub service_uri: String,
    pub local_file_path: String,
    pub remote_file_path: String,
    pub remote_base_path: String,
    pub staging_root: PathBuf,
    pub progress: f64,
    pub state: TransferState,
    pub error: TransferError,
    pub error_message: String,
}

/// The one outstanding operation.
#[derive(Debug)]
struct ActiveTransfer {
    direction: TransferDirection,
    handle: TransportHandle,
    /// Set when the transport reported a user cancellation.
    cancelled: bool,
}

/// Single-file transfer orchestrator.
pub struct TransferSession {
    descriptor: TransferDescriptor,
    staging: StagingArea,
    transport: Arc<dyn Transport>,
    reporter: ProgressReporter,
    active: Option<ActiveTransfer>,
    last_operation: OperationId,
    transport_tx: TransportSender,
    events: broadcast::Sender<SessionEvent>,
}

impl TransferSession {
    /// Build a session around a staging area and a transport.
    ///
    /// Returns the receiver on which the transport delivers its events; the
    /// caller is responsible for feeding them back in order.
    pub fn new(staging: StagingArea, transport: Arc<dyn Transport>) -> (Self, TransportReceiver) {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let descriptor = TransferDescriptor {
            staging_root: staging.root().to_path_buf(),
            ..TransferDescriptor::default()
        };

        let session = Self {
            descriptor,
            staging,
            transport,
            reporter: ProgressReporter::new(),
            active: None,
            last_operation: 0,
            transport_tx,
            events,
        };
        (session, transport_rx)
    }

    /// Subscribe to change and finish events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Sender half of the event channel, for handing out more subscriptions.
    pub fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.events.clone()
    }

    pub fn descriptor(&self) -> &TransferDescriptor {
        &self.descriptor
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            state: self.descriptor.state,
            error: self.descriptor.error,
            error_message: self.descriptor.error_message.clone(),
            progress: self.descriptor.progress,
            local_file_path: self.descriptor.local_file_path.clone(),
            remote_file_path: self.descriptor.remote_file_path.clone(),
            active: self.active.is_some(),
        }
    }

    pub fn state(&self) -> TransferState {
        self.descriptor.state
    }

    pub fn error(&self) -> TransferError {
        self.descriptor.error
    }

    pub fn error_message(&self) -> &str {
        &self.descriptor.error_message
    }

    pub fn progress(&self) -> f64 {
        self.descriptor.progress
    }

    pub fn staging_root(&self) -> &Path {
        self.staging.root()
    }

    /// True while a transport operation is outstanding.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    pub fn set_service_uri(&mut self, uri: impl Into<String>) {
        self.descriptor.service_uri = uri.into();
    }

    pub fn set_remote_base_path(&mut self, path: impl Into<String>) {
        self.descriptor.remote_base_path = path.into();
    }

    pub fn set_local_file_path(&mut self, path: impl Into<String>) {
        let path = path.into();
        if self.descriptor.local_file_path != path {
            self.descriptor.local_file_path = path.clone();
            self.emit(SessionEvent::LocalFilePathChanged { path });
        }
    }

    pub fn set_remote_file_path(&mut self, path: impl Into<String>) {
        let path = path.into();
        if self.descriptor.remote_file_path != path {
            self.descriptor.remote_file_path = path.clone();
            self.emit(SessionEvent::RemoteFilePathChanged { path });
        }
    }

    /// Valid HTTP(S) service URI and a remote base path.
    pub fn is_ready(&self) -> bool {
        self.service_url().is_some() && self.remote_base().is_some()
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Stream the configured local file to `{service_uri}/{file_name}`.
    pub async fn start_upload(&mut self) -> StartOutcome {
        if !self.can_start("upload") {
            return StartOutcome::Rejected;
        }
        let (Some(local_path), Some(remote_base)) = (
            to_local_path(&self.descriptor.local_file_path),
            self.remote_base(),
        ) else {
            tracing::debug!("Upload rejected: no local file configured");
            return StartOutcome::Rejected;
        };

        let Some(file_name) = local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
        else {
            self.record_failure(Classified {
                error: TransferError::FileError,
                message: format!("not a file: {}", local_path.display()),
            });
            return StartOutcome::Failed;
        };

        let Some(url) = self.remote_url(std::slice::from_ref(&file_name)) else {
            return StartOutcome::Rejected;
        };

        self.set_remote_file_path(to_file_uri(&remote_base.join(&file_name)));

        let file = match File::open(&local_path).await {
            Ok(file) => file,
            Err(e) => {
                self.record_failure(classify::open_failure(&e));
                return StartOutcome::Failed;
            }
        };
        // Opening a directory succeeds on Unix; reading it does not
        match file.metadata().await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                self.record_failure(classify::not_a_file(&local_path));
                return StartOutcome::Failed;
            }
            Err(e) => {
                self.record_failure(classify::open_failure(&e));
                return StartOutcome::Failed;
            }
        }

        tracing::info!("Uploading {} to {}", local_path.display(), url);
        let operation = self.next_operation();
        let handle = self.transport.put(TransportRequest {
            operation,
            url,
            file,
            events: self.transport_tx.clone(),
        });
        self.begin(TransferDirection::Upload, handle);
        StartOutcome::Started
    }

    /// Stream `{service_uri}/{relative}` into the staging area, where
    /// `relative` is the remote file path minus the remote base path.
    pub async fn start_download(&mut self) -> StartOutcome {
        if !self.can_start("download") {
            return StartOutcome::Rejected;
        }
        let (Some(remote_file), Some(remote_base)) = (
            to_local_path(&self.descriptor.remote_file_path),
            self.remote_base(),
        ) else {
            tracing::debug!("Download rejected: no remote file configured");
            return StartOutcome::Rejected;
        };

        let relative = match remote_file.strip_prefix(&remote_base) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => {
                self.record_failure(Classified {
                    error: TransferError::FileError,
                    message: format!(
                        "{} is not under {}",
                        remote_file.display(),
                        remote_base.display()
                    ),
                });
                return StartOutcome::Failed;
            }
        };

        let local_path = match self.staging.resolve(&relative) {
            Ok(path) => path,
            Err(e) => {
                self.record_failure(classify::staging_failure(&e));
                return StartOutcome::Failed;
            }
        };

        let Some(url) = self.remote_url(&url_segments(&relative)) else {
            return StartOutcome::Rejected;
        };

        self.set_local_file_path(to_file_uri(&local_path));

        if let Some(parent) = local_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                self.record_failure(classify::directory_failure(&e));
                return StartOutcome::Failed;
            }
        }

        let file = match File::create(&local_path).await {
            Ok(file) => file,
            Err(e) => {
                self.record_failure(classify::open_failure(&e));
                return StartOutcome::Failed;
            }
        };

        tracing::info!("Downloading {} to {}", url, local_path.display());
        let operation = self.next_operation();
        let handle = self.transport.get(TransportRequest {
            operation,
            url,
            file,
            events: self.transport_tx.clone(),
        });
        self.begin(TransferDirection::Download, handle);
        StartOutcome::Started
    }

    /// Request cancellation of the outstanding operation.
    ///
    /// Returns false when there is nothing to cancel. State is left alone; the
    /// terminal event brings the session back to idle.
    pub fn abort(&mut self) -> bool {
        match &self.active {
            Some(active) => {
                tracing::info!(operation = active.handle.operation(), "Aborting transfer");
                active.handle.abort();
                true
            }
            None => {
                tracing::debug!("Abort ignored: no transfer running");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Transport events
    // ------------------------------------------------------------------

    /// Apply one transport event.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        let current = self.active.as_ref().map(|a| a.handle.operation());
        if current != Some(event.operation) {
            tracing::debug!(
                operation = event.operation,
                "Ignoring event for an operation that is no longer active"
            );
            return;
        }

        match event.kind {
            TransportEventKind::Progress { transferred, total } => {
                let fraction = self.reporter.update(transferred, total);
                self.set_progress(fraction);
            }
            TransportEventKind::Failed(failure) => match classify::transport_failure(&failure) {
                Some(classified) => {
                    tracing::warn!("Transfer failed: {}", classified.message);
                    self.set_state(TransferState::Error);
                    self.set_error(classified.error, classified.message);
                }
                None => {
                    tracing::debug!("Transfer cancelled by user");
                    if let Some(active) = self.active.as_mut() {
                        active.cancelled = true;
                    }
                }
            },
            TransportEventKind::Finished { file } => self.complete(file),
        }
    }

    /// Process transport events until no operation is outstanding.
    pub async fn drain(&mut self, events: &mut TransportReceiver) {
        while self.active.is_some() {
            match events.recv().await {
                Some(event) => self.handle_transport_event(event),
                None => break,
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn can_start(&self, what: &str) -> bool {
        if self.active.is_some() || self.descriptor.state.is_running() {
            tracing::debug!("{} rejected: a transfer is already running", what);
            return false;
        }
        if !self.is_ready() {
            tracing::debug!("{} rejected: session not ready", what);
            return false;
        }
        true
    }

    fn begin(&mut self, direction: TransferDirection, handle: TransportHandle) {
        self.active = Some(ActiveTransfer {
            direction,
            handle,
            cancelled: false,
        });
        let fraction = self.reporter.reset();
        self.set_progress(fraction);
        self.set_state(direction.running_state());
        self.set_error(TransferError::None, String::new());
    }

    /// Terminal event: release both handles exactly once, then go idle.
    fn complete(&mut self, file: File) {
        let Some(active) = self.active.take() else {
            return;
        };
        // An abort request wins even if the last bytes made it through
        let aborted = active.cancelled || active.handle.is_abort_requested();
        active.handle.release();
        drop(file);

        if self.descriptor.error.is_none() && !aborted {
            let fraction = self.reporter.complete();
            self.set_progress(fraction);
            tracing::info!("Transfer finished");
            self.emit(active.direction.finished_event());
        }

        self.set_state(TransferState::Idle);
    }

    fn record_failure(&mut self, failure: Classified) {
        tracing::warn!("Transfer not started: {}", failure.message);
        self.set_state(TransferState::Error);
        self.set_error(failure.error, failure.message);
    }

    fn next_operation(&mut self) -> OperationId {
        self.last_operation += 1;
        self.last_operation
    }

    fn service_url(&self) -> Option<Url> {
        let url = Url::parse(self.descriptor.service_uri.trim()).ok()?;
        let usable = matches!(url.scheme(), "http" | "https") && !url.cannot_be_a_base();
        usable.then_some(url)
    }

    fn remote_base(&self) -> Option<PathBuf> {
        to_local_path(&self.descriptor.remote_base_path)
    }

    /// `{service_uri}/{segments...}` with each segment percent-encoded.
    fn remote_url(&self, segments: &[String]) -> Option<Url> {
        let mut url = self.service_url()?;
        url.path_segments_mut().ok()?.pop_if_empty().extend(segments);
        Some(url)
    }

    fn set_state(&mut self, state: TransferState) {
        if self.descriptor.state != state {
            self.descriptor.state = state;
            self.emit(SessionEvent::StateChanged { state });
        }
    }

    fn set_error(&mut self, error: TransferError, message: String) {
        if self.descriptor.error_message != message {
            self.descriptor.error_message = message.clone();
            self.emit(SessionEvent::ErrorMessageChanged { message });
        }
        if self.descriptor.error != error {
            self.descriptor.error = error;
            self.emit(SessionEvent::ErrorChanged { error });
        }
    }

    fn set_progress(&mut self, progress: f64) {
        if self.descriptor.progress != progress {
            self.descriptor.progress = progress;
            self.emit(SessionEvent::ProgressChanged { progress });
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}

impl Drop for TransferSession {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::debug!("Session dropped with a transfer running, cancelling it");
            active.handle.abort();
        }
    }
}

/// Relative path components as URL path segments.
fn url_segments(relative: &Path) -> Vec<String> {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}
