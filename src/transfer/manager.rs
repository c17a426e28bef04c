// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session manager: runs a [`TransferSession`] on its own task.
//!
//! Commands from any number of callers and events from the transport are
//! funnelled into one loop, so the session only ever sees one message at a
//! time. Observers read snapshots through a `watch` channel or subscribe to
//! the event broadcast.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures_util::{Stream, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::wrappers::BroadcastStream;

use crate::config::ClientConfig;
use crate::transport::HttpTransport;
use crate::types::{SessionEvent, TransferSnapshot};

use super::session::{StartOutcome, TransferSession, TransportReceiver};
use super::staging::StagingArea;

/// Capacity of the command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Commands that can be sent to the session worker.
#[derive(Debug)]
pub enum TransferCommand {
    SetServiceUri(String),
    SetRemoteBasePath(String),
    SetLocalFilePath(String),
    SetRemoteFilePath(String),
    StartUpload { reply: oneshot::Sender<StartOutcome> },
    StartDownload { reply: oneshot::Sender<StartOutcome> },
    Abort { reply: oneshot::Sender<bool> },
    /// Abort whatever is running, wait for it, then drop the session
    Shutdown { reply: oneshot::Sender<()> },
}

/// Cloneable front end to a running session.
#[derive(Debug, Clone)]
pub struct TransferManager {
    command_tx: mpsc::Sender<TransferCommand>,
    snapshot_rx: watch::Receiver<TransferSnapshot>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl TransferManager {
    /// Build a session from the client configuration and start its worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &ClientConfig) -> Result<Self> {
        let staging = StagingArea::create(&config.staging_prefix)?;
        let transport = HttpTransport::new(&config.transport())?;
        let (mut session, transport_rx) = TransferSession::new(staging, Arc::new(transport));

        if let Some(uri) = &config.service_uri {
            session.set_service_uri(uri.clone());
        }
        if let Some(base) = &config.remote_base_path {
            session.set_remote_base_path(base.clone());
        }
        Ok(Self::spawn(session, transport_rx))
    }

    /// Start the worker for an already-built session.
    pub fn spawn(session: TransferSession, transport_rx: TransportReceiver) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
        let event_tx = session.event_sender();

        tokio::spawn(async move {
            Self::worker_loop(session, transport_rx, command_rx, snapshot_tx).await;
        });

        Self {
            command_tx,
            snapshot_rx,
            event_tx,
        }
    }

    pub async fn set_service_uri(&self, uri: impl Into<String>) -> Result<()> {
        self.send(TransferCommand::SetServiceUri(uri.into())).await
    }

    pub async fn set_remote_base_path(&self, path: impl Into<String>) -> Result<()> {
        self.send(TransferCommand::SetRemoteBasePath(path.into())).await
    }

    pub async fn set_local_file_path(&self, path: impl Into<String>) -> Result<()> {
        self.send(TransferCommand::SetLocalFilePath(path.into())).await
    }

    pub async fn set_remote_file_path(&self, path: impl Into<String>) -> Result<()> {
        self.send(TransferCommand::SetRemoteFilePath(path.into())).await
    }

    /// Start an upload. Returns as soon as the transport operation is begun
    /// or a pre-flight failure is recorded.
    pub async fn start_upload(&self) -> Result<StartOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(TransferCommand::StartUpload { reply }).await?;
        rx.await.map_err(|_| anyhow!("Transfer session stopped before replying"))
    }

    /// Start a download. Same contract as [`start_upload`](Self::start_upload).
    pub async fn start_download(&self) -> Result<StartOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(TransferCommand::StartDownload { reply }).await?;
        rx.await.map_err(|_| anyhow!("Transfer session stopped before replying"))
    }

    /// Request cancellation. Returns false when nothing was running.
    pub async fn abort(&self) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(TransferCommand::Abort { reply }).await?;
        rx.await.map_err(|_| anyhow!("Transfer session stopped before replying"))
    }

    /// Current observable state.
    pub fn snapshot(&self) -> TransferSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver that is notified whenever the snapshot changes.
    pub fn watch(&self) -> watch::Receiver<TransferSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Subscribe to change and finish events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Events as a stream; lagged notifications are skipped.
    pub fn events(&self) -> impl Stream<Item = SessionEvent> + Send + 'static {
        BroadcastStream::new(self.event_tx.subscribe())
            .filter_map(|event| async move { event.ok() })
    }

    /// Wait until no transport operation is outstanding.
    pub async fn wait_idle(&self) -> TransferSnapshot {
        let mut rx = self.snapshot_rx.clone();
        if let Ok(snapshot) = rx.wait_for(|snapshot| !snapshot.active).await {
            return snapshot.clone();
        }
        // Worker gone; whatever was last published is final
        let snapshot = rx.borrow().clone();
        snapshot
    }

    /// Abort any running transfer, wait for it to wind down and drop the
    /// session (removing its staging directory).
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(TransferCommand::Shutdown { reply }).await?;
        rx.await.map_err(|_| anyhow!("Transfer session stopped before replying"))
    }

    async fn send(&self, command: TransferCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| anyhow!("Transfer session has shut down"))
    }

    /// Background loop that owns the session.
    async fn worker_loop(
        mut session: TransferSession,
        mut transport_rx: TransportReceiver,
        mut command_rx: mpsc::Receiver<TransferCommand>,
        snapshot_tx: watch::Sender<TransferSnapshot>,
    ) {
        let mut shutdown_reply = None;

        loop {
            tokio::select! {
                Some(event) = transport_rx.recv() => {
                    session.handle_transport_event(event);
                }
                command = command_rx.recv() => match command {
                    Some(TransferCommand::Shutdown { reply }) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(command) => Self::apply(&mut session, command, &snapshot_tx).await,
                    // Every handle dropped
                    None => break,
                },
            }
            Self::publish(&session, &snapshot_tx);
        }

        if session.abort() {
            session.drain(&mut transport_rx).await;
        }
        Self::publish(&session, &snapshot_tx);
        drop(session);
        tracing::debug!("Transfer session stopped");

        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    /// Replies are sent only after the resulting snapshot is published, so a
    /// caller never observes a snapshot older than its own command.
    async fn apply(
        session: &mut TransferSession,
        command: TransferCommand,
        snapshot_tx: &watch::Sender<TransferSnapshot>,
    ) {
        match command {
            TransferCommand::SetServiceUri(uri) => session.set_service_uri(uri),
            TransferCommand::SetRemoteBasePath(path) => session.set_remote_base_path(path),
            TransferCommand::SetLocalFilePath(path) => session.set_local_file_path(path),
            TransferCommand::SetRemoteFilePath(path) => session.set_remote_file_path(path),
            TransferCommand::StartUpload { reply } => {
                let outcome = session.start_upload().await;
                Self::publish(session, snapshot_tx);
                let _ = reply.send(outcome);
            }
            TransferCommand::StartDownload { reply } => {
                let outcome = session.start_download().await;
                Self::publish(session, snapshot_tx);
                let _ = reply.send(outcome);
            }
            TransferCommand::Abort { reply } => {
                let _ = reply.send(session.abort());
            }
            // Handled by the loop
            TransferCommand::Shutdown { .. } => {}
        }
    }

    fn publish(session: &TransferSession, snapshot_tx: &watch::Sender<TransferSnapshot>) {
        let snapshot = session.snapshot();
        snapshot_tx.send_if_modified(|current| {
            if *current != snapshot {
                *current = snapshot;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::to_file_uri;
    use crate::transport::{EventEmitter, Transport, TransportHandle, TransportRequest};
    use crate::types::TransferState;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    /// Transport that finishes immediately, or waits for cancellation.
    struct InstantTransport {
        hang: bool,
    }

    impl InstantTransport {
        fn run(&self, request: TransportRequest) -> TransportHandle {
            let cancel = CancellationToken::new();
            let operation = request.operation;
            let emitter = EventEmitter::new(operation, request.events);
            let file = request.file;
            let hang = self.hang;
            let token = cancel.clone();
            let task = tokio::spawn(async move {
                if hang {
                    token.cancelled().await;
                    emitter.fail(crate::transport::TransportFailure::cancelled());
                } else {
                    emitter.progress(1, 1);
                }
                emitter.finish(file);
            });
            TransportHandle::new(operation, cancel, task)
        }
    }

    impl Transport for InstantTransport {
        fn put(&self, request: TransportRequest) -> TransportHandle {
            self.run(request)
        }

        fn get(&self, request: TransportRequest) -> TransportHandle {
            self.run(request)
        }
    }

    fn manager(base: &TempDir, hang: bool) -> (TransferManager, std::path::PathBuf) {
        let staging = StagingArea::create_in(base.path(), "manager-test").unwrap();
        let root = staging.root().to_path_buf();
        let (mut session, rx) = TransferSession::new(staging, Arc::new(InstantTransport { hang }));
        session.set_service_uri("http://host/files");
        session.set_remote_base_path("/files");
        (TransferManager::spawn(session, rx), root)
    }

    #[tokio::test]
    async fn test_upload_through_manager() {
        let base = TempDir::new().expect("Failed to create temp dir");
        let local = base.path().join("a.txt");
        std::fs::write(&local, b"x").unwrap();
        let (manager, _) = manager(&base, false);
        let mut events = manager.subscribe();

        manager.set_local_file_path(to_file_uri(&local)).await.unwrap();
        assert_eq!(manager.start_upload().await.unwrap(), StartOutcome::Started);

        let snapshot = manager.wait_idle().await;
        assert_eq!(snapshot.state, TransferState::Idle);
        assert_eq!(snapshot.progress, 1.0);

        let mut finished = 0;
        while let Ok(event) = events.try_recv() {
            if event == SessionEvent::UploadFinished {
                finished += 1;
            }
        }
        assert_eq!(finished, 1);
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_abort_through_manager() {
        let base = TempDir::new().expect("Failed to create temp dir");
        let (manager, _) = manager(&base, true);

        assert!(!manager.abort().await.unwrap());

        manager.set_remote_file_path("/files/b.txt").await.unwrap();
        assert_eq!(manager.start_download().await.unwrap(), StartOutcome::Started);
        assert!(manager.snapshot().active);

        assert!(manager.abort().await.unwrap());
        let snapshot = manager.wait_idle().await;
        assert_eq!(snapshot.state, TransferState::Idle);
        assert!(snapshot.error.is_none());
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_removes_staging_and_cancels() {
        let base = TempDir::new().expect("Failed to create temp dir");
        let (manager, root) = manager(&base, true);
        assert!(root.is_dir());

        manager.set_remote_file_path("/files/b.txt").await.unwrap();
        manager.start_download().await.unwrap();
        manager.shutdown().await.unwrap();

        assert!(!root.exists());
        assert!(manager.start_upload().await.is_err());
    }
}
