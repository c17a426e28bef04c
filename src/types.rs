// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Canonical types used across filelink.
//!
//! Observable session state, the error taxonomy, and the events emitted to
//! whatever layer is watching a transfer.

use serde::{Deserialize, Serialize};

/// Session-wide transfer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransferState {
    /// No transfer outstanding
    #[default]
    Idle,
    /// Streaming a local file to the service
    UploadRunning,
    /// Streaming a remote file into the staging area
    DownloadRunning,
    /// The current or last attempt recorded an error
    Error,
}

impl TransferState {
    /// Convert state to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Idle => "idle",
            TransferState::UploadRunning => "upload-running",
            TransferState::DownloadRunning => "download-running",
            TransferState::Error => "error",
        }
    }

    /// Returns true while a transport operation is streaming.
    pub fn is_running(&self) -> bool {
        matches!(self, TransferState::UploadRunning | TransferState::DownloadRunning)
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error taxonomy exposed to observers.
///
/// Cancellation is never represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransferError {
    #[default]
    None,
    /// Local filesystem failure: open-for-read, open-for-write, mkdir
    FileError,
    /// Any transport failure other than a user-initiated cancel
    TransportError,
}

impl TransferError {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferError::None => "none",
            TransferError::FileError => "file-error",
            TransferError::TransportError => "transport-error",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, TransferError::None)
    }
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which way the bytes are moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferDirection {
    Upload,
    Download,
}

impl TransferDirection {
    /// The running state that corresponds to this direction.
    pub fn running_state(&self) -> TransferState {
        match self {
            TransferDirection::Upload => TransferState::UploadRunning,
            TransferDirection::Download => TransferState::DownloadRunning,
        }
    }

    /// The event emitted when a transfer in this direction ends cleanly.
    pub fn finished_event(&self) -> SessionEvent {
        match self {
            TransferDirection::Upload => SessionEvent::UploadFinished,
            TransferDirection::Download => SessionEvent::DownloadFinished,
        }
    }
}

/// Discrete notifications raised by a transfer session.
///
/// Change variants are only emitted when the value actually differs from the
/// previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged { state: TransferState },
    ErrorChanged { error: TransferError },
    ErrorMessageChanged { message: String },
    ProgressChanged { progress: f64 },
    LocalFilePathChanged { path: String },
    RemoteFilePathChanged { path: String },
    UploadFinished,
    DownloadFinished,
}

impl SessionEvent {
    /// Returns true for the two finish events.
    pub fn is_finished(&self) -> bool {
        matches!(self, SessionEvent::UploadFinished | SessionEvent::DownloadFinished)
    }
}

/// Point-in-time copy of everything a UI binds to.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransferSnapshot {
    pub state: TransferState,
    pub error: TransferError,
    pub error_message: String,
    pub progress: f64,
    pub local_file_path: String,
    pub remote_file_path: String,
    /// A transport operation is outstanding
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_defaults_to_idle() {
        assert_eq!(TransferState::default(), TransferState::Idle);
        assert_eq!(TransferError::default(), TransferError::None);
    }

    #[test]
    fn test_running_states() {
        assert!(TransferState::UploadRunning.is_running());
        assert!(TransferState::DownloadRunning.is_running());
        assert!(!TransferState::Idle.is_running());
        assert!(!TransferState::Error.is_running());
    }

    #[test]
    fn test_direction_mapping() {
        assert_eq!(TransferDirection::Upload.running_state(), TransferState::UploadRunning);
        assert_eq!(TransferDirection::Download.finished_event(), SessionEvent::DownloadFinished);
        assert!(TransferDirection::Upload.finished_event().is_finished());
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&SessionEvent::StateChanged {
            state: TransferState::UploadRunning,
        })
        .unwrap();
        assert!(json.contains("\"event\":\"state_changed\""));
        assert!(json.contains("UploadRunning"));
    }
}
