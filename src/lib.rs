// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! filelink - Single-file HTTP transfer engine
//!
//! Moves one file at a time between the local filesystem and a remote file
//! service, reporting progress, state and errors to whatever is watching.
//!
//! # Core Modules
//!
//! - [`transfer`] - Transfer session, state machine, staging and progress
//! - [`transport`] - Streaming HTTP transport behind the [`Transport`] trait
//! - [`types`] - States, error taxonomy and session events
//! - [`config`] - Client configuration and `file://` path conversion
//! - [`server`] - Minimal HTTP file service for `filelink serve`

pub mod config;
pub mod server;
pub mod transfer;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use config::ClientConfig;
pub use transfer::{StartOutcome, StagingArea, TransferManager, TransferSession};
pub use transport::{HttpTransport, Transport, TransportConfig};
pub use types::{SessionEvent, TransferError, TransferSnapshot, TransferState};
