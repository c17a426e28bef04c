// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Single-file transfer engine
//!
//! One session moves one file at a time between the local filesystem and a
//! remote file service:
//! - Uploads stream a local file to `{service}/{path relative to base}`
//! - Downloads stream a remote file into the session's staging directory
//! - Progress, state and errors are published as change events
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐ commands ┌─────────────────┐
//! │ TransferManager │─────────▶│ Worker (tokio)  │
//! │ (cloneable)     │◀─────────│ TransferSession │
//! └─────────────────┘ snapshot └────────┬────────┘
//!                                       │ put / get
//!                                       ▼
//! ┌─────────────────┐  events  ┌─────────────────┐
//! │ StagingArea     │          │ Transport       │
//! │ (temp dir)      │◀─────────│ (reqwest task)  │
//! └─────────────────┘          └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use filelink::config::{to_file_uri, ClientConfig};
//! use filelink::transfer::TransferManager;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ClientConfig {
//!     service_uri: Some("http://localhost:8080".to_string()),
//!     remote_base_path: Some("/srv/files".to_string()),
//!     ..ClientConfig::default()
//! };
//! let manager = TransferManager::start(&config)?;
//!
//! manager.set_local_file_path(to_file_uri(std::path::Path::new("/tmp/report.pdf"))).await?;
//! manager.start_upload().await?;
//!
//! let snapshot = manager.wait_idle().await;
//! println!("State: {}, error: {}", snapshot.state, snapshot.error);
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod manager;
pub mod progress;
pub mod session;
pub mod staging;

// Re-export commonly used items
pub use manager::{TransferCommand, TransferManager};
pub use progress::ProgressReporter;
pub use session::{StartOutcome, TransferDescriptor, TransferSession, TransportReceiver};
pub use staging::{StagingArea, StagingError};
