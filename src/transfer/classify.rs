// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error classification.
//!
//! Maps local and transport failures onto the three-value taxonomy exposed to
//! observers. User-initiated cancellation is filtered out here and never
//! becomes a `TransportError`.

use std::path::Path;

use crate::transfer::staging::StagingError;
use crate::transport::TransportFailure;
use crate::types::TransferError;

/// Message recorded when the download destination directory cannot be made.
pub const CANNOT_CREATE_DIRECTORY: &str = "cannot create directory";

/// An error ready to be recorded on the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub error: TransferError,
    pub message: String,
}

impl Classified {
    fn file(message: impl Into<String>) -> Self {
        Self {
            error: TransferError::FileError,
            message: message.into(),
        }
    }
}

/// Failure to open the local file for reading or writing.
pub fn open_failure(e: &std::io::Error) -> Classified {
    Classified::file(e.to_string())
}

/// A local path that exists but cannot be streamed as a regular file.
pub fn not_a_file(path: &Path) -> Classified {
    Classified::file(format!("{} is not a regular file", path.display()))
}

/// Failure to create the parent directories of a download destination.
pub fn directory_failure(e: &std::io::Error) -> Classified {
    tracing::debug!("Directory creation failed: {}", e);
    Classified::file(CANNOT_CREATE_DIRECTORY)
}

/// A remote name that cannot be mapped into the staging area.
pub fn staging_failure(e: &StagingError) -> Classified {
    Classified::file(e.to_string())
}

/// Classify a transport failure. Returns `None` for a user cancellation.
pub fn transport_failure(failure: &TransportFailure) -> Option<Classified> {
    if failure.cancelled {
        return None;
    }
    Some(Classified {
        error: TransferError::TransportError,
        message: failure.message.clone(),
    })
}
