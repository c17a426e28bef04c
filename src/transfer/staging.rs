// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Local staging area for downloads.
//!
//! Each session owns one private directory under the system temp root. It is
//! created when the session is built and removed, recursively and best-effort,
//! when the owning value is dropped.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use rand::Rng;

/// Default directory name prefix.
pub const DEFAULT_STAGING_PREFIX: &str = "filelink";

/// Reasons a relative name cannot be placed under the staging root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagingError {
    /// Nothing left after stripping the remote base path.
    EmptyName,
    /// Absolute path or `..` component.
    EscapesRoot(PathBuf),
}

impl std::fmt::Display for StagingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "empty file name"),
            Self::EscapesRoot(path) => {
                write!(f, "path escapes the staging directory: {}", path.display())
            }
        }
    }
}

impl std::error::Error for StagingError {}

/// Session-owned temporary directory.
#[derive(Debug)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// Create a staging directory under the system temp root.
    pub fn create(prefix: &str) -> Result<Self> {
        Self::create_in(&std::env::temp_dir(), prefix)
    }

    /// Create a staging directory under `base`.
    ///
    /// The directory name combines the prefix, the process id and a random
    /// suffix so two sessions in one process never share a root.
    pub fn create_in(base: &Path, prefix: &str) -> Result<Self> {
        fs::create_dir_all(base)
            .with_context(|| format!("Failed to create temp root {:?}", base))?;

        let suffix: u32 = rand::thread_rng().gen();
        let root = base.join(format!("{}-{}-{:08x}", prefix, std::process::id(), suffix));

        fs::create_dir(&root)
            .with_context(|| format!("Failed to create staging directory {:?}", root))?;

        tracing::debug!("Created staging directory {}", root.display());
        Ok(Self { root })
    }

    /// Root of the staging tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative name (subdirectories allowed) under the root.
    pub fn resolve(&self, relative: &Path) -> std::result::Result<PathBuf, StagingError> {
        let mut resolved = self.root.clone();
        let mut pushed = false;

        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    pushed = true;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StagingError::EscapesRoot(relative.to_path_buf()));
                }
            }
        }

        if !pushed {
            return Err(StagingError::EmptyName);
        }
        Ok(resolved)
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => tracing::debug!("Removed staging directory {}", self.root.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove staging directory {}: {}",
                self.root.display(),
                e
            ),
        }
    }
}
