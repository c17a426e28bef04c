// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Progress fraction derived from transport byte counters.

/// Tracks the normalized progress of the active transfer.
///
/// The fraction is clamped to `[0.0, 1.0]` and never moves backwards while a
/// transfer is running. A zero total means the size is unknown (or the file is
/// empty); the fraction then stays where it is until [`complete`] is called.
///
/// [`complete`]: ProgressReporter::complete
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressReporter {
    fraction: f64,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current fraction.
    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    /// Reset to zero at the start of a transfer.
    pub fn reset(&mut self) -> f64 {
        self.fraction = 0.0;
        self.fraction
    }

    /// Recompute from a progress event and return the published fraction.
    pub fn update(&mut self, transferred: u64, total: u64) -> f64 {
        if total == 0 {
            return self.fraction;
        }
        let ratio = (transferred as f64 / total as f64).clamp(0.0, 1.0);
        if ratio > self.fraction {
            self.fraction = ratio;
        }
        self.fraction
    }

    /// Mark a successful transfer as fully done.
    pub fn complete(&mut self) -> f64 {
        self.fraction = 1.0;
        self.fraction
    }
}
