// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Error types for quality analysis runs.
//!
//! Only setup failures are errors. Per-ray data problems are logged into the
//! run's diagnostic log and anomalies are delivered as events.

use crate::analysis::AnomalyKind;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for analysis operations.
pub type QaResult<T> = Result<T, QaError>;

/// Errors that abort an analysis before any ray is fired.
#[derive(Debug, Error)]
pub enum QaError {
    /// The kernel exposes no regions to analyze.
    #[error("no geometry loaded: {0}")]
    NoGeometry(String),

    /// The model bounding box is empty or degenerate.
    #[error("model bounding box is empty")]
    EmptyBoundingBox,

    /// An explicitly requested density source could not be read.
    #[error("unable to read density source {path:?}: {reason}")]
    DensitySource { path: PathBuf, reason: String },

    /// An enabled anomaly class has no registered handler.
    #[error("analysis of {0} is enabled but no handler is registered for it")]
    MissingCallback(AnomalyKind),

    /// Single-view extent is zero, negative or not finite.
    #[error("invalid view size {0}")]
    InvalidViewSize(f64),

    /// Air analysis was requested while air regions are discarded.
    #[error("air analysis requested but air regions are being ignored")]
    AirDiscarded,

    /// Configuration values that cannot describe a run.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Scene or report file access.
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed TOML scene or config.
    #[error("failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },
}

impl QaError {
    /// Create a no-geometry error.
    #[must_use]
    pub fn no_geometry(details: impl Into<String>) -> Self {
        Self::NoGeometry(details.into())
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(details: impl Into<String>) -> Self {
        Self::InvalidConfig(details.into())
    }

    /// Create a density source error.
    #[must_use]
    pub fn density_source(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::DensitySource {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an I/O failure with the path it occurred on.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a parse error.
    #[must_use]
    pub fn parse(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            reason: reason.into(),
        }
    }
}
