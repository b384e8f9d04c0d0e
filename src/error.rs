//! Unified error types for the assembly import pipeline.
//!
//! Pipeline-level failures (`ImportError`) abort the import of one file.
//! Per-part failures (`SkipReason`) are recorded against the part identity
//! and never abort a batch; the final outcome reports them alongside the
//! successfully placed objects.

use std::path::PathBuf;
use thiserror::Error;

/// Pipeline-level error: aborts the import of the current file.
#[derive(Debug, Error)]
pub enum ImportError {
    /// Input file extension is not in the supported allow-list.
    #[error("Unsupported file format '{extension}' for {path}")]
    UnsupportedFormat {
        /// The rejected input path.
        path: PathBuf,
        /// The offending extension (lowercased, may be empty).
        extension: String,
    },

    /// The conversion engine executable is not configured or missing.
    #[error("Conversion engine not configured or not found: {path}")]
    EngineNotConfigured {
        /// The configured engine path that does not exist.
        path: PathBuf,
    },

    /// The engine process exceeded the wall-clock timeout and was killed.
    #[error("Conversion timed out after {elapsed_secs}s (limit {timeout_secs}s)")]
    ConversionTimeout {
        /// Wall-clock seconds elapsed when the process was killed.
        elapsed_secs: u64,
        /// The configured timeout that was exceeded.
        timeout_secs: u64,
    },

    /// The engine process exited with a non-zero status.
    #[error("Conversion failed with exit code {code}: {stderr}")]
    ConversionFailed {
        /// The exit code (-1 if terminated by signal).
        code: i32,
        /// Captured stderr, truncated for logging.
        stderr: String,
    },

    /// The engine reported success but produced no manifest file.
    #[error("Conversion produced no manifest at {path}")]
    ManifestMissing {
        /// Expected manifest location.
        path: PathBuf,
    },

    /// The manifest could not be decoded or violates structural invariants.
    #[error("Malformed manifest: {reason}")]
    MalformedManifest {
        /// Human-readable description of the violation.
        reason: String,
    },

    /// The manifest parsed but contains no parts.
    #[error("Manifest contains no parts")]
    EmptyManifest,

    /// The import run was cancelled via its cancellation token.
    #[error("Import was cancelled")]
    Cancelled,

    /// A path needed for script generation is not valid UTF-8.
    #[error("Path is not valid UTF-8: {path}")]
    InvalidUtf8Path {
        /// The offending path.
        path: PathBuf,
    },

    /// IO error anywhere in the pipeline.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A spawned pipeline task panicked or was aborted.
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ImportError {
    /// Build a `MalformedManifest` from anything displayable.
    pub fn malformed(reason: impl std::fmt::Display) -> Self {
        Self::MalformedManifest {
            reason: reason.to_string(),
        }
    }
}

/// Per-part failure: recorded and skipped, never fatal to the import.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SkipReason {
    /// The part's geometry file could not be read or decoded.
    #[error("Geometry load failed for {path}: {reason}")]
    GeometryLoad {
        /// The geometry file that failed.
        path: PathBuf,
        /// Description of the failure.
        reason: String,
    },

    /// The host scene rejected the object placement.
    #[error("Placement failed: {reason}")]
    Placement {
        /// Description of the failure.
        reason: String,
    },
}
