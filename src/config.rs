//! Configuration for the conversion engine and import pipeline.
//!
//! Constructed explicitly per operation; there is no process-wide singleton.
//! Installation discovery is out of scope; the engine path must be set by
//! the host before the first conversion.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::ImportError;

/// Configuration for the FreeCAD-backed conversion engine.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the FreeCAD command-line executable (`FreeCADCmd` or `freecad`).
    #[serde(default)]
    pub engine_path: PathBuf,

    /// Wall-clock timeout in seconds for a single engine invocation.
    #[serde(default = "default_timeout_seconds")]
    #[validate(range(min = 10, max = 7200))]
    pub timeout_seconds: u64,

    /// Default number of parts placed per cooperative batch.
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 500))]
    pub batch_size: usize,

    /// Limit for concurrently running imports in folder batch mode.
    #[serde(default = "default_max_folder_concurrency")]
    #[validate(range(min = 1, max = 4))]
    pub max_folder_concurrency: usize,

    /// Root directory for per-job temporary output. `None` uses the system
    /// temp directory.
    #[serde(default)]
    pub temp_root: Option<PathBuf>,

    /// Keep generated engine scripts on disk after the run for debugging.
    #[serde(default)]
    pub keep_debug_scripts: bool,

    /// Whether to capture engine stdout/stderr for diagnostics.
    #[serde(default = "default_capture_output")]
    pub capture_output: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_path: PathBuf::new(),
            timeout_seconds: default_timeout_seconds(),
            batch_size: default_batch_size(),
            max_folder_concurrency: default_max_folder_concurrency(),
            temp_root: None,
            keep_debug_scripts: false,
            capture_output: default_capture_output(),
        }
    }
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_batch_size() -> usize {
    50
}

fn default_max_folder_concurrency() -> usize {
    1
}

fn default_capture_output() -> bool {
    true
}

impl EngineConfig {
    /// Create a config with an explicit engine path and defaults elsewhere.
    pub fn with_engine_path(path: impl Into<PathBuf>) -> Self {
        Self {
            engine_path: path.into(),
            ..Default::default()
        }
    }

    /// Resolve the effective temp root directory.
    pub fn effective_temp_root(&self) -> PathBuf {
        self.temp_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("cad_importer"))
    }

    /// Verify that the engine executable is configured and present.
    pub fn ensure_engine_available(&self) -> Result<(), ImportError> {
        if self.engine_path.as_os_str().is_empty() || !self.engine_path.exists() {
            return Err(ImportError::EngineNotConfigured {
                path: self.engine_path.clone(),
            });
        }
        Ok(())
    }
}
