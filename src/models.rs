//! Domain models: supported file types, import options, scale presets.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::error::ImportError;

// ---------------------------------------------------------------------------
// Extension map macro
// ---------------------------------------------------------------------------

macro_rules! define_file_types {
    ($($variant:ident => $ext:literal),* $(,)?) => {
        static EXTENSION_MAP: LazyLock<HashMap<&'static str, FileType>> = LazyLock::new(|| {
            HashMap::from([$(($ext, FileType::$variant),)*])
        });

        impl FileType {
            /// All file extensions accepted by the importer.
            pub const SUPPORTED_EXTENSIONS: &'static [&'static str] = &[$($ext,)*];
        }
    };
}

define_file_types! {
    Step     => "stp",
    StepAlt  => "step",
    Iges     => "igs",
    IgesAlt  => "iges",
}

/// Recognized CAD input file types.
///
/// The allow-list mirrors what the FreeCAD batch script can ingest; anything
/// else is rejected up front with [`ImportError::UnsupportedFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    /// STEP (.stp)
    Step,
    /// STEP alternate extension (.step)
    StepAlt,
    /// IGES (.igs)
    Iges,
    /// IGES alternate extension (.iges)
    IgesAlt,
}

impl FileType {
    /// Determine the file type from a path, or `None` if unsupported.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        EXTENSION_MAP.get(ext.as_str()).copied()
    }

    /// Resolve the file type or fail with the taxonomy error.
    pub fn try_from_path(path: &Path) -> Result<Self, ImportError> {
        Self::from_path(path).ok_or_else(|| ImportError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension: path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default()
                .to_ascii_lowercase(),
        })
    }
}

// ---------------------------------------------------------------------------
// Scale presets
// ---------------------------------------------------------------------------

/// Unit-scale conversion applied to every placed object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalePreset {
    /// Millimeters to meters (0.001).
    MillimetersToMeters,
    /// Centimeters to meters (0.01).
    CentimetersToMeters,
    /// Meters to meters (no scaling).
    Meters,
    /// Inches to meters (0.0254).
    InchesToMeters,
    /// Arbitrary scale factor.
    Custom(f64),
}

impl ScalePreset {
    /// The numeric scale factor for this preset.
    pub fn factor(&self) -> f64 {
        match self {
            Self::MillimetersToMeters => 0.001,
            Self::CentimetersToMeters => 0.01,
            Self::Meters => 1.0,
            Self::InchesToMeters => 0.0254,
            Self::Custom(f) => *f,
        }
    }
}

impl Default for ScalePreset {
    fn default() -> Self {
        Self::MillimetersToMeters
    }
}

// ---------------------------------------------------------------------------
// Hierarchy mode
// ---------------------------------------------------------------------------

/// How the manifest tree is expressed in the host scene.
///
/// Both modes preserve the manifest's logical parent/child tree; they differ
/// only in the host primitive used to express it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyMode {
    /// Children expressed via container/group membership.
    #[default]
    Grouped,
    /// Direct parent/child object links.
    Linked,
}

// ---------------------------------------------------------------------------
// ImportOptions
// ---------------------------------------------------------------------------

/// User-supplied options for one import operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Unit scale conversion.
    pub scale: ScalePreset,
    /// Hierarchy style in the host scene.
    pub hierarchy_mode: HierarchyMode,
    /// Convert the engine's Z-up convention to the host's Y-up.
    pub up_axis_convert: bool,
    /// Parts placed per cooperative batch. `None` uses the configured default.
    pub batch_size: Option<usize>,
    /// Tessellation quality handed to the engine (lower = finer mesh).
    pub quality: f64,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            scale: ScalePreset::default(),
            hierarchy_mode: HierarchyMode::default(),
            up_axis_convert: true,
            batch_size: None,
            quality: 0.1,
        }
    }
}
