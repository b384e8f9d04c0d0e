//! # CAD Importer
//!
//! An assembly import pipeline for CAD files (STEP/IGES) built around the
//! FreeCAD command-line engine. One import run converts the file to an
//! intermediate manifest plus per-part geometry, then assembles the part
//! tree into a host scene in cooperative batches: parsing, geometry
//! loading, instance deduplication, unit/axis normalization, hierarchy
//! placement, and metadata attachment.
//!
//! ## Engine bridge
//!
//! The engine runs as a subprocess with a wall-clock timeout and
//! cancellation; on success it leaves a job directory containing
//! `manifest.json` and one OBJ file per part. Placed objects can later be
//! re-tessellated at a different quality through a restricted engine run
//! that swaps geometry in place.

pub mod bridge;
pub mod config;
pub mod dedup;
pub mod error;
pub mod geometry;
pub mod hierarchy;
pub mod importer;
pub mod manifest;
pub mod metadata;
pub mod models;
pub mod normalize;
pub mod retessellate;
pub mod scene;
pub mod scripting;

pub use bridge::{ConversionEngine, ConversionRequest, FreeCadEngine};
pub use config::EngineConfig;
pub use error::{ImportError, SkipReason};
pub use importer::{AssemblyImporter, ImportOutcome, ImportSession};
pub use manifest::{Manifest, PartId, Transform};
pub use models::{FileType, HierarchyMode, ImportOptions, ScalePreset};
pub use retessellate::{RetessState, Retessellator};
pub use scene::{HostScene, MemoryScene, ObjectId};
