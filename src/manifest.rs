//! Manifest parsing and validation.
//!
//! The engine writes one `manifest.json` per conversion describing every
//! part, its world-space transform, metadata, geometry file, and the
//! parent/child tree. Parsing validates the structural invariants (unique
//! identities, resolvable references, no cycles) and produces an immutable
//! [`Manifest`] that no later pipeline stage mutates.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ImportError;

/// Stable part identity from the engine manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartId(pub String);

impl PartId {
    /// View the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PartId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// World-space placement of one part.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Position in engine units.
    pub position: DVec3,
    /// Orientation quaternion.
    pub rotation: DQuat,
}

impl Transform {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        position: DVec3::ZERO,
        rotation: DQuat::IDENTITY,
    };
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Engine-reported per-part properties. All fields optional; a missing
/// value stays `None` and is omitted downstream, never defaulted to zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartMetadata {
    /// Solid volume in engine units cubed.
    pub volume: Option<f64>,
    /// Surface area in engine units squared.
    pub area: Option<f64>,
    /// Axis-aligned bounding box minimum corner.
    pub bbox_min: Option<DVec3>,
    /// Axis-aligned bounding box maximum corner.
    pub bbox_max: Option<DVec3>,
    /// Display color as RGBA in 0..=1.
    pub color: Option<[f64; 4]>,
    /// Free-form description.
    pub description: Option<String>,
    /// Material name.
    pub material: Option<String>,
}

/// One part entry within a parsed manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct PartRecord {
    /// Stable identity, unique within the manifest.
    pub id: PartId,
    /// Human-readable label.
    pub label: String,
    /// Engine type tag (e.g. `Part::Feature`).
    pub type_tag: String,
    /// Positional index in the engine document.
    pub index: usize,
    /// Engine-reported properties.
    pub metadata: PartMetadata,
    /// World-space placement. Always present; identity when the engine
    /// reported none.
    pub transform: Transform,
    /// Geometry file for leaf parts; `None` for pure containers.
    pub geometry_file: Option<PathBuf>,
    /// Parent identity, or `None` for roots.
    pub parent: Option<PartId>,
    /// Ordered child identities.
    pub children: Vec<PartId>,
}

impl PartRecord {
    /// A container groups children and carries no geometry of its own.
    pub fn is_container(&self) -> bool {
        self.geometry_file.is_none() && !self.children.is_empty()
    }
}

/// Parsed, validated, immutable description of one converted assembly.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Parts in manifest order.
    parts: Vec<PartRecord>,
    /// Root identities (parts with no parent).
    roots: Vec<PartId>,
    /// Global unit scale reported by the engine.
    scale: f64,
    /// Whether the engine output uses the Z-up convention.
    z_up: bool,
    /// Index from identity to position in `parts`.
    by_id: HashMap<PartId, usize>,
}

impl Manifest {
    /// Parse and validate a manifest file.
    pub fn parse(path: &Path) -> Result<Self, ImportError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse_str(&raw)
    }

    /// Parse and validate manifest JSON.
    pub fn parse_str(raw: &str) -> Result<Self, ImportError> {
        let wire: WireManifest = serde_json::from_str(raw).map_err(ImportError::malformed)?;
        Self::from_wire(wire)
    }

    fn from_wire(wire: WireManifest) -> Result<Self, ImportError> {
        if wire.objects.is_empty() {
            return Err(ImportError::EmptyManifest);
        }

        let mut by_id: HashMap<PartId, usize> = HashMap::with_capacity(wire.objects.len());
        for (idx, obj) in wire.objects.iter().enumerate() {
            let id = PartId(obj.internal_name.clone());
            if by_id.insert(id.clone(), idx).is_some() {
                return Err(ImportError::malformed(format!(
                    "duplicate part identity '{id}'"
                )));
            }
        }

        let mut parts = Vec::with_capacity(wire.objects.len());
        for (idx, obj) in wire.objects.into_iter().enumerate() {
            let parent = obj.parent.map(PartId);
            if let Some(ref p) = parent {
                if !by_id.contains_key(p) {
                    return Err(ImportError::malformed(format!(
                        "part '{}' references nonexistent parent '{p}'",
                        obj.internal_name
                    )));
                }
                if p.as_str() == obj.internal_name {
                    return Err(ImportError::malformed(format!(
                        "part '{}' is its own parent",
                        obj.internal_name
                    )));
                }
            }

            let children: Vec<PartId> = obj.children.into_iter().map(PartId).collect();
            for child in &children {
                if !by_id.contains_key(child) {
                    return Err(ImportError::malformed(format!(
                        "part '{}' lists nonexistent child '{child}'",
                        obj.internal_name
                    )));
                }
            }

            let transform = obj
                .transform
                .map(|t| Transform {
                    position: DVec3::from_array(t.position),
                    // Wire order is [x, y, z, w] (FreeCAD Rotation.Q).
                    rotation: DQuat::from_xyzw(
                        t.rotation[0],
                        t.rotation[1],
                        t.rotation[2],
                        t.rotation[3],
                    ),
                })
                .unwrap_or_default();

            parts.push(PartRecord {
                id: PartId(obj.internal_name),
                label: obj.name,
                type_tag: obj.type_tag,
                index: obj.index.unwrap_or(idx),
                metadata: PartMetadata {
                    volume: obj.metadata.volume,
                    area: obj.metadata.area,
                    bbox_min: obj.metadata.bbox.as_ref().map(|b| DVec3::from_array(b.min)),
                    bbox_max: obj.metadata.bbox.as_ref().map(|b| DVec3::from_array(b.max)),
                    color: obj.metadata.color,
                    description: obj.metadata.description,
                    material: obj.metadata.material,
                },
                transform,
                geometry_file: obj.mesh_file.map(PathBuf::from),
                parent,
                children,
            });
        }

        // Roots: declared list if present, otherwise every parentless part.
        let roots: Vec<PartId> = if wire.root_objects.is_empty() {
            parts
                .iter()
                .filter(|p| p.parent.is_none())
                .map(|p| p.id.clone())
                .collect()
        } else {
            let declared: Vec<PartId> = wire.root_objects.into_iter().map(PartId).collect();
            for root in &declared {
                if !by_id.contains_key(root) {
                    return Err(ImportError::malformed(format!(
                        "root list references nonexistent part '{root}'"
                    )));
                }
            }
            declared
        };

        let manifest = Self {
            parts,
            roots,
            scale: wire.scale,
            z_up: wire.z_up,
            by_id,
        };
        manifest.check_acyclic()?;

        debug!(
            parts = manifest.parts.len(),
            roots = manifest.roots.len(),
            scale = manifest.scale,
            "Manifest validated"
        );
        Ok(manifest)
    }

    /// Walk every part's ancestor chain with a visited set. Bounded by part
    /// count, so termination is guaranteed even on corrupt input.
    fn check_acyclic(&self) -> Result<(), ImportError> {
        for part in &self.parts {
            let mut visited: HashSet<&PartId> = HashSet::new();
            visited.insert(&part.id);

            let mut current = part.parent.as_ref();
            let mut steps = 0usize;
            while let Some(parent_id) = current {
                if !visited.insert(parent_id) {
                    return Err(ImportError::malformed(format!(
                        "cycle detected in ancestor chain of '{}' at '{parent_id}'",
                        part.id
                    )));
                }
                steps += 1;
                if steps > self.parts.len() {
                    return Err(ImportError::malformed(format!(
                        "ancestor chain of '{}' exceeds part count",
                        part.id
                    )));
                }
                current = self
                    .by_id
                    .get(parent_id)
                    .and_then(|&idx| self.parts[idx].parent.as_ref());
            }
        }
        Ok(())
    }

    /// Parts in manifest order.
    pub fn parts(&self) -> &[PartRecord] {
        &self.parts
    }

    /// Root identities.
    pub fn roots(&self) -> &[PartId] {
        &self.roots
    }

    /// Global unit scale reported by the engine.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Whether the engine output uses the Z-up convention.
    pub fn is_z_up(&self) -> bool {
        self.z_up
    }

    /// Look up a part by identity.
    pub fn part(&self, id: &PartId) -> Option<&PartRecord> {
        self.by_id.get(id).map(|&idx| &self.parts[idx])
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireManifest {
    objects: Vec<WireObject>,
    #[serde(default)]
    root_objects: Vec<String>,
    #[serde(default = "default_scale")]
    scale: f64,
    #[serde(default = "default_z_up")]
    z_up: bool,
}

fn default_scale() -> f64 {
    1.0
}

fn default_z_up() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct WireObject {
    name: String,
    internal_name: String,
    #[serde(rename = "type", default)]
    type_tag: String,
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    metadata: WireMetadata,
    #[serde(default)]
    transform: Option<WireTransform>,
    #[serde(default)]
    mesh_file: Option<String>,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    children: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireMetadata {
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    area: Option<f64>,
    #[serde(default)]
    bbox: Option<WireBbox>,
    #[serde(default)]
    color: Option<[f64; 4]>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    material: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireBbox {
    min: [f64; 3],
    max: [f64; 3],
}

#[derive(Debug, Deserialize)]
struct WireTransform {
    position: [f64; 3],
    /// Quaternion in `[x, y, z, w]` order.
    rotation: [f64; 4],
}
