//! Batched hierarchy assembly.
//!
//! Places every manifest part into the host scene in cooperative batches,
//! yielding between batches so the host stays responsive on large
//! assemblies. Parts are placed in manifest order; a part whose parent has
//! not been placed yet is deferred to a later pass, so out-of-order
//! manifests still assemble correctly. A part that cannot be placed is
//! skipped and recorded, and its descendants are reattached to the nearest
//! placed ancestor.
//!
//! Transforms in the manifest are world-space, so placement order never
//! affects final positions and each object is normalized exactly once.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ImportError, SkipReason};
use crate::geometry::MeshData;
use crate::manifest::{Manifest, PartId, PartRecord};
use crate::models::HierarchyMode;
use crate::normalize::Normalizer;
use crate::scene::{HostScene, ObjectId, ObjectKind};

/// Progress snapshot delivered at every batch boundary.
#[derive(Debug, Clone, Copy)]
pub struct BatchProgress {
    /// Batches completed so far.
    pub batches: usize,
    /// Parts placed or skipped so far.
    pub processed: usize,
    /// Total parts in the manifest.
    pub total: usize,
}

/// Outcome of one assembly pass.
#[derive(Debug, Default)]
pub struct AssemblyResult {
    /// Scene handle per placed part.
    pub placed: BTreeMap<PartId, ObjectId>,
    /// Parts skipped with the reason, in decision order.
    pub skipped: Vec<(PartId, SkipReason)>,
    /// Number of cooperative batches used.
    pub batches: usize,
}

/// Places a parsed manifest into a host scene.
pub struct HierarchyAssembler<'a> {
    manifest: &'a Manifest,
    normalizer: &'a Normalizer,
    mode: HierarchyMode,
    batch_size: usize,
}

impl<'a> HierarchyAssembler<'a> {
    /// Build an assembler. `batch_size` is clamped to at least 1.
    pub fn new(
        manifest: &'a Manifest,
        normalizer: &'a Normalizer,
        mode: HierarchyMode,
        batch_size: usize,
    ) -> Self {
        Self {
            manifest,
            normalizer,
            mode,
            batch_size: batch_size.max(1),
        }
    }

    /// Assemble the whole manifest into `scene`.
    ///
    /// Cancellation is honored at batch boundaries only; objects already
    /// placed stay in the scene. `progress` fires once per completed batch
    /// and once at the end.
    pub async fn assemble(
        &self,
        scene: &mut dyn HostScene,
        meshes: &BTreeMap<PartId, Arc<MeshData>>,
        cancel: &CancellationToken,
        mut progress: impl FnMut(BatchProgress),
    ) -> Result<AssemblyResult, ImportError> {
        let total = self.manifest.parts().len();
        let mut pending: VecDeque<&PartRecord> = self.manifest.parts().iter().collect();
        let mut result = AssemblyResult::default();
        let mut skipped_ids: BTreeMap<PartId, ()> = BTreeMap::new();
        let mut in_batch = 0usize;

        while !pending.is_empty() {
            let mut progressed = false;
            for _ in 0..pending.len() {
                let Some(part) = pending.pop_front() else {
                    break;
                };

                // Resolve the target parent, or defer if it is undecided.
                let parent_obj = match &part.parent {
                    None => None,
                    Some(p) if result.placed.contains_key(p) => {
                        Some(result.placed[p])
                    }
                    Some(p) if skipped_ids.contains_key(p) => {
                        self.nearest_placed_ancestor(p, &result.placed)
                    }
                    Some(_) => {
                        pending.push_back(part);
                        continue;
                    }
                };
                progressed = true;

                match self.place(scene, part, parent_obj, meshes) {
                    Ok(object) => {
                        result.placed.insert(part.id.clone(), object);
                    }
                    Err(reason) => {
                        warn!(part = %part.id, %reason, "Skipping part");
                        skipped_ids.insert(part.id.clone(), ());
                        result.skipped.push((part.id.clone(), reason));
                    }
                }

                in_batch += 1;
                if in_batch >= self.batch_size {
                    in_batch = 0;
                    result.batches += 1;
                    progress(BatchProgress {
                        batches: result.batches,
                        processed: result.placed.len() + result.skipped.len(),
                        total,
                    });
                    if cancel.is_cancelled() {
                        return Err(ImportError::Cancelled);
                    }
                    tokio::task::yield_now().await;
                }
            }

            // The manifest is validated acyclic, so a stalled pass means a
            // reference the validator could not see. Skip the remainder.
            if !progressed {
                for part in pending.drain(..) {
                    result.skipped.push((
                        part.id.clone(),
                        SkipReason::Placement {
                            reason: "parent chain never resolved".to_string(),
                        },
                    ));
                }
            }
        }

        if in_batch > 0 {
            result.batches += 1;
        }
        progress(BatchProgress {
            batches: result.batches,
            processed: result.placed.len() + result.skipped.len(),
            total,
        });

        debug!(
            placed = result.placed.len(),
            skipped = result.skipped.len(),
            batches = result.batches,
            "Assembly complete"
        );
        Ok(result)
    }

    /// Create and link one scene object.
    fn place(
        &self,
        scene: &mut dyn HostScene,
        part: &PartRecord,
        parent: Option<ObjectId>,
        meshes: &BTreeMap<PartId, Arc<MeshData>>,
    ) -> Result<ObjectId, SkipReason> {
        let transform = self.normalizer.apply(&part.transform);

        let object = if part.geometry_file.is_some() {
            let mesh = meshes.get(&part.id).ok_or_else(|| SkipReason::Placement {
                reason: "geometry unavailable".to_string(),
            })?;
            scene.create_mesh_object(&part.label, Arc::clone(mesh), transform)?
        } else {
            scene.create_group(&part.label, transform)?
        };

        if let Some(parent) = parent {
            match self.mode {
                HierarchyMode::Linked => scene.set_parent(object, parent)?,
                HierarchyMode::Grouped => {
                    if scene.kind(parent) == Some(ObjectKind::Group) {
                        scene.add_to_group(object, parent)?;
                    } else {
                        scene.set_parent(object, parent)?;
                    }
                }
            }
        }
        Ok(object)
    }

    /// Walk the manifest ancestor chain upward from a skipped parent to the
    /// first placed one. Bounded because the manifest is acyclic.
    fn nearest_placed_ancestor(
        &self,
        from: &PartId,
        placed: &BTreeMap<PartId, ObjectId>,
    ) -> Option<ObjectId> {
        let mut current = self.manifest.part(from).and_then(|p| p.parent.as_ref());
        while let Some(id) = current {
            if let Some(&object) = placed.get(id) {
                return Some(object);
            }
            current = self.manifest.part(id).and_then(|p| p.parent.as_ref());
        }
        None
    }
}
