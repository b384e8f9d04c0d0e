//! Instance deduplication for repeated geometry.
//!
//! Loaded meshes are bucketed by a cheap structural fingerprint, then each
//! bucket is verified by sampling vertex positions at matching indices.
//! Verified duplicates are rewritten to share the canonical owner's mesh
//! payload; only their transforms stay individual. Fingerprint collisions
//! are expected and resolved by the verification step; the fingerprint is
//! never treated as identity proof.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::geometry::MeshData;
use crate::manifest::PartId;

/// Default number of vertex positions sampled during verification.
pub const DEFAULT_SAMPLE_COUNT: usize = 10;

/// Default per-component tolerance for sampled positions.
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// Cheap bucketing key for candidate duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryFingerprint {
    /// Vertex count.
    pub vertex_count: usize,
    /// Face count.
    pub face_count: usize,
    /// Volume rounded to 1e-6, as an integer key.
    pub volume_key: i64,
}

impl GeometryFingerprint {
    /// Compute the fingerprint of a mesh.
    pub fn of(mesh: &MeshData) -> Self {
        Self {
            vertex_count: mesh.vertex_count(),
            face_count: mesh.face_count(),
            volume_key: (mesh.volume() * 1e6).round() as i64,
        }
    }
}

/// One verified group of geometrically equivalent parts.
///
/// The canonical owner retains the mesh payload; members reference it
/// without copying. The member list is reporting data only; traversal
/// always goes through the manifest tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceGroup {
    /// Identity of the canonical geometry owner.
    pub canonical: PartId,
    /// Non-canonical members sharing the canonical geometry.
    pub members: Vec<PartId>,
}

/// Verifies and rewrites duplicate geometry.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    sample_count: usize,
    tolerance: f64,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self {
            sample_count: DEFAULT_SAMPLE_COUNT,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl Deduplicator {
    /// Create a deduplicator with explicit sampling parameters.
    pub fn new(sample_count: usize, tolerance: f64) -> Self {
        Self {
            sample_count: sample_count.max(1),
            tolerance,
        }
    }

    /// Deduplicate a loaded mesh set in place.
    ///
    /// Rewrites verified duplicates to share the canonical `Arc` and
    /// returns the verified groups of size >= 2, ordered by canonical
    /// identity. Idempotent: a second run returns the same partition and
    /// changes nothing.
    pub fn run(&self, meshes: &mut BTreeMap<PartId, Arc<MeshData>>) -> Vec<InstanceGroup> {
        let mut buckets: BTreeMap<GeometryFingerprint, Vec<PartId>> = BTreeMap::new();
        for (id, mesh) in meshes.iter() {
            buckets
                .entry(GeometryFingerprint::of(mesh))
                .or_default()
                .push(id.clone());
        }

        let mut groups = Vec::new();
        let mut rewritten = 0usize;

        for (fingerprint, candidates) in buckets {
            if candidates.len() < 2 {
                continue;
            }
            debug!(
                vertices = fingerprint.vertex_count,
                faces = fingerprint.face_count,
                candidates = candidates.len(),
                "Verifying fingerprint bucket"
            );

            // A bucket may split into several verified subgroups. The first
            // member of each subgroup becomes its canonical owner.
            let mut subgroups: Vec<(PartId, Arc<MeshData>, Vec<PartId>)> = Vec::new();
            for id in candidates {
                let mesh = Arc::clone(&meshes[&id]);
                let matched = subgroups.iter_mut().find(|(_, canonical_mesh, _)| {
                    self.verify_candidate(canonical_mesh, &mesh)
                });
                match matched {
                    Some((_, canonical_mesh, members)) => {
                        if !Arc::ptr_eq(&mesh, canonical_mesh) {
                            meshes.insert(id.clone(), Arc::clone(canonical_mesh));
                            rewritten += 1;
                        }
                        members.push(id);
                    }
                    None => subgroups.push((id, mesh, Vec::new())),
                }
            }

            for (canonical, _, members) in subgroups {
                if !members.is_empty() {
                    groups.push(InstanceGroup { canonical, members });
                }
            }
        }

        groups.sort_by(|a, b| a.canonical.cmp(&b.canonical));
        if !groups.is_empty() {
            info!(
                groups = groups.len(),
                rewritten = rewritten,
                "Instance deduplication complete"
            );
        }
        groups
    }

    /// Sampled geometric comparison: a fixed number of vertices at
    /// matching indices within tolerance, not a full mesh equality proof.
    fn verify_candidate(&self, canonical: &Arc<MeshData>, candidate: &Arc<MeshData>) -> bool {
        if Arc::ptr_eq(canonical, candidate) {
            return true;
        }
        let n = canonical.vertex_count();
        if n != candidate.vertex_count() || canonical.face_count() != candidate.face_count() {
            return false;
        }
        if n == 0 {
            return true;
        }

        // With fewer vertices than samples, step stays 1 and every vertex
        // is compared.
        let step = (n / self.sample_count).max(1);
        let mut index = 0;
        let mut sampled = 0;
        while index < n && sampled < self.sample_count {
            let a = canonical.positions[index];
            let b = candidate.positions[index];
            if (a - b).abs().max_element() > self.tolerance {
                return false;
            }
            index += step;
            sampled += 1;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    fn grid_mesh(n: usize, offset: f64) -> Arc<MeshData> {
        let positions = (0..n)
            .map(|i| DVec3::new(i as f64 + offset, 0.0, 1.0))
            .collect();
        let faces = (0..n.saturating_sub(2))
            .map(|i| vec![i as u32, i as u32 + 1, i as u32 + 2])
            .collect();
        Arc::new(MeshData { positions, faces })
    }

    fn set(entries: Vec<(&str, Arc<MeshData>)>) -> BTreeMap<PartId, Arc<MeshData>> {
        entries
            .into_iter()
            .map(|(id, m)| (PartId::from(id), m))
            .collect()
    }

    #[test]
    fn test_identical_meshes_grouped() {
        let mut meshes = set(vec![
            ("A", grid_mesh(12, 0.0)),
            ("B", grid_mesh(12, 0.0)),
            ("C", grid_mesh(12, 0.0)),
        ]);
        let groups = Deduplicator::default().run(&mut meshes);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].canonical, PartId::from("A"));
        assert_eq!(groups[0].members, vec![PartId::from("B"), PartId::from("C")]);
        // All three now share one payload.
        assert!(Arc::ptr_eq(&meshes[&PartId::from("A")], &meshes[&PartId::from("B")]));
        assert!(Arc::ptr_eq(&meshes[&PartId::from("A")], &meshes[&PartId::from("C")]));
    }

    #[test]
    fn test_same_fingerprint_different_vertices_split() {
        // Same counts; the offset mesh differs at every sampled vertex but
        // shares face structure. Volume differs too, so force the same
        // bucket by using a flat (zero-volume) strip.
        let a = grid_mesh(12, 0.0);
        let b = grid_mesh(12, 5.0);
        assert_eq!(GeometryFingerprint::of(&a), GeometryFingerprint::of(&b));

        let mut meshes = set(vec![("A", Arc::clone(&a)), ("B", Arc::clone(&b))]);
        let groups = Deduplicator::default().run(&mut meshes);
        assert!(groups.is_empty());
        assert!(!Arc::ptr_eq(&meshes[&PartId::from("A")], &meshes[&PartId::from("B")]));
    }

    #[test]
    fn test_bucket_splits_into_subgroups() {
        let mut meshes = set(vec![
            ("A1", grid_mesh(12, 0.0)),
            ("A2", grid_mesh(12, 0.0)),
            ("B1", grid_mesh(12, 5.0)),
            ("B2", grid_mesh(12, 5.0)),
        ]);
        let groups = Deduplicator::default().run(&mut meshes);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].canonical, PartId::from("A1"));
        assert_eq!(groups[1].canonical, PartId::from("B1"));
    }

    #[test]
    fn test_idempotent() {
        let mut meshes = set(vec![
            ("A", grid_mesh(12, 0.0)),
            ("B", grid_mesh(12, 0.0)),
            ("C", grid_mesh(12, 5.0)),
        ]);
        let dedup = Deduplicator::default();
        let first = dedup.run(&mut meshes);
        let second = dedup.run(&mut meshes);
        assert_eq!(first, second);
    }

    #[test]
    fn test_small_mesh_samples_all_vertices() {
        // 4 vertices < sample count: every vertex is compared, so a
        // difference at the last one is caught.
        let a = Arc::new(MeshData {
            positions: vec![DVec3::ZERO, DVec3::X, DVec3::Y, DVec3::Z],
            faces: vec![vec![0, 1, 2], vec![0, 2, 3]],
        });
        let mut positions = a.positions.clone();
        positions[3] = DVec3::new(0.0, 0.0, 1.5);
        let b = Arc::new(MeshData {
            positions,
            faces: a.faces.clone(),
        });

        let dedup = Deduplicator::default();
        assert!(!dedup.verify_candidate(&a, &b));
    }

    #[test]
    fn test_tolerance_accepts_jitter() {
        let a = grid_mesh(12, 0.0);
        let jittered = Arc::new(MeshData {
            positions: a.positions.iter().map(|p| *p + DVec3::splat(1e-9)).collect(),
            faces: a.faces.clone(),
        });
        let dedup = Deduplicator::default();
        assert!(dedup.verify_candidate(&a, &jittered));
    }
}
