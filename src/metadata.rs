//! Metadata attachment.
//!
//! Writes engine-reported part properties and import provenance onto
//! placed scene objects as namespaced attributes. Only `cad_`-prefixed
//! keys are touched; attributes the host or the user put on an object are
//! never disturbed. Missing engine values are omitted, not defaulted.
//!
//! Numeric properties stay in engine units; unit scaling applies to
//! placement and geometry, not to recorded source values.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::dedup::InstanceGroup;
use crate::manifest::{Manifest, PartId, PartRecord};
use crate::scene::{HostScene, ObjectId};

/// Namespace prefix for every attribute written by the importer.
pub const ATTR_PREFIX: &str = "cad_";

/// Attaches part metadata and provenance to placed objects.
pub struct MetadataAttacher<'a> {
    manifest: &'a Manifest,
    source_file: &'a Path,
    quality: f64,
}

impl<'a> MetadataAttacher<'a> {
    /// Build an attacher for one import run.
    pub fn new(manifest: &'a Manifest, source_file: &'a Path, quality: f64) -> Self {
        Self {
            manifest,
            source_file,
            quality,
        }
    }

    /// Attach attributes to every placed object. Returns the number of
    /// objects tagged. Attribute failures are logged and skipped; they
    /// never abort the import.
    pub fn attach(
        &self,
        scene: &mut dyn HostScene,
        placed: &BTreeMap<PartId, ObjectId>,
        instance_groups: &[InstanceGroup],
    ) -> usize {
        let mut canonical_of: BTreeMap<&PartId, &PartId> = BTreeMap::new();
        for group in instance_groups {
            for member in &group.members {
                canonical_of.insert(member, &group.canonical);
            }
        }

        let mut tagged = 0usize;
        for (id, &object) in placed {
            let Some(part) = self.manifest.part(id) else {
                continue;
            };
            let mut failed = false;
            for (key, value) in self.attributes_for(part, canonical_of.get(id).copied()) {
                if let Err(reason) = scene.set_attribute(object, &key, value) {
                    warn!(part = %id, key, %reason, "Attribute write failed");
                    failed = true;
                }
            }
            if !failed {
                tagged += 1;
            }
        }
        debug!(tagged, "Metadata attached");
        tagged
    }

    /// The full attribute set for one part, in key order.
    fn attributes_for(
        &self,
        part: &PartRecord,
        canonical: Option<&PartId>,
    ) -> Vec<(String, Value)> {
        let mut attrs: Vec<(String, Value)> = vec![
            (key("source_file"), json!(self.source_file.display().to_string())),
            (key("source_id"), json!(part.id.as_str())),
            (key("label"), json!(part.label)),
            (key("type"), json!(part.type_tag)),
            (key("index"), json!(part.index)),
            (key("tessellation_quality"), json!(self.quality)),
        ];

        let meta = &part.metadata;
        if let Some(volume) = meta.volume {
            attrs.push((key("volume"), json!(volume)));
        }
        if let Some(area) = meta.area {
            attrs.push((key("area"), json!(area)));
        }
        if let Some(min) = meta.bbox_min {
            attrs.push((key("bbox_min"), json!([min.x, min.y, min.z])));
        }
        if let Some(max) = meta.bbox_max {
            attrs.push((key("bbox_max"), json!([max.x, max.y, max.z])));
        }
        if let Some(color) = meta.color {
            attrs.push((key("color"), json!(color)));
        }
        if let Some(ref description) = meta.description {
            attrs.push((key("description"), json!(description)));
        }
        if let Some(ref material) = meta.material {
            attrs.push((key("material"), json!(material)));
        }
        if let Some(canonical) = canonical {
            attrs.push((key("instance_of"), json!(canonical.as_str())));
        }
        attrs
    }
}

fn key(suffix: &str) -> String {
    format!("{ATTR_PREFIX}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::MeshData;
    use crate::manifest::Transform;
    use crate::scene::MemoryScene;
    use glam::DVec3;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn manifest() -> Manifest {
        Manifest::parse_str(
            r#"{
                "objects": [
                    {
                        "name": "Bracket",
                        "internal_name": "Part001",
                        "type": "Part::Feature",
                        "index": 0,
                        "metadata": {
                            "volume": 1250.5,
                            "area": 830.0,
                            "bbox": {"min": [0, 0, 0], "max": [10, 20, 5]},
                            "material": "Steel"
                        },
                        "mesh_file": "Part001.obj"
                    },
                    {
                        "name": "Bracket",
                        "internal_name": "Part002",
                        "type": "Part::Feature",
                        "index": 1,
                        "mesh_file": "Part002.obj"
                    }
                ]
            }"#,
        )
        .expect("manifest")
    }

    fn place_all(scene: &mut MemoryScene) -> BTreeMap<PartId, ObjectId> {
        let mesh = Arc::new(MeshData {
            positions: vec![DVec3::ZERO, DVec3::X, DVec3::Y],
            faces: vec![vec![0, 1, 2]],
        });
        ["Part001", "Part002"]
            .into_iter()
            .map(|id| {
                let object = scene
                    .create_mesh_object(id, Arc::clone(&mesh), Transform::IDENTITY)
                    .expect("create");
                (PartId::from(id), object)
            })
            .collect()
    }

    #[test]
    fn test_attaches_properties_and_provenance() {
        let manifest = manifest();
        let source = PathBuf::from("/data/gearbox.step");
        let mut scene = MemoryScene::new();
        let placed = place_all(&mut scene);

        let tagged = MetadataAttacher::new(&manifest, &source, 0.1).attach(
            &mut scene,
            &placed,
            &[],
        );
        assert_eq!(tagged, 2);

        let obj = placed[&PartId::from("Part001")];
        assert_eq!(
            scene.attribute(obj, "cad_source_id"),
            Some(json!("Part001"))
        );
        assert_eq!(scene.attribute(obj, "cad_volume"), Some(json!(1250.5)));
        assert_eq!(scene.attribute(obj, "cad_material"), Some(json!("Steel")));
        assert_eq!(
            scene.attribute(obj, "cad_bbox_max"),
            Some(json!([10.0, 20.0, 5.0]))
        );
        assert_eq!(
            scene.attribute(obj, "cad_source_file"),
            Some(json!("/data/gearbox.step"))
        );
    }

    #[test]
    fn test_missing_values_omitted() {
        let manifest = manifest();
        let source = PathBuf::from("/data/gearbox.step");
        let mut scene = MemoryScene::new();
        let placed = place_all(&mut scene);

        MetadataAttacher::new(&manifest, &source, 0.1).attach(&mut scene, &placed, &[]);

        let bare = placed[&PartId::from("Part002")];
        assert_eq!(scene.attribute(bare, "cad_volume"), None);
        assert_eq!(scene.attribute(bare, "cad_material"), None);
        assert_eq!(scene.attribute(bare, "cad_source_id"), Some(json!("Part002")));
    }

    #[test]
    fn test_instance_back_reference_on_members_only() {
        let manifest = manifest();
        let source = PathBuf::from("/data/gearbox.step");
        let mut scene = MemoryScene::new();
        let placed = place_all(&mut scene);

        let groups = vec![InstanceGroup {
            canonical: PartId::from("Part001"),
            members: vec![PartId::from("Part002")],
        }];
        MetadataAttacher::new(&manifest, &source, 0.1).attach(&mut scene, &placed, &groups);

        let canonical = placed[&PartId::from("Part001")];
        let member = placed[&PartId::from("Part002")];
        assert_eq!(scene.attribute(canonical, "cad_instance_of"), None);
        assert_eq!(
            scene.attribute(member, "cad_instance_of"),
            Some(json!("Part001"))
        );
    }

    #[test]
    fn test_host_attributes_untouched() {
        let manifest = manifest();
        let source = PathBuf::from("/data/gearbox.step");
        let mut scene = MemoryScene::new();
        let placed = place_all(&mut scene);
        let obj = placed[&PartId::from("Part001")];
        scene
            .set_attribute(obj, "artist_note", json!("keep"))
            .expect("attr");

        MetadataAttacher::new(&manifest, &source, 0.1).attach(&mut scene, &placed, &[]);

        assert_eq!(scene.attribute(obj, "artist_note"), Some(json!("keep")));
    }
}
