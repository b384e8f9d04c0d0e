//! Host scene seam.
//!
//! The host 3D application owns all created objects; this crate only talks
//! to it through [`HostScene`]. Objects are never deleted by the pipeline;
//! lifecycle ends only by explicit host-side deletion. [`MemoryScene`] is a
//! faithful in-memory implementation used by the test suite and headless
//! runs.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::SkipReason;
use crate::geometry::MeshData;
use crate::manifest::Transform;

/// Opaque handle to a host scene object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

/// What kind of scene object a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Mesh-carrying object.
    Mesh,
    /// Container/group object without geometry.
    Group,
}

/// Interface to the host application's scene graph.
///
/// All operations are synchronous; the pipeline calls them from the host's
/// cooperative context between batch yields.
pub trait HostScene: Send {
    /// Create a mesh object. Geometry is shared, never copied.
    fn create_mesh_object(
        &mut self,
        name: &str,
        mesh: Arc<MeshData>,
        transform: Transform,
    ) -> Result<ObjectId, SkipReason>;

    /// Create a container/group object.
    fn create_group(&mut self, name: &str, transform: Transform) -> Result<ObjectId, SkipReason>;

    /// Link `child` under `parent` as a direct object link.
    fn set_parent(&mut self, child: ObjectId, parent: ObjectId) -> Result<(), SkipReason>;

    /// Add `object` to `group`'s membership.
    fn add_to_group(&mut self, object: ObjectId, group: ObjectId) -> Result<(), SkipReason>;

    /// The object's kind, or `None` for an unknown handle.
    fn kind(&self, object: ObjectId) -> Option<ObjectKind>;

    /// Current transform.
    fn transform(&self, object: ObjectId) -> Option<Transform>;

    /// Replace the transform.
    fn set_transform(&mut self, object: ObjectId, transform: Transform) -> Result<(), SkipReason>;

    /// Current geometry payload, if the object carries one.
    fn geometry(&self, object: ObjectId) -> Option<Arc<MeshData>>;

    /// Replace the geometry payload in place.
    fn set_geometry(&mut self, object: ObjectId, mesh: Arc<MeshData>) -> Result<(), SkipReason>;

    /// Read one attribute.
    fn attribute(&self, object: ObjectId, key: &str) -> Option<Value>;

    /// Write one attribute. Must not disturb other keys.
    fn set_attribute(&mut self, object: ObjectId, key: &str, value: Value)
    -> Result<(), SkipReason>;
}

/// Sanitize an engine label for use as a host object name.
///
/// Strips characters hosts commonly reject in object names and falls back
/// to a placeholder for empty labels.
pub fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "CAD_Object".to_string()
    } else {
        trimmed.to_string()
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SceneNode {
    name: String,
    kind: ObjectKind,
    transform: Transform,
    mesh: Option<Arc<MeshData>>,
    parent: Option<ObjectId>,
    members: Vec<ObjectId>,
    attributes: HashMap<String, Value>,
}

/// In-memory [`HostScene`] used by tests and headless runs.
#[derive(Debug, Default)]
pub struct MemoryScene {
    nodes: HashMap<ObjectId, SceneNode>,
    next_id: u64,
}

impl MemoryScene {
    /// Create an empty scene.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects in the scene.
    pub fn object_count(&self) -> usize {
        self.nodes.len()
    }

    /// The object's name.
    pub fn name(&self, object: ObjectId) -> Option<&str> {
        self.nodes.get(&object).map(|n| n.name.as_str())
    }

    /// The object's parent link.
    pub fn parent(&self, object: ObjectId) -> Option<ObjectId> {
        self.nodes.get(&object).and_then(|n| n.parent)
    }

    /// Members of a group.
    pub fn members(&self, group: ObjectId) -> &[ObjectId] {
        self.nodes
            .get(&group)
            .map(|n| n.members.as_slice())
            .unwrap_or(&[])
    }

    /// All attribute keys on an object, sorted.
    pub fn attribute_keys(&self, object: ObjectId) -> Vec<String> {
        let mut keys: Vec<String> = self
            .nodes
            .get(&object)
            .map(|n| n.attributes.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn alloc(&mut self, node: SceneNode) -> ObjectId {
        self.next_id += 1;
        let id = ObjectId(self.next_id);
        self.nodes.insert(id, node);
        id
    }

    fn node_mut(&mut self, object: ObjectId) -> Result<&mut SceneNode, SkipReason> {
        self.nodes.get_mut(&object).ok_or_else(|| SkipReason::Placement {
            reason: format!("unknown object handle {object:?}"),
        })
    }
}

impl HostScene for MemoryScene {
    fn create_mesh_object(
        &mut self,
        name: &str,
        mesh: Arc<MeshData>,
        transform: Transform,
    ) -> Result<ObjectId, SkipReason> {
        Ok(self.alloc(SceneNode {
            name: sanitize_label(name),
            kind: ObjectKind::Mesh,
            transform,
            mesh: Some(mesh),
            parent: None,
            members: Vec::new(),
            attributes: HashMap::new(),
        }))
    }

    fn create_group(&mut self, name: &str, transform: Transform) -> Result<ObjectId, SkipReason> {
        Ok(self.alloc(SceneNode {
            name: sanitize_label(name),
            kind: ObjectKind::Group,
            transform,
            mesh: None,
            parent: None,
            members: Vec::new(),
            attributes: HashMap::new(),
        }))
    }

    fn set_parent(&mut self, child: ObjectId, parent: ObjectId) -> Result<(), SkipReason> {
        if !self.nodes.contains_key(&parent) {
            return Err(SkipReason::Placement {
                reason: format!("unknown parent handle {parent:?}"),
            });
        }
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    fn add_to_group(&mut self, object: ObjectId, group: ObjectId) -> Result<(), SkipReason> {
        if !self.nodes.contains_key(&object) {
            return Err(SkipReason::Placement {
                reason: format!("unknown object handle {object:?}"),
            });
        }
        let group_node = self.node_mut(group)?;
        if group_node.kind != ObjectKind::Group {
            return Err(SkipReason::Placement {
                reason: format!("{group:?} is not a group"),
            });
        }
        if !group_node.members.contains(&object) {
            group_node.members.push(object);
        }
        Ok(())
    }

    fn kind(&self, object: ObjectId) -> Option<ObjectKind> {
        self.nodes.get(&object).map(|n| n.kind)
    }

    fn transform(&self, object: ObjectId) -> Option<Transform> {
        self.nodes.get(&object).map(|n| n.transform)
    }

    fn set_transform(&mut self, object: ObjectId, transform: Transform) -> Result<(), SkipReason> {
        self.node_mut(object)?.transform = transform;
        Ok(())
    }

    fn geometry(&self, object: ObjectId) -> Option<Arc<MeshData>> {
        self.nodes.get(&object).and_then(|n| n.mesh.clone())
    }

    fn set_geometry(&mut self, object: ObjectId, mesh: Arc<MeshData>) -> Result<(), SkipReason> {
        let node = self.node_mut(object)?;
        if node.kind != ObjectKind::Mesh {
            return Err(SkipReason::Placement {
                reason: format!("{object:?} carries no geometry"),
            });
        }
        node.mesh = Some(mesh);
        Ok(())
    }

    fn attribute(&self, object: ObjectId, key: &str) -> Option<Value> {
        self.nodes.get(&object).and_then(|n| n.attributes.get(key).cloned())
    }

    fn set_attribute(
        &mut self,
        object: ObjectId,
        key: &str,
        value: Value,
    ) -> Result<(), SkipReason> {
        self.node_mut(object)?.attributes.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    fn tri() -> Arc<MeshData> {
        Arc::new(MeshData {
            positions: vec![DVec3::ZERO, DVec3::X, DVec3::Y],
            faces: vec![vec![0, 1, 2]],
        })
    }

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("Wheel/Left:Front"), "Wheel_Left_Front");
        assert_eq!(sanitize_label("   "), "CAD_Object");
        assert_eq!(sanitize_label("Bracket-01"), "Bracket-01");
    }

    #[test]
    fn test_mesh_object_shares_geometry() {
        let mut scene = MemoryScene::new();
        let mesh = tri();
        let a = scene
            .create_mesh_object("A", Arc::clone(&mesh), Transform::IDENTITY)
            .expect("create");
        let b = scene
            .create_mesh_object("B", Arc::clone(&mesh), Transform::IDENTITY)
            .expect("create");
        assert!(Arc::ptr_eq(
            &scene.geometry(a).unwrap(),
            &scene.geometry(b).unwrap()
        ));
    }

    #[test]
    fn test_parent_and_group_links() {
        let mut scene = MemoryScene::new();
        let group = scene.create_group("Asm", Transform::IDENTITY).expect("group");
        let child = scene
            .create_mesh_object("Part", tri(), Transform::IDENTITY)
            .expect("mesh");

        scene.set_parent(child, group).expect("parent");
        scene.add_to_group(child, group).expect("member");

        assert_eq!(scene.parent(child), Some(group));
        assert_eq!(scene.members(group), &[child]);
        // Adding twice does not duplicate membership.
        scene.add_to_group(child, group).expect("member again");
        assert_eq!(scene.members(group).len(), 1);
    }

    #[test]
    fn test_group_rejects_geometry() {
        let mut scene = MemoryScene::new();
        let group = scene.create_group("Asm", Transform::IDENTITY).expect("group");
        assert!(scene.set_geometry(group, tri()).is_err());
    }

    #[test]
    fn test_unknown_handle_is_placement_error() {
        let mut scene = MemoryScene::new();
        let err = scene
            .set_transform(ObjectId(99), Transform::IDENTITY)
            .unwrap_err();
        assert!(matches!(err, SkipReason::Placement { .. }));
    }

    #[test]
    fn test_attributes_do_not_disturb_others() {
        let mut scene = MemoryScene::new();
        let obj = scene
            .create_mesh_object("Part", tri(), Transform::IDENTITY)
            .expect("mesh");
        scene
            .set_attribute(obj, "host_custom", Value::from("keep me"))
            .expect("attr");
        scene
            .set_attribute(obj, "cad_volume", Value::from(2.5))
            .expect("attr");
        assert_eq!(scene.attribute(obj, "host_custom"), Some(Value::from("keep me")));
        assert_eq!(scene.attribute_keys(obj).len(), 2);
    }
}
