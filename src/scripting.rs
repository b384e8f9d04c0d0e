//! FreeCAD Python script generation.
//!
//! Each conversion gets a single-purpose script written into the job
//! directory: import the CAD file, tessellate every (or a restricted set
//! of) part, export one OBJ per part, and write `manifest.json` describing
//! the tree. The script is deleted after the run unless debug retention is
//! enabled.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::ImportError;
use crate::manifest::PartId;

/// Name of the manifest file the engine script writes.
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Parameters embedded in a generated script.
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    /// CAD input file.
    pub input_path: PathBuf,
    /// Directory the engine writes the manifest and geometry into.
    pub output_dir: PathBuf,
    /// Tessellation quality (lower = finer).
    pub quality: f64,
    /// Restrict exports to these part identities; empty = all parts.
    pub restrict_to: Vec<PartId>,
}

/// Generates engine scripts.
pub struct ScriptingEngine;

impl ScriptingEngine {
    /// Write a conversion script into `script_dir` and return its path.
    pub async fn generate(
        request: &ScriptRequest,
        script_dir: &Path,
    ) -> Result<PathBuf, ImportError> {
        let script_path =
            script_dir.join(format!("convert__{}.py", Uuid::now_v7().simple()));
        let content = Self::render(request)?;

        let mut file = tokio::fs::File::create(&script_path).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        Ok(script_path)
    }

    /// Render the script body.
    fn render(request: &ScriptRequest) -> Result<String, ImportError> {
        let input = path_str(&request.input_path)?.replace('\\', "/");
        let output = path_str(&request.output_dir)?.replace('\\', "/");

        let restrict: Vec<String> = request
            .restrict_to
            .iter()
            .map(|id| format!("\"{}\"", id.as_str()))
            .collect();

        Ok(format!(
            r#"import FreeCAD
import Import
import Mesh
import json
import os

input_file = "{input}"
output_dir = "{output}"
quality = {quality}
restrict = [{restrict}]

doc = FreeCAD.newDocument("CadImport")
Import.insert(input_file, "CadImport")

objects = []
roots = []
for idx, obj in enumerate(doc.Objects):
    if restrict and obj.Name not in restrict:
        continue
    entry = {{
        "name": obj.Label,
        "internal_name": obj.Name,
        "type": obj.TypeId,
        "index": idx,
        "metadata": {{}},
        "mesh_file": None,
        "parent": None,
        "children": [],
    }}
    if hasattr(obj, "Shape"):
        shape = obj.Shape
        entry["metadata"]["volume"] = getattr(shape, "Volume", None)
        entry["metadata"]["area"] = getattr(shape, "Area", None)
        bb = getattr(shape, "BoundBox", None)
        if bb is not None:
            entry["metadata"]["bbox"] = {{
                "min": [bb.XMin, bb.YMin, bb.ZMin],
                "max": [bb.XMax, bb.YMax, bb.ZMax],
            }}
    if hasattr(obj, "Placement"):
        pos = obj.Placement.Base
        q = obj.Placement.Rotation.Q
        entry["transform"] = {{
            "position": [pos.x, pos.y, pos.z],
            "rotation": [q[0], q[1], q[2], q[3]],
        }}
    if hasattr(obj, "Parents") and obj.Parents:
        entry["parent"] = obj.Parents[0][0].Name
    if hasattr(obj, "Shape") and obj.Shape.Faces:
        mesh_file = os.path.join(output_dir, obj.Name + ".obj")
        obj.Shape.tessellate(quality)
        Mesh.export([obj], mesh_file)
        entry["mesh_file"] = mesh_file
    objects.append(entry)

by_name = {{e["internal_name"]: e for e in objects}}
for entry in objects:
    parent = entry["parent"]
    if parent and parent in by_name:
        by_name[parent]["children"].append(entry["internal_name"])
    elif parent:
        entry["parent"] = None
        roots.append(entry["internal_name"])
    else:
        roots.append(entry["internal_name"])

manifest = {{
    "objects": objects,
    "root_objects": roots,
    "scale": 1.0,
    "z_up": True,
}}
with open(os.path.join(output_dir, "{manifest}"), "w") as f:
    json.dump(manifest, f, indent=2)

FreeCAD.closeDocument("CadImport")
"#,
            quality = request.quality,
            restrict = restrict.join(", "),
            manifest = MANIFEST_FILENAME,
        ))
    }
}

fn path_str(path: &Path) -> Result<&str, ImportError> {
    path.to_str().ok_or_else(|| ImportError::InvalidUtf8Path {
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ScriptRequest {
        ScriptRequest {
            input_path: PathBuf::from("/data/gearbox.step"),
            output_dir: PathBuf::from("/tmp/job"),
            quality: 0.1,
            restrict_to: Vec::new(),
        }
    }

    #[test]
    fn test_render_embeds_paths_and_quality() {
        let content = ScriptingEngine::render(&request()).expect("render");
        assert!(content.contains("/data/gearbox.step"));
        assert!(content.contains("/tmp/job"));
        assert!(content.contains("quality = 0.1"));
        assert!(content.contains(MANIFEST_FILENAME));
    }

    #[test]
    fn test_render_restriction_list() {
        let mut req = request();
        req.restrict_to = vec![PartId::from("Part003"), PartId::from("Part007")];
        let content = ScriptingEngine::render(&req).expect("render");
        assert!(content.contains(r#"restrict = ["Part003", "Part007"]"#));
    }

    #[test]
    fn test_render_backslash_normalization() {
        let mut req = request();
        req.input_path = PathBuf::from(r"C:\data\part.stp");
        let content = ScriptingEngine::render(&req).expect("render");
        assert!(content.contains("C:/data/part.stp"));
    }

    #[tokio::test]
    async fn test_generate_writes_unique_scripts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = ScriptingEngine::generate(&request(), temp.path())
            .await
            .expect("generate");
        let b = ScriptingEngine::generate(&request(), temp.path())
            .await
            .expect("generate");
        assert_ne!(a, b);
        assert!(a.exists());
        assert!(b.exists());
    }
}
