//! Geometry loading: one indexed-polygon mesh file per manifest entry.
//!
//! The engine exports Wavefront OBJ, one file per part. Only vertex and
//! face statements are consumed; everything else (normals, UVs, materials)
//! is ignored; the host rebuilds shading on its side.

use std::path::Path;

use glam::DVec3;

use crate::error::SkipReason;

/// Host-neutral indexed polygon mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    /// Vertex positions in file order.
    pub positions: Vec<DVec3>,
    /// Polygon faces as zero-based vertex indices.
    pub faces: Vec<Vec<u32>>,
}

impl MeshData {
    /// Number of vertices.
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Number of faces.
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Signed volume via the divergence theorem over fan-triangulated
    /// faces. Stable for closed meshes; used only as a bucketing statistic.
    pub fn volume(&self) -> f64 {
        let mut total = 0.0;
        for face in &self.faces {
            if face.len() < 3 {
                continue;
            }
            let a = self.positions[face[0] as usize];
            for pair in face[1..].windows(2) {
                let b = self.positions[pair[0] as usize];
                let c = self.positions[pair[1] as usize];
                total += a.dot(b.cross(c)) / 6.0;
            }
        }
        total.abs()
    }
}

/// Load an OBJ file into [`MeshData`].
///
/// Fails with [`SkipReason::GeometryLoad`] on a missing file, malformed
/// vertex data, or indices out of range; the caller records the skip and
/// continues with the remaining parts.
pub fn load_obj(path: &Path) -> Result<MeshData, SkipReason> {
    let raw = std::fs::read_to_string(path).map_err(|e| SkipReason::GeometryLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_obj(&raw).map_err(|reason| SkipReason::GeometryLoad {
        path: path.to_path_buf(),
        reason,
    })
}

/// Parse OBJ text into mesh data.
fn parse_obj(raw: &str) -> Result<MeshData, String> {
    let mut positions: Vec<DVec3> = Vec::new();
    let mut faces: Vec<Vec<u32>> = Vec::new();

    for (line_no, line) in raw.lines().enumerate() {
        let line = line.trim();
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("v") => {
                let mut coords = [0.0f64; 3];
                for coord in &mut coords {
                    let token = tokens
                        .next()
                        .ok_or_else(|| format!("line {}: truncated vertex", line_no + 1))?;
                    *coord = token
                        .parse()
                        .map_err(|_| format!("line {}: bad vertex coordinate '{token}'", line_no + 1))?;
                }
                positions.push(DVec3::from_array(coords));
            }
            Some("f") => {
                let mut face = Vec::new();
                for token in tokens {
                    // "f v", "f v/vt", "f v/vt/vn", "f v//vn"
                    let index_str = token.split('/').next().unwrap_or(token);
                    let signed: i64 = index_str
                        .parse()
                        .map_err(|_| format!("line {}: bad face index '{token}'", line_no + 1))?;
                    let resolved = if signed < 0 {
                        // Negative indices are relative to the current vertex count.
                        positions.len() as i64 + signed
                    } else {
                        signed - 1
                    };
                    if resolved < 0 || resolved as usize >= positions.len() {
                        return Err(format!(
                            "line {}: face index {signed} out of range",
                            line_no + 1
                        ));
                    }
                    face.push(resolved as u32);
                }
                if face.len() < 3 {
                    return Err(format!("line {}: face with fewer than 3 vertices", line_no + 1));
                }
                faces.push(face);
            }
            _ => {}
        }
    }

    if positions.is_empty() {
        return Err("no vertices".to_string());
    }
    Ok(MeshData { positions, faces })
}
