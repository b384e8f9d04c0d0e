//! Coordinate and unit normalization.
//!
//! Applies the manifest's global scale and an optional Z-up to Y-up
//! convention change to every placed object. Transforms in the manifest are
//! world-space, so the conversion is applied exactly once per object and
//! hierarchy depth never causes double conversion.
//!
//! The up-axis change is the fixed orthogonal basis change
//! `(x, y, z) -> (x, z, -y)`, an axis permutation with one sign flip,
//! equal to a -90 degree rotation about X. Positions use the permutation
//! directly; orientations are conjugated by the equivalent quaternion.

use glam::{DQuat, DVec3};

use crate::geometry::MeshData;
use crate::manifest::Transform;

/// Direction of the up-axis convention change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisConversion {
    /// No convention change.
    None,
    /// Engine Z-up to host Y-up.
    ZUpToYUp,
    /// Host Y-up back to engine Z-up (inverse).
    YUpToZUp,
}

/// Scale plus optional up-axis conversion, built once per import.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    scale: f64,
    axis: AxisConversion,
    basis: DQuat,
}

impl Normalizer {
    /// Build a normalizer from the manifest scale and the conversion flag.
    pub fn new(scale: f64, axis: AxisConversion) -> Self {
        let basis = match axis {
            AxisConversion::None => DQuat::IDENTITY,
            AxisConversion::ZUpToYUp => DQuat::from_rotation_x(-std::f64::consts::FRAC_PI_2),
            AxisConversion::YUpToZUp => DQuat::from_rotation_x(std::f64::consts::FRAC_PI_2),
        };
        Self { scale, axis, basis }
    }

    /// The scale factor in effect.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Whether this normalizer changes anything at all.
    pub fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.axis == AxisConversion::None
    }

    /// Permute one position into the target convention (no scaling).
    fn permute(&self, p: DVec3) -> DVec3 {
        match self.axis {
            AxisConversion::None => p,
            AxisConversion::ZUpToYUp => DVec3::new(p.x, p.z, -p.y),
            AxisConversion::YUpToZUp => DVec3::new(p.x, -p.z, p.y),
        }
    }

    /// Normalize one world-space transform: scale the position, permute it
    /// into the target convention, conjugate the orientation.
    pub fn apply(&self, transform: &Transform) -> Transform {
        if self.is_identity() {
            return *transform;
        }
        let rotation = if self.axis == AxisConversion::None {
            transform.rotation
        } else {
            (self.basis * transform.rotation * self.basis.inverse()).normalize()
        };
        Transform {
            position: self.permute(transform.position * self.scale),
            rotation,
        }
    }

    /// Normalize mesh vertices in place. Called once per loaded mesh, at
    /// load time, before the mesh is shared between instances.
    pub fn apply_to_mesh(&self, mesh: &mut MeshData) {
        if self.is_identity() {
            return;
        }
        for p in &mut mesh.positions {
            *p = self.permute(*p * self.scale);
        }
    }
}
