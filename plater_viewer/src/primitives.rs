//! Procedural stand-in meshes for scene files. Geometry is built unit-sized
//! around the origin (z up) and scaled per volume.

use std::f32::consts::PI;

use glam::Vec3;
use plater_scene::TriangleMesh;
use serde::Deserialize;

const SPHERE_LAT_DIVS: u32 = 12;
const SPHERE_LON_DIVS: u32 = 18;
const CONE_SEGMENTS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    Sphere,
    Cube,
    Cone,
}

pub fn primitive(kind: PrimitiveKind) -> TriangleMesh {
    match kind {
        PrimitiveKind::Sphere => build_sphere(SPHERE_LAT_DIVS, SPHERE_LON_DIVS),
        PrimitiveKind::Cube => TriangleMesh::cuboid(Vec3::splat(-0.5), Vec3::splat(0.5)),
        PrimitiveKind::Cone => build_cone(CONE_SEGMENTS),
    }
}

/// Primitive stretched to `size` and resting on z = 0.
pub fn scaled(kind: PrimitiveKind, size: [f32; 3]) -> TriangleMesh {
    let scale = Vec3::from(size).abs();
    let mut mesh = primitive(kind);
    for position in &mut mesh.positions {
        let p = (Vec3::from(*position) + Vec3::new(0.0, 0.0, 0.5)) * scale;
        *position = p.into();
    }
    mesh
}

fn build_sphere(lat_divisions: u32, lon_divisions: u32) -> TriangleMesh {
    let lat_steps = lat_divisions.max(3);
    let lon_steps = lon_divisions.max(6);
    let mut positions = Vec::with_capacity(((lat_steps + 1) * (lon_steps + 1)) as usize);
    let mut indices = Vec::with_capacity((lat_steps * lon_steps * 6) as usize);

    for lat in 0..=lat_steps {
        let theta = lat as f32 / lat_steps as f32 * PI;
        let (sin_theta, cos_theta) = theta.sin_cos();
        for lon in 0..=lon_steps {
            let phi = lon as f32 / lon_steps as f32 * PI * 2.0;
            let (sin_phi, cos_phi) = phi.sin_cos();
            positions.push([
                sin_theta * cos_phi * 0.5,
                sin_theta * sin_phi * 0.5,
                cos_theta * 0.5,
            ]);
        }
    }

    let ring = lon_steps + 1;
    for lat in 0..lat_steps {
        for lon in 0..lon_steps {
            let current = lat * ring + lon;
            let next = current + ring;
            indices.extend_from_slice(&[current, next, current + 1]);
            indices.extend_from_slice(&[current + 1, next, next + 1]);
        }
    }

    TriangleMesh::new(positions, indices)
}

fn build_cone(segments: u32) -> TriangleMesh {
    let ring = segments.max(3);
    let mut positions = Vec::with_capacity((ring + 2) as usize);
    let mut indices = Vec::with_capacity((ring * 6) as usize);

    positions.push([0.0, 0.0, 0.5]);
    for i in 0..ring {
        let angle = i as f32 / ring as f32 * PI * 2.0;
        positions.push([angle.cos() * 0.5, angle.sin() * 0.5, -0.5]);
    }
    let base_center = positions.len() as u32;
    positions.push([0.0, 0.0, -0.5]);

    for i in 0..ring {
        let current = 1 + i;
        let next = 1 + (i + 1) % ring;
        indices.extend_from_slice(&[0, current, next]);
        indices.extend_from_slice(&[base_center, next, current]);
    }

    TriangleMesh::new(positions, indices)
}
