use bevy::{
    prelude::*,
    render::{
        mesh::{Indices, PrimitiveTopology},
        render_asset::RenderAssetUsages,
    },
};

use crate::{oct_coords::decode, GridMode};

/// Sphere (or dome) tessellated along the same octahedral grid the snapshots
/// are taken on: `(frames + 1)²` vertices, uv spanning `[0, 1]²`.
///
/// Quads whose lower left corner has x and y of the same sign are split along
/// one diagonal, the rest along the other, so every triangle edge follows the
/// octahedron's folds. Hemispherical grids are rotated 45° and use the
/// opposite split.
pub fn build_octahedron(frames: u32, radius: f32, mode: GridMode) -> Mesh {
    let frames = frames.max(1);
    let verts = frames + 1;

    let mut positions = Vec::with_capacity((verts * verts) as usize);
    let mut normals = Vec::with_capacity(positions.capacity());
    let mut uvs = Vec::with_capacity(positions.capacity());
    for y in 0..verts {
        for x in 0..verts {
            let uv = Vec2::new(x as f32, y as f32) / frames as f32;
            let normal = decode(uv * 2.0 - 1.0, mode);
            positions.push((normal * radius).to_array());
            normals.push(normal.to_array());
            uvs.push(uv.to_array());
        }
    }

    let mut indices = Vec::with_capacity((frames * frames * 6) as usize);
    for y in 0..frames {
        for x in 0..frames {
            let v0 = x + y * verts;
            let v1 = v0 + verts;
            let v2 = v0 + 1;
            let v3 = v0 + 1 + verts;

            let signed = Vec2::from(uvs[v0 as usize]) * 2.0 - 1.0;
            let same_sign = (signed.x >= 0.0) == (signed.y >= 0.0);
            if same_sign != mode.is_hemisphere() {
                indices.extend([v0, v1, v2, v2, v1, v3]);
            } else {
                indices.extend([v2, v0, v3, v3, v0, v1]);
            }
        }
    }

    Mesh::new(PrimitiveTopology::TriangleList, RenderAssetUsages::default())
        .with_inserted_attribute(Mesh::ATTRIBUTE_POSITION, positions)
        .with_inserted_attribute(Mesh::ATTRIBUTE_NORMAL, normals)
        .with_inserted_attribute(Mesh::ATTRIBUTE_UV_0, uvs)
        .with_inserted_indices(Indices::U32(indices))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indices(mesh: &Mesh) -> Vec<usize> {
        mesh.indices().unwrap().iter().collect()
    }

    #[test]
    fn counts() {
        for frames in [2, 8, 12] {
            let mesh = build_octahedron(frames, 1.0, GridMode::Spherical);
            let verts = ((frames + 1) * (frames + 1)) as usize;
            assert_eq!(mesh.count_vertices(), verts);
            assert_eq!(indices(&mesh).len(), (frames * frames * 6) as usize);
            assert!(indices(&mesh).iter().all(|i| *i < verts));
        }
    }

    #[test]
    fn vertices_on_sphere() {
        let mesh = build_octahedron(6, 2.5, GridMode::Hemispherical);
        let positions = mesh
            .attribute(Mesh::ATTRIBUTE_POSITION)
            .and_then(|attr| attr.as_float3())
            .unwrap();
        for p in positions {
            let p = Vec3::from(*p);
            assert!((p.length() - 2.5).abs() < 1e-4);
            assert!(p.y >= -1e-5);
        }
    }

    #[test]
    fn diagonal_follows_quadrant() {
        let full = indices(&build_octahedron(2, 1.0, GridMode::Spherical));
        // lower left quad: both signs negative
        assert_eq!(full[0..6], [0, 3, 1, 1, 3, 4]);
        // lower right quad: x is zero (positive), y negative
        assert_eq!(full[6..12], [2, 1, 5, 5, 1, 4]);

        let half = indices(&build_octahedron(2, 1.0, GridMode::Hemispherical));
        assert_eq!(half[0..6], [1, 0, 4, 4, 0, 3]);
        assert_eq!(half[6..12], [1, 4, 2, 2, 4, 5]);
    }
}
