//! Procedural meshes.

use crate::resources::mesh::Mesh;

/// Axis-aligned box centred on the origin, 4 vertices per face.
#[must_use]
pub fn create_box(width: f32, height: f32, depth: f32) -> Mesh {
    let (w, h, d) = (width / 2.0, height / 2.0, depth / 2.0);

    // (normal, tangent u, tangent v) per face, counter-clockwise seen from outside
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
    ];
    let half = [w, h, d];

    let mut positions = Vec::with_capacity(24);
    let mut normals = Vec::with_capacity(24);
    let mut uvs = Vec::with_capacity(24);
    for (n, u, v) in faces {
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let p: [f32; 3] = std::array::from_fn(|k| (n[k] + su * u[k] + sv * v[k]) * half[k]);
            positions.push(p);
            normals.push(n);
            uvs.push([(su + 1.0) / 2.0, (1.0 - sv) / 2.0]);
        }
    }

    let indices = (0..6u32)
        .flat_map(|face| {
            let base = face * 4;
            [base, base + 1, base + 2, base, base + 2, base + 3]
        })
        .collect();

    Mesh::new("Box", positions, indices)
        .with_normals(normals)
        .with_uvs(uvs)
}

/// Quad in the XY plane facing +Z.
#[must_use]
pub fn create_plane(width: f32, height: f32) -> Mesh {
    let (w, h) = (width / 2.0, height / 2.0);
    let positions = vec![[-w, -h, 0.0], [w, -h, 0.0], [w, h, 0.0], [-w, h, 0.0]];
    let normals = vec![[0.0, 0.0, 1.0]; 4];
    let uvs = vec![[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];

    Mesh::new("Plane", positions, vec![0, 1, 2, 0, 2, 3])
        .with_normals(normals)
        .with_uvs(uvs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_faces_point_outward() {
        let mesh = create_box(2.0, 2.0, 2.0);
        assert_eq!(mesh.vertex_count(), 24);
        assert_eq!(mesh.index_count(), 36);
        for tri in mesh.triangles() {
            let normal = (tri[1] - tri[0]).cross(tri[2] - tri[0]);
            let centre = (tri[0] + tri[1] + tri[2]) / 3.0;
            assert!(normal.dot(centre) > 0.0);
        }
    }

    #[test]
    fn plane_is_two_triangles() {
        let mesh = create_plane(1.0, 1.0);
        assert_eq!(mesh.triangles().count(), 2);
    }
}
