// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Procedural meshes for the demo scene.

use glam::Vec3;
use lumen_sdk::prelude::{MeshData, Vertex};
use std::f32::consts::PI;

/// An axis-aligned cube of side `size` centered at the origin, 4 vertices per face.
pub fn cube(size: f32) -> MeshData {
    let half = size / 2.0;
    // (normal, u axis, v axis) per face.
    let faces = [
        (Vec3::Z, Vec3::NEG_X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::X, Vec3::Y),
        (Vec3::X, Vec3::Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::NEG_Z),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let base = vertices.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (-1.0, 1.0), (1.0, 1.0), (1.0, -1.0)] {
            let position = (normal + u * su + v * sv) * half;
            let uv = [(su + 1.0) / 2.0, (1.0 - sv) / 2.0];
            vertices.push(Vertex::new(position.to_array(), uv, normal.to_array()));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    MeshData::new("cube", vertices, indices)
}

/// A UV sphere of `radius` with `sectors` slices around and `stacks` from pole to pole.
pub fn sphere(radius: f32, sectors: u32, stacks: u32) -> MeshData {
    let mut vertices = Vec::with_capacity(((sectors + 1) * (stacks + 1)) as usize);
    for stack in 0..=stacks {
        let phi = PI * stack as f32 / stacks as f32;
        let ring = radius * phi.sin();
        let y = radius * phi.cos();
        for sector in 0..=sectors {
            let theta = 2.0 * PI * sector as f32 / sectors as f32;
            let position = Vec3::new(ring * theta.cos(), y, ring * theta.sin());
            vertices.push(Vertex::new(
                position.to_array(),
                [
                    sector as f32 / sectors as f32,
                    stack as f32 / stacks as f32,
                ],
                (position / radius).to_array(),
            ));
        }
    }

    let mut indices = Vec::with_capacity((sectors * stacks * 6) as usize);
    for stack in 0..stacks {
        for sector in 0..sectors {
            let current = stack * (sectors + 1) + sector;
            let next = current + sectors + 1;
            // The pole rows collapse to a point; skip their degenerate halves.
            if stack != 0 {
                indices.extend_from_slice(&[current, current + 1, next]);
            }
            if stack != stacks - 1 {
                indices.extend_from_slice(&[current + 1, next + 1, next]);
            }
        }
    }
    MeshData::new("sphere", vertices, indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_normals_point_away_from_center() {
        let mesh = cube(1.0);
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.indices.len(), 36);
        for vertex in &mesh.vertices {
            let position = Vec3::from(vertex.position);
            let normal = Vec3::from(vertex.normal);
            assert!((position.dot(normal) - 0.5).abs() < 1e-6);
            assert!(position.abs().max_element() <= 0.5 + 1e-6);
        }
    }

    #[test]
    fn test_sphere_vertices_lie_on_the_surface() {
        let mesh = sphere(2.0, 16, 8);
        assert_eq!(mesh.vertices.len(), 17 * 9);
        assert_eq!(mesh.indices.len() % 3, 0);
        assert!(mesh
            .indices
            .iter()
            .all(|&i| (i as usize) < mesh.vertices.len()));
        for vertex in &mesh.vertices {
            assert!((Vec3::from(vertex.position).length() - 2.0).abs() < 1e-4);
        }
    }
}
