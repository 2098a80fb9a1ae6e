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

//! Probe grid placement and the directional light's shadow transform.

use glam::{Mat4, UVec3, Vec3, Vec4};

/// Distance from the origin the shadow camera is placed at.
const LIGHT_DISTANCE: f32 = 7.0;
/// Half-size of the shadow camera's orthographic box.
const LIGHT_HALF_EXTENT: f32 = 10.0;

/// An axis-aligned box filled with evenly spaced probes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeVolume {
    /// Center of the box.
    pub center: Vec3,
    /// Full size of the box along each axis.
    pub extents: Vec3,
    /// Distance between adjacent probes.
    pub spacing: f32,
}

impl ProbeVolume {
    /// Creates a volume. A non-positive spacing yields no probes.
    pub fn new(center: Vec3, extents: Vec3, spacing: f32) -> Self {
        Self {
            center,
            extents,
            spacing,
        }
    }

    /// Number of probes along each axis.
    pub fn counts(&self) -> UVec3 {
        if self.spacing <= 0.0 {
            return UVec3::ZERO;
        }
        let counts = (self.extents / self.spacing).floor().max(Vec3::ZERO);
        counts.as_uvec3()
    }

    /// Total number of probes.
    pub fn probe_count(&self) -> usize {
        let c = self.counts();
        (c.x * c.y * c.z) as usize
    }

    /// Flat index of the probe at grid cell `(x, y, z)`.
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        let c = self.counts();
        (x + c.x * (y + c.y * z)) as usize
    }

    /// World-space position of grid cell `(x, y, z)`.
    pub fn position(&self, x: u32, y: u32, z: u32) -> Vec3 {
        let cell = Vec3::new(x as f32, y as f32, z as f32) * self.spacing;
        self.center + cell - (self.extents - Vec3::splat(self.spacing)) * 0.5
    }

    /// Every probe position, ordered by [`index`](Self::index), with `w = 1`.
    pub fn positions(&self) -> Vec<Vec4> {
        let c = self.counts();
        let mut positions = Vec::with_capacity(self.probe_count());
        for z in 0..c.z {
            for y in 0..c.y {
                for x in 0..c.x {
                    positions.push(self.position(x, y, z).extend(1.0));
                }
            }
        }
        positions
    }
}

/// World-to-view transform of the shadow camera for a light travelling along `direction`.
pub fn light_view(direction: Vec3) -> Mat4 {
    let dir = direction.normalize_or(Vec3::NEG_Y);
    let eye = Vec3::new(-dir.x, -dir.y, dir.z) * LIGHT_DISTANCE;
    // Looking straight up or down makes the usual Y up vector degenerate.
    let up = if dir.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
    Mat4::look_at_lh(eye, Vec3::ZERO, up)
}

/// Orthographic projection of the shadow camera.
pub fn light_projection() -> Mat4 {
    Mat4::orthographic_lh(
        -LIGHT_HALF_EXTENT,
        LIGHT_HALF_EXTENT,
        -LIGHT_HALF_EXTENT,
        LIGHT_HALF_EXTENT,
        -LIGHT_HALF_EXTENT,
        LIGHT_HALF_EXTENT,
    )
}

/// World-to-light-clip transform used by the shadow pass.
pub fn light_matrix(direction: Vec3) -> Mat4 {
    light_projection() * light_view(direction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sandbox_volume() -> ProbeVolume {
        ProbeVolume::new(Vec3::new(0.02, 1.78, 0.0), Vec3::splat(5.0), 0.99)
    }

    #[test]
    fn test_sandbox_volume_has_125_probes() {
        let volume = sandbox_volume();
        assert_eq!(volume.counts(), UVec3::splat(5));
        assert_eq!(volume.probe_count(), 125);
        assert_eq!(volume.positions().len(), 125);
    }

    #[test]
    fn test_positions_follow_flat_index() {
        let volume = ProbeVolume::new(Vec3::ZERO, Vec3::new(4.0, 2.0, 3.0), 1.0);
        assert_eq!(volume.counts(), UVec3::new(4, 2, 3));
        let positions = volume.positions();
        let p = volume.position(3, 1, 2);
        assert_eq!(positions[volume.index(3, 1, 2)], p.extend(1.0));
        assert_eq!(volume.index(3, 1, 2), 3 + 4 * (1 + 2 * 2));
    }

    #[test]
    fn test_first_probe_offset() {
        let volume = sandbox_volume();
        let first = volume.position(0, 0, 0);
        assert_relative_eq!(first.x, 0.02 - 2.005, epsilon = 1e-5);
        assert_relative_eq!(first.y, 1.78 - 2.005, epsilon = 1e-5);
        let last = volume.position(4, 4, 4);
        assert_relative_eq!(last.z, 4.0 * 0.99 - 2.005, epsilon = 1e-5);
    }

    #[test]
    fn test_zero_spacing_has_no_probes() {
        let volume = ProbeVolume::new(Vec3::ZERO, Vec3::ONE, 0.0);
        assert_eq!(volume.probe_count(), 0);
        assert!(volume.positions().is_empty());
    }

    #[test]
    fn test_light_matrix_maps_origin_inside_clip_space() {
        for dir in [Vec3::new(0.3, -1.0, 0.2), Vec3::NEG_Y, Vec3::Y] {
            let clip = light_matrix(dir).project_point3(Vec3::ZERO);
            assert!(clip.is_finite(), "degenerate light matrix for {dir}");
            assert!(clip.x.abs() <= 1.0 && clip.y.abs() <= 1.0);
            assert!((0.0..=1.0).contains(&clip.z));
        }
    }
}
