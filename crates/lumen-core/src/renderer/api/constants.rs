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

//! GPU-visible data layouts and the fixed limits of the frame budget.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Alignment of every constant-buffer view.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;
/// Capacity of one constant region.
pub const CONSTANT_REGION_SIZE: u64 = 64 * 1024;
/// Number of per-object slots one frame can fill.
pub const MAX_DRAWS_PER_FRAME: usize = (CONSTANT_REGION_SIZE / CONSTANT_BUFFER_ALIGNMENT) as usize;
/// Number of material colors.
pub const MAX_MATERIAL_COUNT: usize = 8;
/// Number of probe positions carried in the per-frame constants.
pub const MAX_PROBE_COUNT: usize = 350;
/// Irradiance rays traced per probe; the irradiance texture is `MAX_PROBE_COUNT` wide
/// and this many texels high.
pub const IRRADIANCE_RAYS_PER_PROBE: u32 = 16;
/// Visibility rays traced per probe; the visibility texture is `MAX_PROBE_COUNT` wide
/// and this many texels high.
pub const VISIBILITY_RAYS_PER_PROBE: u32 = 32;
/// Distance recorded for probe rays that escape the scene.
pub const PROBE_RAY_MAX_DISTANCE: f32 = 100.0;

/// Rounds `size` up to the constant-buffer alignment.
pub const fn align_to_constant_buffer(size: u64) -> u64 {
    (size + CONSTANT_BUFFER_ALIGNMENT - 1) & !(CONSTANT_BUFFER_ALIGNMENT - 1)
}

/// A mesh vertex: position, texture coordinate, normal.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position.
    pub position: [f32; 3],
    /// Texture coordinate.
    pub uv: [f32; 2],
    /// Object-space normal.
    pub normal: [f32; 3],
}

impl Vertex {
    /// Creates a vertex.
    pub const fn new(position: [f32; 3], uv: [f32; 2], normal: [f32; 3]) -> Self {
        Self {
            position,
            uv,
            normal,
        }
    }
}

/// Constants written once per draw call.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PerObjectConstants {
    /// Object-to-world matrix.
    pub world: Mat4,
    /// Base color.
    pub color: Vec4,
    /// Inverse-transpose of `world` for normals.
    pub normal_matrix: Mat4,
    /// Non-zero when the object receives lighting.
    pub lit: u32,
    /// Padding.
    pub _pad: [u32; 3],
}

impl PerObjectConstants {
    /// Builds the constants for an object placed by `world`.
    pub fn new(world: Mat4, color: Vec4, lit: bool) -> Self {
        Self {
            world,
            color,
            normal_matrix: world.inverse().transpose(),
            lit: lit as u32,
            _pad: [0; 3],
        }
    }
}

impl Default for PerObjectConstants {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Vec4::ONE, true)
    }
}

/// Constants written once per frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PerFrameConstants {
    /// World-to-light-clip matrix used by the shadow pass.
    pub light_matrix: Mat4,
    /// World-space probe positions; only the first `probe_count` are meaningful.
    pub probe_positions_ws: [Vec4; MAX_PROBE_COUNT],
    /// World-space direction the light travels in.
    pub light_direction_ws: Vec4,
    /// Number of valid probes.
    pub probe_count: u32,
    /// Distance between adjacent probes.
    pub probe_spacing: f32,
    /// Light intensity.
    pub light_intensity: f32,
    /// Padding.
    pub _pad: u32,
}

impl Default for PerFrameConstants {
    fn default() -> Self {
        Self {
            light_matrix: Mat4::IDENTITY,
            probe_positions_ws: [Vec4::ZERO; MAX_PROBE_COUNT],
            light_direction_ws: Vec4::new(0.0, -1.0, 0.0, 0.0),
            probe_count: 0,
            probe_spacing: 1.0,
            light_intensity: 1.0,
            _pad: 0,
        }
    }
}

/// Constants written once per pass.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PerPassConstants {
    /// World-to-view matrix.
    pub view: Mat4,
    /// View-to-clip matrix.
    pub projection: Mat4,
    /// World-space camera position.
    pub camera_position_ws: Vec4,
}

impl Default for PerPassConstants {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            camera_position_ws: Vec4::W,
        }
    }
}

/// Material palette.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    /// One color per material index.
    pub colors: [Vec4; MAX_MATERIAL_COUNT],
}

impl Default for MaterialConstants {
    fn default() -> Self {
        Self {
            colors: [Vec4::ONE; MAX_MATERIAL_COUNT],
        }
    }
}

/// Per-pass constant slots. The screen pass binds none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassIndex {
    /// Rendered from the light.
    Shadow = 0,
    /// Rendered from the camera.
    Color = 1,
}

impl PassIndex {
    /// Number of passes that own per-pass constants.
    pub const COUNT: usize = 2;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(std::mem::size_of::<PerObjectConstants>(), 160);
        assert_eq!(std::mem::size_of::<PerPassConstants>(), 144);
        assert_eq!(std::mem::size_of::<MaterialConstants>(), 128);
        assert!(std::mem::size_of::<PerObjectConstants>() as u64 <= CONSTANT_BUFFER_ALIGNMENT);
    }

    #[test]
    fn test_max_draws_per_frame_is_256() {
        assert_eq!(MAX_DRAWS_PER_FRAME, 256);
    }

    #[test]
    fn test_align_to_constant_buffer() {
        assert_eq!(align_to_constant_buffer(1), 256);
        assert_eq!(align_to_constant_buffer(256), 256);
        assert_eq!(align_to_constant_buffer(257), 512);
        let per_frame = std::mem::size_of::<PerFrameConstants>() as u64;
        assert_eq!(align_to_constant_buffer(per_frame) % 256, 0);
    }

    #[test]
    fn test_per_object_normal_matrix() {
        let world = Mat4::from_scale(glam::Vec3::new(2.0, 2.0, 2.0));
        let constants = PerObjectConstants::new(world, Vec4::ONE, false);
        assert_eq!(constants.lit, 0);
        assert!(constants
            .normal_matrix
            .abs_diff_eq(Mat4::from_scale(glam::Vec3::splat(0.5)), 1e-6));
    }
}
