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

//! Acceleration-structure build inputs and ray dispatch descriptions.

use super::resource::GpuAddress;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Instance mask that makes an instance visible to every ray.
pub const INSTANCE_MASK_ALL: u8 = 0xFF;

/// One entry of a top-level structure's instance array, laid out exactly as the GPU
/// consumes it (64 bytes).
///
/// The transform is a row-major 3×4 matrix: the first three rows of the instance's
/// object-to-world matrix. Because [`Mat4`] stores columns, writing a matrix into this
/// layout is a transpose followed by dropping the last row.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RaytracingInstanceDesc {
    /// Row-major 3×4 object-to-world transform.
    pub transform: [[f32; 4]; 3],
    /// Instance id in the low 24 bits, instance mask in the high 8 bits.
    pub instance_id_and_mask: u32,
    /// Hit-group contribution in the low 24 bits, instance flags in the high 8 bits.
    pub hit_group_and_flags: u32,
    /// Address of the bottom-level structure this instance references.
    pub acceleration_structure: u64,
}

impl RaytracingInstanceDesc {
    /// Builds an instance record for `blas` placed by `transform`.
    pub fn new(instance_id: u32, transform: &Mat4, blas: GpuAddress) -> Self {
        Self {
            transform: Self::rows_from_matrix(transform),
            instance_id_and_mask: (instance_id & 0x00FF_FFFF)
                | ((INSTANCE_MASK_ALL as u32) << 24),
            hit_group_and_flags: 0,
            acceleration_structure: blas.0,
        }
    }

    /// Converts a column-major matrix into the row-major 3×4 instance layout.
    pub fn rows_from_matrix(transform: &Mat4) -> [[f32; 4]; 3] {
        let transposed = transform.transpose();
        [
            transposed.x_axis.to_array(),
            transposed.y_axis.to_array(),
            transposed.z_axis.to_array(),
        ]
    }

    /// The instance id (low 24 bits).
    pub fn instance_id(&self) -> u32 {
        self.instance_id_and_mask & 0x00FF_FFFF
    }

    /// The instance mask (high 8 bits).
    pub fn mask(&self) -> u8 {
        (self.instance_id_and_mask >> 24) as u8
    }

    /// Reconstructs the full object-to-world matrix.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_cols(
            Vec4::from_array(self.transform[0]),
            Vec4::from_array(self.transform[1]),
            Vec4::from_array(self.transform[2]),
            Vec4::W,
        )
        .transpose()
    }
}

/// Triangle geometry consumed by a bottom-level build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleGeometry {
    /// Address of the first vertex. Positions are three `f32` at the start of each vertex.
    pub vertex_buffer: GpuAddress,
    /// Size of one vertex in bytes.
    pub vertex_stride: u32,
    /// Number of vertices.
    pub vertex_count: u32,
    /// Address of the `u32` index data.
    pub index_buffer: GpuAddress,
    /// Number of indices.
    pub index_count: u32,
    /// Whether any-hit shaders may be skipped.
    pub opaque: bool,
}

/// Build flags shared by both structure levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildFlags {
    /// The structure may later be refitted in place.
    pub allow_update: bool,
    /// This build is a refit of `source` rather than a full build.
    pub perform_update: bool,
}

/// What an acceleration-structure build consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum AccelerationStructureInputs {
    /// A spatial index over one mesh's triangles.
    BottomLevel {
        /// The geometries to index.
        geometries: Vec<TriangleGeometry>,
        /// Build flags.
        flags: BuildFlags,
    },
    /// A spatial index over transformed instances of bottom-level structures.
    TopLevel {
        /// Address of an array of [`RaytracingInstanceDesc`].
        instance_descs: GpuAddress,
        /// Number of instances in the array.
        instance_count: u32,
        /// Build flags.
        flags: BuildFlags,
    },
}

impl AccelerationStructureInputs {
    /// The flags of either level.
    pub fn flags(&self) -> BuildFlags {
        match self {
            AccelerationStructureInputs::BottomLevel { flags, .. }
            | AccelerationStructureInputs::TopLevel { flags, .. } => *flags,
        }
    }
}

/// Memory requirements reported by the device for a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrebuildInfo {
    /// Upper bound of the result buffer size.
    pub result_size: u64,
    /// Scratch memory for a full build.
    pub scratch_size: u64,
    /// Scratch memory for a refit.
    pub update_scratch_size: u64,
}

/// A recorded build or refit.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildAccelerationStructureDesc {
    /// What to build.
    pub inputs: AccelerationStructureInputs,
    /// Where the result goes.
    pub dest: GpuAddress,
    /// The previous build, when refitting. Equal to `dest` for an in-place refit.
    pub source: Option<GpuAddress>,
    /// Scratch memory.
    pub scratch: GpuAddress,
}

/// A range of a shader table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShaderTableRange {
    /// Start address of the range.
    pub address: GpuAddress,
    /// Size of the range in bytes.
    pub size: u64,
    /// Distance between records in bytes.
    pub stride: u64,
}

/// A recorded ray launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchRaysDesc {
    /// The ray-generation record.
    pub ray_generation: ShaderTableRange,
    /// The miss records.
    pub miss: ShaderTableRange,
    /// The hit-group records.
    pub hit_group: ShaderTableRange,
    /// Launch width.
    pub width: u32,
    /// Launch height.
    pub height: u32,
    /// Launch depth.
    pub depth: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::{Quat, Vec3};

    #[test]
    fn test_instance_desc_is_64_bytes() {
        assert_eq!(std::mem::size_of::<RaytracingInstanceDesc>(), 64);
    }

    #[test]
    fn test_rows_are_transpose_of_column_major_matrix() {
        let m = Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 1.0, 0.5),
            Quat::from_rotation_y(0.7),
            Vec3::new(1.0, -2.0, 3.0),
        );
        let rows = RaytracingInstanceDesc::rows_from_matrix(&m);
        let transposed = m.transpose().to_cols_array();
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        assert_eq!(flat.as_slice(), &transposed[..12]);
        // Translation ends up in the last column of each row.
        assert_relative_eq!(rows[0][3], 1.0);
        assert_relative_eq!(rows[1][3], -2.0);
        assert_relative_eq!(rows[2][3], 3.0);
    }

    #[test]
    fn test_matrix_reconstruction() {
        let m = Mat4::from_translation(Vec3::new(0.0, 4.0, -1.0))
            * Mat4::from_rotation_x(0.3);
        let desc = RaytracingInstanceDesc::new(5, &m, GpuAddress(0x1000));
        assert!(desc.matrix().abs_diff_eq(m, 1e-6));
        assert_eq!(desc.instance_id(), 5);
        assert_eq!(desc.mask(), INSTANCE_MASK_ALL);
        assert_eq!(desc.acceleration_structure, 0x1000);
    }
}
