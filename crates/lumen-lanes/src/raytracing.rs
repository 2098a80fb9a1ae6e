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

//! The probe-gather raytracing pipeline and its shader tables.
//!
//! A shader table holds three records, each a 32-byte shader identifier followed by
//! the record's local root arguments:
//!
//! ```text
//! offset   0  ray generation  [id | scene/output table | per-frame]
//! offset 128  miss            [id]
//! offset 256  hit group       [id | material | per-frame | per-pass | shadow map | vertices]
//! ```
//!
//! Every record sits on a 64-byte table boundary, so all three share one 128-byte
//! stride. Tables are written per frame slot because the arguments point into that
//! slot's constant regions.

use crate::LaneError;
use bytemuck::{Pod, Zeroable};
use lumen_core::renderer::{
    shader_record_size, DescriptorRange, DescriptorRangeKind, DispatchRaysDesc, GpuDevice,
    PipelineId, RaytracingExport, RaytracingPipelineDescriptor, ResourceError, RootLayout,
    RootParameter, ShaderBlobProvider, ShaderIdentifier, ShaderTableRange, ShaderVisibility,
    SHADER_IDENTIFIER_SIZE, SHADER_TABLE_ALIGNMENT,
};
use lumen_core::MappedArena;
use std::sync::Arc;

/// Ray-generation shader export.
pub const RAY_GENERATION_EXPORT: &str = "RayGen";
/// Miss shader export.
pub const MISS_EXPORT: &str = "Miss";
/// Closest-hit shader export.
pub const CLOSEST_HIT_EXPORT: &str = "ClosestHit";
/// Hit group wrapping the closest-hit shader.
pub const HIT_GROUP_EXPORT: &str = "HitGroup";

/// Local argument slots of the ray-generation record.
pub mod ray_generation_args {
    /// Table: scene BVH, irradiance output, visibility output.
    pub const SCENE_TABLE: usize = 0;
    /// Per-frame constants.
    pub const PER_FRAME: usize = 1;
    /// Number of arguments.
    pub const COUNT: usize = 2;
}

/// Local argument slots of the hit-group record.
pub mod hit_group_args {
    /// Material palette.
    pub const MATERIAL: usize = 0;
    /// Per-frame constants.
    pub const PER_FRAME: usize = 1;
    /// Per-pass constants, starting at the shadow pass.
    pub const PER_PASS: usize = 2;
    /// Shadow map table.
    pub const SHADOW_MAP: usize = 3;
    /// Raw vertices of the hit mesh.
    pub const VERTICES: usize = 4;
    /// Number of arguments.
    pub const COUNT: usize = 5;
}

const MAX_LOCAL_ARGUMENTS: usize = 8;

/// Slot of each record in a [`ShaderTable`].
const RAY_GENERATION_SLOT: usize = 0;
const MISS_SLOT: usize = 1;
const HIT_GROUP_SLOT: usize = 2;
const RECORD_COUNT: usize = 3;

/// One shader table record as the GPU reads it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ShaderRecord {
    /// The export's identifier.
    pub identifier: [u8; SHADER_IDENTIFIER_SIZE],
    /// Local root arguments: constant-buffer addresses or first descriptor indices.
    pub arguments: [u64; MAX_LOCAL_ARGUMENTS],
}

impl ShaderRecord {
    /// Builds a record for `identifier` carrying `arguments`.
    pub fn new(identifier: ShaderIdentifier, arguments: &[u64]) -> Result<Self, ResourceError> {
        if arguments.len() > MAX_LOCAL_ARGUMENTS {
            return Err(ResourceError::OutOfBounds);
        }
        let mut record = Self::zeroed();
        record.identifier = identifier.0;
        record.arguments[..arguments.len()].copy_from_slice(arguments);
        Ok(record)
    }
}

fn single_table(kind: DescriptorRangeKind, base_register: u32) -> DescriptorRange {
    DescriptorRange {
        kind,
        base_register,
        space: 0,
        count: 1,
    }
}

fn constant_buffer(register: u32) -> RootParameter {
    RootParameter::ConstantBuffer {
        register,
        space: 0,
        visibility: ShaderVisibility::All,
    }
}

/// Arguments of the ray-generation record.
pub fn ray_generation_layout() -> RootLayout {
    RootLayout {
        parameters: vec![
            RootParameter::DescriptorTable {
                ranges: vec![
                    single_table(DescriptorRangeKind::Srv, 0),
                    single_table(DescriptorRangeKind::Uav, 0),
                    single_table(DescriptorRangeKind::Uav, 1),
                ],
                visibility: ShaderVisibility::All,
            },
            constant_buffer(0),
        ],
        ..Default::default()
    }
}

/// Arguments of the hit-group record.
pub fn hit_group_layout() -> RootLayout {
    RootLayout {
        parameters: vec![
            constant_buffer(0),
            constant_buffer(1),
            constant_buffer(2),
            RootParameter::DescriptorTable {
                ranges: vec![single_table(DescriptorRangeKind::Srv, 0)],
                visibility: ShaderVisibility::All,
            },
            RootParameter::DescriptorTable {
                ranges: vec![single_table(DescriptorRangeKind::Srv, 1)],
                visibility: ShaderVisibility::All,
            },
        ],
        ..Default::default()
    }
}

/// The raytracing state object together with its export identifiers.
#[derive(Debug, Clone)]
pub struct RaytracingPipeline {
    id: PipelineId,
    ray_generation: ShaderIdentifier,
    miss: ShaderIdentifier,
    hit_group: ShaderIdentifier,
}

impl RaytracingPipeline {
    /// Creates the gather pipeline and fetches its identifiers.
    pub fn create(
        device: &dyn GpuDevice,
        shaders: &dyn ShaderBlobProvider,
    ) -> Result<Self, LaneError> {
        let descriptor = RaytracingPipelineDescriptor {
            label: Some("probe gather pipeline".into()),
            global_root_layout: RootLayout::default(),
            ray_generation_local_layout: ray_generation_layout(),
            hit_group_local_layout: hit_group_layout(),
            ray_generation: RaytracingExport {
                export: RAY_GENERATION_EXPORT.to_string(),
                blob: shaders.load(RAY_GENERATION_EXPORT)?,
            },
            miss: RaytracingExport {
                export: MISS_EXPORT.to_string(),
                blob: shaders.load(MISS_EXPORT)?,
            },
            closest_hit: RaytracingExport {
                export: CLOSEST_HIT_EXPORT.to_string(),
                blob: shaders.load(CLOSEST_HIT_EXPORT)?,
            },
            hit_group: HIT_GROUP_EXPORT.to_string(),
            // RGB radiance plus hit distance.
            max_payload_size: 16,
            max_attribute_size: 8,
            max_recursion_depth: 2,
        };
        let id = device.create_raytracing_pipeline(&descriptor)?;

        let pipeline = Self {
            id,
            ray_generation: device.shader_identifier(id, RAY_GENERATION_EXPORT)?,
            miss: device.shader_identifier(id, MISS_EXPORT)?,
            hit_group: device.shader_identifier(id, HIT_GROUP_EXPORT)?,
        };
        log::info!("Raytracing pipeline created ({id:?})");
        Ok(pipeline)
    }

    /// The device pipeline.
    pub fn id(&self) -> PipelineId {
        self.id
    }

    /// Destroys the state object.
    pub fn destroy(self, device: &dyn GpuDevice) -> Result<(), ResourceError> {
        device.destroy_pipeline(self.id)
    }
}

/// Size of one shader table.
pub const SHADER_TABLE_SIZE: u64 = 384;

/// The three records of one frame slot.
#[derive(Debug)]
pub struct ShaderTable {
    records: MappedArena<ShaderRecord>,
}

impl ShaderTable {
    /// Allocates a table in an upload buffer.
    pub fn new(device: Arc<dyn GpuDevice>) -> Result<Self, ResourceError> {
        let records = MappedArena::new(
            device,
            "shader table",
            SHADER_TABLE_SIZE,
            SHADER_TABLE_ALIGNMENT,
        )?;
        debug_assert!(records.capacity() >= RECORD_COUNT);
        Ok(Self { records })
    }

    /// Distance between records.
    pub fn stride(&self) -> u64 {
        self.records.stride()
    }

    /// Rewrites all three records and returns the launch description.
    pub fn write(
        &self,
        pipeline: &RaytracingPipeline,
        ray_generation_arguments: &[u64; ray_generation_args::COUNT],
        hit_group_arguments: &[u64; hit_group_args::COUNT],
    ) -> Result<DispatchRaysDesc, ResourceError> {
        let ray_generation = self.records.write(
            RAY_GENERATION_SLOT,
            &ShaderRecord::new(pipeline.ray_generation, ray_generation_arguments)?,
        )?;
        let miss = self
            .records
            .write(MISS_SLOT, &ShaderRecord::new(pipeline.miss, &[])?)?;
        let hit_group = self.records.write(
            HIT_GROUP_SLOT,
            &ShaderRecord::new(pipeline.hit_group, hit_group_arguments)?,
        )?;

        let range = |address, argument_count| {
            let size = shader_record_size(argument_count);
            ShaderTableRange {
                address,
                size,
                stride: size,
            }
        };
        Ok(DispatchRaysDesc {
            ray_generation: range(ray_generation, ray_generation_args::COUNT),
            miss: range(miss, 0),
            hit_group: range(hit_group, hit_group_args::COUNT),
            width: 1,
            height: 1,
            depth: 1,
        })
    }

    /// Reads back a record, for diagnostics.
    pub fn record(&self, slot: usize) -> Result<ShaderRecord, ResourceError> {
        self.records.read(slot)
    }

    /// Releases the upload buffer.
    pub fn destroy(self) -> Result<(), ResourceError> {
        self.records.destroy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::memory::ArenaLayout;

    #[test]
    fn test_shader_record_is_96_bytes() {
        assert_eq!(std::mem::size_of::<ShaderRecord>(), 96);
    }

    #[test]
    fn test_table_records_share_one_aligned_stride() {
        let layout = ArenaLayout::new(
            std::mem::size_of::<ShaderRecord>() as u64,
            SHADER_TABLE_SIZE,
            SHADER_TABLE_ALIGNMENT,
        );
        assert_eq!(layout.stride, 128);
        assert_eq!(layout.capacity, RECORD_COUNT);
        for slot in 0..RECORD_COUNT {
            assert_eq!(layout.offset(slot).unwrap() % SHADER_TABLE_ALIGNMENT, 0);
        }
    }

    #[test]
    fn test_record_sizes_fit_their_arguments() {
        assert_eq!(
            ray_generation_layout().parameters.len(),
            ray_generation_args::COUNT
        );
        assert_eq!(hit_group_layout().parameters.len(), hit_group_args::COUNT);
        assert_eq!(shader_record_size(ray_generation_args::COUNT), 64);
        assert_eq!(shader_record_size(hit_group_args::COUNT), 96);
        assert!(shader_record_size(hit_group_args::COUNT) <= 128);
    }

    #[test]
    fn test_record_rejects_too_many_arguments() {
        let identifier = ShaderIdentifier([7; SHADER_IDENTIFIER_SIZE]);
        assert!(ShaderRecord::new(identifier, &[0; 9]).is_err());
        let record = ShaderRecord::new(identifier, &[1, 2]).unwrap();
        assert_eq!(record.arguments[..3], [1, 2, 0]);
        assert_eq!(record.identifier, [7; SHADER_IDENTIFIER_SIZE]);
    }
}
