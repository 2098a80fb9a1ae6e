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

use super::blas::BottomLevelStructure;
use crate::memory::MappedArena;
use crate::renderer::{
    AccelerationStructureInputs, BufferDescriptor, BufferId, BuildAccelerationStructureDesc,
    BuildFlags, Command, CommandList, GpuAddress, GpuDevice, HeapKind, RaytracingInstanceDesc,
    ResourceBarrier, ResourceError, ResourceState,
};
use glam::Mat4;
use std::sync::Arc;

/// Required alignment of an instance-description array.
const INSTANCE_DESCS_ALIGNMENT: u64 = 16;

/// Lifecycle of a top-level structure.
///
/// `Uninitialized → Built → Refitting → Built → …`. The refit loop is only reachable
/// for structures created with `allow_update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlasState {
    /// Memory allocated, nothing built.
    Uninitialized,
    /// A full build or a refit has been recorded.
    Built,
    /// A refit is being recorded.
    Refitting,
}

/// A spatial index over transformed instances of bottom-level structures.
///
/// The instance count is fixed at construction. Instance records live in a persistently
/// mapped upload buffer, so updating a transform is a CPU write followed by a refit.
#[derive(Debug)]
pub struct TopLevelStructure {
    allow_update: bool,
    instance_count: u32,
    instances: MappedArena<RaytracingInstanceDesc>,
    instances_address: GpuAddress,
    result: BufferId,
    scratch: BufferId,
    address: GpuAddress,
    scratch_address: GpuAddress,
    state: TlasState,
}

impl TopLevelStructure {
    pub(crate) fn new(
        device: Arc<dyn GpuDevice>,
        allow_update: bool,
        instance_count: u32,
    ) -> Result<Self, ResourceError> {
        if instance_count == 0 {
            return Err(ResourceError::CapacityExceeded {
                what: "top-level instances",
                capacity: 0,
                requested: 0,
            });
        }
        let desc_size = std::mem::size_of::<RaytracingInstanceDesc>() as u64;
        let instances = MappedArena::new(
            device.clone(),
            "TLAS instance descriptions",
            desc_size * instance_count as u64,
            INSTANCE_DESCS_ALIGNMENT,
        )?;
        let instances_address = instances.gpu_address(0)?;

        let info =
            device.acceleration_structure_prebuild_info(&AccelerationStructureInputs::TopLevel {
                instance_descs: instances_address,
                instance_count,
                flags: BuildFlags {
                    allow_update,
                    perform_update: false,
                },
            })?;

        let scratch = device.create_buffer(&BufferDescriptor {
            label: Some("TLAS scratch".into()),
            size: info.scratch_size.max(info.update_scratch_size).max(1),
            heap: HeapKind::Default,
            initial_state: ResourceState::UnorderedAccess,
            allow_unordered_access: true,
        })?;
        let result = device.create_buffer(&BufferDescriptor {
            label: Some("TLAS".into()),
            size: info.result_size,
            heap: HeapKind::Default,
            initial_state: ResourceState::RaytracingAccelerationStructure,
            allow_unordered_access: true,
        })?;

        log::info!(
            "Top-level structure created: {instance_count} instances, allow_update={allow_update}"
        );
        Ok(Self {
            allow_update,
            instance_count,
            instances,
            instances_address,
            result,
            scratch,
            address: device.buffer_address(result)?,
            scratch_address: device.buffer_address(scratch)?,
            state: TlasState::Uninitialized,
        })
    }

    /// Points instance `instance_id` at `blas`, placed by `transform`.
    ///
    /// The transform is stored transposed, as the row-major 3×4 matrix the GPU expects.
    ///
    /// # Errors
    /// [`ResourceError::InvalidInstance`] if `instance_id >= instance_count`.
    pub fn set_instance_blas_and_transform(
        &self,
        instance_id: u32,
        blas: &BottomLevelStructure,
        transform: &Mat4,
    ) -> Result<(), ResourceError> {
        if instance_id >= self.instance_count {
            log::error!(
                "Instance {instance_id} out of range for a TLAS of {} instances",
                self.instance_count
            );
            return Err(ResourceError::InvalidInstance {
                instance_id,
                instance_count: self.instance_count,
            });
        }
        let desc = RaytracingInstanceDesc::new(instance_id, transform, blas.address());
        self.instances.write(instance_id as usize, &desc)?;
        Ok(())
    }

    /// Reads back the stored record of `instance_id`.
    pub fn instance(&self, instance_id: u32) -> Result<RaytracingInstanceDesc, ResourceError> {
        if instance_id >= self.instance_count {
            return Err(ResourceError::InvalidInstance {
                instance_id,
                instance_count: self.instance_count,
            });
        }
        self.instances.read(instance_id as usize)
    }

    fn inputs(&self, perform_update: bool) -> AccelerationStructureInputs {
        AccelerationStructureInputs::TopLevel {
            instance_descs: self.instances_address,
            instance_count: self.instance_count,
            flags: BuildFlags {
                allow_update: self.allow_update,
                perform_update,
            },
        }
    }

    /// Records a full build followed by a UAV barrier.
    pub(crate) fn record_build(&mut self, list: &mut CommandList) {
        list.record(Command::BuildAccelerationStructure(
            BuildAccelerationStructureDesc {
                inputs: self.inputs(false),
                dest: self.address,
                source: None,
                scratch: self.scratch_address,
            },
        ));
        list.barrier(&[ResourceBarrier::uav(self.result)]);
    }

    pub(crate) fn mark_built(&mut self) {
        self.state = TlasState::Built;
    }

    /// Records an in-place refit from the current instance records.
    ///
    /// The previous build is both source and destination. The trailing UAV barrier
    /// orders the refit before any later reader in the same list.
    ///
    /// # Errors
    /// * [`ResourceError::UpdateNotAllowed`] if the structure was created without
    ///   `allow_update`.
    /// * [`ResourceError::NotBuilt`] if no full build was done yet.
    pub fn record_refit(&mut self, list: &mut CommandList) -> Result<(), ResourceError> {
        if !self.allow_update {
            log::error!("RebuildTlas called on a TLAS created without AllowUpdate");
            return Err(ResourceError::UpdateNotAllowed);
        }
        if self.state == TlasState::Uninitialized {
            return Err(ResourceError::NotBuilt);
        }

        self.state = TlasState::Refitting;
        list.record(Command::BuildAccelerationStructure(
            BuildAccelerationStructureDesc {
                inputs: self.inputs(true),
                dest: self.address,
                source: Some(self.address),
                scratch: self.scratch_address,
            },
        ));
        list.barrier(&[ResourceBarrier::uav(self.result)]);
        self.state = TlasState::Built;
        Ok(())
    }

    /// Whether the structure supports refits.
    pub fn allow_update(&self) -> bool {
        self.allow_update
    }

    /// The fixed instance count.
    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    /// GPU address bound as the scene BVH.
    pub fn address(&self) -> GpuAddress {
        self.address
    }

    /// The current lifecycle state.
    pub fn state(&self) -> TlasState {
        self.state
    }

    pub(crate) fn destroy(self, device: &dyn GpuDevice) -> Result<(), ResourceError> {
        device.destroy_buffer(self.scratch)?;
        device.destroy_buffer(self.result)?;
        self.instances.destroy()
    }
}
