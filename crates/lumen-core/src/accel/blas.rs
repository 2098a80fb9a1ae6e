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

use crate::renderer::{
    AccelerationStructureInputs, BufferDescriptor, BufferId, BuildAccelerationStructureDesc,
    BuildFlags, Command, CommandList, GpuAddress, GpuDevice, HeapKind, ResourceBarrier,
    ResourceError, ResourceState,
};
use crate::staging::GpuMesh;
use std::borrow::Cow;

/// Lifecycle of a bottom-level structure. Building is one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlasState {
    /// Memory allocated, nothing built.
    Uninitialized,
    /// Built; immutable from now on.
    Built,
}

/// A spatial index over one static mesh.
///
/// Transforms live on the top-level instances, so the structure never needs a refit.
#[derive(Debug)]
pub struct BottomLevelStructure {
    label: String,
    inputs: AccelerationStructureInputs,
    result: BufferId,
    scratch: BufferId,
    address: GpuAddress,
    scratch_address: GpuAddress,
    state: BlasState,
}

impl BottomLevelStructure {
    pub(crate) fn new(device: &dyn GpuDevice, mesh: &GpuMesh) -> Result<Self, ResourceError> {
        let inputs = AccelerationStructureInputs::BottomLevel {
            geometries: vec![mesh.triangle_geometry(device)?],
            flags: BuildFlags::default(),
        };
        let info = device.acceleration_structure_prebuild_info(&inputs)?;

        let result = device.create_buffer(&BufferDescriptor {
            label: Some(Cow::Owned(format!("{} BLAS", mesh.label()))),
            size: info.result_size,
            heap: HeapKind::Default,
            initial_state: ResourceState::RaytracingAccelerationStructure,
            allow_unordered_access: true,
        })?;
        let scratch = device.create_buffer(&BufferDescriptor {
            label: Some(Cow::Owned(format!("{} BLAS scratch", mesh.label()))),
            size: info.scratch_size.max(1),
            heap: HeapKind::Default,
            initial_state: ResourceState::UnorderedAccess,
            allow_unordered_access: true,
        })?;

        Ok(Self {
            label: mesh.label().to_string(),
            inputs,
            result,
            scratch,
            address: device.buffer_address(result)?,
            scratch_address: device.buffer_address(scratch)?,
            state: BlasState::Uninitialized,
        })
    }

    /// Records the build and the UAV barrier that orders it before any reader.
    pub(crate) fn record_build(&self, list: &mut CommandList) {
        list.record(Command::BuildAccelerationStructure(
            BuildAccelerationStructureDesc {
                inputs: self.inputs.clone(),
                dest: self.address,
                source: None,
                scratch: self.scratch_address,
            },
        ));
        list.barrier(&[ResourceBarrier::uav(self.result)]);
    }

    pub(crate) fn mark_built(&mut self) {
        self.state = BlasState::Built;
    }

    /// Debug label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// GPU address referenced by top-level instances.
    pub fn address(&self) -> GpuAddress {
        self.address
    }

    /// The current lifecycle state.
    pub fn state(&self) -> BlasState {
        self.state
    }

    /// Whether the structure has been built.
    pub fn is_built(&self) -> bool {
        self.state == BlasState::Built
    }

    pub(crate) fn destroy(&self, device: &dyn GpuDevice) -> Result<(), ResourceError> {
        device.destroy_buffer(self.scratch)?;
        device.destroy_buffer(self.result)
    }
}
