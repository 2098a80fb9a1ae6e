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


//! Resource tables of the wgpu device.

use super::bindings::BindingPlan;
use crate::software::decode_address;
use lumen_core::renderer::{
    BufferId, CommandAllocatorId, DescriptorHeapId, GpuAddress, HeapKind, PipelineId, QueueKind,
    ResourceError, ResourceRef, ResourceState, ResourceView, RootLayout, SwapChainId,
    TextureFormat, TextureId,
};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug)]
pub(crate) struct BufferEntry {
    pub label: String,
    pub buffer: Arc<wgpu::Buffer>,
    /// The size the buffer was created with.
    pub size: u64,
    pub heap: HeapKind,
    pub state: ResourceState,
    /// CPU copy of an upload buffer's contents. Empty for GPU-local buffers.
    pub shadow: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct TextureEntry {
    pub label: String,
    pub texture: Arc<wgpu::Texture>,
    pub view: Arc<wgpu::TextureView>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub state: ResourceState,
    pub allow_render_target: bool,
    pub allow_depth_stencil: bool,
    pub allow_unordered_access: bool,
}

#[derive(Debug)]
pub(crate) struct PipelineEntry {
    pub label: String,
    pub root_layout: RootLayout,
    pub plan: BindingPlan,
    pub pipeline: Arc<wgpu::RenderPipeline>,
    pub group_layouts: Vec<wgpu::BindGroupLayout>,
    pub sampler_group: Arc<wgpu::BindGroup>,
    pub vertex_stride: u32,
    pub color_format: Option<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
}

#[derive(Debug)]
pub(crate) struct SwapChainEntry {
    pub buffers: Vec<TextureId>,
    pub current: usize,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub presented: u64,
}

#[derive(Debug)]
pub(crate) struct AllocatorEntry {
    pub queue: QueueKind,
    /// Serial of the last submission recorded from this allocator.
    pub last_submission: u64,
}

#[derive(Debug)]
pub(crate) enum AccelerationStructure {
    Bottom(Arc<wgpu::Blas>),
    Top {
        tlas: wgpu::Tlas,
        allow_update: bool,
        instance_count: u32,
    },
}

/// Every resource of a [`WgpuDevice`](super::WgpuDevice).
#[derive(Debug, Default)]
pub(crate) struct ResourceTables {
    pub buffers: HashMap<BufferId, BufferEntry>,
    pub textures: HashMap<TextureId, TextureEntry>,
    pub heaps: HashMap<DescriptorHeapId, Vec<Option<ResourceView>>>,
    pub pipelines: HashMap<PipelineId, PipelineEntry>,
    pub swap_chains: HashMap<SwapChainId, SwapChainEntry>,
    pub allocators: HashMap<CommandAllocatorId, AllocatorEntry>,
    /// Built acceleration structures, keyed by the address they were built at.
    pub structures: HashMap<u64, AccelerationStructure>,
}

impl ResourceTables {
    pub fn buffer(&self, id: BufferId) -> Result<&BufferEntry, ResourceError> {
        self.buffers.get(&id).ok_or(ResourceError::InvalidHandle)
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> Result<&mut BufferEntry, ResourceError> {
        self.buffers.get_mut(&id).ok_or(ResourceError::InvalidHandle)
    }

    pub fn texture(&self, id: TextureId) -> Result<&TextureEntry, ResourceError> {
        self.textures.get(&id).ok_or(ResourceError::InvalidHandle)
    }

    pub fn texture_mut(&mut self, id: TextureId) -> Result<&mut TextureEntry, ResourceError> {
        self.textures.get_mut(&id).ok_or(ResourceError::InvalidHandle)
    }

    pub fn pipeline(&self, id: PipelineId) -> Result<&PipelineEntry, ResourceError> {
        self.pipelines.get(&id).ok_or(ResourceError::InvalidHandle)
    }

    /// Resolves an address to its buffer and checks that `len` bytes fit behind it.
    pub fn resolve(&self, address: GpuAddress, len: u64) -> Result<(BufferId, u64), ResourceError> {
        let (id, offset) = decode_address(address).ok_or(ResourceError::InvalidHandle)?;
        if offset + len > self.buffer(id)?.size {
            return Err(ResourceError::OutOfBounds);
        }
        Ok((id, offset))
    }

    pub fn state(&self, resource: ResourceRef) -> Result<ResourceState, ResourceError> {
        match resource {
            ResourceRef::Buffer(id) => Ok(self.buffer(id)?.state),
            ResourceRef::Texture(id) => Ok(self.texture(id)?.state),
        }
    }

    pub fn set_state(
        &mut self,
        resource: ResourceRef,
        state: ResourceState,
    ) -> Result<(), ResourceError> {
        match resource {
            ResourceRef::Buffer(id) => self.buffer_mut(id)?.state = state,
            ResourceRef::Texture(id) => self.texture_mut(id)?.state = state,
        }
        Ok(())
    }

    pub fn label(&self, resource: ResourceRef) -> String {
        match resource {
            ResourceRef::Buffer(id) => self
                .buffers
                .get(&id)
                .map_or_else(|| format!("{id:?}"), |b| b.label.clone()),
            ResourceRef::Texture(id) => self
                .textures
                .get(&id)
                .map_or_else(|| format!("{id:?}"), |t| t.label.clone()),
        }
    }

    pub fn descriptor(
        &self,
        heap: DescriptorHeapId,
        index: u32,
    ) -> Result<Option<ResourceView>, ResourceError> {
        let slots = self.heaps.get(&heap).ok_or(ResourceError::InvalidHandle)?;
        slots
            .get(index as usize)
            .copied()
            .ok_or(ResourceError::OutOfBounds)
    }
}

/// What the device has observed while replaying and presenting.
#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    pub events: Vec<String>,
    pub validation_errors: Vec<String>,
    pub draws: u64,
    pub acceleration_structure_builds: u64,
    pub refits: u64,
}
