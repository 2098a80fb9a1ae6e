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

//! Resource tables shared by the API thread and the queue timelines.

use super::bvh::{InstanceBvh, TriangleBvh};
use lumen_core::renderer::{
    BufferId, CommandAllocatorId, DescriptorHeapId, GpuAddress, HeapKind, PipelineId, QueueKind,
    ResourceError, ResourceRef, ResourceState, ResourceView, RootLayout, ShaderIdentifier,
    SwapChainId, TextureFormat, TextureId,
};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the data if a worker panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Buffer addresses carry the buffer id in the high 32 bits (offset by one so that no
/// valid address is null) and the byte offset in the low 32 bits.
pub(crate) fn encode_address(buffer: BufferId, offset: u64) -> GpuAddress {
    GpuAddress(((buffer.0 as u64 + 1) << 32) | (offset & 0xFFFF_FFFF))
}

pub(crate) fn decode_address(address: GpuAddress) -> Option<(BufferId, u64)> {
    let high = address.0 >> 32;
    (high != 0).then(|| (BufferId(high as usize - 1), address.0 & 0xFFFF_FFFF))
}

#[derive(Debug)]
pub(crate) struct BufferEntry {
    pub label: String,
    pub heap: HeapKind,
    pub data: Vec<u8>,
    pub state: ResourceState,
}

#[derive(Debug)]
pub(crate) struct TextureEntry {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub texels: Vec<[f32; 4]>,
    pub state: ResourceState,
    pub allow_render_target: bool,
    pub allow_depth_stencil: bool,
    pub allow_unordered_access: bool,
}

#[derive(Debug)]
pub(crate) struct RaytracingExports {
    pub ray_generation: String,
    pub miss: String,
    pub hit_group: String,
    pub identifiers: HashMap<String, ShaderIdentifier>,
}

#[derive(Debug)]
pub(crate) enum PipelineEntry {
    Graphics {
        label: String,
        root_layout: RootLayout,
    },
    Raytracing {
        label: String,
        global_root_layout: RootLayout,
        ray_generation_local_layout: RootLayout,
        hit_group_local_layout: RootLayout,
        exports: RaytracingExports,
    },
}

impl PipelineEntry {
    pub fn label(&self) -> &str {
        match self {
            PipelineEntry::Graphics { label, .. } | PipelineEntry::Raytracing { label, .. } => {
                label
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct SwapChainEntry {
    pub buffers: Vec<TextureId>,
    pub current: usize,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub allow_tearing: bool,
    pub presented: u64,
}

#[derive(Debug)]
pub(crate) struct AllocatorEntry {
    pub queue: QueueKind,
    /// Lists submitted from this allocator that the timeline has not executed yet.
    pub pending: usize,
}

#[derive(Debug)]
pub(crate) enum AccelerationStructure {
    Bottom(Arc<TriangleBvh>),
    Top(InstanceBvh),
}

/// Every resource of a device.
#[derive(Debug, Default)]
pub(crate) struct ResourceStore {
    pub buffers: HashMap<BufferId, BufferEntry>,
    pub textures: HashMap<TextureId, TextureEntry>,
    pub heaps: HashMap<DescriptorHeapId, Vec<Option<ResourceView>>>,
    pub pipelines: HashMap<PipelineId, PipelineEntry>,
    pub swap_chains: HashMap<SwapChainId, SwapChainEntry>,
    pub allocators: HashMap<CommandAllocatorId, AllocatorEntry>,
    /// Built acceleration structures, keyed by the address they were built at.
    pub structures: HashMap<u64, AccelerationStructure>,
}

impl ResourceStore {
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

    /// Resolves an address to its buffer and checks that `len` bytes fit behind it.
    pub fn resolve(&self, address: GpuAddress, len: u64) -> Result<(BufferId, u64), ResourceError> {
        let (id, offset) = decode_address(address).ok_or(ResourceError::InvalidHandle)?;
        let buffer = self.buffer(id)?;
        if offset + len > buffer.data.len() as u64 {
            return Err(ResourceError::OutOfBounds);
        }
        Ok((id, offset))
    }

    /// Borrows `len` bytes at `address`.
    pub fn bytes_at(&self, address: GpuAddress, len: usize) -> Result<&[u8], ResourceError> {
        let (id, offset) = self.resolve(address, len as u64)?;
        let offset = offset as usize;
        Ok(&self.buffer(id)?.data[offset..offset + len])
    }

    /// Reads a plain-old-data value at `address`.
    pub fn read_pod<T: bytemuck::Pod>(&self, address: GpuAddress) -> Result<T, ResourceError> {
        let bytes = self.bytes_at(address, std::mem::size_of::<T>())?;
        bytemuck::try_pod_read_unaligned(bytes).map_err(|_| ResourceError::OutOfBounds)
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

/// What the device has observed on its timelines, for diagnostics and tests.
#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    pub events: Vec<String>,
    pub validation_errors: Vec<String>,
    pub draws: u64,
    pub dispatches: u64,
    pub rays_traced: u64,
    pub acceleration_structure_builds: u64,
    pub refits: u64,
}

/// State shared between the device handle and its queue timelines.
#[derive(Debug, Default)]
pub(crate) struct DeviceShared {
    pub store: Mutex<ResourceStore>,
    pub diagnostics: Mutex<Diagnostics>,
    pub device_lost: AtomicBool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_encoding_round_trip() {
        let address = encode_address(BufferId(7), 0x1234);
        assert!(!address.is_null());
        assert_eq!(decode_address(address), Some((BufferId(7), 0x1234)));
        assert_eq!(
            decode_address(address.offset(256)),
            Some((BufferId(7), 0x1234 + 256))
        );
        assert_eq!(decode_address(GpuAddress::NULL), None);
    }

    #[test]
    fn test_resolve_checks_bounds() {
        let mut store = ResourceStore::default();
        store.buffers.insert(
            BufferId(0),
            BufferEntry {
                label: "b".into(),
                heap: HeapKind::Upload,
                data: vec![0; 64],
                state: ResourceState::GenericRead,
            },
        );
        let base = encode_address(BufferId(0), 0);
        assert!(store.resolve(base, 64).is_ok());
        assert!(matches!(
            store.resolve(base.offset(32), 33),
            Err(ResourceError::OutOfBounds)
        ));
        assert!(matches!(
            store.resolve(encode_address(BufferId(1), 0), 1),
            Err(ResourceError::InvalidHandle)
        ));
    }
}
