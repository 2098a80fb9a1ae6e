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

//! A typed, bounds-checked arena over one persistently mapped upload buffer.

use crate::renderer::{BufferDescriptor, BufferId, GpuAddress, GpuDevice, ResourceError};
use bytemuck::Pod;
use std::marker::PhantomData;
use std::sync::Arc;

/// Slot layout of an arena: a fixed region split into equally strided slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaLayout {
    /// Size of one element before alignment.
    pub element_size: u64,
    /// Distance between two slots: `element_size` rounded up to the alignment.
    pub stride: u64,
    /// Number of slots that fit in the region.
    pub capacity: usize,
    /// Total size of the region in bytes.
    pub region_size: u64,
}

impl ArenaLayout {
    /// Computes the layout for elements of `element_size` bytes.
    ///
    /// `alignment` must be a power of two.
    pub fn new(element_size: u64, region_size: u64, alignment: u64) -> Self {
        debug_assert!(alignment.is_power_of_two());
        let stride = (element_size.max(1) + alignment - 1) & !(alignment - 1);
        Self {
            element_size,
            stride,
            capacity: (region_size / stride) as usize,
            region_size,
        }
    }

    /// Byte offset of slot `index`: `index * stride`.
    ///
    /// Every valid slot satisfies `offset + element_size <= region_size`.
    pub fn offset(&self, index: usize) -> Option<u64> {
        (index < self.capacity).then(|| index as u64 * self.stride)
    }
}

/// A region of an upload buffer holding values of `T` at an aligned stride.
///
/// The CPU writes through the persistent mapping; the GPU reads a slot through
/// [`gpu_address`](Self::gpu_address). Writes past the last slot are rejected instead of
/// spilling into whatever follows the region.
#[derive(Debug)]
pub struct MappedArena<T: Pod> {
    device: Arc<dyn GpuDevice>,
    buffer: BufferId,
    base: GpuAddress,
    layout: ArenaLayout,
    label: &'static str,
    _marker: PhantomData<T>,
}

impl<T: Pod> MappedArena<T> {
    /// Creates an upload buffer of `region_size` bytes and lays `T` out in it.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        label: &'static str,
        region_size: u64,
        alignment: u64,
    ) -> Result<Self, ResourceError> {
        let layout = ArenaLayout::new(std::mem::size_of::<T>() as u64, region_size, alignment);
        if layout.capacity == 0 {
            return Err(ResourceError::CapacityExceeded {
                what: label,
                capacity: 0,
                requested: 0,
            });
        }
        let buffer = device.create_buffer(&BufferDescriptor::upload(label, region_size))?;
        let base = device.buffer_address(buffer)?;
        Ok(Self {
            device,
            buffer,
            base,
            layout,
            label,
            _marker: PhantomData,
        })
    }

    fn checked_offset(&self, index: usize) -> Result<u64, ResourceError> {
        self.layout.offset(index).ok_or_else(|| {
            log::error!(
                "{} overflow: slot {index} requested, capacity is {}",
                self.label,
                self.layout.capacity
            );
            ResourceError::CapacityExceeded {
                what: self.label,
                capacity: self.layout.capacity,
                requested: index,
            }
        })
    }

    /// Copies `value` into slot `index` and returns the slot's GPU address.
    pub fn write(&self, index: usize, value: &T) -> Result<GpuAddress, ResourceError> {
        self.write_bytes(index, bytemuck::bytes_of(value))
    }

    /// Copies raw bytes into slot `index`. At most `size_of::<T>()` bytes may be written.
    pub fn write_bytes(&self, index: usize, bytes: &[u8]) -> Result<GpuAddress, ResourceError> {
        let offset = self.checked_offset(index)?;
        if bytes.len() as u64 > self.layout.stride {
            return Err(ResourceError::OutOfBounds);
        }
        self.device.write_mapped(self.buffer, offset, bytes)?;
        Ok(self.base.offset(offset))
    }

    /// Reads slot `index` back through the mapping.
    pub fn read(&self, index: usize) -> Result<T, ResourceError> {
        let offset = self.checked_offset(index)?;
        let bytes = self
            .device
            .read_mapped(self.buffer, offset, std::mem::size_of::<T>())?;
        bytemuck::try_pod_read_unaligned(&bytes).map_err(|_| ResourceError::OutOfBounds)
    }

    /// GPU address of slot `index`.
    pub fn gpu_address(&self, index: usize) -> Result<GpuAddress, ResourceError> {
        Ok(self.base.offset(self.checked_offset(index)?))
    }

    /// Byte offset of slot `index`.
    pub fn offset(&self, index: usize) -> Result<u64, ResourceError> {
        self.checked_offset(index)
    }

    /// The slot layout.
    pub fn layout(&self) -> ArenaLayout {
        self.layout
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.layout.capacity
    }

    /// Distance between slots in bytes.
    pub fn stride(&self) -> u64 {
        self.layout.stride
    }

    /// The backing buffer.
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Releases the backing buffer.
    pub fn destroy(self) -> Result<(), ResourceError> {
        self.device.destroy_buffer(self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_for_small_element_has_256_slots() {
        let layout = ArenaLayout::new(160, 64 * 1024, 256);
        assert_eq!(layout.stride, 256);
        assert_eq!(layout.capacity, 256);
    }

    #[test]
    fn test_offset_is_index_times_stride() {
        let layout = ArenaLayout::new(144, 64 * 1024, 256);
        for index in 0..layout.capacity {
            let offset = layout.offset(index).unwrap();
            assert_eq!(offset, index as u64 * layout.stride);
            assert!(offset + layout.element_size <= layout.region_size);
        }
        assert_eq!(layout.offset(layout.capacity), None);
    }

    #[test]
    fn test_large_element_rounds_stride_up() {
        let layout = ArenaLayout::new(5696, 64 * 1024, 256);
        assert_eq!(layout.stride, 5888);
        assert_eq!(layout.capacity, 11);
    }

    #[test]
    fn test_shader_record_layout() {
        // 32-byte identifiers placed on 64-byte boundaries.
        let layout = ArenaLayout::new(32, 192, 64);
        assert_eq!(layout.offset(0), Some(0));
        assert_eq!(layout.offset(1), Some(64));
        assert_eq!(layout.offset(2), Some(128));
        assert_eq!(layout.offset(3), None);
    }
}
