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

//! Persistently mapped constant upload, one region set per frame slot.
//!
//! The [`UploadRing`] pre-allocates four 64 KB upload regions (per-object, per-frame,
//! per-pass, material) for every frame slot and selects the set belonging to the slot
//! being recorded. The slot's fence wait in
//! [`FrameSynchronizer::begin_frame`](crate::FrameSynchronizer::begin_frame) guarantees
//! the GPU finished reading a set before the CPU writes it again.
//!
//! ```text
//! Frame N:     [Set 0: GPU reads]
//! Frame N+1:   [Set 1: CPU writes]   Set 0 still in flight
//! Frame N+3:   [Set 0: CPU writes]   only after slot 0's fence was reached
//! ```
//!
//! Within a frame, per-object slots are handed out by a draw counter that restarts at
//! zero every frame. At 256-byte alignment a 64 KB region holds 256 slots; the 257th
//! draw of a frame is rejected.

use super::arena::MappedArena;
use crate::renderer::{
    GpuAddress, GpuDevice, MaterialConstants, PassIndex, PerFrameConstants, PerObjectConstants,
    PerPassConstants, ResourceError, CONSTANT_BUFFER_ALIGNMENT, CONSTANT_REGION_SIZE,
};
use bytemuck::Pod;
use std::sync::Arc;

/// The four constant categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstantCategory {
    /// One slot per draw call.
    PerObject,
    /// One slot per frame.
    PerFrame,
    /// One slot per pass.
    PerPass,
    /// The material palette.
    Material,
}

#[derive(Debug)]
struct FrameRegions {
    per_object: MappedArena<PerObjectConstants>,
    per_frame: MappedArena<PerFrameConstants>,
    per_pass: MappedArena<PerPassConstants>,
    material: MappedArena<MaterialConstants>,
}

impl FrameRegions {
    fn new(device: &Arc<dyn GpuDevice>) -> Result<Self, ResourceError> {
        Ok(Self {
            per_object: MappedArena::new(
                device.clone(),
                "per-object constants",
                CONSTANT_REGION_SIZE,
                CONSTANT_BUFFER_ALIGNMENT,
            )?,
            per_frame: MappedArena::new(
                device.clone(),
                "per-frame constants",
                CONSTANT_REGION_SIZE,
                CONSTANT_BUFFER_ALIGNMENT,
            )?,
            per_pass: MappedArena::new(
                device.clone(),
                "per-pass constants",
                CONSTANT_REGION_SIZE,
                CONSTANT_BUFFER_ALIGNMENT,
            )?,
            material: MappedArena::new(
                device.clone(),
                "material constants",
                CONSTANT_REGION_SIZE,
                CONSTANT_BUFFER_ALIGNMENT,
            )?,
        })
    }

    fn write_bytes(
        &self,
        category: ConstantCategory,
        index: usize,
        data: &[u8],
    ) -> Result<GpuAddress, ResourceError> {
        match category {
            ConstantCategory::PerObject => self.per_object.write_bytes(index, data),
            ConstantCategory::PerFrame => self.per_frame.write_bytes(index, data),
            ConstantCategory::PerPass => self.per_pass.write_bytes(index, data),
            ConstantCategory::Material => self.material.write_bytes(index, data),
        }
    }

    fn address(&self, category: ConstantCategory, index: usize) -> Result<GpuAddress, ResourceError> {
        match category {
            ConstantCategory::PerObject => self.per_object.gpu_address(index),
            ConstantCategory::PerFrame => self.per_frame.gpu_address(index),
            ConstantCategory::PerPass => self.per_pass.gpu_address(index),
            ConstantCategory::Material => self.material.gpu_address(index),
        }
    }

    fn offset(&self, category: ConstantCategory, index: usize) -> Result<u64, ResourceError> {
        match category {
            ConstantCategory::PerObject => self.per_object.offset(index),
            ConstantCategory::PerFrame => self.per_frame.offset(index),
            ConstantCategory::PerPass => self.per_pass.offset(index),
            ConstantCategory::Material => self.material.offset(index),
        }
    }

    fn capacity(&self, category: ConstantCategory) -> usize {
        match category {
            ConstantCategory::PerObject => self.per_object.capacity(),
            ConstantCategory::PerFrame => self.per_frame.capacity(),
            ConstantCategory::PerPass => self.per_pass.capacity(),
            ConstantCategory::Material => self.material.capacity(),
        }
    }

    fn destroy(self) -> Result<(), ResourceError> {
        self.per_object.destroy()?;
        self.per_frame.destroy()?;
        self.per_pass.destroy()?;
        self.material.destroy()
    }
}

/// Persistently mapped constant regions for every frame slot.
#[derive(Debug)]
pub struct UploadRing {
    frames: Vec<FrameRegions>,
    current: usize,
    draw_count: usize,
}

impl UploadRing {
    /// Allocates one region set per frame slot.
    ///
    /// # Errors
    /// Returns a [`ResourceError`] if an upload buffer cannot be created. This is fatal.
    pub fn new(device: Arc<dyn GpuDevice>, frame_count: usize) -> Result<Self, ResourceError> {
        let mut frames = Vec::with_capacity(frame_count);
        for _ in 0..frame_count {
            frames.push(FrameRegions::new(&device)?);
        }
        log::info!(
            "UploadRing allocated {} x 4 constant regions of {} bytes",
            frame_count,
            CONSTANT_REGION_SIZE
        );
        Ok(Self {
            frames,
            current: 0,
            draw_count: 0,
        })
    }

    /// Selects the region set of `slot` and restarts the per-object counter.
    ///
    /// Only call once the slot's fence has been waited on.
    pub fn begin_frame(&mut self, slot: usize) {
        self.current = slot % self.frames.len();
        self.draw_count = 0;
    }

    /// Restarts the per-object counter without switching regions.
    pub fn reset_draw_count(&mut self) {
        self.draw_count = 0;
    }

    /// Number of per-object slots used in the current frame.
    pub fn draw_count(&self) -> usize {
        self.draw_count
    }

    /// The frame slot whose regions are being written.
    pub fn current_slot(&self) -> usize {
        self.current
    }

    fn regions(&self) -> &FrameRegions {
        &self.frames[self.current]
    }

    /// Copies `data` to `base + index * stride` of `category` in the current frame.
    pub fn write(
        &self,
        category: ConstantCategory,
        index: usize,
        data: &[u8],
    ) -> Result<GpuAddress, ResourceError> {
        self.regions().write_bytes(category, index, data)
    }

    /// Writes a typed value; see [`write`](Self::write).
    pub fn write_pod<T: Pod>(
        &self,
        category: ConstantCategory,
        index: usize,
        value: &T,
    ) -> Result<GpuAddress, ResourceError> {
        self.write(category, index, bytemuck::bytes_of(value))
    }

    /// Writes the constants of the next draw call and returns their address.
    ///
    /// # Errors
    /// [`ResourceError::CapacityExceeded`] once the frame's 256 slots are used. The
    /// counter is not advanced by a failed write.
    pub fn push_object(
        &mut self,
        constants: &PerObjectConstants,
    ) -> Result<GpuAddress, ResourceError> {
        let address = self.regions().per_object.write(self.draw_count, constants)?;
        self.draw_count += 1;
        Ok(address)
    }

    /// Writes the per-frame constants.
    pub fn write_per_frame(
        &self,
        constants: &PerFrameConstants,
    ) -> Result<GpuAddress, ResourceError> {
        self.regions().per_frame.write(0, constants)
    }

    /// Writes the constants of one pass.
    pub fn write_per_pass(
        &self,
        pass: PassIndex,
        constants: &PerPassConstants,
    ) -> Result<GpuAddress, ResourceError> {
        self.regions().per_pass.write(pass as usize, constants)
    }

    /// Writes the material palette.
    pub fn write_material(
        &self,
        constants: &MaterialConstants,
    ) -> Result<GpuAddress, ResourceError> {
        self.regions().material.write(0, constants)
    }

    /// Address of slot `index` of `category` in the current frame.
    pub fn address(
        &self,
        category: ConstantCategory,
        index: usize,
    ) -> Result<GpuAddress, ResourceError> {
        self.regions().address(category, index)
    }

    /// Byte offset of slot `index` of `category`.
    pub fn offset(&self, category: ConstantCategory, index: usize) -> Result<u64, ResourceError> {
        self.regions().offset(category, index)
    }

    /// Number of slots in one region of `category`.
    pub fn capacity(&self, category: ConstantCategory) -> usize {
        self.regions().capacity(category)
    }

    /// Reads back the per-object constants at `index` of the current frame.
    pub fn read_object(&self, index: usize) -> Result<PerObjectConstants, ResourceError> {
        self.regions().per_object.read(index)
    }

    /// Releases every upload buffer.
    pub fn destroy(self) -> Result<(), ResourceError> {
        for frame in self.frames {
            frame.destroy()?;
        }
        Ok(())
    }
}
