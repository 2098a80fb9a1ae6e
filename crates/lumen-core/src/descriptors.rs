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

//! Stable indices into the shader-visible descriptor heap.

use crate::renderer::{DescriptorHeapId, GpuDevice, ResourceError, ResourceView};
use std::sync::Arc;

/// Every shader-visible descriptor slot the renderer uses.
///
/// Slot 0 belongs to the GUI overlay. Several passes bind contiguous runs as one table:
/// `SceneBvhSrv..=VisibilityUav` for the GI gather, `ShadowMapSrv..=VisibilitySrv` for
/// the color pass pixel stage.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorIndex {
    /// GUI overlay font atlas.
    Overlay = 0,
    /// Top-level acceleration structure.
    SceneBvhSrv,
    /// GI irradiance output, written by rays.
    IrradianceUav,
    /// GI visibility output, written by rays.
    VisibilityUav,
    /// Copied scene color, sampled by the composite pass.
    SceneColorSrv,
    /// Copied scene depth.
    SceneDepthSrv,
    /// Copied shadow-map depth.
    ShadowMapSrv,
    /// GI irradiance, sampled by the color pass.
    IrradianceSrv,
    /// GI visibility, sampled by the color pass.
    VisibilitySrv,
    /// Raw cube vertices for hit shaders.
    CubeVertexBufferSrv,
}

impl DescriptorIndex {
    /// Number of slots the renderer needs.
    pub const COUNT: u32 = 10;

    /// The raw heap index.
    pub fn index(self) -> u32 {
        self as u32
    }
}

/// Allocator over a fixed-capacity, shader-visible descriptor heap.
///
/// Indices are assigned once and stay stable for the lifetime of the process. A view
/// may be refreshed in place (for example after a resize recreates the texture behind
/// it), but the index it lives at never moves.
#[derive(Debug)]
pub struct DescriptorAllocator {
    device: Arc<dyn GpuDevice>,
    heap: DescriptorHeapId,
    slots: Vec<Option<ResourceView>>,
}

impl DescriptorAllocator {
    /// Creates a heap with `capacity` slots.
    pub fn new(device: Arc<dyn GpuDevice>, capacity: u32) -> Result<Self, ResourceError> {
        let heap = device.create_descriptor_heap(capacity)?;
        log::info!("Descriptor heap created with {capacity} slots");
        Ok(Self {
            device,
            heap,
            slots: vec![None; capacity as usize],
        })
    }

    /// The heap to bind.
    pub fn heap(&self) -> DescriptorHeapId {
        self.heap
    }

    /// Number of slots.
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    fn check_free(&self, index: u32) -> Result<(), ResourceError> {
        match self.slots.get(index as usize) {
            None => Err(ResourceError::CapacityExceeded {
                what: "descriptor heap",
                capacity: self.slots.len(),
                requested: index as usize,
            }),
            Some(Some(_)) => {
                log::error!("Descriptor index {index} allocated twice");
                Err(ResourceError::ReservedDescriptor(index))
            }
            Some(None) => Ok(()),
        }
    }

    /// Writes `view` at `index` and marks the slot as taken.
    ///
    /// # Errors
    /// * [`ResourceError::ReservedDescriptor`] for the overlay slot or an index already in use.
    pub fn allocate(
        &mut self,
        index: DescriptorIndex,
        view: ResourceView,
    ) -> Result<u32, ResourceError> {
        let raw = index.index();
        if index == DescriptorIndex::Overlay {
            log::error!("Descriptor slot 0 is reserved for the overlay");
            return Err(ResourceError::ReservedDescriptor(raw));
        }
        self.check_free(raw)?;
        self.device.write_descriptor(self.heap, raw, view)?;
        self.slots[raw as usize] = Some(view);
        Ok(raw)
    }

    /// Hands slot 0 to the overlay.
    pub fn allocate_overlay(&mut self) -> Result<u32, ResourceError> {
        self.check_free(0)?;
        self.device
            .write_descriptor(self.heap, 0, ResourceView::Overlay)?;
        self.slots[0] = Some(ResourceView::Overlay);
        Ok(0)
    }

    /// Rewrites the view at an already-allocated index.
    pub fn refresh(
        &mut self,
        index: DescriptorIndex,
        view: ResourceView,
    ) -> Result<(), ResourceError> {
        let raw = index.index() as usize;
        match self.slots.get(raw) {
            Some(Some(_)) => {
                self.device.write_descriptor(self.heap, raw as u32, view)?;
                self.slots[raw] = Some(view);
                Ok(())
            }
            _ => Err(ResourceError::NotFound),
        }
    }

    /// The view at `index`, if allocated.
    pub fn view(&self, index: DescriptorIndex) -> Option<ResourceView> {
        self.slots.get(index.index() as usize).copied().flatten()
    }

    /// Whether `index` has been allocated.
    pub fn is_allocated(&self, index: DescriptorIndex) -> bool {
        self.view(index).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_is_slot_zero() {
        assert_eq!(DescriptorIndex::Overlay.index(), 0);
    }

    #[test]
    fn test_gi_table_is_contiguous() {
        assert_eq!(
            DescriptorIndex::IrradianceUav.index(),
            DescriptorIndex::SceneBvhSrv.index() + 1
        );
        assert_eq!(
            DescriptorIndex::VisibilityUav.index(),
            DescriptorIndex::SceneBvhSrv.index() + 2
        );
    }

    #[test]
    fn test_color_pass_table_is_contiguous() {
        assert_eq!(
            DescriptorIndex::IrradianceSrv.index(),
            DescriptorIndex::ShadowMapSrv.index() + 1
        );
        assert_eq!(
            DescriptorIndex::VisibilitySrv.index(),
            DescriptorIndex::ShadowMapSrv.index() + 2
        );
        assert_eq!(DescriptorIndex::CubeVertexBufferSrv.index() + 1, DescriptorIndex::COUNT);
    }
}
