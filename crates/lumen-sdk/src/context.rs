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

//! The explicitly-owned renderer state.

use lumen_core::renderer::{GpuDevice, QueueKind, RenderError, RenderSettings};
use lumen_core::{
    AccelerationStructureManager, DescriptorAllocator, DescriptorIndex, FrameSynchronizer,
    StagingTransfer, SwapChainManager, UploadRing, MAX_FRAMES_IN_FLIGHT,
};
use lumen_lanes::FrameServices;
use std::sync::Arc;

/// Owns the device and every GPU-resource component of the renderer.
///
/// There is exactly one context per renderer. It is created at startup, lent to the
/// frame sequencer through [`RenderContext::services`] for each call and torn down
/// by [`RenderContext::destroy`].
pub struct RenderContext {
    device: Arc<dyn GpuDevice>,
    frame_sync: FrameSynchronizer,
    upload: UploadRing,
    swap_chain: SwapChainManager,
    descriptors: DescriptorAllocator,
    accel: AccelerationStructureManager,
    staging: StagingTransfer,
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("adapter", &self.device.adapter_info())
            .field("swap_chain", &self.swap_chain)
            .finish_non_exhaustive()
    }
}

impl RenderContext {
    /// Creates every component for `settings` on `device`.
    ///
    /// # Errors
    /// Returns the first creation failure; nothing partially built is kept.
    pub fn new(device: Arc<dyn GpuDevice>, settings: &RenderSettings) -> Result<Self, RenderError> {
        let frame_count = settings.back_buffer_count;
        if frame_count == 0 || frame_count > MAX_FRAMES_IN_FLIGHT {
            return Err(RenderError::InitializationFailed(format!(
                "back buffer count must be between 1 and {MAX_FRAMES_IN_FLIGHT}, got {frame_count}"
            )));
        }
        let timeout = settings.fence_timeout();
        log::info!(
            "Creating render context on '{}' ({}x{}, {frame_count} frames in flight)",
            device.adapter_info().name,
            settings.width,
            settings.height
        );

        let frame_sync =
            FrameSynchronizer::new(device.clone(), QueueKind::Direct, frame_count, timeout)?;
        let upload = UploadRing::new(device.clone(), frame_count)?;
        let swap_chain =
            SwapChainManager::new(device.clone(), settings.width, settings.height, frame_count)?;
        let descriptors = DescriptorAllocator::new(device.clone(), DescriptorIndex::COUNT)?;
        let accel = AccelerationStructureManager::new(device.clone(), timeout)?;
        let staging = StagingTransfer::new(device.clone(), timeout)?;

        Ok(Self {
            device,
            frame_sync,
            upload,
            swap_chain,
            descriptors,
            accel,
            staging,
        })
    }

    /// The device.
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    /// Lends every component to one sequencer call.
    pub fn services(&mut self) -> FrameServices<'_> {
        FrameServices {
            device: &self.device,
            frame_sync: &mut self.frame_sync,
            upload: &mut self.upload,
            swap_chain: &mut self.swap_chain,
            descriptors: &mut self.descriptors,
            accel: &mut self.accel,
            staging: &mut self.staging,
        }
    }

    /// Per-slot fences.
    pub fn frame_sync(&self) -> &FrameSynchronizer {
        &self.frame_sync
    }

    /// Per-slot constant regions.
    pub fn upload(&mut self) -> &mut UploadRing {
        &mut self.upload
    }

    /// Back buffers and main depth.
    pub fn swap_chain(&self) -> &SwapChainManager {
        &self.swap_chain
    }

    /// Descriptor slots.
    pub fn descriptors(&self) -> &DescriptorAllocator {
        &self.descriptors
    }

    /// Acceleration structures.
    pub fn accel(&self) -> &AccelerationStructureManager {
        &self.accel
    }

    /// Acceleration structures, for creation and builds.
    pub fn accel_mut(&mut self) -> &mut AccelerationStructureManager {
        &mut self.accel
    }

    /// Blocking uploads.
    pub fn staging(&mut self) -> &mut StagingTransfer {
        &mut self.staging
    }

    /// Waits for the GPU and releases every component.
    pub fn destroy(self) -> Result<(), RenderError> {
        let Self {
            device: _,
            mut frame_sync,
            upload,
            swap_chain,
            descriptors: _,
            accel,
            staging,
        } = self;
        frame_sync.flush()?;
        accel.destroy()?;
        staging.destroy()?;
        upload.destroy()?;
        swap_chain.destroy()?;
        frame_sync.destroy()?;
        log::info!("Render context destroyed");
        Ok(())
    }
}
