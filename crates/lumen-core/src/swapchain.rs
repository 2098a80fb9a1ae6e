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

//! Back buffers, the main depth target and presentation.
//!
//! Resizing is synchronous: [`SwapChainManager::resize`] drains every frame slot
//! before touching the swap chain, so no submitted work can still reference a back
//! buffer that is about to be released.

use crate::frame::FrameSynchronizer;
use crate::renderer::{
    DeviceFeature, GpuDevice, PresentMode, RenderError, ResourceError, ResourceState,
    ScissorRect, SwapChainDescriptor, SwapChainId, TextureDescriptor, TextureFormat, TextureId,
    Viewport,
};
use std::sync::Arc;

/// Format of the back buffers.
pub const BACK_BUFFER_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Format of the main depth target.
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Owns the swap chain and everything sized after it.
#[derive(Debug)]
pub struct SwapChainManager {
    device: Arc<dyn GpuDevice>,
    swap_chain: SwapChainId,
    back_buffers: Vec<TextureId>,
    depth_target: TextureId,
    width: u32,
    height: u32,
    tearing_supported: bool,
}

impl SwapChainManager {
    /// Creates the swap chain and the depth target.
    ///
    /// Tearing is enabled when the device supports it.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        width: u32,
        height: u32,
        buffer_count: usize,
    ) -> Result<Self, RenderError> {
        let tearing_supported = device.supports_feature(DeviceFeature::Tearing);
        let swap_chain = device
            .create_swap_chain(&SwapChainDescriptor {
                width,
                height,
                buffer_count,
                format: BACK_BUFFER_FORMAT,
                allow_tearing: tearing_supported,
            })
            .map_err(|e| RenderError::InitializationFailed(format!("swap chain: {e}")))?;
        let back_buffers = device.swap_chain_buffers(swap_chain)?;
        let depth_target = Self::create_depth_target(&*device, width, height)?;

        log::info!(
            "Swap chain created: {width}x{height}, {buffer_count} buffers, tearing={tearing_supported}"
        );
        Ok(Self {
            device,
            swap_chain,
            back_buffers,
            depth_target,
            width,
            height,
            tearing_supported,
        })
    }

    fn create_depth_target(
        device: &dyn GpuDevice,
        width: u32,
        height: u32,
    ) -> Result<TextureId, ResourceError> {
        device.create_texture(&TextureDescriptor {
            label: Some("main depth".into()),
            width,
            height,
            format: DEPTH_FORMAT,
            initial_state: ResourceState::DepthWrite,
            allow_render_target: false,
            allow_depth_stencil: true,
            allow_unordered_access: false,
        })
    }

    /// The device swap chain.
    pub fn id(&self) -> SwapChainId {
        self.swap_chain
    }

    /// Index of the back buffer the current frame renders into.
    pub fn current_index(&self) -> Result<usize, RenderError> {
        Ok(self.device.current_back_buffer_index(self.swap_chain)?)
    }

    /// The back buffer the current frame renders into, in `Present` state.
    pub fn current_back_buffer(&self) -> Result<TextureId, RenderError> {
        let index = self.current_index()?;
        self.back_buffers
            .get(index)
            .copied()
            .ok_or_else(|| RenderError::Internal(format!("back buffer {index} out of range")))
    }

    /// Every back buffer, in index order.
    pub fn back_buffers(&self) -> &[TextureId] {
        &self.back_buffers
    }

    /// The main depth target, in `DepthWrite` state between frames.
    pub fn depth_target(&self) -> TextureId {
        self.depth_target
    }

    /// Current size in pixels.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// A viewport covering the back buffer.
    pub fn viewport(&self) -> Viewport {
        Viewport::full(self.width, self.height)
    }

    /// A scissor rectangle covering the back buffer.
    pub fn scissor(&self) -> ScissorRect {
        ScissorRect::full(self.width, self.height)
    }

    /// Whether presentation may tear.
    pub fn tearing_supported(&self) -> bool {
        self.tearing_supported
    }

    /// Presents the current back buffer.
    ///
    /// With tearing support the frame is presented immediately; otherwise `vsync`
    /// chooses between one vertical blank and none.
    pub fn present(&self, vsync: bool) -> Result<PresentMode, RenderError> {
        let mode = PresentMode::select(self.tearing_supported, vsync);
        self.device.present(self.swap_chain, mode)?;
        Ok(mode)
    }

    /// Flushes every frame slot, then resizes the back buffers and recreates the depth
    /// target.
    ///
    /// Returns `false` when nothing changed: a zero dimension (minimised window) or the
    /// current size. On `true`, every back-buffer ID and the depth target ID previously
    /// handed out are invalid.
    pub fn resize(
        &mut self,
        frame_sync: &mut FrameSynchronizer,
        width: u32,
        height: u32,
    ) -> Result<bool, RenderError> {
        if width == 0 || height == 0 {
            log::debug!("Ignoring resize to {width}x{height}");
            return Ok(false);
        }
        if (width, height) == (self.width, self.height) {
            return Ok(false);
        }

        frame_sync.flush()?;

        self.device
            .resize_swap_chain(self.swap_chain, width, height)?;
        self.back_buffers = self.device.swap_chain_buffers(self.swap_chain)?;

        self.device.destroy_texture(self.depth_target)?;
        self.depth_target = Self::create_depth_target(&*self.device, width, height)?;

        self.width = width;
        self.height = height;
        log::info!("Swap chain resized to {width}x{height}");
        Ok(true)
    }

    /// Releases the depth target and the swap chain. The GPU must be idle.
    pub fn destroy(self) -> Result<(), ResourceError> {
        self.device.destroy_texture(self.depth_target)?;
        self.device.destroy_swap_chain(self.swap_chain)
    }
}
