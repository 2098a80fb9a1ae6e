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

//! The contract every frame pass implements, and the borrowed state passes record with.

use crate::pipelines::PipelineRegistry;
use crate::LaneError;
use lumen_core::renderer::{
    CommandList, DescriptorHeapId, GpuDevice, PerObjectConstants, RenderSettings, RenderStats,
    ScissorRect, ShaderBlobProvider, TextureId, Viewport,
};
use lumen_core::{
    AccelerationStructureManager, DescriptorAllocator, GpuMesh, StagingTransfer, UploadRing,
};
use std::sync::Arc;
use std::time::Instant;

/// Identifies a pass in the fixed per-frame order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LaneKind {
    /// Depth from the light, copied into the shadow map.
    Shadow,
    /// Raytraced probe gather.
    GlobalIllumination,
    /// Lit scene into the back buffer.
    Color,
    /// Composite of the copied scene color.
    Screen,
    /// GUI overlay, recorded last.
    Overlay,
}

/// Where the current frame renders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTargets {
    /// The back buffer, in `RenderTarget` state while lanes record.
    pub back_buffer: TextureId,
    /// The main depth target, at rest in `DepthWrite`.
    pub depth: TextureId,
    /// Full-window viewport.
    pub viewport: Viewport,
    /// Full-window scissor.
    pub scissor: ScissorRect,
    /// Back-buffer width.
    pub width: u32,
    /// Back-buffer height.
    pub height: u32,
}

/// One mesh submitted for this frame.
#[derive(Debug, Clone)]
pub struct SceneDraw {
    /// The uploaded geometry.
    pub mesh: GpuMesh,
    /// Placement and color.
    pub constants: PerObjectConstants,
}

/// Everything a lane may touch while recording one frame.
pub struct FrameContext<'a> {
    /// The frame's command list, open for recording.
    pub list: &'a mut CommandList,
    /// Constant regions of the current frame slot.
    pub upload: &'a mut UploadRing,
    /// Acceleration structures, for refits.
    pub accel: &'a mut AccelerationStructureManager,
    /// The graphics pipelines.
    pub pipelines: &'a PipelineRegistry,
    /// Output targets.
    pub targets: FrameTargets,
    /// The meshes to draw, in submission order.
    pub draws: &'a [SceneDraw],
    /// Current settings.
    pub settings: &'a RenderSettings,
    /// The bound descriptor heap.
    pub heap: DescriptorHeapId,
    /// When the frame started.
    pub now: Instant,
    /// Counters for the frame being recorded.
    pub stats: &'a mut RenderStats,
}

/// What a lane gets to create its resources with.
pub struct LaneInit<'a> {
    /// The device.
    pub device: &'a Arc<dyn GpuDevice>,
    /// Descriptor slots.
    pub descriptors: &'a mut DescriptorAllocator,
    /// Blocking uploads for static geometry.
    pub staging: &'a mut StagingTransfer,
    /// Compiled shader blobs.
    pub shaders: &'a dyn ShaderBlobProvider,
    /// Current settings.
    pub settings: &'a RenderSettings,
    /// Number of frame slots.
    pub frame_count: usize,
    /// Back-buffer width.
    pub width: u32,
    /// Back-buffer height.
    pub height: u32,
}

/// A pass of the per-frame sequence.
///
/// Lanes are owned by the sequencer and run in [`LaneKind`] order. Each one is
/// wrapped in a labelled event named after [`strategy_name`](Self::strategy_name),
/// and must leave every resource it transitions back in its resting state.
pub trait FrameLane: Send {
    /// Label of the pass on the GPU timeline.
    fn strategy_name(&self) -> &'static str;

    /// Which pass this is.
    fn lane_kind(&self) -> LaneKind;

    /// Creates the lane's resources.
    ///
    /// # Errors
    /// A failure here is fatal for the renderer.
    fn on_initialize(&mut self, init: &mut LaneInit<'_>) -> Result<(), LaneError>;

    /// Whether the lane records anything this frame.
    fn is_active(&self, _ctx: &FrameContext<'_>) -> bool {
        true
    }

    /// Records the pass.
    ///
    /// State that must only change once the GPU runs the recording is staged here
    /// and made permanent in [`on_frame_submitted`](Self::on_frame_submitted).
    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), LaneError>;

    /// The frame's list was executed.
    fn on_frame_submitted(&mut self) {}

    /// The frame was dropped before execution; staged state must be discarded.
    fn on_frame_aborted(&mut self) {}

    /// Recreates size-dependent resources. Called only after the GPU is idle.
    fn on_resize(
        &mut self,
        _device: &dyn GpuDevice,
        _descriptors: &mut DescriptorAllocator,
        _width: u32,
        _height: u32,
    ) -> Result<(), LaneError> {
        Ok(())
    }

    /// Releases the lane's resources. Called only after the GPU is idle.
    fn on_shutdown(&mut self, device: &dyn GpuDevice) -> Result<(), LaneError>;
}
