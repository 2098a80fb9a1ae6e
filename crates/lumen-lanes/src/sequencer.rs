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

//! The per-tick command sequence.
//!
//! One frame is:
//!
//! 1. [`start_frame`](CommandSequencer::start_frame): wait for the slot of the
//!    current back buffer, reset its allocator and constant regions, move the back
//!    buffer to `RenderTarget` and bind the descriptor heap.
//! 2. The caller writes per-frame, per-pass and material constants.
//! 3. [`record_lanes`](CommandSequencer::record_lanes): Shadow, GiGather, Color,
//!    Screen, Overlay, each inside a labelled event.
//! 4. [`submit`](CommandSequencer::submit): move the back buffer to `Present`,
//!    close and execute the list.
//! 5. [`present`](CommandSequencer::present): queue the present, then signal the
//!    slot fence so the fence also covers presentation.
//!
//! A failure between 1 and 4 aborts the frame: nothing is executed, the slot fence
//! is still signalled and the sequencer is ready for the next `start_frame`.

use crate::lane::{FrameContext, FrameLane, FrameTargets, LaneInit, SceneDraw};
use crate::passes::{
    ColorLane, GiGatherLane, GiScene, OverlayLane, OverlayRenderer, ScreenLane, ShadowLane,
};
use crate::pipelines::PipelineRegistry;
use crate::LaneError;
use lumen_core::renderer::{
    Command, CommandAllocatorId, CommandList, GpuDevice, QueueKind, RenderError,
    RenderSettings, RenderStats, ResourceState, ShaderBlobProvider, TextureId,
};
use lumen_core::{
    AccelerationStructureManager, DescriptorAllocator, FrameSynchronizer, StagingTransfer,
    SwapChainManager, UploadRing,
};
use std::sync::Arc;
use std::time::Instant;

/// Mutable access to the frame components, borrowed for one call.
pub struct FrameServices<'a> {
    /// The device.
    pub device: &'a Arc<dyn GpuDevice>,
    /// Per-slot fences.
    pub frame_sync: &'a mut FrameSynchronizer,
    /// Per-slot constant regions.
    pub upload: &'a mut UploadRing,
    /// Back buffers and main depth.
    pub swap_chain: &'a mut SwapChainManager,
    /// Descriptor slots.
    pub descriptors: &'a mut DescriptorAllocator,
    /// Acceleration structures.
    pub accel: &'a mut AccelerationStructureManager,
    /// Blocking uploads.
    pub staging: &'a mut StagingTransfer,
}

#[derive(Debug, Clone, Copy)]
struct ActiveFrame {
    slot: usize,
    back_buffer: TextureId,
    started: Instant,
    submitted: bool,
}

/// Owns the frame's command list, the pipelines and the passes, and records one
/// frame per tick.
pub struct CommandSequencer {
    allocators: Vec<CommandAllocatorId>,
    list: CommandList,
    pipelines: PipelineRegistry,
    shadow: ShadowLane,
    gi: GiGatherLane,
    color: ColorLane,
    screen: ScreenLane,
    overlay: OverlayLane,
    settings: RenderSettings,
    stats: RenderStats,
    committed_stats: RenderStats,
    frame: Option<ActiveFrame>,
}

impl std::fmt::Debug for CommandSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSequencer")
            .field("pipelines", &self.pipelines.len())
            .field("gi_supported", &self.gi.is_supported())
            .field("frame", &self.frame)
            .field("stats", &self.stats)
            .finish()
    }
}

impl CommandSequencer {
    /// Creates the allocators, pipelines and every lane's resources.
    ///
    /// # Errors
    /// Any failure is fatal: a missing shader, a rejected pipeline or a resource the
    /// device could not create.
    pub fn new(
        services: &mut FrameServices<'_>,
        shaders: &dyn ShaderBlobProvider,
        settings: RenderSettings,
    ) -> Result<Self, LaneError> {
        let device = services.device;
        let frame_count = services.frame_sync.slot_count();
        let allocators = (0..frame_count)
            .map(|_| device.create_command_allocator(QueueKind::Direct))
            .collect::<Result<Vec<_>, _>>()?;
        let mut list = CommandList::new(QueueKind::Direct, allocators[0]);
        list.close()?;

        let pipelines = PipelineRegistry::new(&**device, shaders)?;
        let (width, height) = services.swap_chain.size();

        let mut sequencer = Self {
            allocators,
            list,
            pipelines,
            shadow: ShadowLane::new(),
            gi: GiGatherLane::new(),
            color: ColorLane::new(),
            screen: ScreenLane::new(),
            overlay: OverlayLane::new(),
            settings,
            stats: RenderStats::default(),
            committed_stats: RenderStats::default(),
            frame: None,
        };

        let mut init = LaneInit {
            device,
            descriptors: &mut *services.descriptors,
            staging: &mut *services.staging,
            shaders,
            settings: &sequencer.settings,
            frame_count,
            width,
            height,
        };
        let lanes: [&mut dyn FrameLane; 5] = [
            &mut sequencer.shadow,
            &mut sequencer.gi,
            &mut sequencer.color,
            &mut sequencer.screen,
            &mut sequencer.overlay,
        ];
        for lane in lanes {
            lane.on_initialize(&mut init)?;
            log::debug!("Lane '{}' initialized", lane.strategy_name());
        }

        log::info!(
            "CommandSequencer ready: {frame_count} frame slots, GI gather {}",
            if sequencer.gi.is_supported() {
                "available"
            } else {
                "unavailable"
            }
        );
        Ok(sequencer)
    }

    /// The current settings.
    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Settings changed here apply from the next frame.
    pub fn settings_mut(&mut self) -> &mut RenderSettings {
        &mut self.settings
    }

    /// Counters of the last finished frame.
    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }

    /// The graphics pipelines.
    pub fn pipelines(&self) -> &PipelineRegistry {
        &self.pipelines
    }

    /// The GI gather pass.
    pub fn gi_lane(&self) -> &GiGatherLane {
        &self.gi
    }

    /// The shadow pass.
    pub fn shadow_lane(&self) -> &ShadowLane {
        &self.shadow
    }

    /// The color pass.
    pub fn color_lane(&self) -> &ColorLane {
        &self.color
    }

    /// Whether a frame is between `start_frame` and `present`.
    pub fn is_recording(&self) -> bool {
        self.frame.is_some()
    }

    /// Installs the GUI overlay.
    pub fn set_overlay(&mut self, overlay: Box<dyn OverlayRenderer>) {
        self.overlay.install(overlay);
    }

    /// Points the GI gather at a scene.
    pub fn attach_gi_scene(
        &mut self,
        services: &mut FrameServices<'_>,
        scene: GiScene,
    ) -> Result<(), LaneError> {
        self.gi
            .attach_scene(services.accel, services.descriptors, scene)
    }

    /// Begins the frame of the current back buffer and returns its slot.
    ///
    /// Blocks until the GPU has finished the previous frame that used this slot.
    pub fn start_frame(&mut self, services: &mut FrameServices<'_>) -> Result<usize, LaneError> {
        if self.frame.is_some() {
            return Err(LaneError::FrameInProgress);
        }
        self.overlay.apply_settings(&mut self.settings);

        let slot = services.swap_chain.current_index()?;
        let allocator = *self.allocators.get(slot).ok_or_else(|| {
            RenderError::Internal(format!("no command allocator for frame slot {slot}"))
        })?;
        services.frame_sync.begin_frame(slot)?;
        let started = Instant::now();
        let back_buffer = services.swap_chain.current_back_buffer()?;

        if let Err(err) = services.device.reset_command_allocator(allocator) {
            services.frame_sync.end_frame(slot)?;
            return Err(err.into());
        }
        self.list.reset(allocator);
        services.upload.begin_frame(slot);

        self.list
            .transition(back_buffer, ResourceState::Present, ResourceState::RenderTarget);
        self.list
            .record(Command::SetDescriptorHeap(services.descriptors.heap()));

        self.committed_stats = self.stats.clone();
        self.stats.draw_calls = 0;
        self.frame = Some(ActiveFrame {
            slot,
            back_buffer,
            started,
            submitted: false,
        });
        log::trace!("Frame slot {slot} started on back buffer {back_buffer:?}");
        Ok(slot)
    }

    /// Records every active lane for `draws`.
    pub fn record_lanes(
        &mut self,
        services: &mut FrameServices<'_>,
        draws: &[SceneDraw],
    ) -> Result<(), LaneError> {
        let result = self.record_lanes_inner(services, draws);
        if result.is_err() {
            self.abort_frame(services);
        }
        result
    }

    fn record_lanes_inner(
        &mut self,
        services: &mut FrameServices<'_>,
        draws: &[SceneDraw],
    ) -> Result<(), LaneError> {
        let frame = match self.frame {
            Some(frame) if !frame.submitted => frame,
            _ => return Err(LaneError::NoFrameInProgress),
        };
        let (width, height) = services.swap_chain.size();
        let targets = FrameTargets {
            back_buffer: frame.back_buffer,
            depth: services.swap_chain.depth_target(),
            viewport: services.swap_chain.viewport(),
            scissor: services.swap_chain.scissor(),
            width,
            height,
        };

        let Self {
            list,
            pipelines,
            shadow,
            gi,
            color,
            screen,
            overlay,
            settings,
            stats,
            ..
        } = self;
        let mut ctx = FrameContext {
            list,
            upload: &mut *services.upload,
            accel: &mut *services.accel,
            pipelines,
            targets,
            draws,
            settings,
            heap: services.descriptors.heap(),
            now: frame.started,
            stats,
        };
        let lanes: [&mut dyn FrameLane; 5] = [shadow, gi, color, screen, overlay];
        for lane in lanes {
            if !lane.is_active(&ctx) {
                log::trace!("Lane '{}' skipped", lane.strategy_name());
                continue;
            }
            ctx.list.begin_event(lane.strategy_name());
            lane.execute(&mut ctx)?;
            ctx.list.end_event();
        }
        Ok(())
    }

    /// Returns the back buffer to `Present`, closes the list and executes it.
    pub fn submit(&mut self, services: &mut FrameServices<'_>) -> Result<(), LaneError> {
        let result = self.submit_inner(services);
        if result.is_err() {
            self.abort_frame(services);
        }
        result
    }

    fn submit_inner(&mut self, services: &mut FrameServices<'_>) -> Result<(), LaneError> {
        let frame = match self.frame.as_mut() {
            Some(frame) if !frame.submitted => frame,
            _ => return Err(LaneError::NoFrameInProgress),
        };
        self.list.transition(
            frame.back_buffer,
            ResourceState::RenderTarget,
            ResourceState::Present,
        );
        self.list.close()?;
        services
            .device
            .execute_command_list(QueueKind::Direct, &self.list)?;
        services.upload.reset_draw_count();
        frame.submitted = true;
        for lane in self.lanes_mut() {
            lane.on_frame_submitted();
        }
        Ok(())
    }

    fn lanes_mut(&mut self) -> [&mut dyn FrameLane; 5] {
        [
            &mut self.shadow,
            &mut self.gi,
            &mut self.color,
            &mut self.screen,
            &mut self.overlay,
        ]
    }

    /// Presents the submitted frame and signals its slot fence.
    pub fn present(
        &mut self,
        services: &mut FrameServices<'_>,
    ) -> Result<RenderStats, LaneError> {
        let frame = match self.frame {
            Some(frame) if frame.submitted => frame,
            _ => return Err(LaneError::NoFrameInProgress),
        };
        self.frame = None;

        let presented = services.swap_chain.present(self.settings.vsync);
        services.frame_sync.end_frame(frame.slot)?;
        presented?;

        self.stats.frame_number += 1;
        self.stats.cpu_frame_time_ms = frame.started.elapsed().as_secs_f32() * 1000.0;
        Ok(self.stats.clone())
    }

    /// Records, submits and presents the frame started by
    /// [`start_frame`](Self::start_frame).
    pub fn finish_frame(
        &mut self,
        services: &mut FrameServices<'_>,
        draws: &[SceneDraw],
    ) -> Result<RenderStats, LaneError> {
        self.record_lanes(services, draws)?;
        self.submit(services)?;
        self.present(services)
    }

    /// Drops the frame being recorded without executing it.
    pub fn abort_frame(&mut self, services: &mut FrameServices<'_>) {
        let Some(frame) = self.frame.take() else {
            return;
        };
        if !self.list.is_closed() {
            // A closed list is never executed here; closing only ends the recording.
            if let Err(err) = self.list.close() {
                log::error!("Failed to close aborted frame list on slot {}: {err}", frame.slot);
            }
        }
        for lane in self.lanes_mut() {
            lane.on_frame_aborted();
        }
        // Counters only ever describe executed work.
        self.stats = self.committed_stats.clone();
        services.upload.reset_draw_count();
        if let Err(err) = services.frame_sync.end_frame(frame.slot) {
            log::error!("Failed to signal aborted frame slot {}: {err}", frame.slot);
        }
        log::warn!("Frame on slot {} aborted", frame.slot);
    }

    /// Waits for every frame slot to retire.
    pub fn flush(&mut self, services: &mut FrameServices<'_>) -> Result<(), LaneError> {
        services.frame_sync.flush()?;
        Ok(())
    }

    /// Resizes the swap chain and every size-dependent lane resource.
    ///
    /// Returns `false` for zero or unchanged sizes, which are ignored.
    pub fn resize(
        &mut self,
        services: &mut FrameServices<'_>,
        width: u32,
        height: u32,
    ) -> Result<bool, LaneError> {
        if self.frame.is_some() {
            return Err(LaneError::FrameInProgress);
        }
        if !services
            .swap_chain
            .resize(services.frame_sync, width, height)?
        {
            return Ok(false);
        }
        let Self {
            shadow,
            gi,
            color,
            screen,
            overlay,
            ..
        } = self;
        let lanes: [&mut dyn FrameLane; 5] = [shadow, gi, color, screen, overlay];
        for lane in lanes {
            lane.on_resize(&**services.device, services.descriptors, width, height)?;
        }
        Ok(true)
    }

    /// Flushes the GPU and releases every lane and pipeline.
    pub fn shutdown(mut self, services: &mut FrameServices<'_>) -> Result<(), LaneError> {
        self.abort_frame(services);
        services.frame_sync.flush()?;
        let device = &**services.device;
        let Self {
            shadow,
            gi,
            color,
            screen,
            overlay,
            pipelines,
            ..
        } = &mut self;
        let lanes: [&mut dyn FrameLane; 5] = [shadow, gi, color, screen, overlay];
        for lane in lanes {
            lane.on_shutdown(device)?;
        }
        std::mem::take(pipelines).destroy(device)?;
        log::info!("CommandSequencer shut down");
        Ok(())
    }
}
