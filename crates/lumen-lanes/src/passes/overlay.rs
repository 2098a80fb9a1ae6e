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

//! The GUI overlay hook.

use crate::lane::{FrameContext, FrameLane, FrameTargets, LaneInit, LaneKind};
use crate::LaneError;
use lumen_core::renderer::{CommandList, GpuDevice, RenderSettings, RenderStats};

/// Records GUI draw commands on top of the finished frame.
///
/// The overlay owns descriptor slot 0 and sees the settings mutably so toggles
/// such as vsync or the GI gather take effect on the next frame.
pub trait OverlayRenderer: Send {
    /// Records the overlay into the back buffer, which is in `RenderTarget` state.
    fn record(
        &mut self,
        list: &mut CommandList,
        targets: &FrameTargets,
        stats: &RenderStats,
    ) -> Result<(), LaneError>;

    /// Applies any settings the user changed since the last frame.
    fn apply_settings(&mut self, _settings: &mut RenderSettings) {}
}

/// Runs the installed [`OverlayRenderer`], if any, as the last pass of the frame.
#[derive(Default)]
pub struct OverlayLane {
    renderer: Option<Box<dyn OverlayRenderer>>,
    descriptor: Option<u32>,
}

impl std::fmt::Debug for OverlayLane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayLane")
            .field("installed", &self.renderer.is_some())
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl OverlayLane {
    /// Creates a lane with no renderer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `renderer`, replacing the previous one.
    pub fn install(&mut self, renderer: Box<dyn OverlayRenderer>) {
        self.renderer = Some(renderer);
    }

    /// Removes the renderer.
    pub fn uninstall(&mut self) -> Option<Box<dyn OverlayRenderer>> {
        self.renderer.take()
    }

    /// Lets the renderer update settings before a frame is recorded.
    pub fn apply_settings(&mut self, settings: &mut RenderSettings) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.apply_settings(settings);
        }
    }
}

impl FrameLane for OverlayLane {
    fn strategy_name(&self) -> &'static str {
        "Overlay"
    }

    fn lane_kind(&self) -> LaneKind {
        LaneKind::Overlay
    }

    fn on_initialize(&mut self, init: &mut LaneInit<'_>) -> Result<(), LaneError> {
        self.descriptor = Some(init.descriptors.allocate_overlay()?);
        Ok(())
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), LaneError> {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.record(ctx.list, &ctx.targets, ctx.stats)?;
        }
        Ok(())
    }

    fn on_shutdown(&mut self, _device: &dyn GpuDevice) -> Result<(), LaneError> {
        self.renderer = None;
        Ok(())
    }
}
