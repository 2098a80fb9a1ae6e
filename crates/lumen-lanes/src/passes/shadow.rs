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

//! Depth from the light's point of view.

use super::{copy_texture, record_mesh_draw};
use crate::lane::{FrameContext, FrameLane, LaneInit, LaneKind};
use crate::pipelines::{shadow_root, PipelineKind, SHADOW_DEPTH_FORMAT};
use crate::LaneError;
use lumen_core::renderer::{
    Command, GpuDevice, ResourceState, ResourceView, ScissorRect, TextureDescriptor,
    TextureFormat, TextureId, Viewport,
};
use lumen_core::{ConstantCategory, DescriptorIndex};

#[derive(Debug, Clone, Copy)]
struct ShadowTargets {
    depth: TextureId,
    shadow_map: TextureId,
    resolution: u32,
}

/// Renders every submitted mesh into a depth target from the light, then copies the
/// depth into the sampled shadow map.
#[derive(Debug, Default)]
pub struct ShadowLane {
    targets: Option<ShadowTargets>,
}

impl ShadowLane {
    /// Creates an uninitialized lane.
    pub fn new() -> Self {
        Self::default()
    }

    /// The sampled shadow map, once initialized.
    pub fn shadow_map(&self) -> Option<TextureId> {
        self.targets.map(|t| t.shadow_map)
    }

    /// The depth target the pass renders into, once initialized.
    pub fn depth_target(&self) -> Option<TextureId> {
        self.targets.map(|t| t.depth)
    }
}

impl FrameLane for ShadowLane {
    fn strategy_name(&self) -> &'static str {
        "Shadow"
    }

    fn lane_kind(&self) -> LaneKind {
        LaneKind::Shadow
    }

    fn on_initialize(&mut self, init: &mut LaneInit<'_>) -> Result<(), LaneError> {
        let resolution = init.settings.shadow_map_resolution.max(1);
        let depth = init.device.create_texture(&TextureDescriptor {
            label: Some("shadow depth".into()),
            width: resolution,
            height: resolution,
            format: SHADOW_DEPTH_FORMAT,
            initial_state: ResourceState::DepthWrite,
            allow_render_target: false,
            allow_depth_stencil: true,
            allow_unordered_access: false,
        })?;
        let shadow_map = init.device.create_texture(&TextureDescriptor::sampled(
            "shadow map",
            resolution,
            resolution,
            TextureFormat::R32Float,
        ))?;
        init.descriptors.allocate(
            DescriptorIndex::ShadowMapSrv,
            ResourceView::TextureSrv(shadow_map),
        )?;

        log::info!("Shadow lane initialized ({resolution}x{resolution})");
        self.targets = Some(ShadowTargets {
            depth,
            shadow_map,
            resolution,
        });
        Ok(())
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), LaneError> {
        let targets = self
            .targets
            .ok_or_else(|| LaneError::not_initialized(self.strategy_name()))?;
        let pipeline = ctx.pipelines.get(PipelineKind::ShadowMap)?;
        let per_frame = ctx.upload.address(ConstantCategory::PerFrame, 0)?;

        let list = &mut *ctx.list;
        pipeline.bind(list);
        list.record(Command::SetGraphicsRootConstantBuffer {
            parameter: shadow_root::PER_FRAME,
            address: per_frame,
        });
        list.record(Command::SetViewport(Viewport::full(
            targets.resolution,
            targets.resolution,
        )));
        list.record(Command::SetScissor(ScissorRect::full(
            targets.resolution,
            targets.resolution,
        )));
        list.record(Command::SetRenderTargets {
            color: None,
            depth: Some(targets.depth),
        });
        list.record(Command::ClearDepth {
            target: targets.depth,
            depth: 1.0,
        });

        for draw in ctx.draws {
            record_mesh_draw(
                list,
                ctx.upload,
                ctx.stats,
                shadow_root::PER_OBJECT,
                &draw.mesh,
                &draw.constants,
            )?;
        }

        copy_texture(
            list,
            targets.depth,
            ResourceState::DepthWrite,
            targets.shadow_map,
            ResourceState::PixelShaderResource,
        );
        Ok(())
    }

    fn on_shutdown(&mut self, device: &dyn GpuDevice) -> Result<(), LaneError> {
        if let Some(targets) = self.targets.take() {
            device.destroy_texture(targets.depth)?;
            device.destroy_texture(targets.shadow_map)?;
        }
        Ok(())
    }
}
