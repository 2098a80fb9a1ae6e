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

//! The lit scene pass.

use super::{copy_texture, record_mesh_draw};
use crate::lane::{FrameContext, FrameLane, LaneInit, LaneKind};
use crate::pipelines::{color_root, PipelineKind};
use crate::LaneError;
use lumen_core::renderer::{
    Command, GpuDevice, PassIndex, ResourceState, ResourceView, TextureDescriptor,
    TextureFormat, TextureId,
};
use lumen_core::swapchain::BACK_BUFFER_FORMAT;
use lumen_core::{ConstantCategory, DescriptorAllocator, DescriptorIndex};

#[derive(Debug, Clone, Copy)]
struct SceneCopies {
    color: TextureId,
    depth: TextureId,
}

impl SceneCopies {
    fn create(device: &dyn GpuDevice, width: u32, height: u32) -> Result<Self, LaneError> {
        Ok(Self {
            color: device.create_texture(&TextureDescriptor::sampled(
                "scene color",
                width,
                height,
                BACK_BUFFER_FORMAT,
            ))?,
            depth: device.create_texture(&TextureDescriptor::sampled(
                "scene depth",
                width,
                height,
                TextureFormat::R32Float,
            ))?,
        })
    }

    fn destroy(self, device: &dyn GpuDevice) -> Result<(), LaneError> {
        device.destroy_texture(self.color)?;
        device.destroy_texture(self.depth)?;
        Ok(())
    }
}

/// Draws the scene with shadows and probe lighting into the back buffer, then
/// snapshots color and depth for the passes that follow.
#[derive(Debug, Default)]
pub struct ColorLane {
    copies: Option<SceneCopies>,
}

impl ColorLane {
    /// Creates an uninitialized lane.
    pub fn new() -> Self {
        Self::default()
    }

    /// The scene color copy, once initialized.
    pub fn scene_color(&self) -> Option<TextureId> {
        self.copies.map(|c| c.color)
    }

    /// The scene depth copy, once initialized.
    pub fn scene_depth(&self) -> Option<TextureId> {
        self.copies.map(|c| c.depth)
    }
}

impl FrameLane for ColorLane {
    fn strategy_name(&self) -> &'static str {
        "Color"
    }

    fn lane_kind(&self) -> LaneKind {
        LaneKind::Color
    }

    fn on_initialize(&mut self, init: &mut LaneInit<'_>) -> Result<(), LaneError> {
        let copies = SceneCopies::create(&**init.device, init.width, init.height)?;
        init.descriptors.allocate(
            DescriptorIndex::SceneColorSrv,
            ResourceView::TextureSrv(copies.color),
        )?;
        init.descriptors.allocate(
            DescriptorIndex::SceneDepthSrv,
            ResourceView::TextureSrv(copies.depth),
        )?;
        self.copies = Some(copies);
        Ok(())
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), LaneError> {
        let copies = self
            .copies
            .ok_or_else(|| LaneError::not_initialized(self.strategy_name()))?;
        let pipeline = ctx.pipelines.get(PipelineKind::Color)?;
        let per_frame = ctx.upload.address(ConstantCategory::PerFrame, 0)?;
        let per_pass = ctx
            .upload
            .address(ConstantCategory::PerPass, PassIndex::Color as usize)?;
        let targets = ctx.targets;

        let list = &mut *ctx.list;
        pipeline.bind(list);
        list.record(Command::SetGraphicsRootConstantBuffer {
            parameter: color_root::PER_FRAME,
            address: per_frame,
        });
        list.record(Command::SetGraphicsRootConstantBuffer {
            parameter: color_root::PER_PASS,
            address: per_pass,
        });
        list.record(Command::SetGraphicsRootDescriptorTable {
            parameter: color_root::LIGHTING_TABLE,
            base_descriptor: DescriptorIndex::ShadowMapSrv.index(),
        });
        list.record(Command::SetGraphicsRootConstantBuffer {
            parameter: color_root::PIXEL_PER_FRAME,
            address: per_frame,
        });
        list.record(Command::SetViewport(targets.viewport));
        list.record(Command::SetScissor(targets.scissor));
        list.record(Command::SetRenderTargets {
            color: Some(targets.back_buffer),
            depth: Some(targets.depth),
        });
        list.record(Command::ClearRenderTarget {
            target: targets.back_buffer,
            color: ctx.settings.clear_color,
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
                color_root::PER_OBJECT,
                &draw.mesh,
                &draw.constants,
            )?;
        }

        copy_texture(
            list,
            targets.back_buffer,
            ResourceState::RenderTarget,
            copies.color,
            ResourceState::PixelShaderResource,
        );
        copy_texture(
            list,
            targets.depth,
            ResourceState::DepthWrite,
            copies.depth,
            ResourceState::PixelShaderResource,
        );
        Ok(())
    }

    fn on_resize(
        &mut self,
        device: &dyn GpuDevice,
        descriptors: &mut DescriptorAllocator,
        width: u32,
        height: u32,
    ) -> Result<(), LaneError> {
        if let Some(old) = self.copies.take() {
            old.destroy(device)?;
        }
        let copies = SceneCopies::create(device, width, height)?;
        descriptors.refresh(
            DescriptorIndex::SceneColorSrv,
            ResourceView::TextureSrv(copies.color),
        )?;
        descriptors.refresh(
            DescriptorIndex::SceneDepthSrv,
            ResourceView::TextureSrv(copies.depth),
        )?;
        self.copies = Some(copies);
        log::debug!("Scene copies recreated at {width}x{height}");
        Ok(())
    }

    fn on_shutdown(&mut self, device: &dyn GpuDevice) -> Result<(), LaneError> {
        if let Some(copies) = self.copies.take() {
            copies.destroy(device)?;
        }
        Ok(())
    }
}
