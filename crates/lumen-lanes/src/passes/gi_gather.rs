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

//! Raytraced probe gather.
//!
//! The gather refits the scene TLAS, moves both probe textures into unordered
//! access, traces one launch that fills irradiance and visibility for every probe,
//! and returns the textures to `PixelShaderResource` for the color pass. It runs
//! at most once per `gi_gather_interval`; the first eligible frame gathers
//! immediately.

use crate::lane::{FrameContext, FrameLane, LaneInit, LaneKind};
use crate::raytracing::{hit_group_args, ray_generation_args, RaytracingPipeline, ShaderTable};
use crate::LaneError;
use lumen_core::renderer::{
    Command, DeviceFeature, GpuDevice, PassIndex, ResourceBarrier, ResourceState, ResourceView,
    TextureDescriptor, TextureFormat, TextureId, IRRADIANCE_RAYS_PER_PROBE, MAX_PROBE_COUNT,
    VISIBILITY_RAYS_PER_PROBE,
};
use lumen_core::{
    AccelerationStructureManager, ConstantCategory, DescriptorAllocator, DescriptorIndex,
    GpuMesh, TlasHandle,
};
use std::time::Instant;

/// The raytraced scene: the TLAS to refit and the mesh hit shaders read vertices from.
#[derive(Debug, Clone)]
pub struct GiScene {
    /// The top-level structure traced against.
    pub tlas: TlasHandle,
    /// The mesh whose raw vertices hit shaders fetch.
    pub hit_mesh: GpuMesh,
}

#[derive(Debug, Clone, Copy)]
struct ProbeTextures {
    irradiance: TextureId,
    visibility: TextureId,
}

/// Gathers probe irradiance and visibility with rays.
#[derive(Debug, Default)]
pub struct GiGatherLane {
    textures: Option<ProbeTextures>,
    pipeline: Option<RaytracingPipeline>,
    shader_tables: Vec<ShaderTable>,
    scene: Option<GiScene>,
    last_gather: Option<Instant>,
    pending_gather: Option<Instant>,
}

impl GiGatherLane {
    /// Creates an uninitialized lane.
    pub fn new() -> Self {
        Self::default()
    }

    /// The irradiance texture, once initialized.
    pub fn irradiance(&self) -> Option<TextureId> {
        self.textures.map(|t| t.irradiance)
    }

    /// The visibility texture, once initialized.
    pub fn visibility(&self) -> Option<TextureId> {
        self.textures.map(|t| t.visibility)
    }

    /// Whether the device could create the raytracing pipeline.
    pub fn is_supported(&self) -> bool {
        self.pipeline.is_some()
    }

    /// The attached scene, if any.
    pub fn scene(&self) -> Option<&GiScene> {
        self.scene.as_ref()
    }

    /// Points the gather at `scene` and publishes its BVH and vertices to the
    /// descriptor heap. Attaching again refreshes both descriptors in place.
    pub fn attach_scene(
        &mut self,
        accel: &AccelerationStructureManager,
        descriptors: &mut DescriptorAllocator,
        scene: GiScene,
    ) -> Result<(), LaneError> {
        let bvh = ResourceView::AccelerationStructure(accel.top_level(scene.tlas)?.address());
        let vertices = scene.hit_mesh.vertex_buffer_view();
        for (index, view) in [
            (DescriptorIndex::SceneBvhSrv, bvh),
            (DescriptorIndex::CubeVertexBufferSrv, vertices),
        ] {
            if descriptors.is_allocated(index) {
                descriptors.refresh(index, view)?;
            } else {
                descriptors.allocate(index, view)?;
            }
        }
        log::info!(
            "GI scene attached: {:?}, hit mesh '{}'",
            scene.tlas,
            scene.hit_mesh.label()
        );
        self.scene = Some(scene);
        self.last_gather = None;
        self.pending_gather = None;
        Ok(())
    }

    /// When the last executed gather was recorded.
    pub fn last_gather(&self) -> Option<Instant> {
        self.last_gather
    }

    fn is_due(&self, now: Instant, interval: std::time::Duration) -> bool {
        match self.last_gather {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= interval,
        }
    }

    fn create_textures(init: &mut LaneInit<'_>) -> Result<ProbeTextures, LaneError> {
        let storage = |label, height, format| TextureDescriptor {
            allow_unordered_access: true,
            ..TextureDescriptor::sampled(label, MAX_PROBE_COUNT as u32, height, format)
        };
        let irradiance = init.device.create_texture(&storage(
            "probe irradiance",
            IRRADIANCE_RAYS_PER_PROBE,
            TextureFormat::Rgba16Float,
        ))?;
        let visibility = init.device.create_texture(&storage(
            "probe visibility",
            VISIBILITY_RAYS_PER_PROBE,
            TextureFormat::Rg16Float,
        ))?;

        let descriptors = &mut *init.descriptors;
        descriptors.allocate(
            DescriptorIndex::IrradianceUav,
            ResourceView::TextureUav(irradiance),
        )?;
        descriptors.allocate(
            DescriptorIndex::VisibilityUav,
            ResourceView::TextureUav(visibility),
        )?;
        descriptors.allocate(
            DescriptorIndex::IrradianceSrv,
            ResourceView::TextureSrv(irradiance),
        )?;
        descriptors.allocate(
            DescriptorIndex::VisibilitySrv,
            ResourceView::TextureSrv(visibility),
        )?;
        Ok(ProbeTextures {
            irradiance,
            visibility,
        })
    }
}

impl FrameLane for GiGatherLane {
    fn strategy_name(&self) -> &'static str {
        "GiGather"
    }

    fn lane_kind(&self) -> LaneKind {
        LaneKind::GlobalIllumination
    }

    fn on_initialize(&mut self, init: &mut LaneInit<'_>) -> Result<(), LaneError> {
        // The color pass samples both textures whether or not rays are available.
        self.textures = Some(Self::create_textures(init)?);

        if !init.device.supports_feature(DeviceFeature::Raytracing) {
            log::warn!("Device has no raytracing support; GI gather disabled");
            return Ok(());
        }
        self.pipeline = Some(RaytracingPipeline::create(&**init.device, init.shaders)?);
        self.shader_tables = (0..init.frame_count)
            .map(|_| ShaderTable::new(init.device.clone()))
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    fn is_active(&self, ctx: &FrameContext<'_>) -> bool {
        ctx.settings.gi_gather_enabled
            && self.pipeline.is_some()
            && self.scene.is_some()
            && self.is_due(ctx.now, ctx.settings.gi_gather_interval())
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), LaneError> {
        let name = self.strategy_name();
        let textures = self.textures.ok_or(LaneError::not_initialized(name))?;
        let (Some(pipeline), Some(scene)) = (&self.pipeline, &self.scene) else {
            return Err(LaneError::not_initialized(name));
        };
        let table = self
            .shader_tables
            .get(ctx.upload.current_slot())
            .ok_or(LaneError::not_initialized(name))?;

        ctx.accel.rebuild_tlas(scene.tlas, ctx.list)?;
        ctx.stats.tlas_refits += 1;

        let per_frame = ctx.upload.address(ConstantCategory::PerFrame, 0)?;
        let dispatch = table.write(
            pipeline,
            &{
                let mut args = [0; ray_generation_args::COUNT];
                args[ray_generation_args::SCENE_TABLE] =
                    u64::from(DescriptorIndex::SceneBvhSrv.index());
                args[ray_generation_args::PER_FRAME] = per_frame.0;
                args
            },
            &{
                let mut args = [0; hit_group_args::COUNT];
                args[hit_group_args::MATERIAL] =
                    ctx.upload.address(ConstantCategory::Material, 0)?.0;
                args[hit_group_args::PER_FRAME] = per_frame.0;
                args[hit_group_args::PER_PASS] = ctx
                    .upload
                    .address(ConstantCategory::PerPass, PassIndex::Shadow as usize)?
                    .0;
                args[hit_group_args::SHADOW_MAP] =
                    u64::from(DescriptorIndex::ShadowMapSrv.index());
                args[hit_group_args::VERTICES] =
                    u64::from(DescriptorIndex::CubeVertexBufferSrv.index());
                args
            },
        )?;

        let list = &mut *ctx.list;
        let to_uav = [
            ResourceBarrier::transition(
                textures.irradiance,
                ResourceState::PixelShaderResource,
                ResourceState::UnorderedAccess,
            ),
            ResourceBarrier::transition(
                textures.visibility,
                ResourceState::PixelShaderResource,
                ResourceState::UnorderedAccess,
            ),
        ];
        list.barrier(&to_uav);
        list.record(Command::SetPipeline(pipeline.id()));
        list.record(Command::DispatchRays(dispatch));
        list.barrier(&[
            ResourceBarrier::uav(textures.irradiance),
            ResourceBarrier::uav(textures.visibility),
        ]);
        list.barrier(&to_uav.map(|b| b.reversed()));

        self.pending_gather = Some(ctx.now);
        ctx.stats.gi_gathers += 1;
        log::trace!("GI gather recorded (total {})", ctx.stats.gi_gathers);
        Ok(())
    }

    fn on_frame_submitted(&mut self) {
        if let Some(recorded) = self.pending_gather.take() {
            self.last_gather = Some(recorded);
        }
    }

    fn on_frame_aborted(&mut self) {
        if self.pending_gather.take().is_some() {
            log::debug!("GI gather dropped with its frame; next frame gathers again");
        }
    }

    fn on_shutdown(&mut self, device: &dyn GpuDevice) -> Result<(), LaneError> {
        for table in self.shader_tables.drain(..) {
            table.destroy()?;
        }
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.destroy(device)?;
        }
        if let Some(textures) = self.textures.take() {
            device.destroy_texture(textures.irradiance)?;
            device.destroy_texture(textures.visibility)?;
        }
        self.scene = None;
        Ok(())
    }
}
