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

//! The facade a scene drives once per tick.

use crate::context::RenderContext;
use glam::{Mat4, Vec3, Vec4};
use lumen_core::renderer::{
    GpuDevice, InputSource, MaterialConstants, PassIndex, PerFrameConstants, PerObjectConstants,
    PerPassConstants, RenderError, RenderSettings, RenderStats, ResourceError,
    ShaderBlobProvider, TextureId, MAX_MATERIAL_COUNT, MAX_PROBE_COUNT,
};
use lumen_core::{BlasHandle, GpuMesh, MeshData, TlasHandle};
use lumen_infra::{builtin_shader_blobs, SoftwareDevice, SoftwareDeviceDescriptor};
use lumen_lanes::probes::{light_projection, light_view};
use lumen_lanes::{
    light_matrix, CommandSequencer, GiScene, OverlayRenderer, ProbeVolume, SceneDraw,
};
use std::sync::Arc;

/// Light and probe data written into the per-frame constants of every frame.
#[derive(Debug, Clone, Copy)]
pub struct LightingSetup {
    /// Direction the light travels in.
    pub light_direction: Vec3,
    /// Light intensity.
    pub light_intensity: f32,
    /// The probe grid gathered by the GI pass.
    pub probes: ProbeVolume,
}

/// The renderer: one [`RenderContext`] plus the frame sequencer.
///
/// Per tick the scene calls [`submit_mesh`](Self::submit_mesh) for every visible
/// object, then [`render_frame`](Self::render_frame).
#[derive(Debug)]
pub struct Renderer {
    context: RenderContext,
    sequencer: CommandSequencer,
    meshes: Vec<GpuMesh>,
    draws: Vec<SceneDraw>,
    per_frame: PerFrameConstants,
    light_direction: Vec3,
    materials: MaterialConstants,
}

impl Renderer {
    /// Builds the renderer on `device`, reading shader blobs from `shaders`.
    ///
    /// # Errors
    /// Every failure here is fatal: a missing shader blob, a device that cannot
    /// create a fence, a buffer or a pipeline.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        shaders: &dyn ShaderBlobProvider,
        settings: RenderSettings,
    ) -> Result<Self, RenderError> {
        let mut context = RenderContext::new(device, &settings)?;
        let sequencer = CommandSequencer::new(&mut context.services(), shaders, settings)?;
        let per_frame = PerFrameConstants::default();
        Ok(Self {
            context,
            sequencer,
            meshes: Vec::new(),
            draws: Vec::new(),
            light_direction: per_frame.light_direction_ws.truncate(),
            per_frame,
            materials: MaterialConstants::default(),
        })
    }

    /// Builds the renderer on a fresh [`SoftwareDevice`] with the built-in shaders.
    pub fn software(settings: RenderSettings) -> Result<Self, RenderError> {
        let device = SoftwareDevice::new(SoftwareDeviceDescriptor::default())?;
        Self::new(Arc::new(device), &builtin_shader_blobs(), settings)
    }

    /// Builds the renderer on the default hardware adapter with the WGSL shaders.
    ///
    /// The adapter exposes no raytracing pipelines, so the GI gather stays disabled.
    #[cfg(feature = "wgpu")]
    pub fn wgpu(settings: RenderSettings) -> Result<Self, RenderError> {
        use lumen_infra::{wgsl_shader_blobs, WgpuDevice, WgpuDeviceDescriptor};

        let device = WgpuDevice::new(WgpuDeviceDescriptor::default())?;
        Self::new(Arc::new(device), &wgsl_shader_blobs(), settings)
    }

    /// The device.
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        self.context.device()
    }

    /// The renderer state.
    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    /// The settings the next frame will use.
    pub fn settings(&self) -> &RenderSettings {
        self.sequencer.settings()
    }

    /// Settings changed here apply from the next frame.
    pub fn settings_mut(&mut self) -> &mut RenderSettings {
        self.sequencer.settings_mut()
    }

    /// Counters of the last finished frame.
    pub fn stats(&self) -> &RenderStats {
        self.sequencer.stats()
    }

    /// Installs the GUI overlay.
    pub fn set_overlay(&mut self, overlay: Box<dyn OverlayRenderer>) {
        self.sequencer.set_overlay(overlay);
    }

    /// Probe irradiance written by the GI gather.
    pub fn irradiance_texture(&self) -> Option<TextureId> {
        self.sequencer.gi_lane().irradiance()
    }

    /// Probe visibility written by the GI gather.
    pub fn visibility_texture(&self) -> Option<TextureId> {
        self.sequencer.gi_lane().visibility()
    }

    /// Whether the device can run the GI gather.
    pub fn supports_gi(&self) -> bool {
        self.sequencer.gi_lane().is_supported()
    }

    /// Uploads meshes to GPU-local memory. Blocks until the copies are complete.
    pub fn upload_meshes(&mut self, meshes: &[MeshData]) -> Result<Vec<GpuMesh>, RenderError> {
        let uploaded = self.context.staging().upload_meshes(meshes)?;
        self.meshes.extend(uploaded.iter().cloned());
        Ok(uploaded)
    }

    /// Creates the bottom-level structure of an uploaded mesh.
    pub fn create_bottom_level_structure(
        &mut self,
        mesh: &GpuMesh,
    ) -> Result<BlasHandle, RenderError> {
        Ok(self.context.accel_mut().create_bottom_level(mesh)?)
    }

    /// Creates a top-level structure with room for `instance_count` instances.
    pub fn create_top_level_structure(
        &mut self,
        allow_update: bool,
        instance_count: u32,
    ) -> Result<TlasHandle, RenderError> {
        Ok(self
            .context
            .accel_mut()
            .create_top_level(allow_update, instance_count)?)
    }

    /// Points instance `instance_id` of `tlas` at `blas`, placed by `transform`.
    pub fn set_instance_blas_and_transform(
        &mut self,
        tlas: TlasHandle,
        instance_id: u32,
        blas: BlasHandle,
        transform: &Mat4,
    ) -> Result<(), RenderError> {
        Ok(self
            .context
            .accel_mut()
            .set_instance_blas_and_transform(tlas, instance_id, blas, transform)?)
    }

    /// Builds bottom-level structures. Blocks until the build is complete.
    pub fn build_bottom_level_structures(&mut self, blas: &[BlasHandle]) -> Result<(), RenderError> {
        self.context.accel_mut().build_bottom_level(blas)
    }

    /// Builds top-level structures. Blocks until the build is complete.
    pub fn build_top_level_structures(&mut self, tlas: &[TlasHandle]) -> Result<(), RenderError> {
        self.context.accel_mut().build_top_level(tlas)
    }

    /// Points the GI gather at `scene`. Its TLAS must already be built.
    pub fn attach_gi_scene(&mut self, scene: GiScene) -> Result<(), RenderError> {
        self.sequencer
            .attach_gi_scene(&mut self.context.services(), scene)?;
        Ok(())
    }

    /// Sets the light and probe data for the following frames.
    ///
    /// # Errors
    /// [`ResourceError::CapacityExceeded`] when the volume holds more than
    /// [`MAX_PROBE_COUNT`] probes.
    pub fn update_per_frame_constants(&mut self, setup: &LightingSetup) -> Result<(), RenderError> {
        let probe_count = setup.probes.probe_count();
        if probe_count > MAX_PROBE_COUNT {
            log::error!("Probe volume holds {probe_count} probes, at most {MAX_PROBE_COUNT} fit");
            return Err(ResourceError::CapacityExceeded {
                what: "probe positions",
                capacity: MAX_PROBE_COUNT,
                requested: probe_count,
            }
            .into());
        }

        let direction = setup.light_direction.normalize_or(Vec3::NEG_Y);
        let mut constants = PerFrameConstants {
            light_matrix: light_matrix(direction),
            light_direction_ws: direction.extend(0.0),
            probe_count: probe_count as u32,
            probe_spacing: setup.probes.spacing,
            light_intensity: setup.light_intensity,
            ..Default::default()
        };
        for (slot, position) in setup.probes.positions().into_iter().enumerate() {
            constants.probe_positions_ws[slot] = position;
        }
        self.per_frame = constants;
        self.light_direction = direction;
        Ok(())
    }

    /// Sets the material palette for the following frames.
    ///
    /// # Errors
    /// [`ResourceError::CapacityExceeded`] for more than [`MAX_MATERIAL_COUNT`] colors.
    pub fn update_material_constants(&mut self, colors: &[Vec4]) -> Result<(), RenderError> {
        if colors.len() > MAX_MATERIAL_COUNT {
            log::error!(
                "{} materials submitted, at most {MAX_MATERIAL_COUNT} fit",
                colors.len()
            );
            return Err(ResourceError::CapacityExceeded {
                what: "material colors",
                capacity: MAX_MATERIAL_COUNT,
                requested: colors.len(),
            }
            .into());
        }
        let mut materials = MaterialConstants::default();
        materials.colors[..colors.len()].copy_from_slice(colors);
        self.materials = materials;
        Ok(())
    }

    /// Queues `mesh` for the next frame.
    pub fn submit_mesh(&mut self, mesh: &GpuMesh, world: Mat4, color: Vec4, lit: bool) {
        self.draws.push(SceneDraw {
            mesh: mesh.clone(),
            constants: PerObjectConstants::new(world, color, lit),
        });
    }

    /// Number of draws queued for the next frame.
    pub fn queued_draws(&self) -> usize {
        self.draws.len()
    }

    /// Renders and presents one frame of the queued draws from the camera of `input`.
    ///
    /// The draw queue is emptied whether or not the frame succeeds. A failed frame
    /// is dropped without touching the GPU and the next call starts cleanly.
    pub fn render_frame(&mut self, input: &dyn InputSource) -> Result<RenderStats, RenderError> {
        let draws = std::mem::take(&mut self.draws);
        let camera = input.camera_state();

        self.sequencer.start_frame(&mut self.context.services())?;

        let (width, height) = self.context.swap_chain().size();
        let shadow_view = light_view(self.light_direction);
        let shadow_pass = PerPassConstants {
            view: shadow_view,
            projection: light_projection(),
            camera_position_ws: shadow_view.inverse().w_axis,
        };
        let color_pass = PerPassConstants {
            view: camera.view_matrix(),
            projection: camera.projection_matrix(width as f32, height as f32),
            camera_position_ws: camera.position.extend(1.0),
        };
        if let Err(err) = self.write_frame_constants(&shadow_pass, &color_pass) {
            self.sequencer.abort_frame(&mut self.context.services());
            return Err(err.into());
        }

        let stats = self
            .sequencer
            .finish_frame(&mut self.context.services(), &draws)?;
        log::trace!(
            "Frame {} done: {} draw calls, {} GI gathers",
            stats.frame_number,
            stats.draw_calls,
            stats.gi_gathers
        );
        Ok(stats)
    }

    fn write_frame_constants(
        &mut self,
        shadow_pass: &PerPassConstants,
        color_pass: &PerPassConstants,
    ) -> Result<(), ResourceError> {
        let upload = self.context.upload();
        upload.write_per_frame(&self.per_frame)?;
        upload.write_material(&self.materials)?;
        upload.write_per_pass(PassIndex::Shadow, shadow_pass)?;
        upload.write_per_pass(PassIndex::Color, color_pass)?;
        Ok(())
    }

    /// Resizes the swap chain after flushing the GPU.
    ///
    /// Returns `false` for zero or unchanged sizes.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<bool, RenderError> {
        let resized = self
            .sequencer
            .resize(&mut self.context.services(), width, height)?;
        if resized {
            log::info!("Renderer resized to {width}x{height}");
        }
        Ok(resized)
    }

    /// Waits until the GPU has finished every submitted frame.
    pub fn flush(&mut self) -> Result<(), RenderError> {
        self.sequencer.flush(&mut self.context.services())?;
        Ok(())
    }

    /// Flushes the GPU and destroys every resource the renderer created.
    pub fn shutdown(self) -> Result<(), RenderError> {
        log::info!("Renderer shutting down...");
        let Self {
            mut context,
            sequencer,
            meshes,
            ..
        } = self;
        let device = context.device().clone();
        sequencer.shutdown(&mut context.services())?;
        context.destroy()?;
        for mesh in &meshes {
            mesh.destroy(&*device)?;
        }
        log::info!("Renderer shutdown complete.");
        Ok(())
    }
}
