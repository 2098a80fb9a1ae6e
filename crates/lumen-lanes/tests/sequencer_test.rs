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

//! Recording whole frames through the sequencer on the software device.

use glam::{Mat4, Vec3, Vec4};
use lumen_core::renderer::{
    GpuDevice, MaterialConstants, PassIndex, PerFrameConstants,
    PerObjectConstants, PerPassConstants, QueueKind, RenderSettings, ResourceError,
    ResourceState, Vertex, MAX_DRAWS_PER_FRAME,
};
use lumen_core::{
    AccelerationStructureManager, DescriptorAllocator, DescriptorIndex, FrameSynchronizer,
    GpuMesh, MeshData, StagingTransfer, SwapChainManager, UploadRing,
};
use lumen_infra::{builtin_shader_blobs, SoftwareDevice, SoftwareDeviceDescriptor};
use lumen_lanes::{
    CommandSequencer, FrameServices, GiScene, LaneError, ProbeVolume, SceneDraw,
};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    software: Arc<SoftwareDevice>,
    device: Arc<dyn GpuDevice>,
    frame_sync: FrameSynchronizer,
    upload: UploadRing,
    swap_chain: SwapChainManager,
    descriptors: DescriptorAllocator,
    accel: AccelerationStructureManager,
    staging: StagingTransfer,
}

impl Harness {
    fn new(raytracing: bool) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let software = Arc::new(
            SoftwareDevice::new(SoftwareDeviceDescriptor {
                raytracing,
                ..Default::default()
            })
            .unwrap(),
        );
        let device: Arc<dyn GpuDevice> = software.clone();
        Self {
            frame_sync: FrameSynchronizer::new(device.clone(), QueueKind::Direct, 3, TIMEOUT)
                .unwrap(),
            upload: UploadRing::new(device.clone(), 3).unwrap(),
            swap_chain: SwapChainManager::new(device.clone(), 64, 48, 3).unwrap(),
            descriptors: DescriptorAllocator::new(device.clone(), DescriptorIndex::COUNT)
                .unwrap(),
            accel: AccelerationStructureManager::new(device.clone(), TIMEOUT).unwrap(),
            staging: StagingTransfer::new(device.clone(), TIMEOUT).unwrap(),
            software,
            device,
        }
    }

    fn services(&mut self) -> FrameServices<'_> {
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

    fn sequencer(&mut self, settings: RenderSettings) -> CommandSequencer {
        CommandSequencer::new(&mut self.services(), &builtin_shader_blobs(), settings).unwrap()
    }

    fn cube(&mut self) -> GpuMesh {
        self.staging
            .upload_meshes(&[unit_cube()])
            .unwrap()
            .pop()
            .unwrap()
    }

    fn write_constants(&mut self) {
        let volume = ProbeVolume::new(Vec3::ZERO, Vec3::splat(2.0), 1.0);
        let mut per_frame = PerFrameConstants {
            probe_count: volume.probe_count() as u32,
            ..Default::default()
        };
        for (slot, position) in volume.positions().into_iter().enumerate() {
            per_frame.probe_positions_ws[slot] = position;
        }
        self.upload.write_per_frame(&per_frame).unwrap();
        for pass in [PassIndex::Shadow, PassIndex::Color] {
            self.upload
                .write_per_pass(pass, &PerPassConstants::default())
                .unwrap();
        }
        self.upload
            .write_material(&MaterialConstants::default())
            .unwrap();
    }

    fn render(
        &mut self,
        sequencer: &mut CommandSequencer,
        draws: &[SceneDraw],
    ) -> Result<(), LaneError> {
        sequencer.start_frame(&mut self.services())?;
        self.write_constants();
        sequencer.finish_frame(&mut self.services(), draws)?;
        Ok(())
    }
}

fn unit_cube() -> MeshData {
    let corners = [
        [-0.5, -0.5, -0.5],
        [0.5, -0.5, -0.5],
        [0.5, 0.5, -0.5],
        [-0.5, 0.5, -0.5],
        [-0.5, -0.5, 0.5],
        [0.5, -0.5, 0.5],
        [0.5, 0.5, 0.5],
        [-0.5, 0.5, 0.5],
    ];
    let vertices = corners
        .iter()
        .map(|&p| Vertex::new(p, [0.0, 0.0], Vec3::from(p).normalize().to_array()))
        .collect();
    let indices = vec![
        0, 2, 1, 0, 3, 2, 4, 5, 6, 4, 6, 7, 0, 1, 5, 0, 5, 4, 3, 7, 6, 3, 6, 2, 0, 4, 7, 0, 7,
        3, 1, 2, 6, 1, 6, 5,
    ];
    MeshData::new("cube", vertices, indices)
}

fn draws_of(mesh: &GpuMesh, count: usize) -> Vec<SceneDraw> {
    (0..count)
        .map(|i| SceneDraw {
            mesh: mesh.clone(),
            constants: PerObjectConstants::new(
                Mat4::from_translation(Vec3::new(i as f32, 0.0, 0.0)),
                Vec4::ONE,
                true,
            ),
        })
        .collect()
}

fn no_gi() -> RenderSettings {
    RenderSettings {
        gi_gather_enabled: false,
        shadow_map_resolution: 32,
        ..Default::default()
    }
}

#[test]
fn test_passes_are_recorded_in_fixed_order() {
    let mut h = Harness::new(true);
    let mut sequencer = h.sequencer(no_gi());
    let cube = h.cube();

    h.render(&mut sequencer, &draws_of(&cube, 2)).unwrap();
    sequencer.flush(&mut h.services()).unwrap();

    assert_eq!(
        h.software.executed_events(),
        vec!["Shadow", "Color", "Screen", "Overlay", "Present"]
    );
    // Two draws per mesh plus the composite quad.
    assert_eq!(sequencer.stats().draw_calls, 5);
    assert_eq!(sequencer.stats().frame_number, 1);
    assert!(h.software.validation_errors().is_empty());
}

#[test]
fn test_resources_return_to_rest_states() {
    let mut h = Harness::new(true);
    let mut sequencer = h.sequencer(no_gi());
    let cube = h.cube();

    for _ in 0..4 {
        h.render(&mut sequencer, &draws_of(&cube, 3)).unwrap();
    }
    sequencer.flush(&mut h.services()).unwrap();

    let state = |texture: lumen_core::renderer::TextureId| {
        h.software.resource_state(texture).unwrap()
    };
    for buffer in h.swap_chain.back_buffers() {
        assert_eq!(state(*buffer), ResourceState::Present);
    }
    assert_eq!(state(h.swap_chain.depth_target()), ResourceState::DepthWrite);
    let shadow = sequencer.shadow_lane();
    assert_eq!(
        state(shadow.shadow_map().unwrap()),
        ResourceState::PixelShaderResource
    );
    assert_eq!(state(shadow.depth_target().unwrap()), ResourceState::DepthWrite);
    assert_eq!(
        state(sequencer.color_lane().scene_color().unwrap()),
        ResourceState::PixelShaderResource
    );
    assert!(h.software.validation_errors().is_empty());
}

#[test]
fn test_gi_gather_runs_between_shadow_and_color() {
    let mut h = Harness::new(true);
    let mut sequencer = h.sequencer(RenderSettings {
        shadow_map_resolution: 32,
        ..Default::default()
    });
    let cube = h.cube();

    let blas = h.accel.create_bottom_level(&cube).unwrap();
    let tlas = h.accel.create_top_level(true, 1).unwrap();
    h.accel
        .set_instance_blas_and_transform(tlas, 0, blas, &Mat4::IDENTITY)
        .unwrap();
    h.accel.build_bottom_level(&[blas]).unwrap();
    h.accel.build_top_level(&[tlas]).unwrap();
    sequencer
        .attach_gi_scene(
            &mut h.services(),
            GiScene {
                tlas,
                hit_mesh: cube.clone(),
            },
        )
        .unwrap();
    assert!(matches!(
        h.descriptors.view(DescriptorIndex::SceneBvhSrv),
        Some(lumen_core::renderer::ResourceView::AccelerationStructure(_))
    ));

    h.render(&mut sequencer, &draws_of(&cube, 1)).unwrap();
    sequencer.flush(&mut h.services()).unwrap();

    assert_eq!(
        h.software.executed_events(),
        vec!["Shadow", "GiGather", "Color", "Screen", "Overlay", "Present"]
    );
    assert_eq!(h.software.dispatch_count(), 1);
    assert_eq!(h.software.refit_count(), 1);
    assert_eq!(sequencer.stats().gi_gathers, 1);
    assert_eq!(sequencer.stats().tlas_refits, 1);
    assert!(h.software.validation_errors().is_empty());
    assert!(h.software.rays_traced() > 0);
}

#[test]
fn test_missing_raytracing_support_disables_gi() {
    let mut h = Harness::new(false);
    let sequencer = h.sequencer(RenderSettings::default());
    assert!(!sequencer.gi_lane().is_supported());
    // The color pass still samples the probe textures.
    assert!(sequencer.gi_lane().irradiance().is_some());
    assert!(h.descriptors.is_allocated(DescriptorIndex::IrradianceSrv));
    assert!(h.descriptors.is_allocated(DescriptorIndex::VisibilitySrv));
}

#[test]
fn test_second_start_frame_is_rejected() {
    let mut h = Harness::new(true);
    let mut sequencer = h.sequencer(no_gi());

    sequencer.start_frame(&mut h.services()).unwrap();
    assert!(matches!(
        sequencer.start_frame(&mut h.services()),
        Err(LaneError::FrameInProgress)
    ));
    assert!(matches!(
        sequencer.resize(&mut h.services(), 128, 96),
        Err(LaneError::FrameInProgress)
    ));

    sequencer.abort_frame(&mut h.services());
    assert!(!sequencer.is_recording());
    assert!(matches!(
        sequencer.present(&mut h.services()),
        Err(LaneError::NoFrameInProgress)
    ));
    h.render(&mut sequencer, &[]).unwrap();
}

#[test]
fn test_draw_overflow_aborts_the_frame() {
    let mut h = Harness::new(true);
    let mut sequencer = h.sequencer(no_gi());
    let cube = h.cube();
    let budget = MAX_DRAWS_PER_FRAME / 2;

    let err = h
        .render(&mut sequencer, &draws_of(&cube, budget + 1))
        .unwrap_err();
    assert!(matches!(
        err,
        LaneError::Resource(ResourceError::CapacityExceeded { .. })
    ));
    assert!(!sequencer.is_recording());

    h.render(&mut sequencer, &draws_of(&cube, budget)).unwrap();
    sequencer.flush(&mut h.services()).unwrap();
    assert_eq!(sequencer.stats().draw_calls as usize, budget * 2 + 1);
    assert!(h.software.validation_errors().is_empty());
    assert_eq!(h.software.present_count(h.swap_chain.id()).unwrap(), 1);
}

#[test]
fn test_resize_recreates_scene_copies() {
    let mut h = Harness::new(true);
    let mut sequencer = h.sequencer(no_gi());
    let cube = h.cube();
    h.render(&mut sequencer, &draws_of(&cube, 1)).unwrap();

    let before = sequencer.color_lane().scene_color().unwrap();
    assert!(sequencer.resize(&mut h.services(), 128, 96).unwrap());
    let after = sequencer.color_lane().scene_color().unwrap();
    assert_ne!(before, after);
    assert_eq!(
        h.descriptors.view(DescriptorIndex::SceneColorSrv),
        Some(lumen_core::renderer::ResourceView::TextureSrv(after))
    );
    assert!(!sequencer.resize(&mut h.services(), 128, 96).unwrap());
    assert!(!sequencer.resize(&mut h.services(), 0, 96).unwrap());

    h.render(&mut sequencer, &draws_of(&cube, 1)).unwrap();
    sequencer.flush(&mut h.services()).unwrap();
    assert!(h.software.validation_errors().is_empty());
}
