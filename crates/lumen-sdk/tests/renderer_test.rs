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

//! The renderer driven end to end on the software device.

use approx::assert_abs_diff_eq;
use glam::{Mat4, Vec3, Vec4};
use lumen_sdk::prelude::*;
use std::sync::Arc;

/// Eight instances: a floor, four cubes, two walls and a ceiling.
const INSTANCE_COUNT: u32 = 8;

struct Scene {
    software: Arc<SoftwareDevice>,
    renderer: Renderer,
    cube: GpuMesh,
    transforms: Vec<Mat4>,
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

fn scene_transforms() -> Vec<Mat4> {
    vec![
        Mat4::from_scale_rotation_translation(
            Vec3::new(5.0, 0.1, 5.0),
            Default::default(),
            Vec3::new(0.0, -0.05, 0.0),
        ),
        Mat4::from_translation(Vec3::new(-1.5, 0.5, -1.5)),
        Mat4::from_translation(Vec3::new(1.5, 0.5, -1.5)),
        Mat4::from_translation(Vec3::new(-1.5, 0.5, 1.5)),
        Mat4::from_translation(Vec3::new(1.5, 0.5, 1.5)),
        Mat4::from_scale_rotation_translation(
            Vec3::new(0.1, 3.0, 5.0),
            Default::default(),
            Vec3::new(-2.5, 1.5, 0.0),
        ),
        Mat4::from_scale_rotation_translation(
            Vec3::new(0.1, 3.0, 5.0),
            Default::default(),
            Vec3::new(2.5, 1.5, 0.0),
        ),
        Mat4::from_scale_rotation_translation(
            Vec3::new(5.0, 0.1, 5.0),
            Default::default(),
            Vec3::new(0.0, 3.05, 0.0),
        ),
    ]
}

fn settings(gi_gather_enabled: bool, gi_gather_interval_secs: f32) -> RenderSettings {
    RenderSettings {
        width: 64,
        height: 48,
        gi_gather_enabled,
        gi_gather_interval_secs,
        shadow_map_resolution: 64,
        fence_timeout_ms: 5_000,
        ..Default::default()
    }
}

impl Scene {
    fn new(settings: RenderSettings) -> anyhow::Result<Self> {
        let _ = env_logger::builder().is_test(true).try_init();
        let software = Arc::new(SoftwareDevice::new(SoftwareDeviceDescriptor::default())?);
        let mut renderer = Renderer::new(software.clone(), &builtin_shader_blobs(), settings)?;

        let cube = renderer
            .upload_meshes(&[unit_cube()])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("no mesh uploaded"))?;
        let blas = renderer.create_bottom_level_structure(&cube)?;
        renderer.build_bottom_level_structures(&[blas])?;

        let transforms = scene_transforms();
        let tlas = renderer.create_top_level_structure(true, INSTANCE_COUNT)?;
        for (id, transform) in transforms.iter().enumerate() {
            renderer.set_instance_blas_and_transform(tlas, id as u32, blas, transform)?;
        }
        renderer.build_top_level_structures(&[tlas])?;
        renderer.attach_gi_scene(GiScene {
            tlas,
            hit_mesh: cube.clone(),
        })?;

        renderer.update_per_frame_constants(&LightingSetup {
            light_direction: Vec3::new(-0.3, -1.0, 0.2),
            light_intensity: 1.0,
            probes: ProbeVolume::new(Vec3::new(0.0, 1.5, 0.0), Vec3::new(4.0, 2.0, 4.0), 1.0),
        })?;
        renderer.update_material_constants(&[Vec4::ONE, Vec4::new(1.0, 0.2, 0.2, 1.0)])?;

        Ok(Self {
            software,
            renderer,
            cube,
            transforms,
        })
    }

    fn frame(&mut self) -> Result<RenderStats, RenderError> {
        for transform in &self.transforms {
            self.renderer
                .submit_mesh(&self.cube, *transform, Vec4::ONE, true);
        }
        self.renderer.render_frame(&CameraState::default())
    }
}

#[test]
fn test_frame_records_passes_in_order_without_validation_errors() -> anyhow::Result<()> {
    let mut scene = Scene::new(settings(true, 0.1))?;

    let stats = scene.frame()?;
    scene.renderer.flush()?;

    assert_eq!(stats.frame_number, 1);
    assert_eq!(stats.draw_calls, 2 * INSTANCE_COUNT + 1);
    assert_eq!(
        scene.software.executed_events(),
        vec!["Shadow", "GiGather", "Color", "Screen", "Overlay", "Present"]
    );
    assert!(scene.software.validation_errors().is_empty());
    assert!(!scene.software.is_device_lost());
    assert_eq!(scene.renderer.queued_draws(), 0);

    scene.renderer.shutdown()?;
    Ok(())
}

#[test]
fn test_many_frames_cycle_every_slot() -> anyhow::Result<()> {
    let mut scene = Scene::new(settings(false, 0.1))?;

    for expected in 1..=10 {
        assert_eq!(scene.frame()?.frame_number, expected);
    }
    scene.renderer.flush()?;

    let swap_chain = scene.renderer.context().swap_chain().id();
    assert_eq!(scene.software.present_count(swap_chain)?, 10);
    assert_eq!(scene.renderer.context().frame_sync().frames_in_flight()?, 0);
    assert!(scene.software.validation_errors().is_empty());
    Ok(())
}

#[test]
fn test_flush_twice_leaves_fences_unchanged() -> anyhow::Result<()> {
    let mut scene = Scene::new(settings(false, 0.1))?;
    for _ in 0..4 {
        scene.frame()?;
    }

    scene.renderer.flush()?;
    let sync = scene.renderer.context().frame_sync();
    let before: Vec<u64> = (0..sync.slot_count()).map(|s| sync.fence_value(s)).collect();

    scene.renderer.flush()?;
    let sync = scene.renderer.context().frame_sync();
    let after: Vec<u64> = (0..sync.slot_count()).map(|s| sync.fence_value(s)).collect();
    assert_eq!(before, after);
    Ok(())
}

#[test]
fn test_too_many_draws_fail_the_frame_only() -> anyhow::Result<()> {
    let mut scene = Scene::new(settings(false, 0.1))?;
    // Shadow and color each write the per-object constants of every draw.
    let budget = MAX_DRAWS_PER_FRAME / 2;

    for i in 0..=budget {
        let world = Mat4::from_translation(Vec3::new(i as f32 * 0.01, 0.0, 0.0));
        scene
            .renderer
            .submit_mesh(&scene.cube, world, Vec4::ONE, false);
    }
    let err = scene
        .renderer
        .render_frame(&CameraState::default())
        .unwrap_err();
    assert!(matches!(
        err,
        RenderError::ResourceError(ResourceError::CapacityExceeded { .. })
    ));
    assert_eq!(scene.renderer.queued_draws(), 0);

    for _ in 0..budget {
        scene
            .renderer
            .submit_mesh(&scene.cube, Mat4::IDENTITY, Vec4::ONE, false);
    }
    let stats = scene.renderer.render_frame(&CameraState::default())?;
    assert_eq!(stats.draw_calls as usize, 2 * budget + 1);
    scene.renderer.flush()?;
    assert!(scene.software.validation_errors().is_empty());
    Ok(())
}

#[test]
fn test_consecutive_refits_keep_visibility_stable() -> anyhow::Result<()> {
    let mut scene = Scene::new(settings(true, 0.0))?;
    let visibility = scene
        .renderer
        .visibility_texture()
        .ok_or_else(|| anyhow::anyhow!("no visibility texture"))?;

    scene.frame()?;
    scene.renderer.flush()?;
    let first = scene.renderer.device().read_texture(visibility)?;

    scene.frame()?;
    scene.renderer.flush()?;
    let second = scene.renderer.device().read_texture(visibility)?;

    assert_eq!(scene.software.refit_count(), 2);
    assert_eq!(scene.renderer.stats().tlas_refits, 2);
    assert!(first.iter().any(|texel| texel[0] > 0.0));
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        for channel in 0..4 {
            assert_abs_diff_eq!(a[channel], b[channel], epsilon = 1e-5);
        }
    }
    Ok(())
}

#[test]
fn test_gi_gather_is_skipped_when_disabled() -> anyhow::Result<()> {
    let mut scene = Scene::new(settings(false, 0.0))?;
    for _ in 0..3 {
        scene.frame()?;
    }
    scene.renderer.flush()?;
    assert_eq!(scene.renderer.stats().gi_gathers, 0);
    assert_eq!(scene.software.dispatch_count(), 0);
    assert!(!scene
        .software
        .executed_events()
        .iter()
        .any(|e| e == "GiGather"));
    Ok(())
}

#[test]
fn test_gi_gather_waits_for_its_interval() -> anyhow::Result<()> {
    let mut scene = Scene::new(settings(true, 3600.0))?;
    for _ in 0..3 {
        scene.frame()?;
    }
    scene.renderer.flush()?;
    assert_eq!(scene.renderer.stats().gi_gathers, 1);
    assert_eq!(scene.software.dispatch_count(), 1);
    Ok(())
}

#[test]
fn test_aborted_frame_does_not_consume_the_gather() -> anyhow::Result<()> {
    let mut scene = Scene::new(settings(true, 3600.0))?;
    let budget = MAX_DRAWS_PER_FRAME / 2;
    for _ in 0..=budget {
        scene
            .renderer
            .submit_mesh(&scene.cube, Mat4::IDENTITY, Vec4::ONE, true);
    }
    assert!(scene
        .renderer
        .render_frame(&CameraState::default())
        .is_err());
    assert_eq!(scene.renderer.stats().gi_gathers, 0);
    assert_eq!(scene.renderer.stats().tlas_refits, 0);

    scene.frame()?;
    scene.renderer.flush()?;
    assert_eq!(scene.software.dispatch_count(), 1);
    assert_eq!(scene.software.refit_count(), 1);
    assert_eq!(scene.renderer.stats().gi_gathers, 1);
    assert_eq!(scene.renderer.stats().tlas_refits, 1);
    assert!(scene.software.validation_errors().is_empty());
    Ok(())
}

#[test]
fn test_gi_gather_with_zero_interval_runs_every_frame() -> anyhow::Result<()> {
    let mut scene = Scene::new(settings(true, 0.0))?;
    for _ in 0..3 {
        scene.frame()?;
    }
    scene.renderer.flush()?;
    assert_eq!(scene.renderer.stats().gi_gathers, 3);
    assert_eq!(scene.software.dispatch_count(), 3);
    assert!(scene.software.validation_errors().is_empty());
    Ok(())
}

#[test]
fn test_settings_toggle_applies_on_the_next_frame() -> anyhow::Result<()> {
    let mut scene = Scene::new(settings(true, 0.0))?;
    scene.frame()?;
    scene.renderer.settings_mut().gi_gather_enabled = false;
    scene.frame()?;
    scene.renderer.flush()?;
    assert_eq!(scene.renderer.stats().gi_gathers, 1);
    Ok(())
}

#[test]
fn test_resize_flushes_then_resizes() -> anyhow::Result<()> {
    let mut scene = Scene::new(settings(true, 0.1))?;
    scene.frame()?;
    scene.frame()?;

    // Frames are still in flight; resize must wait for them itself.
    assert!(scene.renderer.resize(128, 96)?);
    let swap_chain = scene.renderer.context().swap_chain().id();
    assert_eq!(scene.software.swap_chain_size(swap_chain)?, (128, 96));
    assert_eq!(scene.renderer.context().swap_chain().size(), (128, 96));
    assert_eq!(scene.renderer.context().frame_sync().frames_in_flight()?, 0);

    assert!(!scene.renderer.resize(0, 0)?);
    assert!(!scene.renderer.resize(128, 96)?);

    scene.frame()?;
    scene.renderer.flush()?;
    assert!(scene.software.validation_errors().is_empty());
    Ok(())
}

#[test]
fn test_material_and_probe_limits() -> anyhow::Result<()> {
    let mut scene = Scene::new(settings(false, 0.1))?;

    let colors = vec![Vec4::ONE; MAX_MATERIAL_COUNT + 1];
    assert!(matches!(
        scene.renderer.update_material_constants(&colors),
        Err(RenderError::ResourceError(ResourceError::CapacityExceeded { .. }))
    ));
    scene
        .renderer
        .update_material_constants(&colors[..MAX_MATERIAL_COUNT])?;

    let dense = ProbeVolume::new(Vec3::ZERO, Vec3::splat(10.0), 1.0);
    assert!(dense.probe_count() > MAX_PROBE_COUNT);
    assert!(matches!(
        scene.renderer.update_per_frame_constants(&LightingSetup {
            light_direction: Vec3::NEG_Y,
            light_intensity: 1.0,
            probes: dense,
        }),
        Err(RenderError::ResourceError(ResourceError::CapacityExceeded { .. }))
    ));

    scene.frame()?;
    Ok(())
}

#[test]
fn test_renderer_without_raytracing_still_renders() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let software = Arc::new(SoftwareDevice::new(SoftwareDeviceDescriptor {
        raytracing: false,
        ..Default::default()
    })?);
    let mut renderer = Renderer::new(software.clone(), &builtin_shader_blobs(), settings(true, 0.0))?;
    assert!(!renderer.supports_gi());

    renderer.render_frame(&CameraState::default())?;
    renderer.flush()?;
    assert_eq!(
        software.executed_events(),
        vec!["Shadow", "Color", "Screen", "Overlay", "Present"]
    );
    renderer.shutdown()?;
    Ok(())
}
