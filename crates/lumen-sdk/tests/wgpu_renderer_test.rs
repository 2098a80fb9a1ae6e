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


//! The renderer driven on a hardware adapter. Skipped when no adapter is present.

#![cfg(feature = "wgpu")]

use glam::{Mat4, Vec3, Vec4};
use lumen_sdk::prelude::*;

fn cube() -> MeshData {
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

#[test]
fn test_frames_render_without_gi_on_hardware() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let settings = RenderSettings {
        width: 64,
        height: 48,
        shadow_map_resolution: 64,
        fence_timeout_ms: 5_000,
        ..Default::default()
    };
    let mut renderer = match Renderer::wgpu(settings) {
        Ok(renderer) => renderer,
        Err(RenderError::InitializationFailed(reason)) => {
            log::warn!("Skipping: {reason}");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    assert!(!renderer.supports_gi());

    let mesh = renderer
        .upload_meshes(&[cube()])?
        .pop()
        .ok_or_else(|| anyhow::anyhow!("no mesh uploaded"))?;
    renderer.update_per_frame_constants(&LightingSetup {
        light_direction: Vec3::new(-0.3, -1.0, 0.2),
        light_intensity: 1.0,
        probes: ProbeVolume::new(Vec3::new(0.0, 1.5, 0.0), Vec3::new(4.0, 2.0, 4.0), 1.0),
    })?;

    let camera = CameraState::default();
    for frame in 0..3u64 {
        renderer.submit_mesh(&mesh, Mat4::IDENTITY, Vec4::new(0.8, 0.2, 0.2, 1.0), true);
        renderer.submit_mesh(
            &mesh,
            Mat4::from_translation(Vec3::new(1.5, 0.0, 0.0)),
            Vec4::ONE,
            false,
        );
        let stats = renderer.render_frame(&camera)?;
        assert_eq!(stats.frame_number, frame + 1);
        assert!(stats.draw_calls >= 2);
        assert_eq!(stats.gi_gathers, 0);
    }

    assert!(renderer.resize(32, 32)?);
    renderer.render_frame(&camera)?;
    renderer.flush()?;
    renderer.shutdown()?;
    Ok(())
}
