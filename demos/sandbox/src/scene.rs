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

//! The demo room: a floor, two cubes, three walls, a ceiling and a sliding door.

use glam::{EulerRot, Mat4, Quat, Vec3, Vec4};
use lumen_sdk::prelude::*;

use crate::geometry;

const PROBE_VOLUME_CENTER: Vec3 = Vec3::new(0.02, 1.78, 0.0);
const PROBE_VOLUME_EXTENTS: Vec3 = Vec3::splat(5.0);
const PROBE_SPACING: f32 = 0.99;

const LIGHT_DIRECTION: Vec3 = Vec3::new(-0.5, -0.3, 1.0);
const DOOR: usize = 7;
const DOOR_OPEN_X: f32 = 5.0;
/// Fraction of the slide covered per second.
const DOOR_OPEN_SPEED: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
struct Placement {
    position: Vec3,
    rotation_degrees: Vec3,
    scale: Vec3,
    color: Vec4,
}

impl Placement {
    const fn new(position: Vec3, scale: Vec3, color: Vec4) -> Self {
        Self {
            position,
            rotation_degrees: Vec3::ZERO,
            scale,
            color,
        }
    }

    fn world(&self) -> Mat4 {
        let r = self.rotation_degrees;
        let rotation = Quat::from_euler(
            EulerRot::ZYX,
            r.z.to_radians(),
            r.y.to_radians(),
            r.x.to_radians(),
        );
        Mat4::from_scale_rotation_translation(self.scale, rotation, self.position)
    }
}

const GREY: Vec4 = Vec4::new(0.6, 0.6, 0.6, 1.0);

fn room() -> Vec<Placement> {
    let mut rotated = Placement::new(Vec3::new(-1.0, 0.5, 0.5), Vec3::new(1.0, 2.0, 1.0), GREY);
    rotated.rotation_degrees = Vec3::new(0.0, 45.0, 0.0);
    vec![
        // Floor
        Placement::new(Vec3::new(0.0, -0.5, 0.0), Vec3::new(4.9, 0.49, 4.9), GREY),
        Placement::new(Vec3::new(1.0, 0.25, -0.5), Vec3::ONE, GREY),
        // Right and left walls
        Placement::new(
            Vec3::new(2.25, 1.75, 0.0),
            Vec3::new(0.5, 5.0, 5.0),
            Vec4::new(0.0, 0.5, 0.0, 1.0),
        ),
        Placement::new(
            Vec3::new(-2.25, 1.75, 0.0),
            Vec3::new(0.5, 5.0, 5.0),
            Vec4::new(0.8, 0.0, 0.0, 1.0),
        ),
        // Back wall
        Placement::new(Vec3::new(0.0, 1.75, 2.65), Vec3::new(5.0, 5.0, 0.5), GREY),
        rotated,
        // Ceiling
        Placement::new(Vec3::new(0.0, 4.0, 0.0), Vec3::new(4.9, 0.49, 4.9), GREY),
        // Door, starting open
        Placement::new(
            Vec3::new(DOOR_OPEN_X, 1.75, -2.65),
            Vec3::new(5.0, 5.0, 0.5),
            Vec4::new(0.8, 0.8, 0.8, 1.0),
        ),
    ]
}

/// The scene state the renderer is fed from each tick.
pub struct DemoScene {
    placements: Vec<Placement>,
    cube: GpuMesh,
    sun: GpuMesh,
    /// The traced scene, when the device can run the GI gather.
    structures: Option<(BlasHandle, TlasHandle)>,
    camera: CameraState,
    door_progress: f32,
    door_moving: bool,
}

impl DemoScene {
    /// Uploads the meshes, builds the acceleration structures and sets up lighting.
    pub fn new(renderer: &mut Renderer) -> Result<Self, RenderError> {
        let placements = room();
        let mut meshes = renderer
            .upload_meshes(&[geometry::cube(1.0), geometry::sphere(1.0, 32, 32)])?
            .into_iter();
        let (Some(cube), Some(sun)) = (meshes.next(), meshes.next()) else {
            return Err(RenderError::Internal("mesh upload returned too few meshes".into()));
        };

        let structures = if renderer.supports_gi() {
            Some(Self::build_structures(renderer, &cube, &placements)?)
        } else {
            log::warn!("Device cannot trace rays; rendering without probe GI");
            None
        };

        let probes = ProbeVolume::new(PROBE_VOLUME_CENTER, PROBE_VOLUME_EXTENTS, PROBE_SPACING);
        let counts = probes.counts();
        log::info!(
            "Probe volume: {} probes ({} x {} x {})",
            probes.probe_count(),
            counts.x,
            counts.y,
            counts.z
        );
        renderer.update_per_frame_constants(&LightingSetup {
            light_direction: LIGHT_DIRECTION,
            light_intensity: 1.0,
            probes,
        })?;
        let colors: Vec<Vec4> = placements.iter().map(|p| p.color).collect();
        renderer.update_material_constants(&colors)?;

        Ok(Self {
            placements,
            cube,
            sun,
            structures,
            camera: CameraState::default(),
            door_progress: 1.0,
            door_moving: false,
        })
    }

    fn build_structures(
        renderer: &mut Renderer,
        cube: &GpuMesh,
        placements: &[Placement],
    ) -> Result<(BlasHandle, TlasHandle), RenderError> {
        let blas = renderer.create_bottom_level_structure(cube)?;
        renderer.build_bottom_level_structures(&[blas])?;
        let tlas = renderer.create_top_level_structure(true, placements.len() as u32)?;
        for (id, placement) in placements.iter().enumerate() {
            renderer.set_instance_blas_and_transform(tlas, id as u32, blas, &placement.world())?;
        }
        renderer.build_top_level_structures(&[tlas])?;
        renderer.attach_gi_scene(GiScene {
            tlas,
            hit_mesh: cube.clone(),
        })?;
        Ok((blas, tlas))
    }

    /// Closes the door and starts sliding it open again.
    pub fn slide_door(&mut self) {
        log::info!("Sliding the door");
        self.door_progress = 0.0;
        self.door_moving = true;
    }

    /// Advances the door by `delta_secs` and refreshes its acceleration-structure instance.
    pub fn tick(&mut self, renderer: &mut Renderer, delta_secs: f32) -> Result<(), RenderError> {
        if !self.door_moving {
            return Ok(());
        }
        self.door_progress = (self.door_progress + delta_secs * DOOR_OPEN_SPEED).min(1.0);
        self.door_moving = self.door_progress < 1.0;

        let door = &mut self.placements[DOOR];
        door.position.x = DOOR_OPEN_X * self.door_progress;
        match self.structures {
            Some((blas, tlas)) => {
                renderer.set_instance_blas_and_transform(tlas, DOOR as u32, blas, &door.world())
            }
            None => Ok(()),
        }
    }

    /// Queues every object for the next frame.
    pub fn draw(&self, renderer: &mut Renderer) {
        for placement in &self.placements {
            renderer.submit_mesh(&self.cube, placement.world(), placement.color, true);
        }
        let sun = Mat4::from_scale_rotation_translation(
            Vec3::splat(0.3),
            Quat::IDENTITY,
            -LIGHT_DIRECTION.normalize() * 6.0,
        );
        renderer.submit_mesh(&self.sun, sun, Vec4::new(1.0, 0.9, 0.4, 1.0), false);
    }

    pub fn camera(&self) -> &CameraState {
        &self.camera
    }
}
