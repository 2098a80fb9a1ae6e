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

//! The probe-gather ray program run by `DispatchRays` on the software device.
//!
//! Every launch invocation walks all probes. For each probe it traces
//! [`IRRADIANCE_RAYS_PER_PROBE`] irradiance rays and [`VISIBILITY_RAYS_PER_PROBE`]
//! visibility rays along spherical Fibonacci directions. Texel `(probe, ray)` of the
//! irradiance target receives the direct light arriving at the hit surface, texel
//! `(probe, ray)` of the visibility target receives `(t, t²)` of the hit distance.

use super::bvh::{InstanceBvh, Ray};
use glam::{Vec3, Vec4Swizzles};
use lumen_core::renderer::{
    MaterialConstants, PerFrameConstants, INSTANCE_MASK_ALL, IRRADIANCE_RAYS_PER_PROBE,
    MAX_MATERIAL_COUNT, PROBE_RAY_MAX_DISTANCE, VISIBILITY_RAYS_PER_PROBE,
};
use std::f32::consts::PI;

const GOLDEN_RATIO_CONJUGATE: f32 = 0.618_034;
const SURFACE_OFFSET: f32 = 1e-3;

/// A texture the kernel writes into: row-major `[f32; 4]` texels.
pub(crate) struct TexelTarget<'a> {
    pub texels: &'a mut [[f32; 4]],
    pub width: u32,
    pub height: u32,
}

impl TexelTarget<'_> {
    fn store(&mut self, x: u32, y: u32, value: [f32; 4]) {
        if x < self.width && y < self.height {
            self.texels[(y * self.width + x) as usize] = value;
        }
    }
}

/// The `i`-th of `n` directions spread evenly over the unit sphere.
pub fn spherical_fibonacci(i: u32, n: u32) -> Vec3 {
    let phi = 2.0 * PI * (i as f32 * GOLDEN_RATIO_CONJUGATE).fract();
    let cos_theta = 1.0 - (2.0 * i as f32 + 1.0) / n as f32;
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    Vec3::new(phi.cos() * sin_theta, phi.sin() * sin_theta, cos_theta)
}

/// Counters reported back to the device diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct GatherReport {
    pub probes: u32,
    pub rays: u32,
    pub hits: u32,
}

/// Runs the gather for every probe of `frame`.
pub(crate) fn gather_probes(
    scene: &InstanceBvh,
    frame: &PerFrameConstants,
    materials: Option<&MaterialConstants>,
    irradiance: &mut TexelTarget<'_>,
    visibility: &mut TexelTarget<'_>,
) -> GatherReport {
    let probe_count = (frame.probe_count as usize).min(frame.probe_positions_ws.len()) as u32;
    let to_light = -frame.light_direction_ws.xyz().normalize_or_zero();
    let mut report = GatherReport {
        probes: probe_count,
        ..Default::default()
    };

    for probe in 0..probe_count {
        let origin = frame.probe_positions_ws[probe as usize].xyz();

        for ray_index in 0..IRRADIANCE_RAYS_PER_PROBE {
            let direction = spherical_fibonacci(ray_index, IRRADIANCE_RAYS_PER_PROBE);
            let ray = Ray::new(origin, direction, 0.0, PROBE_RAY_MAX_DISTANCE);
            report.rays += 1;

            let value = match scene.intersect(&ray, INSTANCE_MASK_ALL) {
                Some(hit) => {
                    report.hits += 1;
                    let normal = if hit.normal.dot(direction) > 0.0 {
                        -hit.normal
                    } else {
                        hit.normal
                    };
                    let lambert = normal.dot(to_light).max(0.0);
                    let lit = lambert > 0.0 && {
                        let shadow_ray = Ray::new(
                            hit.position + normal * SURFACE_OFFSET,
                            to_light,
                            0.0,
                            PROBE_RAY_MAX_DISTANCE,
                        );
                        !scene.occluded(&shadow_ray, INSTANCE_MASK_ALL)
                    };
                    let albedo = materials
                        .map(|m| m.colors[hit.instance_id as usize % MAX_MATERIAL_COUNT].xyz())
                        .unwrap_or(Vec3::ONE);
                    let radiance = if lit {
                        albedo * lambert * frame.light_intensity
                    } else {
                        Vec3::ZERO
                    };
                    [radiance.x, radiance.y, radiance.z, 1.0]
                }
                None => [0.0; 4],
            };
            irradiance.store(probe, ray_index, value);
        }

        for ray_index in 0..VISIBILITY_RAYS_PER_PROBE {
            let direction = spherical_fibonacci(ray_index, VISIBILITY_RAYS_PER_PROBE);
            let ray = Ray::new(origin, direction, 0.0, PROBE_RAY_MAX_DISTANCE);
            report.rays += 1;

            let t = match scene.intersect(&ray, INSTANCE_MASK_ALL) {
                Some(hit) => {
                    report.hits += 1;
                    hit.t
                }
                None => PROBE_RAY_MAX_DISTANCE,
            };
            visibility.store(probe, ray_index, [t, t * t, 0.0, 0.0]);
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::bvh::{BvhInstance, TriangleBvh};
    use approx::assert_relative_eq;
    use glam::{Mat4, Vec4};
    use std::sync::Arc;

    fn floor_quad() -> Arc<TriangleBvh> {
        let p = [
            Vec3::new(-10.0, 0.0, -10.0),
            Vec3::new(10.0, 0.0, -10.0),
            Vec3::new(10.0, 0.0, 10.0),
            Vec3::new(-10.0, 0.0, 10.0),
        ];
        Arc::new(TriangleBvh::build(&p, &[0, 1, 2, 0, 2, 3]))
    }

    fn frame_with_probe(position: Vec3) -> PerFrameConstants {
        let mut frame = PerFrameConstants::default();
        frame.probe_positions_ws[0] = position.extend(1.0);
        frame.probe_count = 1;
        frame.light_direction_ws = Vec4::new(0.0, -1.0, 0.0, 0.0);
        frame.light_intensity = 2.0;
        frame
    }

    #[test]
    fn test_fibonacci_directions_are_unit_and_cover_both_hemispheres() {
        let dirs: Vec<Vec3> = (0..32).map(|i| spherical_fibonacci(i, 32)).collect();
        for d in &dirs {
            assert_relative_eq!(d.length(), 1.0, epsilon = 1e-5);
        }
        assert!(dirs.iter().any(|d| d.z > 0.5));
        assert!(dirs.iter().any(|d| d.z < -0.5));
    }

    #[test]
    fn test_gather_over_floor() {
        let scene = InstanceBvh::build(
            vec![BvhInstance {
                instance_id: 0,
                mask: 0xFF,
                object_to_world: Mat4::IDENTITY,
                geometry: floor_quad(),
            }],
            true,
        );
        let frame = frame_with_probe(Vec3::new(0.0, 1.0, 0.0));

        let mut irr = vec![[-1.0f32; 4]; 4 * IRRADIANCE_RAYS_PER_PROBE as usize];
        let mut vis = vec![[-1.0f32; 4]; 4 * VISIBILITY_RAYS_PER_PROBE as usize];
        let report = gather_probes(
            &scene,
            &frame,
            None,
            &mut TexelTarget {
                texels: &mut irr,
                width: 4,
                height: IRRADIANCE_RAYS_PER_PROBE,
            },
            &mut TexelTarget {
                texels: &mut vis,
                width: 4,
                height: VISIBILITY_RAYS_PER_PROBE,
            },
        );
        assert_eq!(report.probes, 1);
        assert_eq!(
            report.rays,
            IRRADIANCE_RAYS_PER_PROBE + VISIBILITY_RAYS_PER_PROBE
        );

        for ray in 0..VISIBILITY_RAYS_PER_PROBE {
            let dir = spherical_fibonacci(ray, VISIBILITY_RAYS_PER_PROBE);
            let texel = vis[(ray * 4) as usize];
            assert_relative_eq!(texel[1], texel[0] * texel[0], epsilon = 1e-3);
            if dir.y < -0.2 {
                // Downward rays hit the floor at distance 1 / |dir.y|.
                assert_relative_eq!(texel[0], 1.0 / -dir.y, epsilon = 1e-3);
            } else if dir.y > 0.0 {
                assert_eq!(texel[0], PROBE_RAY_MAX_DISTANCE);
            }
        }
        for ray in 0..IRRADIANCE_RAYS_PER_PROBE {
            let dir = spherical_fibonacci(ray, IRRADIANCE_RAYS_PER_PROBE);
            let texel = irr[(ray * 4) as usize];
            if dir.y < -0.2 {
                // The light shines straight down on the floor.
                assert_relative_eq!(texel[0], 2.0, epsilon = 1e-4);
            } else if dir.y > 0.0 {
                assert_eq!(texel, [0.0; 4]);
            }
        }
        // Probes past `probe_count` are untouched.
        assert_eq!(vis[1], [-1.0; 4]);
    }

    fn unit_cube() -> Arc<TriangleBvh> {
        let p: Vec<Vec3> = [
            [-0.5, -0.5, -0.5],
            [0.5, -0.5, -0.5],
            [0.5, 0.5, -0.5],
            [-0.5, 0.5, -0.5],
            [-0.5, -0.5, 0.5],
            [0.5, -0.5, 0.5],
            [0.5, 0.5, 0.5],
            [-0.5, 0.5, 0.5],
        ]
        .into_iter()
        .map(Vec3::from)
        .collect();
        let indices = [
            0, 2, 1, 0, 3, 2, 4, 5, 6, 4, 6, 7, 0, 1, 5, 0, 5, 4, 3, 7, 6, 3, 6, 2, 0, 4, 7, 0,
            7, 3, 1, 2, 6, 1, 6, 5,
        ];
        Arc::new(TriangleBvh::build(&p, &indices))
    }

    /// A closed room: floor, ceiling, three walls, a front wall with a doorway, the
    /// door shifted by `door_offset` along x, and two boxes.
    fn room(cube: &Arc<TriangleBvh>, door_offset: f32) -> Vec<BvhInstance> {
        let slab = |scale: Vec3, center: Vec3| {
            Mat4::from_scale_rotation_translation(scale, Default::default(), center)
        };
        let transforms = [
            slab(Vec3::new(6.0, 0.1, 6.0), Vec3::new(0.0, -0.05, 0.0)),
            slab(Vec3::new(6.0, 0.1, 6.0), Vec3::new(0.0, 3.05, 0.0)),
            slab(Vec3::new(0.1, 3.2, 6.2), Vec3::new(-3.0, 1.5, 0.0)),
            slab(Vec3::new(0.1, 3.2, 6.2), Vec3::new(3.0, 1.5, 0.0)),
            slab(Vec3::new(6.2, 3.2, 0.1), Vec3::new(0.0, 1.5, -3.0)),
            slab(Vec3::new(2.1, 3.2, 0.1), Vec3::new(-2.0, 1.5, 3.0)),
            slab(Vec3::new(2.1, 3.2, 0.1), Vec3::new(2.0, 1.5, 3.0)),
            slab(Vec3::new(2.2, 3.2, 0.1), Vec3::new(door_offset, 1.5, 2.9)),
            Mat4::from_translation(Vec3::new(-1.0, 0.5, -1.0)),
            Mat4::from_rotation_y(0.8) * Mat4::from_translation(Vec3::new(1.2, 0.5, 0.8)),
        ];
        transforms
            .into_iter()
            .enumerate()
            .map(|(id, object_to_world)| BvhInstance {
                instance_id: id as u32,
                mask: 0xFF,
                object_to_world,
                geometry: cube.clone(),
            })
            .collect()
    }

    fn gather_room(scene: &InstanceBvh) -> (Vec<[f32; 4]>, Vec<[f32; 4]>) {
        let mut frame = PerFrameConstants::default();
        let probes = [
            Vec3::new(0.0, 1.5, 0.0),
            Vec3::new(-2.0, 0.5, 2.0),
            Vec3::new(2.0, 2.5, -2.0),
            Vec3::new(0.0, 1.5, 2.5),
        ];
        for (slot, probe) in probes.iter().enumerate() {
            frame.probe_positions_ws[slot] = probe.extend(1.0);
        }
        frame.probe_count = probes.len() as u32;
        frame.light_direction_ws = Vec4::new(-0.3, -1.0, 0.2, 0.0);
        frame.light_intensity = 1.0;

        let width = probes.len() as u32;
        let mut irr = vec![[0.0f32; 4]; (width * IRRADIANCE_RAYS_PER_PROBE) as usize];
        let mut vis = vec![[0.0f32; 4]; (width * VISIBILITY_RAYS_PER_PROBE) as usize];
        gather_probes(
            scene,
            &frame,
            None,
            &mut TexelTarget {
                texels: &mut irr,
                width,
                height: IRRADIANCE_RAYS_PER_PROBE,
            },
            &mut TexelTarget {
                texels: &mut vis,
                width,
                height: VISIBILITY_RAYS_PER_PROBE,
            },
        );
        (irr, vis)
    }

    fn assert_same_texels(a: &[[f32; 4]], b: &[[f32; 4]]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            for channel in 0..4 {
                assert_relative_eq!(x[channel], y[channel], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_refit_with_unchanged_instances_matches_the_full_build() {
        let cube = unit_cube();
        let built = InstanceBvh::build(room(&cube, 0.0), true);
        let (built_irr, built_vis) = gather_room(&built);
        // Inside a closed room every visibility ray hits something.
        assert!(built_vis.iter().all(|t| t[0] < PROBE_RAY_MAX_DISTANCE));

        let mut refitted = InstanceBvh::build(room(&cube, 0.0), true);
        assert!(refitted.refit(room(&cube, 0.0)));
        let (refit_irr, refit_vis) = gather_room(&refitted);

        assert_same_texels(&built_vis, &refit_vis);
        assert_same_texels(&built_irr, &refit_irr);
    }

    #[test]
    fn test_refit_after_moving_an_instance_matches_a_fresh_build() {
        let cube = unit_cube();
        let mut refitted = InstanceBvh::build(room(&cube, 0.0), true);
        assert!(refitted.refit(room(&cube, 2.0)));
        let fresh = InstanceBvh::build(room(&cube, 2.0), true);

        let (fresh_irr, fresh_vis) = gather_room(&fresh);
        let (refit_irr, refit_vis) = gather_room(&refitted);
        assert_same_texels(&fresh_vis, &refit_vis);
        assert_same_texels(&fresh_irr, &refit_irr);

        // Sliding the door opens the doorway, so the two layouts really differ.
        let (_, closed_vis) = gather_room(&InstanceBvh::build(room(&cube, 0.0), true));
        assert!(closed_vis
            .iter()
            .zip(&fresh_vis)
            .any(|(a, b)| (a[0] - b[0]).abs() > 1e-3));
    }
}
