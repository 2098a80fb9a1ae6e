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

//! CPU bounding-volume hierarchies standing in for hardware acceleration structures.
//!
//! Triangle hierarchies are built with a binned surface-area heuristic. Instance
//! hierarchies use a median split and support an in-place refit that keeps the tree
//! topology and only recomputes bounds.

use glam::{Mat4, Vec3};
use std::cmp::Ordering;
use std::sync::Arc;

const SAH_BINS: usize = 16;
const MAX_LEAF_TRIANGLES: u32 = 4;
const RAY_EPSILON: f32 = 1e-7;

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb {
    /// A box containing nothing; the identity of [`union`](Self::union).
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// The smallest box containing both boxes.
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Grows the box to contain `point`.
    pub fn grow(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Whether the box contains nothing.
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    /// The center point.
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Half the surface area, the usual SAH weight.
    pub fn half_area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let e = self.max - self.min;
        e.x * e.y + e.y * e.z + e.z * e.x
    }

    /// The box enclosing this box after `transform`.
    pub fn transformed(&self, transform: &Mat4) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        let mut out = Aabb::EMPTY;
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.grow(transform.transform_point3(corner));
        }
        out
    }

    /// Slab test. Returns the entry distance if the ray hits the box before `t_max`.
    fn hit_distance(&self, origin: Vec3, inv_dir: Vec3, t_min: f32, t_max: f32) -> Option<f32> {
        let t0 = (self.min - origin) * inv_dir;
        let t1 = (self.max - origin) * inv_dir;
        let near = t0.min(t1).max_element().max(t_min);
        let far = t0.max(t1).min_element().min(t_max);
        (near <= far).then_some(near)
    }
}

/// A ray with a parametric interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    /// Origin.
    pub origin: Vec3,
    /// Direction; need not be normalized, distances are in units of its length.
    pub direction: Vec3,
    /// Start of the interval.
    pub t_min: f32,
    /// End of the interval.
    pub t_max: f32,
}

impl Ray {
    /// A ray over `[t_min, t_max]`.
    pub fn new(origin: Vec3, direction: Vec3, t_min: f32, t_max: f32) -> Self {
        Self {
            origin,
            direction,
            t_min,
            t_max,
        }
    }

    fn inv_direction(&self) -> Vec3 {
        Vec3::ONE / self.direction
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Node {
    aabb: Aabb,
    /// Leaf: first primitive. Interior: index of the left child; the right one follows.
    left_first: u32,
    /// Primitive count; zero for interior nodes.
    count: u32,
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

/// Closest triangle hit in object space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    /// Ray parameter of the hit.
    pub t: f32,
    /// Index of the triangle in the original index buffer.
    pub triangle: u32,
    /// Unnormalized geometric normal.
    pub normal: Vec3,
}

/// A bottom-level hierarchy over one triangle mesh.
#[derive(Debug)]
pub struct TriangleBvh {
    nodes: Vec<Node>,
    triangles: Vec<[Vec3; 3]>,
    order: Vec<u32>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Bin {
    bounds: Aabb,
    count: u32,
}

impl TriangleBvh {
    /// Builds the hierarchy. `indices.len()` must be a multiple of three.
    pub fn build(positions: &[Vec3], indices: &[u32]) -> Self {
        let triangles: Vec<[Vec3; 3]> = indices
            .chunks_exact(3)
            .map(|tri| {
                [
                    positions[tri[0] as usize],
                    positions[tri[1] as usize],
                    positions[tri[2] as usize],
                ]
            })
            .collect();

        let bounds: Vec<Aabb> = triangles
            .iter()
            .map(|tri| {
                let mut aabb = Aabb::EMPTY;
                tri.iter().for_each(|&v| aabb.grow(v));
                aabb
            })
            .collect();
        let centers: Vec<Vec3> = bounds.iter().map(Aabb::center).collect();

        let mut builder = TriangleBuilder {
            nodes: Vec::with_capacity(triangles.len() * 2),
            order: (0..triangles.len() as u32).collect(),
            bounds: &bounds,
            centers: &centers,
        };
        builder.nodes.push(Node {
            aabb: Aabb::EMPTY,
            left_first: 0,
            count: triangles.len() as u32,
        });
        if !triangles.is_empty() {
            builder.update_bounds(0);
            builder.subdivide(0);
        }

        let TriangleBuilder { nodes, order, .. } = builder;
        Self {
            nodes,
            triangles,
            order,
        }
    }

    /// Bounds of the whole mesh.
    pub fn bounds(&self) -> Aabb {
        self.nodes.first().map(|n| n.aabb).unwrap_or(Aabb::EMPTY)
    }

    /// Number of nodes in the hierarchy.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of triangles.
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Finds the closest hit along `ray`.
    pub fn intersect(&self, ray: &Ray) -> Option<TriangleHit> {
        if self.triangles.is_empty() {
            return None;
        }
        let inv_dir = ray.inv_direction();
        let mut closest: Option<TriangleHit> = None;
        let mut t_max = ray.t_max;
        let mut stack = vec![0usize];

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if node
                .aabb
                .hit_distance(ray.origin, inv_dir, ray.t_min, t_max)
                .is_none()
            {
                continue;
            }
            if node.is_leaf() {
                for slot in node.left_first..node.left_first + node.count {
                    let triangle = self.order[slot as usize];
                    let tri = &self.triangles[triangle as usize];
                    if let Some((t, normal)) = intersect_triangle(ray, tri, t_max) {
                        t_max = t;
                        closest = Some(TriangleHit {
                            t,
                            triangle,
                            normal,
                        });
                    }
                }
            } else {
                stack.push(node.left_first as usize);
                stack.push(node.left_first as usize + 1);
            }
        }
        closest
    }
}

struct TriangleBuilder<'a> {
    nodes: Vec<Node>,
    order: Vec<u32>,
    bounds: &'a [Aabb],
    centers: &'a [Vec3],
}

impl TriangleBuilder<'_> {
    fn update_bounds(&mut self, index: usize) {
        let node = self.nodes[index];
        let mut aabb = Aabb::EMPTY;
        for slot in node.left_first..node.left_first + node.count {
            aabb = aabb.union(&self.bounds[self.order[slot as usize] as usize]);
        }
        self.nodes[index].aabb = aabb;
    }

    fn subdivide(&mut self, index: usize) {
        let node = self.nodes[index];
        if node.count <= MAX_LEAF_TRIANGLES {
            return;
        }

        let mut centroid_bounds = Aabb::EMPTY;
        let first = node.left_first as usize;
        let count = node.count as usize;
        for slot in first..first + count {
            centroid_bounds.grow(self.centers[self.order[slot] as usize]);
        }
        let extent = centroid_bounds.max - centroid_bounds.min;
        let axis = if extent.y > extent.x && extent.y >= extent.z {
            1
        } else if extent.z > extent.x {
            2
        } else {
            0
        };
        let split_min = centroid_bounds.min[axis];
        let split_len = extent[axis];
        if split_len < 1e-6 {
            return;
        }

        let scale = SAH_BINS as f32 / split_len;
        let bin_of = |value: f32| (((value - split_min) * scale) as usize).min(SAH_BINS - 1);

        let mut bins = [Bin::default(); SAH_BINS];
        for slot in first..first + count {
            let tri = self.order[slot] as usize;
            let bin = &mut bins[bin_of(self.centers[tri][axis])];
            bin.count += 1;
            bin.bounds = bin.bounds.union(&self.bounds[tri]);
        }

        let mut left_cost = [0.0f32; SAH_BINS];
        let mut running = Aabb::EMPTY;
        let mut running_count = 0;
        for i in 0..SAH_BINS {
            running = running.union(&bins[i].bounds);
            running_count += bins[i].count;
            left_cost[i] = running.half_area() * running_count as f32;
        }
        let mut best: Option<(usize, f32)> = None;
        running = Aabb::EMPTY;
        running_count = 0;
        for i in (1..SAH_BINS).rev() {
            running = running.union(&bins[i].bounds);
            running_count += bins[i].count;
            let left_count = node.count - running_count;
            if running_count == 0 || left_count == 0 {
                continue;
            }
            let cost = left_cost[i - 1] + running.half_area() * running_count as f32;
            if best.map_or(true, |(_, c)| cost < c) {
                best = Some((i - 1, cost));
            }
        }
        let Some((split, cost)) = best else {
            return;
        };
        if cost >= node.aabb.half_area() * node.count as f32 {
            return;
        }

        let (mut i, mut j) = (first, first + count);
        while i < j {
            if bin_of(self.centers[self.order[i] as usize][axis]) <= split {
                i += 1;
            } else {
                j -= 1;
                self.order.swap(i, j);
            }
        }
        let left_count = i - first;
        if left_count == 0 || left_count == count {
            return;
        }

        let left = self.nodes.len();
        self.nodes.push(Node {
            aabb: Aabb::EMPTY,
            left_first: first as u32,
            count: left_count as u32,
        });
        self.nodes.push(Node {
            aabb: Aabb::EMPTY,
            left_first: i as u32,
            count: (count - left_count) as u32,
        });
        self.nodes[index].left_first = left as u32;
        self.nodes[index].count = 0;

        self.update_bounds(left);
        self.update_bounds(left + 1);
        self.subdivide(left);
        self.subdivide(left + 1);
    }
}

/// Möller–Trumbore, double-sided.
fn intersect_triangle(ray: &Ray, tri: &[Vec3; 3], t_max: f32) -> Option<(f32, Vec3)> {
    let e1 = tri[1] - tri[0];
    let e2 = tri[2] - tri[0];
    let p = ray.direction.cross(e2);
    let det = e1.dot(p);
    if det.abs() < RAY_EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = ray.origin - tri[0];
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = ray.direction.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv_det;
    (t >= ray.t_min && t < t_max).then(|| (t, e1.cross(e2)))
}

/// One instance of a top-level hierarchy.
#[derive(Debug, Clone)]
pub struct BvhInstance {
    /// User id of the instance.
    pub instance_id: u32,
    /// Visibility mask.
    pub mask: u8,
    /// Object-to-world transform.
    pub object_to_world: Mat4,
    /// The referenced bottom-level hierarchy.
    pub geometry: Arc<TriangleBvh>,
}

impl BvhInstance {
    fn world_bounds(&self) -> Aabb {
        self.geometry.bounds().transformed(&self.object_to_world)
    }
}

/// Closest instance hit in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceHit {
    /// Ray parameter of the hit.
    pub t: f32,
    /// Id of the instance that was hit.
    pub instance_id: u32,
    /// World-space position.
    pub position: Vec3,
    /// Normalized world-space geometric normal.
    pub normal: Vec3,
}

/// A top-level hierarchy over transformed instances.
#[derive(Debug)]
pub struct InstanceBvh {
    nodes: Vec<Node>,
    order: Vec<u32>,
    instances: Vec<BvhInstance>,
    world_to_object: Vec<Mat4>,
    allow_update: bool,
}

impl InstanceBvh {
    /// Builds the hierarchy.
    pub fn build(instances: Vec<BvhInstance>, allow_update: bool) -> Self {
        let bounds: Vec<Aabb> = instances.iter().map(BvhInstance::world_bounds).collect();
        let centers: Vec<Vec3> = bounds.iter().map(Aabb::center).collect();
        let mut nodes = Vec::with_capacity(instances.len() * 2);
        let mut order: Vec<u32> = (0..instances.len() as u32).collect();

        if !instances.is_empty() {
            nodes.push(Node {
                aabb: Aabb::EMPTY,
                left_first: 0,
                count: instances.len() as u32,
            });
            Self::subdivide(&mut nodes, &mut order, &bounds, &centers, 0);
        }

        let world_to_object = instances.iter().map(|i| i.object_to_world.inverse()).collect();
        Self {
            nodes,
            order,
            instances,
            world_to_object,
            allow_update,
        }
    }

    fn subdivide(
        nodes: &mut Vec<Node>,
        order: &mut [u32],
        bounds: &[Aabb],
        centers: &[Vec3],
        index: usize,
    ) {
        let node = nodes[index];
        let first = node.left_first as usize;
        let count = node.count as usize;
        let mut aabb = Aabb::EMPTY;
        for &i in &order[first..first + count] {
            aabb = aabb.union(&bounds[i as usize]);
        }
        nodes[index].aabb = aabb;
        if count == 1 {
            return;
        }

        let extent = aabb.max - aabb.min;
        let axis = if extent.y > extent.x && extent.y >= extent.z {
            1
        } else if extent.z > extent.x {
            2
        } else {
            0
        };
        order[first..first + count].sort_by(|&a, &b| {
            centers[a as usize][axis]
                .partial_cmp(&centers[b as usize][axis])
                .unwrap_or(Ordering::Equal)
        });

        let mid = count / 2;
        let left = nodes.len();
        nodes.push(Node {
            aabb: Aabb::EMPTY,
            left_first: first as u32,
            count: mid as u32,
        });
        nodes.push(Node {
            aabb: Aabb::EMPTY,
            left_first: (first + mid) as u32,
            count: (count - mid) as u32,
        });
        nodes[index].left_first = left as u32;
        nodes[index].count = 0;

        Self::subdivide(nodes, order, bounds, centers, left);
        Self::subdivide(nodes, order, bounds, centers, left + 1);
    }

    /// Replaces the instances and recomputes every node's bounds, keeping the topology.
    ///
    /// Returns `false` without changing anything if the hierarchy was built without
    /// update support or the instance count differs.
    pub fn refit(&mut self, instances: Vec<BvhInstance>) -> bool {
        if !self.allow_update || instances.len() != self.instances.len() {
            return false;
        }
        self.world_to_object = instances.iter().map(|i| i.object_to_world.inverse()).collect();
        self.instances = instances;

        // Children are always stored after their parent.
        for index in (0..self.nodes.len()).rev() {
            let node = self.nodes[index];
            let aabb = if node.is_leaf() {
                let mut aabb = Aabb::EMPTY;
                for slot in node.left_first..node.left_first + node.count {
                    let instance = &self.instances[self.order[slot as usize] as usize];
                    aabb = aabb.union(&instance.world_bounds());
                }
                aabb
            } else {
                let l = node.left_first as usize;
                self.nodes[l].aabb.union(&self.nodes[l + 1].aabb)
            };
            self.nodes[index].aabb = aabb;
        }
        true
    }

    /// Whether refits are allowed.
    pub fn allow_update(&self) -> bool {
        self.allow_update
    }

    /// Number of instances.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// The instances, in build order of the caller.
    pub fn instances(&self) -> &[BvhInstance] {
        &self.instances
    }

    /// Bounds of the whole scene.
    pub fn bounds(&self) -> Aabb {
        self.nodes.first().map(|n| n.aabb).unwrap_or(Aabb::EMPTY)
    }

    /// Finds the closest hit of `ray` against instances whose mask overlaps `mask`.
    pub fn intersect(&self, ray: &Ray, mask: u8) -> Option<InstanceHit> {
        self.traverse(ray, mask, false)
    }

    /// Whether anything blocks `ray`.
    pub fn occluded(&self, ray: &Ray, mask: u8) -> bool {
        self.traverse(ray, mask, true).is_some()
    }

    fn traverse(&self, ray: &Ray, mask: u8, any_hit: bool) -> Option<InstanceHit> {
        if self.nodes.is_empty() {
            return None;
        }
        let inv_dir = ray.inv_direction();
        let mut closest: Option<InstanceHit> = None;
        let mut t_max = ray.t_max;
        let mut stack = vec![0usize];

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if node
                .aabb
                .hit_distance(ray.origin, inv_dir, ray.t_min, t_max)
                .is_none()
            {
                continue;
            }
            if !node.is_leaf() {
                stack.push(node.left_first as usize);
                stack.push(node.left_first as usize + 1);
                continue;
            }
            for slot in node.left_first..node.left_first + node.count {
                let index = self.order[slot as usize] as usize;
                let instance = &self.instances[index];
                if instance.mask & mask == 0 {
                    continue;
                }
                // The object-space direction is not renormalized, so `t` stays a
                // world-space distance.
                let world_to_object = &self.world_to_object[index];
                let local = Ray::new(
                    world_to_object.transform_point3(ray.origin),
                    world_to_object.transform_vector3(ray.direction),
                    ray.t_min,
                    t_max,
                );
                if let Some(hit) = instance.geometry.intersect(&local) {
                    t_max = hit.t;
                    let normal = world_to_object
                        .transpose()
                        .transform_vector3(hit.normal)
                        .normalize_or_zero();
                    closest = Some(InstanceHit {
                        t: hit.t,
                        instance_id: instance.instance_id,
                        position: ray.origin + ray.direction * hit.t,
                        normal,
                    });
                    if any_hit {
                        return closest;
                    }
                }
            }
        }
        closest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// A unit cube centered on the origin, 12 triangles.
    fn cube() -> (Vec<Vec3>, Vec<u32>) {
        let p = [
            Vec3::new(-0.5, -0.5, -0.5),
            Vec3::new(0.5, -0.5, -0.5),
            Vec3::new(0.5, 0.5, -0.5),
            Vec3::new(-0.5, 0.5, -0.5),
            Vec3::new(-0.5, -0.5, 0.5),
            Vec3::new(0.5, -0.5, 0.5),
            Vec3::new(0.5, 0.5, 0.5),
            Vec3::new(-0.5, 0.5, 0.5),
        ];
        let i = vec![
            0, 2, 1, 0, 3, 2, // -z
            4, 5, 6, 4, 6, 7, // +z
            0, 1, 5, 0, 5, 4, // -y
            3, 7, 6, 3, 6, 2, // +y
            0, 4, 7, 0, 7, 3, // -x
            1, 2, 6, 1, 6, 5, // +x
        ];
        (p.to_vec(), i)
    }

    fn grid(n: usize) -> (Vec<Vec3>, Vec<u32>) {
        let mut positions = Vec::new();
        let mut indices = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                positions.push(Vec3::new(x as f32, y as f32, 0.0));
            }
        }
        let row = (n + 1) as u32;
        for y in 0..n as u32 {
            for x in 0..n as u32 {
                let a = y * row + x;
                indices.extend_from_slice(&[a, a + 1, a + row, a + 1, a + row + 1, a + row]);
            }
        }
        (positions, indices)
    }

    #[test]
    fn test_aabb_union_and_transform() {
        let a = Aabb {
            min: Vec3::ZERO,
            max: Vec3::ONE,
        };
        let moved = a.transformed(&Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0)));
        assert_eq!(moved.min, Vec3::new(2.0, 0.0, 0.0));
        let both = a.union(&moved);
        assert_eq!(both.max, Vec3::new(3.0, 1.0, 1.0));
        assert!(Aabb::EMPTY.is_empty());
    }

    #[test]
    fn test_cube_hit_distance() {
        let (p, i) = cube();
        let bvh = TriangleBvh::build(&p, &i);
        assert_eq!(bvh.triangle_count(), 12);
        let ray = Ray::new(Vec3::new(0.1, 0.2, -5.0), Vec3::Z, 0.0, 100.0);
        let hit = bvh.intersect(&ray).expect("ray through the cube must hit");
        assert_relative_eq!(hit.t, 4.5, epsilon = 1e-5);
    }

    #[test]
    fn test_large_mesh_is_subdivided_and_matches_brute_force() {
        let (p, i) = grid(16);
        let bvh = TriangleBvh::build(&p, &i);
        assert!(bvh.node_count() > 1);
        for (x, y) in [(0.25, 0.25), (7.3, 11.9), (15.9, 0.1)] {
            let ray = Ray::new(Vec3::new(x, y, 3.0), -Vec3::Z, 0.0, 10.0);
            let hit = bvh.intersect(&ray).expect("grid covers the probe point");
            assert_relative_eq!(hit.t, 3.0, epsilon = 1e-5);
        }
        let miss = Ray::new(Vec3::new(-1.0, -1.0, 3.0), -Vec3::Z, 0.0, 10.0);
        assert!(bvh.intersect(&miss).is_none());
    }

    #[test]
    fn test_instances_are_transformed() {
        let (p, i) = cube();
        let geometry = Arc::new(TriangleBvh::build(&p, &i));
        let instances = vec![
            BvhInstance {
                instance_id: 0,
                mask: 0xFF,
                object_to_world: Mat4::from_translation(Vec3::new(0.0, 0.0, 10.0)),
                geometry: geometry.clone(),
            },
            BvhInstance {
                instance_id: 1,
                mask: 0xFF,
                object_to_world: Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0))
                    * Mat4::from_scale(Vec3::splat(2.0)),
                geometry,
            },
        ];
        let tlas = InstanceBvh::build(instances, false);
        let ray = Ray::new(Vec3::new(0.1, 0.2, 0.0), Vec3::Z, 0.0, 100.0);
        let hit = tlas.intersect(&ray, 0xFF).expect("both cubes are on the ray");
        assert_eq!(hit.instance_id, 1);
        assert_relative_eq!(hit.t, 4.0, epsilon = 1e-5);
        assert_relative_eq!(hit.normal.z, -1.0, epsilon = 1e-5);
        assert!(tlas.intersect(&ray, 0x00).is_none());
    }

    #[test]
    fn test_refit_moves_instances_without_rebuild() {
        let (p, i) = cube();
        let geometry = Arc::new(TriangleBvh::build(&p, &i));
        let at = |z: f32| BvhInstance {
            instance_id: 0,
            mask: 0xFF,
            object_to_world: Mat4::from_translation(Vec3::new(0.0, 0.0, z)),
            geometry: geometry.clone(),
        };
        let mut tlas = InstanceBvh::build(vec![at(10.0)], true);
        assert!(tlas.refit(vec![at(3.0)]));
        let ray = Ray::new(Vec3::new(0.1, 0.2, 0.0), Vec3::Z, 0.0, 100.0);
        assert_relative_eq!(tlas.intersect(&ray, 0xFF).unwrap().t, 2.5, epsilon = 1e-5);
        assert!(!tlas.refit(vec![at(1.0), at(2.0)]));
    }

    #[test]
    fn test_refit_rejected_without_update_support() {
        let (p, i) = cube();
        let geometry = Arc::new(TriangleBvh::build(&p, &i));
        let instance = BvhInstance {
            instance_id: 0,
            mask: 0xFF,
            object_to_world: Mat4::IDENTITY,
            geometry,
        };
        let mut tlas = InstanceBvh::build(vec![instance.clone()], false);
        assert!(!tlas.refit(vec![instance]));
    }
}
