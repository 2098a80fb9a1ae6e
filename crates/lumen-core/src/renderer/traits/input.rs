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

//! The narrow pull interface through which the renderer reads camera input.
//!
//! Window and input events are dispatched elsewhere; the renderer only asks for the
//! current camera once per tick.

use glam::{EulerRot, Mat4, Quat, Vec3};

/// A snapshot of the camera at the start of a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    /// World-space position.
    pub position: Vec3,
    /// Euler rotation in degrees (pitch, yaw, roll).
    pub rotation_degrees: Vec3,
    /// Vertical field of view in degrees.
    pub fov_degrees: f32,
    /// Near clip plane.
    pub near: f32,
    /// Far clip plane.
    pub far: f32,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, -10.0),
            rotation_degrees: Vec3::ZERO,
            fov_degrees: 45.0,
            near: 0.01,
            far: 100.0,
        }
    }
}

impl CameraState {
    fn rotation(&self) -> Quat {
        let r = self.rotation_degrees;
        Quat::from_euler(
            EulerRot::ZYX,
            r.z.to_radians(),
            r.y.to_radians(),
            r.x.to_radians(),
        )
    }

    /// World-to-view matrix.
    pub fn view_matrix(&self) -> Mat4 {
        (Mat4::from_translation(self.position) * Mat4::from_quat(self.rotation())).inverse()
    }

    /// Left-handed perspective projection for a target of `width` × `height`.
    pub fn projection_matrix(&self, width: f32, height: f32) -> Mat4 {
        let aspect = if height > 0.0 { width / height } else { 1.0 };
        Mat4::perspective_lh(self.fov_degrees.to_radians(), aspect, self.near, self.far)
    }

    /// The direction the camera looks along.
    pub fn forward(&self) -> Vec3 {
        self.rotation() * Vec3::Z
    }
}

/// Anything that can report the current camera.
pub trait InputSource {
    /// Returns the camera to render this tick with.
    fn camera_state(&self) -> CameraState;
}

impl InputSource for CameraState {
    fn camera_state(&self) -> CameraState {
        *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_matrix_moves_camera_to_origin() {
        let camera = CameraState::default();
        let eye = camera.view_matrix().transform_point3(camera.position);
        assert!(eye.abs_diff_eq(Vec3::ZERO, 1e-5));
    }

    #[test]
    fn test_unrotated_camera_looks_down_positive_z() {
        let camera = CameraState::default();
        assert!(camera.forward().abs_diff_eq(Vec3::Z, 1e-6));
    }
}
