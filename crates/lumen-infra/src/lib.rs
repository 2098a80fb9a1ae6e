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

//! Concrete backends for the Lumen renderer.
//!
//! [`SoftwareDevice`] implements the [`GpuDevice`](lumen_core::renderer::GpuDevice)
//! contract on the CPU with real queue timelines, fences and acceleration structures.
//! [`FileShaderBlobs`] loads compiled shaders from a directory.
//!
//! With the `wgpu` feature, `graphics::wgpu::WgpuDevice` runs the same contract on a
//! real adapter.

#![warn(missing_docs)]

pub mod graphics;
pub mod shaders;
pub mod software;

#[cfg(feature = "wgpu")]
pub use graphics::wgpu::{wgsl_shader_blobs, WgpuDevice, WgpuDeviceDescriptor};
pub use shaders::{builtin_shader_blobs, FileShaderBlobs};
pub use software::{SoftwareDevice, SoftwareDeviceDescriptor};
