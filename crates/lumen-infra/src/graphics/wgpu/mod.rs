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


//! Hardware backend built on wgpu.
//!
//! [`WgpuDevice`] replays validated command lists into wgpu command buffers on a
//! headless device. Raster pipelines take WGSL from [`wgsl_shader_blobs`]. Bottom-
//! and top-level acceleration structures are built when the adapter exposes ray
//! queries; raytracing pipelines are not available.

mod bindings;
mod context;
mod conversions;
mod device;
mod replay;
mod resources;
mod shaders;

pub use context::WgpuDeviceDescriptor;
pub use device::WgpuDevice;
pub use shaders::wgsl_shader_blobs;
