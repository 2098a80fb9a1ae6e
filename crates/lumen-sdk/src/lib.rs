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

//! The public-facing SDK of the Lumen renderer.
//!
//! A scene creates one [`Renderer`], uploads its meshes, builds the acceleration
//! structures the GI gather traces against, and then drives one
//! [`Renderer::render_frame`] per tick.

#![warn(missing_docs)]

mod context;
mod renderer;

pub use context::RenderContext;
pub use renderer::{LightingSetup, Renderer};

/// Everything a scene needs to drive the renderer.
pub mod prelude {
    pub use crate::{LightingSetup, RenderContext, Renderer};
    pub use lumen_core::renderer::{
        CameraState, GpuDevice, InputSource, RenderError, RenderSettings, RenderStats,
        ResourceError, Vertex, MAX_DRAWS_PER_FRAME, MAX_MATERIAL_COUNT, MAX_PROBE_COUNT,
    };
    pub use lumen_core::{BlasHandle, GpuMesh, MeshData, TlasHandle};
    pub use lumen_infra::{
        builtin_shader_blobs, FileShaderBlobs, SoftwareDevice, SoftwareDeviceDescriptor,
    };
    #[cfg(feature = "wgpu")]
    pub use lumen_infra::{wgsl_shader_blobs, WgpuDevice, WgpuDeviceDescriptor};
    pub use lumen_lanes::{GiScene, OverlayRenderer, ProbeVolume};
}
