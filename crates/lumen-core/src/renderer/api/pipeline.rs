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

//! Pipeline state descriptions: root layouts, shader blobs, graphics and raytracing pipelines.

use super::resource::TextureFormat;
use std::borrow::Cow;
use std::sync::Arc;

/// Size in bytes of a shader identifier stored in a shader table record.
pub const SHADER_IDENTIFIER_SIZE: usize = 32;
/// Required alignment of a shader record.
pub const SHADER_RECORD_ALIGNMENT: u64 = 32;
/// Required alignment of the start of a shader table.
pub const SHADER_TABLE_ALIGNMENT: u64 = 64;

/// An opaque handle to a pipeline state object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(pub usize);

/// A compiled shader as an opaque byte blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBlob {
    /// The logical name the blob was loaded under.
    pub name: String,
    /// The bytecode.
    pub bytes: Arc<[u8]>,
}

impl ShaderBlob {
    /// Wraps bytecode loaded under `name`.
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// The stages a root parameter is visible to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderVisibility {
    /// Every stage.
    All,
    /// The vertex stage only.
    Vertex,
    /// The pixel stage only.
    Pixel,
}

/// The kind of views a descriptor range covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorRangeKind {
    /// Shader-resource views.
    Srv,
    /// Unordered-access views.
    Uav,
}

/// A contiguous range of descriptors inside a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorRange {
    /// View kind.
    pub kind: DescriptorRangeKind,
    /// First shader register.
    pub base_register: u32,
    /// Register space.
    pub space: u32,
    /// Number of descriptors.
    pub count: u32,
}

/// One root parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootParameter {
    /// A root constant-buffer view bound by address.
    ConstantBuffer {
        /// Shader register.
        register: u32,
        /// Register space.
        space: u32,
        /// Stage visibility.
        visibility: ShaderVisibility,
    },
    /// A descriptor table bound by its first heap index.
    DescriptorTable {
        /// The ranges, appended one after another.
        ranges: Vec<DescriptorRange>,
        /// Stage visibility.
        visibility: ShaderVisibility,
    },
}

/// Texture filtering of a static sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerFilter {
    /// Nearest texel.
    Point,
    /// Bilinear.
    Linear,
}

/// Addressing outside `[0, 1]` for a static sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerAddressMode {
    /// Returns the border color.
    Border,
    /// Clamps to the edge texel.
    Clamp,
}

/// A sampler baked into a root layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticSampler {
    /// Filtering.
    pub filter: SamplerFilter,
    /// Addressing.
    pub address_mode: SamplerAddressMode,
    /// Shader register.
    pub register: u32,
    /// Register space.
    pub space: u32,
}

/// The binding layout of a pipeline (a root signature).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RootLayout {
    /// Root parameters, indexed by binding slot.
    pub parameters: Vec<RootParameter>,
    /// Static samplers.
    pub static_samplers: Vec<StaticSampler>,
    /// Whether vertex input comes from bound vertex buffers.
    pub allow_input_layout: bool,
}

impl RootLayout {
    /// Returns the parameter bound at `index`, if any.
    pub fn parameter(&self, index: u32) -> Option<&RootParameter> {
        self.parameters.get(index as usize)
    }
}

/// One attribute of the vertex input layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Semantic name.
    pub semantic: &'static str,
    /// Number of `f32` components.
    pub components: u32,
    /// Byte offset within the vertex.
    pub offset: u32,
}

/// Describes a graphics pipeline state object.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDescriptor<'a> {
    /// A debug label.
    pub label: Option<Cow<'a, str>>,
    /// The binding layout.
    pub root_layout: RootLayout,
    /// Vertex shader bytecode.
    pub vertex_shader: ShaderBlob,
    /// Pixel shader bytecode. Depth-only pipelines have none.
    pub pixel_shader: Option<ShaderBlob>,
    /// Vertex input layout.
    pub vertex_layout: Vec<VertexAttribute>,
    /// Color target format.
    pub color_format: Option<TextureFormat>,
    /// Depth target format.
    pub depth_format: Option<TextureFormat>,
    /// Whether back faces are culled.
    pub cull_back_faces: bool,
}

/// One shader exported by a raytracing pipeline.
#[derive(Debug, Clone)]
pub struct RaytracingExport {
    /// The export name used to fetch the shader identifier.
    pub export: String,
    /// Bytecode.
    pub blob: ShaderBlob,
}

/// Describes a raytracing state object.
#[derive(Debug, Clone)]
pub struct RaytracingPipelineDescriptor<'a> {
    /// A debug label.
    pub label: Option<Cow<'a, str>>,
    /// The global binding layout shared by all raytracing shaders.
    pub global_root_layout: RootLayout,
    /// Arguments stored in the ray-generation record, after its identifier.
    pub ray_generation_local_layout: RootLayout,
    /// Arguments stored in the hit-group record, after its identifier.
    pub hit_group_local_layout: RootLayout,
    /// The ray-generation shader.
    pub ray_generation: RaytracingExport,
    /// The miss shader.
    pub miss: RaytracingExport,
    /// The closest-hit shader.
    pub closest_hit: RaytracingExport,
    /// The hit-group export name wrapping the closest-hit shader.
    pub hit_group: String,
    /// Maximum payload size in bytes.
    pub max_payload_size: u32,
    /// Maximum attribute size in bytes.
    pub max_attribute_size: u32,
    /// Maximum trace recursion depth.
    pub max_recursion_depth: u32,
}

/// A shader identifier copied into shader table records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderIdentifier(pub [u8; SHADER_IDENTIFIER_SIZE]);

/// Size in bytes of one local root argument in a shader record.
///
/// Constant buffers are stored as their GPU address, descriptor tables as the heap
/// index of their first descriptor.
pub const LOCAL_ROOT_ARGUMENT_SIZE: usize = 8;

/// Size of a shader record carrying `argument_count` local root arguments, rounded up to
/// [`SHADER_RECORD_ALIGNMENT`].
pub const fn shader_record_size(argument_count: usize) -> u64 {
    let raw = (SHADER_IDENTIFIER_SIZE + argument_count * LOCAL_ROOT_ARGUMENT_SIZE) as u64;
    (raw + SHADER_RECORD_ALIGNMENT - 1) & !(SHADER_RECORD_ALIGNMENT - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_record_sizes() {
        assert_eq!(shader_record_size(0), 32);
        assert_eq!(shader_record_size(2), 64);
        assert_eq!(shader_record_size(4), 64);
        assert_eq!(shader_record_size(5), 96);
    }
}
