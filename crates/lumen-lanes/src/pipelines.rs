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

//! The graphics pipelines used by the frame lanes, keyed by [`PipelineKind`].
//!
//! Each kind fixes its root layout, its shaders and its output formats. The
//! registry creates all of them once at startup; a pass only ever asks for its
//! kind and binds the result.

use crate::LaneError;
use lumen_core::renderer::{
    CommandList, Command, DescriptorRange, DescriptorRangeKind, GpuDevice,
    GraphicsPipelineDescriptor, PipelineId, RootLayout, RootParameter, SamplerAddressMode,
    SamplerFilter, ShaderBlobProvider, ShaderVisibility, StaticSampler, TextureFormat,
    VertexAttribute,
};
use lumen_core::swapchain::{BACK_BUFFER_FORMAT, DEPTH_FORMAT};
use std::collections::HashMap;

/// Root parameter slots of the shadow-map pipeline.
pub mod shadow_root {
    /// Per-object constants (vertex stage).
    pub const PER_OBJECT: u32 = 0;
    /// Per-frame constants, read for the light matrix.
    pub const PER_FRAME: u32 = 1;
}

/// Root parameter slots of the color pipeline.
pub mod color_root {
    /// Per-object constants (vertex stage).
    pub const PER_OBJECT: u32 = 0;
    /// Per-frame constants (vertex stage).
    pub const PER_FRAME: u32 = 1;
    /// Per-pass camera constants.
    pub const PER_PASS: u32 = 2;
    /// Shadow map, irradiance and visibility, in that order.
    pub const LIGHTING_TABLE: u32 = 3;
    /// Per-frame constants (pixel stage).
    pub const PIXEL_PER_FRAME: u32 = 4;
}

/// Root parameter slots of the screen pipeline.
pub mod screen_root {
    /// The copied scene color.
    pub const SCENE_COLOR: u32 = 0;
}

/// The vertex input layout of [`Vertex`](lumen_core::renderer::Vertex).
pub const VERTEX_LAYOUT: [VertexAttribute; 3] = [
    VertexAttribute {
        semantic: "POSITION",
        components: 3,
        offset: 0,
    },
    VertexAttribute {
        semantic: "TEXCOORD",
        components: 2,
        offset: 12,
    },
    VertexAttribute {
        semantic: "NORMAL",
        components: 3,
        offset: 20,
    },
];

/// Format of the shadow-map depth target.
pub const SHADOW_DEPTH_FORMAT: TextureFormat = DEPTH_FORMAT;

/// Every graphics pipeline the renderer knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    /// Depth-only rendering from the light.
    ShadowMap,
    /// Lit scene rendering with shadows and probe GI.
    Color,
    /// Full-screen composite of the scene color.
    Screen,
}

impl PipelineKind {
    /// All kinds, in creation order.
    pub const ALL: [PipelineKind; 3] = [
        PipelineKind::ShadowMap,
        PipelineKind::Color,
        PipelineKind::Screen,
    ];

    /// A debug label.
    pub fn label(self) -> &'static str {
        match self {
            PipelineKind::ShadowMap => "shadow map pipeline",
            PipelineKind::Color => "color pipeline",
            PipelineKind::Screen => "screen pipeline",
        }
    }

    /// The root layout of this kind.
    pub fn root_layout(self) -> RootLayout {
        let constant_buffer = |register, visibility| RootParameter::ConstantBuffer {
            register,
            space: 0,
            visibility,
        };
        let srv_table = |base_register, count, visibility| RootParameter::DescriptorTable {
            ranges: vec![DescriptorRange {
                kind: DescriptorRangeKind::Srv,
                base_register,
                space: 0,
                count,
            }],
            visibility,
        };

        match self {
            PipelineKind::ShadowMap => RootLayout {
                parameters: vec![
                    constant_buffer(0, ShaderVisibility::Vertex),
                    constant_buffer(1, ShaderVisibility::Vertex),
                ],
                static_samplers: Vec::new(),
                allow_input_layout: true,
            },
            PipelineKind::Color => RootLayout {
                parameters: vec![
                    constant_buffer(0, ShaderVisibility::Vertex),
                    constant_buffer(1, ShaderVisibility::Vertex),
                    constant_buffer(2, ShaderVisibility::All),
                    srv_table(0, 3, ShaderVisibility::Pixel),
                    constant_buffer(3, ShaderVisibility::Pixel),
                ],
                static_samplers: vec![
                    StaticSampler {
                        filter: SamplerFilter::Point,
                        address_mode: SamplerAddressMode::Border,
                        register: 0,
                        space: 0,
                    },
                    StaticSampler {
                        filter: SamplerFilter::Linear,
                        address_mode: SamplerAddressMode::Clamp,
                        register: 1,
                        space: 0,
                    },
                ],
                allow_input_layout: true,
            },
            PipelineKind::Screen => RootLayout {
                parameters: vec![srv_table(0, 1, ShaderVisibility::Pixel)],
                static_samplers: vec![StaticSampler {
                    filter: SamplerFilter::Linear,
                    address_mode: SamplerAddressMode::Clamp,
                    register: 0,
                    space: 0,
                }],
                allow_input_layout: true,
            },
        }
    }

    fn shader_names(self) -> (&'static str, Option<&'static str>) {
        match self {
            PipelineKind::ShadowMap => ("ShadowMapVertexShader", None),
            PipelineKind::Color => ("VertexShader", Some("PixelShader")),
            PipelineKind::Screen => ("ScreenVertexShader", Some("ScreenPixelShader")),
        }
    }

    fn targets(self) -> (Option<TextureFormat>, Option<TextureFormat>) {
        match self {
            PipelineKind::ShadowMap => (None, Some(SHADOW_DEPTH_FORMAT)),
            PipelineKind::Color => (Some(BACK_BUFFER_FORMAT), Some(DEPTH_FORMAT)),
            PipelineKind::Screen => (Some(BACK_BUFFER_FORMAT), None),
        }
    }
}

/// A created graphics pipeline together with the layout it was created with.
#[derive(Debug, Clone)]
pub struct GraphicsPipeline {
    kind: PipelineKind,
    id: PipelineId,
    root_layout: RootLayout,
}

impl GraphicsPipeline {
    /// Creates the pipeline of `kind`, loading its shaders from `shaders`.
    pub fn create(
        device: &dyn GpuDevice,
        shaders: &dyn ShaderBlobProvider,
        kind: PipelineKind,
    ) -> Result<Self, LaneError> {
        let (vertex, pixel) = kind.shader_names();
        let (color_format, depth_format) = kind.targets();
        let root_layout = kind.root_layout();

        let descriptor = GraphicsPipelineDescriptor {
            label: Some(kind.label().into()),
            root_layout: root_layout.clone(),
            vertex_shader: shaders.load(vertex)?,
            pixel_shader: pixel.map(|name| shaders.load(name)).transpose()?,
            vertex_layout: VERTEX_LAYOUT.to_vec(),
            color_format,
            depth_format,
            cull_back_faces: kind != PipelineKind::Screen,
        };
        let id = device.create_graphics_pipeline(&descriptor)?;
        log::debug!("Created {} ({id:?})", kind.label());

        Ok(Self {
            kind,
            id,
            root_layout,
        })
    }

    /// The kind this pipeline was created for.
    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    /// The device pipeline.
    pub fn id(&self) -> PipelineId {
        self.id
    }

    /// The root layout bound arguments must follow.
    pub fn root_layout(&self) -> &RootLayout {
        &self.root_layout
    }

    /// Records the pipeline switch. Root arguments must be bound again afterwards.
    pub fn bind(&self, list: &mut CommandList) {
        list.record(Command::SetPipeline(self.id));
    }
}

/// Owns one [`GraphicsPipeline`] per [`PipelineKind`].
#[derive(Debug, Default)]
pub struct PipelineRegistry {
    pipelines: HashMap<PipelineKind, GraphicsPipeline>,
}

impl PipelineRegistry {
    /// Creates every pipeline in [`PipelineKind::ALL`].
    ///
    /// # Errors
    /// A missing shader blob or a rejected description is fatal.
    pub fn new(
        device: &dyn GpuDevice,
        shaders: &dyn ShaderBlobProvider,
    ) -> Result<Self, LaneError> {
        let mut registry = Self::default();
        for kind in PipelineKind::ALL {
            registry.insert(GraphicsPipeline::create(device, shaders, kind)?);
        }
        log::info!("Pipeline registry ready with {} pipelines", registry.len());
        Ok(registry)
    }

    /// Adds or replaces the pipeline of its kind.
    pub fn insert(&mut self, pipeline: GraphicsPipeline) -> Option<GraphicsPipeline> {
        self.pipelines.insert(pipeline.kind, pipeline)
    }

    /// Looks up the pipeline of `kind`.
    pub fn get(&self, kind: PipelineKind) -> Result<&GraphicsPipeline, LaneError> {
        self.pipelines
            .get(&kind)
            .ok_or(LaneError::MissingPipeline(kind))
    }

    /// Number of registered pipelines.
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Whether no pipeline is registered.
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Destroys every pipeline.
    pub fn destroy(self, device: &dyn GpuDevice) -> Result<(), LaneError> {
        for pipeline in self.pipelines.into_values() {
            device.destroy_pipeline(pipeline.id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout_matches_vertex_struct() {
        let last = VERTEX_LAYOUT[2];
        assert_eq!(
            (last.offset + last.components * 4) as usize,
            std::mem::size_of::<lumen_core::renderer::Vertex>()
        );
    }

    #[test]
    fn test_color_layout_reads_three_lighting_textures() {
        let layout = PipelineKind::Color.root_layout();
        assert_eq!(layout.parameters.len(), 5);
        match layout.parameter(color_root::LIGHTING_TABLE) {
            Some(RootParameter::DescriptorTable { ranges, .. }) => {
                assert_eq!(ranges.iter().map(|r| r.count).sum::<u32>(), 3);
            }
            other => panic!("unexpected parameter {other:?}"),
        }
        assert!(matches!(
            layout.parameter(color_root::PIXEL_PER_FRAME),
            Some(RootParameter::ConstantBuffer { .. })
        ));
    }

    #[test]
    fn test_shadow_pass_writes_depth_only() {
        assert_eq!(
            PipelineKind::ShadowMap.targets(),
            (None, Some(TextureFormat::Depth32Float))
        );
        assert_eq!(PipelineKind::ShadowMap.shader_names().1, None);
    }

    #[test]
    fn test_missing_pipeline_is_reported() {
        let registry = PipelineRegistry::default();
        assert!(matches!(
            registry.get(PipelineKind::Screen),
            Err(LaneError::MissingPipeline(PipelineKind::Screen))
        ));
    }
}
