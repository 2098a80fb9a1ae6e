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


//! Maps root layouts onto wgpu bind groups.
//!
//! Constant buffers live in group 0 at `binding = register`, the views of every
//! descriptor table in group 1 at `binding = base_register + k`, static samplers in
//! group 2 at `binding = register`. Shaders written for this backend declare their
//! resources under the same numbers.

use lumen_core::renderer::{DescriptorRangeKind, RootLayout, RootParameter, StaticSampler};
use std::collections::HashSet;
use std::num::NonZeroU64;

use super::conversions::IntoWgpu;

/// Bind group holding root constant buffers.
pub(crate) const UNIFORM_GROUP: u32 = 0;
/// Bind group holding the views of descriptor tables.
pub(crate) const TEXTURE_GROUP: u32 = 1;
/// Bind group holding static samplers.
pub(crate) const SAMPLER_GROUP: u32 = 2;
/// Number of bind groups every pipeline layout declares.
pub(crate) const GROUP_COUNT: usize = 3;

/// Largest uniform range one binding exposes.
pub(crate) const MAX_UNIFORM_BINDING_SIZE: u64 = 64 * 1024;

/// A root constant buffer and the binding it lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UniformSlot {
    pub parameter: u32,
    pub binding: u32,
    pub visibility: wgpu::ShaderStages,
}

/// One view read through a descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TableEntry {
    pub binding: u32,
    /// Slot relative to the table's base descriptor.
    pub offset: u32,
}

/// A root descriptor table and the bindings its views land on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TableSlot {
    pub parameter: u32,
    pub entries: Vec<TableEntry>,
    pub visibility: wgpu::ShaderStages,
}

/// How the arguments of a root layout are laid out in bind groups.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct BindingPlan {
    pub uniforms: Vec<UniformSlot>,
    pub tables: Vec<TableSlot>,
    pub samplers: Vec<StaticSampler>,
}

impl BindingPlan {
    /// Derives the plan of a graphics root layout.
    ///
    /// Only register space 0 exists on this backend, and graphics tables hold
    /// shader-readable views only.
    pub fn from_layout(layout: &RootLayout) -> Result<Self, String> {
        let mut plan = Self::default();
        let mut uniform_bindings = HashSet::new();
        let mut texture_bindings = HashSet::new();

        for (index, parameter) in layout.parameters.iter().enumerate() {
            let parameter_index = index as u32;
            match parameter {
                RootParameter::ConstantBuffer {
                    register,
                    space,
                    visibility,
                } => {
                    if *space != 0 {
                        return Err(format!("parameter {index} uses register space {space}"));
                    }
                    if !uniform_bindings.insert(*register) {
                        return Err(format!("constant buffer register b{register} bound twice"));
                    }
                    plan.uniforms.push(UniformSlot {
                        parameter: parameter_index,
                        binding: *register,
                        visibility: visibility.into_wgpu(),
                    });
                }
                RootParameter::DescriptorTable { ranges, visibility } => {
                    let mut entries = Vec::new();
                    let mut offset = 0;
                    for range in ranges {
                        if range.kind == DescriptorRangeKind::Uav {
                            return Err(format!(
                                "table {index} writes unordered-access views from a graphics pipeline"
                            ));
                        }
                        if range.space != 0 {
                            return Err(format!(
                                "table {index} uses register space {}",
                                range.space
                            ));
                        }
                        for k in 0..range.count {
                            let binding = range.base_register + k;
                            if !texture_bindings.insert(binding) {
                                return Err(format!("texture register t{binding} bound twice"));
                            }
                            entries.push(TableEntry {
                                binding,
                                offset: offset + k,
                            });
                        }
                        offset += range.count;
                    }
                    plan.tables.push(TableSlot {
                        parameter: parameter_index,
                        entries,
                        visibility: visibility.into_wgpu(),
                    });
                }
            }
        }

        let mut sampler_bindings = HashSet::new();
        for sampler in &layout.static_samplers {
            if sampler.space != 0 {
                return Err(format!(
                    "sampler s{} uses register space {}",
                    sampler.register, sampler.space
                ));
            }
            if !sampler_bindings.insert(sampler.register) {
                return Err(format!("sampler register s{} declared twice", sampler.register));
            }
        }
        plan.samplers = layout.static_samplers.clone();
        Ok(plan)
    }

    /// The uniform slot fed by root parameter `parameter`.
    #[cfg(test)]
    pub fn uniform(&self, parameter: u32) -> Option<&UniformSlot> {
        self.uniforms.iter().find(|u| u.parameter == parameter)
    }

    /// The table slot fed by root parameter `parameter`.
    #[cfg(test)]
    pub fn table(&self, parameter: u32) -> Option<&TableSlot> {
        self.tables.iter().find(|t| t.parameter == parameter)
    }

    /// Layout entries of bind group `group`.
    pub fn layout_entries(&self, group: u32) -> Vec<wgpu::BindGroupLayoutEntry> {
        match group {
            UNIFORM_GROUP => self
                .uniforms
                .iter()
                .map(|slot| wgpu::BindGroupLayoutEntry {
                    binding: slot.binding,
                    visibility: slot.visibility,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                })
                .collect(),
            TEXTURE_GROUP => self
                .tables
                .iter()
                .flat_map(|table| {
                    table.entries.iter().map(|entry| wgpu::BindGroupLayoutEntry {
                        binding: entry.binding,
                        visibility: table.visibility,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: false },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    })
                })
                .collect(),
            SAMPLER_GROUP => self
                .samplers
                .iter()
                .map(|sampler| wgpu::BindGroupLayoutEntry {
                    binding: sampler.register,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(
                        IntoWgpu::<wgpu::SamplerBindingType>::into_wgpu(sampler.filter),
                    ),
                    count: None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// The byte range a constant-buffer binding exposes: everything from `offset` to the
/// end of the buffer, capped at [`MAX_UNIFORM_BINDING_SIZE`] and rounded down to whole
/// 16-byte rows.
pub(crate) fn uniform_range(buffer_size: u64, offset: u64) -> Option<NonZeroU64> {
    let available = buffer_size.saturating_sub(offset).min(MAX_UNIFORM_BINDING_SIZE);
    NonZeroU64::new(available / 16 * 16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::renderer::{
        DescriptorRange, SamplerAddressMode, SamplerFilter, ShaderVisibility,
    };

    fn cb(register: u32, visibility: ShaderVisibility) -> RootParameter {
        RootParameter::ConstantBuffer {
            register,
            space: 0,
            visibility,
        }
    }

    fn srv_table(base_register: u32, count: u32) -> RootParameter {
        RootParameter::DescriptorTable {
            ranges: vec![DescriptorRange {
                kind: DescriptorRangeKind::Srv,
                base_register,
                space: 0,
                count,
            }],
            visibility: ShaderVisibility::Pixel,
        }
    }

    fn lit_layout() -> RootLayout {
        RootLayout {
            parameters: vec![
                cb(0, ShaderVisibility::Vertex),
                cb(1, ShaderVisibility::Vertex),
                cb(2, ShaderVisibility::All),
                srv_table(0, 3),
                cb(3, ShaderVisibility::Pixel),
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
        }
    }

    #[test]
    fn test_lit_layout_maps_registers_to_bindings() {
        let plan = BindingPlan::from_layout(&lit_layout()).unwrap();
        assert_eq!(plan.uniforms.len(), 4);
        assert_eq!(plan.uniform(4).map(|u| u.binding), Some(3));
        assert_eq!(
            plan.uniform(2).map(|u| u.visibility),
            Some(wgpu::ShaderStages::VERTEX_FRAGMENT)
        );
        assert!(plan.uniform(3).is_none());

        let table = plan.table(3).unwrap();
        let bindings: Vec<(u32, u32)> = table.entries.iter().map(|e| (e.binding, e.offset)).collect();
        assert_eq!(bindings, vec![(0, 0), (1, 1), (2, 2)]);
        assert_eq!(table.visibility, wgpu::ShaderStages::FRAGMENT);
    }

    #[test]
    fn test_layout_entries_per_group() {
        let plan = BindingPlan::from_layout(&lit_layout()).unwrap();
        assert_eq!(plan.layout_entries(UNIFORM_GROUP).len(), 4);
        let textures = plan.layout_entries(TEXTURE_GROUP);
        assert_eq!(textures.len(), 3);
        assert!(matches!(
            textures[0].ty,
            wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                ..
            }
        ));
        let samplers = plan.layout_entries(SAMPLER_GROUP);
        assert_eq!(
            samplers.iter().map(|s| s.ty).collect::<Vec<_>>(),
            vec![
                wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            ]
        );
        assert!(plan.layout_entries(7).is_empty());
    }

    #[test]
    fn test_multi_range_tables_continue_offsets() {
        let layout = RootLayout {
            parameters: vec![RootParameter::DescriptorTable {
                ranges: vec![
                    DescriptorRange {
                        kind: DescriptorRangeKind::Srv,
                        base_register: 4,
                        space: 0,
                        count: 2,
                    },
                    DescriptorRange {
                        kind: DescriptorRangeKind::Srv,
                        base_register: 0,
                        space: 0,
                        count: 1,
                    },
                ],
                visibility: ShaderVisibility::All,
            }],
            ..Default::default()
        };
        let plan = BindingPlan::from_layout(&layout).unwrap();
        let bindings: Vec<(u32, u32)> = plan.tables[0]
            .entries
            .iter()
            .map(|e| (e.binding, e.offset))
            .collect();
        assert_eq!(bindings, vec![(4, 0), (5, 1), (0, 2)]);
    }

    #[test]
    fn test_unsupported_layouts_are_rejected() {
        let uav = RootLayout {
            parameters: vec![RootParameter::DescriptorTable {
                ranges: vec![DescriptorRange {
                    kind: DescriptorRangeKind::Uav,
                    base_register: 0,
                    space: 0,
                    count: 1,
                }],
                visibility: ShaderVisibility::All,
            }],
            ..Default::default()
        };
        assert!(BindingPlan::from_layout(&uav).is_err());

        let spaced = RootLayout {
            parameters: vec![RootParameter::ConstantBuffer {
                register: 0,
                space: 1,
                visibility: ShaderVisibility::All,
            }],
            ..Default::default()
        };
        assert!(BindingPlan::from_layout(&spaced).is_err());

        let duplicate = RootLayout {
            parameters: vec![cb(0, ShaderVisibility::Vertex), cb(0, ShaderVisibility::Pixel)],
            ..Default::default()
        };
        let err = BindingPlan::from_layout(&duplicate).unwrap_err();
        assert!(err.contains("b0"));

        let overlapping = RootLayout {
            parameters: vec![srv_table(0, 2), srv_table(1, 1)],
            ..Default::default()
        };
        assert!(BindingPlan::from_layout(&overlapping).is_err());
    }

    #[test]
    fn test_uniform_range_is_capped() {
        assert_eq!(uniform_range(1 << 20, 256).map(NonZeroU64::get), Some(MAX_UNIFORM_BINDING_SIZE));
        assert_eq!(uniform_range(1024, 768).map(NonZeroU64::get), Some(256));
        assert_eq!(uniform_range(1024, 1000).map(NonZeroU64::get), Some(16));
        assert_eq!(uniform_range(1024, 1016), None);
        assert_eq!(uniform_range(1024, 2048), None);
    }
}
