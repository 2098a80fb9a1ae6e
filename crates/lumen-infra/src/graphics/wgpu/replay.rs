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


//! Replays recorded command lists into a wgpu command encoder.
//!
//! Lists are checked against the explicit state model while they are translated, with
//! the rules the software executor applies. Consecutive draws into the same targets share
//! one render pass, and pending clears become the load operations of the next pass on
//! their target. Barriers, copies, events and acceleration-structure builds end the
//! current pass.

use super::bindings::{uniform_range, TEXTURE_GROUP, UNIFORM_GROUP};
use super::conversions::{copy_route, padded_bytes_per_row, CopyRoute};
use super::resources::{AccelerationStructure, PipelineEntry, ResourceTables};
use crate::software::decode_address;
use lumen_core::renderer::{
    AccelerationStructureInputs, BufferId, BuildAccelerationStructureDesc, BuildFlags, Command,
    DescriptorHeapId, GpuAddress, HeapKind, PipelineId, QueueKind, RaytracingInstanceDesc,
    ResourceBarrier, ResourceError, ResourceRef, ResourceState, ResourceView, RootParameter,
    ScissorRect, TextureId, TriangleGeometry, Viewport, CONSTANT_BUFFER_ALIGNMENT,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A contract violation found while replaying.
#[derive(Debug)]
pub(crate) struct ValidationError(pub String);

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ResourceError> for ValidationError {
    fn from(err: ResourceError) -> Self {
        ValidationError(err.to_string())
    }
}

fn fail<T>(message: impl Into<String>) -> Result<T, ValidationError> {
    Err(ValidationError(message.into()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootArgument {
    ConstantBuffer(GpuAddress),
    Table(u32),
}

#[derive(Debug, Default)]
struct Bindings {
    pipeline: Option<PipelineId>,
    heap: Option<DescriptorHeapId>,
    root: HashMap<u32, RootArgument>,
    color_target: Option<TextureId>,
    depth_target: Option<TextureId>,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
    /// Buffer, stride and bytes in view.
    vertex_buffer: Option<(BufferId, u32, u64)>,
    index_buffer: Option<(BufferId, u64)>,
    event_depth: usize,
}

/// What one list did, merged into the device diagnostics after submission.
#[derive(Debug, Default)]
pub(crate) struct ReplayRecord {
    pub events: Vec<String>,
    pub draws: u64,
    pub builds: u64,
    pub refits: u64,
}

#[derive(Debug, Clone, Copy)]
enum DrawKind {
    Indexed { indices: u32, instances: u32 },
    Plain { vertices: u32, instances: u32 },
}

/// A validated draw, ready to be encoded into a render pass.
struct DrawCall {
    pipeline: Arc<wgpu::RenderPipeline>,
    groups: [Arc<wgpu::BindGroup>; 3],
    vertex_buffer: Option<(Arc<wgpu::Buffer>, u64)>,
    index_buffer: Option<(Arc<wgpu::Buffer>, u64)>,
    viewport: Viewport,
    /// Left, top, width, height, already clamped to the targets.
    scissor: (u32, u32, u32, u32),
    kind: DrawKind,
}

#[derive(Default)]
struct PassRecording {
    color: Option<TextureId>,
    depth: Option<TextureId>,
    draws: Vec<DrawCall>,
}

struct Replay<'a> {
    device: &'a wgpu::Device,
    tables: &'a mut ResourceTables,
    queue: QueueKind,
    ray_query: bool,
    encoder: wgpu::CommandEncoder,
    bindings: Bindings,
    pass: PassRecording,
    color_clears: HashMap<TextureId, [f32; 4]>,
    depth_clears: HashMap<TextureId, f32>,
    record: ReplayRecord,
}

/// Translates `commands` for `queue` into one command buffer.
///
/// Resource states in `tables` are advanced as barriers are replayed, so a failed list
/// leaves them partially updated; the caller marks the device lost in that case.
pub(crate) fn replay(
    device: &wgpu::Device,
    ray_query: bool,
    tables: &mut ResourceTables,
    queue: QueueKind,
    commands: &[Command],
) -> Result<(wgpu::CommandBuffer, ReplayRecord), ValidationError> {
    let encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some(match queue {
            QueueKind::Direct => "Direct queue list",
            QueueKind::Load => "Load queue list",
            QueueKind::Copy => "Copy queue list",
        }),
    });
    let mut replay = Replay {
        device,
        tables,
        queue,
        ray_query,
        encoder,
        bindings: Bindings::default(),
        pass: PassRecording::default(),
        color_clears: HashMap::new(),
        depth_clears: HashMap::new(),
        record: ReplayRecord::default(),
    };
    for command in commands {
        replay.command(command)?;
    }
    replay.finish()
}

fn clear_color(color: [f32; 4]) -> wgpu::Color {
    wgpu::Color {
        r: f64::from(color[0]),
        g: f64::from(color[1]),
        b: f64::from(color[2]),
        a: f64::from(color[3]),
    }
}

fn color_attachment(
    view: &wgpu::TextureView,
    load: wgpu::LoadOp<wgpu::Color>,
) -> wgpu::RenderPassColorAttachment<'_> {
    wgpu::RenderPassColorAttachment {
        view,
        resolve_target: None,
        ops: wgpu::Operations {
            load,
            store: wgpu::StoreOp::Store,
        },
        depth_slice: None,
    }
}

fn depth_attachment(
    view: &wgpu::TextureView,
    load: wgpu::LoadOp<f32>,
) -> wgpu::RenderPassDepthStencilAttachment<'_> {
    wgpu::RenderPassDepthStencilAttachment {
        view,
        depth_ops: Some(wgpu::Operations {
            load,
            store: wgpu::StoreOp::Store,
        }),
        stencil_ops: None,
    }
}

/// Clamps `scissor` to a `width` x `height` target. No scissor covers the whole target.
fn clamp_scissor(scissor: Option<ScissorRect>, width: u32, height: u32) -> (u32, u32, u32, u32) {
    match scissor {
        Some(rect) => {
            let left = rect.left.min(width);
            let top = rect.top.min(height);
            (
                left,
                top,
                rect.right.min(width).saturating_sub(left),
                rect.bottom.min(height).saturating_sub(top),
            )
        }
        None => (0, 0, width, height),
    }
}

/// A texel copy of the whole first mip of `texture`.
fn whole_texture(texture: &wgpu::Texture, aspect: wgpu::TextureAspect) -> wgpu::TexelCopyTextureInfo<'_> {
    wgpu::TexelCopyTextureInfo {
        texture,
        mip_level: 0,
        origin: wgpu::Origin3d::ZERO,
        aspect,
    }
}

/// Vertex and index inputs of one bottom-level geometry.
struct GeometryInput {
    vertices: Arc<wgpu::Buffer>,
    first_vertex: u32,
    stride: u32,
    indices: Arc<wgpu::Buffer>,
    first_index: u32,
}

impl Replay<'_> {
    fn command(&mut self, command: &Command) -> Result<(), ValidationError> {
        match command {
            Command::BeginEvent(label) => {
                self.flush()?;
                self.encoder.push_debug_group(label);
                self.bindings.event_depth += 1;
                self.record.events.push(label.clone());
            }
            Command::EndEvent => {
                if self.bindings.event_depth == 0 {
                    return fail("EndEvent without a matching BeginEvent");
                }
                self.flush()?;
                self.encoder.pop_debug_group();
                self.bindings.event_depth -= 1;
            }
            Command::Barrier(barriers) => {
                self.flush()?;
                for barrier in barriers {
                    self.barrier(barrier)?;
                }
            }
            Command::CopyBufferRegion {
                dst,
                dst_offset,
                src,
                src_offset,
                size,
            } => self.copy_buffer(*dst, *dst_offset, *src, *src_offset, *size)?,
            Command::CopyTexture { dst, src } => self.copy_texture(*dst, *src)?,
            Command::ClearRenderTarget { target, color } => {
                self.require_direct("ClearRenderTarget")?;
                let texture = self.tables.texture(*target)?;
                if !texture.allow_render_target || texture.state != ResourceState::RenderTarget {
                    return fail(format!(
                        "clear of '{}' requires a render target in RenderTarget state (is {:?})",
                        texture.label, texture.state
                    ));
                }
                if !self.pass.draws.is_empty() {
                    self.flush()?;
                }
                self.color_clears.insert(*target, *color);
            }
            Command::ClearDepth { target, depth } => {
                self.require_direct("ClearDepth")?;
                let texture = self.tables.texture(*target)?;
                if !texture.allow_depth_stencil || texture.state != ResourceState::DepthWrite {
                    return fail(format!(
                        "depth clear of '{}' requires a depth target in DepthWrite state (is {:?})",
                        texture.label, texture.state
                    ));
                }
                if !self.pass.draws.is_empty() {
                    self.flush()?;
                }
                self.depth_clears.insert(*target, *depth);
            }
            Command::SetRenderTargets { color, depth } => {
                if let Some(color) = color {
                    if !self.tables.texture(*color)?.allow_render_target {
                        return fail(format!(
                            "'{}' cannot be bound as a render target",
                            self.tables.label((*color).into())
                        ));
                    }
                }
                if let Some(depth) = depth {
                    if !self.tables.texture(*depth)?.allow_depth_stencil {
                        return fail(format!(
                            "'{}' cannot be bound as a depth target",
                            self.tables.label((*depth).into())
                        ));
                    }
                }
                self.bindings.color_target = *color;
                self.bindings.depth_target = *depth;
            }
            Command::SetViewport(viewport) => {
                if viewport.width <= 0.0 || viewport.height <= 0.0 {
                    return fail(format!("empty viewport {viewport:?}"));
                }
                self.bindings.viewport = Some(*viewport);
            }
            Command::SetScissor(rect) => self.bindings.scissor = Some(*rect),
            Command::SetPipeline(id) => {
                if !self.tables.pipelines.contains_key(id) {
                    return fail(format!("unknown pipeline {id:?}"));
                }
                self.bindings.pipeline = Some(*id);
                self.bindings.root.clear();
            }
            Command::SetDescriptorHeap(heap) => {
                if !self.tables.heaps.contains_key(heap) {
                    return fail(format!("unknown descriptor heap {heap:?}"));
                }
                self.bindings.heap = Some(*heap);
            }
            Command::SetGraphicsRootConstantBuffer { parameter, address } => {
                self.bind_root(*parameter, RootArgument::ConstantBuffer(*address))?
            }
            Command::SetGraphicsRootDescriptorTable {
                parameter,
                base_descriptor,
            } => self.bind_root(*parameter, RootArgument::Table(*base_descriptor))?,
            Command::SetComputeRootConstantBuffer { .. }
            | Command::SetComputeRootDescriptorTable { .. } => {
                return fail("compute root arguments need a raytracing pipeline, which this device cannot create")
            }
            Command::SetVertexBuffer {
                buffer,
                stride,
                size,
            } => {
                let entry = self.tables.buffer(*buffer)?;
                if *stride == 0 || *size > entry.size {
                    return fail(format!("invalid vertex buffer view on '{}'", entry.label));
                }
                self.bindings.vertex_buffer = Some((*buffer, *stride, *size));
            }
            Command::SetIndexBuffer { buffer, size } => {
                let entry = self.tables.buffer(*buffer)?;
                if *size % 4 != 0 || *size > entry.size {
                    return fail(format!("invalid index buffer view on '{}'", entry.label));
                }
                self.bindings.index_buffer = Some((*buffer, *size));
            }
            Command::DrawIndexed {
                index_count,
                instance_count,
            } => self.draw(DrawKind::Indexed {
                indices: *index_count,
                instances: *instance_count,
            })?,
            Command::Draw {
                vertex_count,
                instance_count,
            } => self.draw(DrawKind::Plain {
                vertices: *vertex_count,
                instances: *instance_count,
            })?,
            Command::BuildAccelerationStructure(desc) => self.build(desc)?,
            Command::DispatchRays(_) => {
                return fail("ray launches need a raytracing pipeline, which this device cannot create")
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<(wgpu::CommandBuffer, ReplayRecord), ValidationError> {
        self.flush()?;
        if self.bindings.event_depth > 0 {
            log::warn!(
                "Command list closed with {} open event(s)",
                self.bindings.event_depth
            );
            for _ in 0..self.bindings.event_depth {
                self.encoder.pop_debug_group();
            }
        }
        Ok((self.encoder.finish(), self.record))
    }

    fn require_direct(&self, what: &str) -> Result<(), ValidationError> {
        if self.queue.is_copy_only() {
            return fail(format!("{what} is not allowed on the copy queue"));
        }
        Ok(())
    }

    fn barrier(&mut self, barrier: &ResourceBarrier) -> Result<(), ValidationError> {
        match *barrier {
            ResourceBarrier::Transition {
                resource,
                before,
                after,
            } => {
                let actual = self.tables.state(resource)?;
                let label = self.tables.label(resource);
                if !self.queue.allows_state(before) || !self.queue.allows_state(after) {
                    return fail(format!(
                        "transition of '{label}' from {before:?} to {after:?} is not allowed on the {:?} queue",
                        self.queue
                    ));
                }
                if actual != before {
                    return fail(format!(
                        "transition of '{label}' from {before:?} to {after:?}, but it is in {actual:?}"
                    ));
                }
                if before == after {
                    return fail(format!("transition of '{label}' does not change its state"));
                }
                if let ResourceRef::Buffer(id) = resource {
                    if self.tables.buffer(id)?.heap == HeapKind::Upload {
                        return fail(format!("upload buffer '{label}' cannot leave GenericRead"));
                    }
                }
                self.tables.set_state(resource, after)?;
            }
            ResourceBarrier::UnorderedAccess { resource } => {
                self.require_direct("UAV barrier")?;
                if let Some(resource) = resource {
                    let state = self.tables.state(resource)?;
                    if !matches!(
                        state,
                        ResourceState::UnorderedAccess
                            | ResourceState::RaytracingAccelerationStructure
                    ) {
                        return fail(format!(
                            "UAV barrier on '{}' in {state:?} state",
                            self.tables.label(resource)
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        dst: BufferId,
        dst_offset: u64,
        src: BufferId,
        src_offset: u64,
        size: u64,
    ) -> Result<(), ValidationError> {
        if dst == src {
            return fail("buffer copy onto itself");
        }
        let alignment = wgpu::COPY_BUFFER_ALIGNMENT;
        if src_offset % alignment != 0 || dst_offset % alignment != 0 || size % alignment != 0 {
            return fail(format!(
                "buffer copy of {size} bytes at {src_offset} -> {dst_offset} is not {alignment}-byte aligned"
            ));
        }
        let source = self.tables.buffer(src)?;
        let readable = match source.heap {
            HeapKind::Upload => source.state == ResourceState::GenericRead,
            HeapKind::Default => source.state == ResourceState::CopySource,
        };
        if !readable {
            return fail(format!(
                "copy source '{}' is in {:?} state",
                source.label, source.state
            ));
        }
        if src_offset + size > source.size {
            return fail(format!("copy reads past the end of '{}'", source.label));
        }
        let destination = self.tables.buffer(dst)?;
        if destination.heap != HeapKind::Default || destination.state != ResourceState::CopyDest {
            return fail(format!(
                "copy destination '{}' must be GPU-local in CopyDest state (is {:?})",
                destination.label, destination.state
            ));
        }
        if dst_offset + size > destination.size {
            return fail(format!("copy writes past the end of '{}'", destination.label));
        }
        let (source, destination) = (source.buffer.clone(), destination.buffer.clone());

        self.flush()?;
        self.encoder
            .copy_buffer_to_buffer(&source, src_offset, &destination, dst_offset, size);
        Ok(())
    }

    fn copy_texture(&mut self, dst: TextureId, src: TextureId) -> Result<(), ValidationError> {
        let source = self.tables.texture(src)?;
        if source.state != ResourceState::CopySource {
            return fail(format!(
                "texture copy source '{}' is in {:?} state",
                source.label, source.state
            ));
        }
        let destination = self.tables.texture(dst)?;
        if destination.state != ResourceState::CopyDest {
            return fail(format!(
                "texture copy destination '{}' is in {:?} state",
                destination.label, destination.state
            ));
        }
        let (width, height) = (source.width, source.height);
        if (destination.width, destination.height) != (width, height) {
            return fail(format!(
                "texture copy between {width}x{height} and {}x{}",
                destination.width, destination.height
            ));
        }
        let route = copy_route(source.format, destination.format);
        if route == CopyRoute::Incompatible {
            return fail(format!(
                "texture copy between {:?} and {:?}",
                source.format, destination.format
            ));
        }
        let format = source.format;
        let (source, destination) = (source.texture.clone(), destination.texture.clone());
        let extent = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        self.flush()?;
        match route {
            CopyRoute::Direct => self.encoder.copy_texture_to_texture(
                whole_texture(&source, wgpu::TextureAspect::All),
                whole_texture(&destination, wgpu::TextureAspect::All),
                extent,
            ),
            CopyRoute::ThroughBuffer => {
                // Depth cannot be copied into a color texture directly.
                let bytes_per_row = padded_bytes_per_row(width, format);
                let scratch = self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Depth copy scratch"),
                    size: u64::from(bytes_per_row) * u64::from(height),
                    usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                let layout = wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(height),
                };
                self.encoder.copy_texture_to_buffer(
                    whole_texture(&source, wgpu::TextureAspect::DepthOnly),
                    wgpu::TexelCopyBufferInfo {
                        buffer: &scratch,
                        layout,
                    },
                    extent,
                );
                self.encoder.copy_buffer_to_texture(
                    wgpu::TexelCopyBufferInfo {
                        buffer: &scratch,
                        layout,
                    },
                    whole_texture(&destination, wgpu::TextureAspect::All),
                    extent,
                );
            }
            CopyRoute::Incompatible => {}
        }
        Ok(())
    }

    fn bind_root(&mut self, parameter: u32, argument: RootArgument) -> Result<(), ValidationError> {
        let Some(pipeline) = self.bindings.pipeline else {
            return fail(format!("root argument {parameter} bound before any pipeline"));
        };
        let entry = self.tables.pipeline(pipeline)?;
        match (entry.root_layout.parameter(parameter), argument) {
            (Some(RootParameter::ConstantBuffer { .. }), RootArgument::ConstantBuffer(address)) => {
                self.check_constant_buffer(address)?;
            }
            (Some(RootParameter::DescriptorTable { .. }), RootArgument::Table(_)) => {
                if self.bindings.heap.is_none() {
                    return fail("descriptor table bound before any descriptor heap");
                }
            }
            (None, _) => {
                return fail(format!(
                    "'{}' has no root parameter {parameter}",
                    entry.label
                ))
            }
            _ => {
                return fail(format!(
                    "root parameter {parameter} of '{}' bound with the wrong kind",
                    entry.label
                ))
            }
        }
        self.bindings.root.insert(parameter, argument);
        Ok(())
    }

    /// Checks a constant-buffer address and returns the buffer and offset it points into.
    fn check_constant_buffer(&self, address: GpuAddress) -> Result<(BufferId, u64), ValidationError> {
        let Some((buffer, offset)) = decode_address(address) else {
            return fail("null constant buffer address");
        };
        if offset % CONSTANT_BUFFER_ALIGNMENT != 0 {
            return fail(format!(
                "constant buffer address {:#x} is not {CONSTANT_BUFFER_ALIGNMENT}-byte aligned",
                address.0
            ));
        }
        self.tables.resolve(address, 1)?;
        let entry = self.tables.buffer(buffer)?;
        if !matches!(
            entry.state,
            ResourceState::GenericRead | ResourceState::VertexAndConstantBuffer
        ) {
            return fail(format!(
                "constant buffer '{}' is in {:?} state",
                entry.label, entry.state
            ));
        }
        Ok((buffer, offset))
    }

    fn uniform_group(&self, pipeline: &PipelineEntry) -> Result<wgpu::BindGroup, ValidationError> {
        let mut bound = Vec::with_capacity(pipeline.plan.uniforms.len());
        for slot in &pipeline.plan.uniforms {
            let Some(RootArgument::ConstantBuffer(address)) =
                self.bindings.root.get(&slot.parameter).copied()
            else {
                return fail(format!(
                    "draw with '{}': root parameter {} is not a bound constant buffer",
                    pipeline.label, slot.parameter
                ));
            };
            let (buffer, offset) = self.check_constant_buffer(address)?;
            let entry = self.tables.buffer(buffer)?;
            let Some(size) = uniform_range(entry.size, offset) else {
                return fail(format!(
                    "constant buffer '{}' has no room behind offset {offset}",
                    entry.label
                ));
            };
            bound.push((slot.binding, entry.buffer.clone(), offset, size));
        }
        let entries: Vec<wgpu::BindGroupEntry<'_>> = bound
            .iter()
            .map(|(binding, buffer, offset, size)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: buffer.as_ref(),
                    offset: *offset,
                    size: Some(*size),
                }),
            })
            .collect();
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Root constants"),
            layout: &pipeline.group_layouts[UNIFORM_GROUP as usize],
            entries: &entries,
        }))
    }

    /// Gathers every descriptor the pipeline's tables read into one bind group.
    fn texture_group(&self, pipeline: &PipelineEntry) -> Result<wgpu::BindGroup, ValidationError> {
        let mut views = Vec::new();
        for table in &pipeline.plan.tables {
            let Some(RootArgument::Table(base)) = self.bindings.root.get(&table.parameter).copied()
            else {
                return fail(format!(
                    "draw with '{}': root parameter {} is not a bound descriptor table",
                    pipeline.label, table.parameter
                ));
            };
            let Some(heap) = self.bindings.heap else {
                return fail("descriptor table used without a descriptor heap");
            };
            for entry in &table.entries {
                let index = base + entry.offset;
                let texture = match self.tables.descriptor(heap, index)? {
                    Some(ResourceView::TextureSrv(texture)) => texture,
                    None => return fail(format!("descriptor {index} read while empty")),
                    Some(view) => {
                        return fail(format!(
                            "descriptor {index} holds {view:?}; graphics tables read textures only"
                        ))
                    }
                };
                let texture = self.tables.texture(texture)?;
                if !matches!(
                    texture.state,
                    ResourceState::PixelShaderResource | ResourceState::NonPixelShaderResource
                ) {
                    return fail(format!(
                        "'{}' read through descriptor {index} in {:?} state",
                        texture.label, texture.state
                    ));
                }
                if texture.format.is_depth() {
                    return fail(format!(
                        "depth texture '{}' sampled through descriptor {index}; copy it into a color texture first",
                        texture.label
                    ));
                }
                views.push((entry.binding, texture.view.clone()));
            }
        }
        let entries: Vec<wgpu::BindGroupEntry<'_>> = views
            .iter()
            .map(|(binding, view)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::TextureView(view.as_ref()),
            })
            .collect();
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Descriptor tables"),
            layout: &pipeline.group_layouts[TEXTURE_GROUP as usize],
            entries: &entries,
        }))
    }

    /// Checks the bound targets against the pipeline and returns their common size.
    fn check_targets(&self, pipeline: &PipelineEntry) -> Result<(u32, u32), ValidationError> {
        let label = &pipeline.label;
        let (color, depth) = (self.bindings.color_target, self.bindings.depth_target);
        if color.is_none() && depth.is_none() {
            return fail(format!("draw with '{label}' and no render target"));
        }
        let mut size = None;
        match color {
            Some(color) => {
                let texture = self.tables.texture(color)?;
                if texture.state != ResourceState::RenderTarget {
                    return fail(format!(
                        "draw into '{}' in {:?} state",
                        texture.label, texture.state
                    ));
                }
                if pipeline.color_format != Some(texture.format) {
                    return fail(format!(
                        "'{label}' writes {:?} but '{}' is {:?}",
                        pipeline.color_format, texture.label, texture.format
                    ));
                }
                size = Some((texture.width, texture.height));
            }
            None if pipeline.color_format.is_some() => {
                return fail(format!("draw with '{label}' and no color target"));
            }
            None => {}
        }
        match depth {
            Some(depth) => {
                let texture = self.tables.texture(depth)?;
                if texture.state != ResourceState::DepthWrite {
                    return fail(format!(
                        "depth test against '{}' in {:?} state",
                        texture.label, texture.state
                    ));
                }
                if pipeline.depth_format != Some(texture.format) {
                    return fail(format!(
                        "'{label}' tests against {:?} but '{}' is {:?}",
                        pipeline.depth_format, texture.label, texture.format
                    ));
                }
                match size {
                    Some(color_size) if color_size != (texture.width, texture.height) => {
                        return fail(format!(
                            "color and depth targets of '{label}' differ in size"
                        ))
                    }
                    _ => size = Some((texture.width, texture.height)),
                }
            }
            None if pipeline.depth_format.is_some() => {
                return fail(format!("draw with '{label}' and no depth target"));
            }
            None => {}
        }
        size.ok_or_else(|| ValidationError(format!("draw with '{label}' and no render target")))
    }

    fn prepare_draw(&self, kind: DrawKind) -> Result<DrawCall, ValidationError> {
        let Some(pipeline_id) = self.bindings.pipeline else {
            return fail("draw without a pipeline");
        };
        let pipeline = self.tables.pipeline(pipeline_id)?;
        let label = &pipeline.label;
        for slot in 0..pipeline.root_layout.parameters.len() as u32 {
            if !self.bindings.root.contains_key(&slot) {
                return fail(format!(
                    "draw with '{label}': root parameter {slot} is not bound"
                ));
            }
        }
        let (width, height) = self.check_targets(pipeline)?;
        let Some(viewport) = self.bindings.viewport else {
            return fail(format!("draw with '{label}' and no viewport"));
        };

        let vertex_buffer = if pipeline.root_layout.allow_input_layout {
            let Some((buffer, stride, size)) = self.bindings.vertex_buffer else {
                return fail(format!("draw with '{label}' and no vertex buffer"));
            };
            let entry = self.tables.buffer(buffer)?;
            if entry.state != ResourceState::VertexAndConstantBuffer {
                return fail(format!(
                    "vertex buffer '{}' in {:?} state",
                    entry.label, entry.state
                ));
            }
            if stride != pipeline.vertex_stride {
                return fail(format!(
                    "'{label}' reads {}-byte vertices from a view with stride {stride}",
                    pipeline.vertex_stride
                ));
            }
            Some((entry.buffer.clone(), size))
        } else {
            None
        };

        let (index_buffer, instances) = match kind {
            DrawKind::Indexed { indices, instances } => {
                let Some((buffer, size)) = self.bindings.index_buffer else {
                    return fail(format!("indexed draw with '{label}' and no index buffer"));
                };
                let entry = self.tables.buffer(buffer)?;
                if entry.state != ResourceState::IndexBuffer {
                    return fail(format!(
                        "index buffer '{}' in {:?} state",
                        entry.label, entry.state
                    ));
                }
                if u64::from(indices) * 4 > size {
                    return fail(format!("indexed draw reads {indices} indices past the view"));
                }
                (Some((entry.buffer.clone(), size)), instances)
            }
            DrawKind::Plain { instances, .. } => (None, instances),
        };
        if instances == 0 {
            log::warn!("Draw with '{label}' and zero instances");
        }

        let groups = [
            Arc::new(self.uniform_group(pipeline)?),
            Arc::new(self.texture_group(pipeline)?),
            pipeline.sampler_group.clone(),
        ];
        Ok(DrawCall {
            pipeline: pipeline.pipeline.clone(),
            groups,
            vertex_buffer,
            index_buffer,
            viewport,
            scissor: clamp_scissor(self.bindings.scissor, width, height),
            kind,
        })
    }

    fn draw(&mut self, kind: DrawKind) -> Result<(), ValidationError> {
        self.require_direct("Draw")?;
        let call = self.prepare_draw(kind)?;
        let targets = (self.bindings.color_target, self.bindings.depth_target);
        if targets != (self.pass.color, self.pass.depth) {
            self.encode_pass()?;
            self.pass.color = targets.0;
            self.pass.depth = targets.1;
        }
        self.pass.draws.push(call);
        self.record.draws += 1;
        Ok(())
    }

    /// Encodes the recorded draws as one render pass, consuming pending clears of its targets.
    fn encode_pass(&mut self) -> Result<(), ValidationError> {
        if self.pass.draws.is_empty() {
            return Ok(());
        }
        let draws = std::mem::take(&mut self.pass.draws);
        let (color, depth) = (self.pass.color, self.pass.depth);
        let color_view = color
            .map(|id| self.tables.texture(id).map(|t| t.view.clone()))
            .transpose()?;
        let depth_view = depth
            .map(|id| self.tables.texture(id).map(|t| t.view.clone()))
            .transpose()?;
        let color_load = color
            .and_then(|id| self.color_clears.remove(&id))
            .map_or(wgpu::LoadOp::Load, |c| wgpu::LoadOp::Clear(clear_color(c)));
        let depth_load = depth
            .and_then(|id| self.depth_clears.remove(&id))
            .map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear);

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = color_view
            .iter()
            .map(|view| Some(color_attachment(view, color_load)))
            .collect();
        let mut pass = self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Lumen render pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: depth_view
                .as_ref()
                .map(|view| depth_attachment(view, depth_load)),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        for draw in &draws {
            pass.set_pipeline(&draw.pipeline);
            for (group, bind_group) in draw.groups.iter().enumerate() {
                pass.set_bind_group(group as u32, bind_group.as_ref(), &[]);
            }
            let v = draw.viewport;
            pass.set_viewport(v.x, v.y, v.width, v.height, v.min_depth, v.max_depth);
            let (x, y, width, height) = draw.scissor;
            pass.set_scissor_rect(x, y, width, height);
            if let Some((buffer, size)) = &draw.vertex_buffer {
                pass.set_vertex_buffer(0, buffer.slice(..*size));
            }
            match draw.kind {
                DrawKind::Indexed { indices, instances } => {
                    if let Some((buffer, size)) = &draw.index_buffer {
                        pass.set_index_buffer(buffer.slice(..*size), wgpu::IndexFormat::Uint32);
                        pass.draw_indexed(0..indices, 0, 0..instances);
                    }
                }
                DrawKind::Plain {
                    vertices,
                    instances,
                } => pass.draw(0..vertices, 0..instances),
            }
        }
        Ok(())
    }

    /// Ends the current pass and encodes every pending clear that no pass consumed.
    fn flush(&mut self) -> Result<(), ValidationError> {
        self.encode_pass()?;
        let colors: Vec<_> = self.color_clears.drain().collect();
        for (target, color) in colors {
            let view = self.tables.texture(target)?.view.clone();
            let attachments = [Some(color_attachment(
                &view,
                wgpu::LoadOp::Clear(clear_color(color)),
            ))];
            let _pass = self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Clear"),
                color_attachments: &attachments,
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }
        let depths: Vec<_> = self.depth_clears.drain().collect();
        for (target, depth) in depths {
            let view = self.tables.texture(target)?.view.clone();
            let _pass = self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Clear depth"),
                color_attachments: &[],
                depth_stencil_attachment: Some(depth_attachment(&view, wgpu::LoadOp::Clear(depth))),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }
        Ok(())
    }

    fn check_build_memory(&self, desc: &BuildAccelerationStructureDesc) -> Result<(), ValidationError> {
        let (dest, _) = self.tables.resolve(desc.dest, 1)?;
        let state = self.tables.buffer(dest)?.state;
        if state != ResourceState::RaytracingAccelerationStructure {
            return fail(format!(
                "acceleration structure '{}' built in {state:?} state",
                self.tables.label(dest.into())
            ));
        }
        let (scratch, _) = self.tables.resolve(desc.scratch, 1)?;
        let state = self.tables.buffer(scratch)?.state;
        if state != ResourceState::UnorderedAccess {
            return fail(format!(
                "scratch '{}' used in {state:?} state",
                self.tables.label(scratch.into())
            ));
        }
        Ok(())
    }

    fn build(&mut self, desc: &BuildAccelerationStructureDesc) -> Result<(), ValidationError> {
        self.require_direct("BuildAccelerationStructure")?;
        if !self.ray_query {
            return fail("acceleration-structure builds need ray-query support");
        }
        self.check_build_memory(desc)?;
        match &desc.inputs {
            AccelerationStructureInputs::BottomLevel { geometries, flags } => {
                self.build_bottom(desc, geometries, *flags)
            }
            AccelerationStructureInputs::TopLevel {
                instance_descs,
                instance_count,
                flags,
            } => self.build_top(desc, *instance_descs, *instance_count, *flags),
        }
    }

    fn geometry_input(&self, geometry: &TriangleGeometry) -> Result<GeometryInput, ValidationError> {
        let stride = geometry.vertex_stride;
        if stride < 12 {
            return fail(format!("vertex stride {stride} cannot hold a position"));
        }
        if geometry.index_count % 3 != 0 {
            return fail(format!(
                "{} indices do not form whole triangles",
                geometry.index_count
            ));
        }
        let (vertices, vertex_offset) = self.tables.resolve(
            geometry.vertex_buffer,
            u64::from(stride) * u64::from(geometry.vertex_count),
        )?;
        let (indices, index_offset) = self
            .tables
            .resolve(geometry.index_buffer, 4 * u64::from(geometry.index_count))?;
        for buffer in [vertices, indices] {
            if self.tables.buffer(buffer)?.state == ResourceState::CopyDest {
                return fail(format!(
                    "build reads '{}' before its upload finished",
                    self.tables.label(buffer.into())
                ));
            }
        }
        if vertex_offset % u64::from(stride) != 0 || index_offset % 4 != 0 {
            return fail("geometry addresses must start on a whole vertex and index");
        }
        Ok(GeometryInput {
            vertices: self.tables.buffer(vertices)?.buffer.clone(),
            first_vertex: (vertex_offset / u64::from(stride)) as u32,
            stride,
            indices: self.tables.buffer(indices)?.buffer.clone(),
            first_index: (index_offset / 4) as u32,
        })
    }

    fn build_bottom(
        &mut self,
        desc: &BuildAccelerationStructureDesc,
        geometries: &[TriangleGeometry],
        flags: BuildFlags,
    ) -> Result<(), ValidationError> {
        if flags.perform_update {
            return fail("bottom-level refits are not supported");
        }
        if geometries.is_empty() {
            return fail("bottom-level build with no geometry");
        }
        let mut sizes = Vec::with_capacity(geometries.len());
        let mut inputs = Vec::with_capacity(geometries.len());
        for geometry in geometries {
            inputs.push(self.geometry_input(geometry)?);
            sizes.push(wgpu::BlasTriangleGeometrySizeDescriptor {
                vertex_format: wgpu::VertexFormat::Float32x3,
                vertex_count: geometry.vertex_count,
                index_format: Some(wgpu::IndexFormat::Uint32),
                index_count: Some(geometry.index_count),
                flags: if geometry.opaque {
                    wgpu::AccelerationStructureGeometryFlags::OPAQUE
                } else {
                    wgpu::AccelerationStructureGeometryFlags::empty()
                },
            });
        }

        let blas = self.device.create_blas(
            &wgpu::CreateBlasDescriptor {
                label: Some("Bottom-level structure"),
                flags: wgpu::AccelerationStructureFlags::PREFER_FAST_TRACE,
                update_mode: wgpu::AccelerationStructureUpdateMode::Build,
            },
            wgpu::BlasGeometrySizeDescriptors::Triangles {
                descriptors: sizes.clone(),
            },
        );

        self.flush()?;
        let triangles = inputs
            .iter()
            .zip(&sizes)
            .map(|(input, size)| wgpu::BlasTriangleGeometry {
                size,
                vertex_buffer: input.vertices.as_ref(),
                first_vertex: input.first_vertex,
                vertex_stride: u64::from(input.stride),
                index_buffer: Some(input.indices.as_ref()),
                first_index: Some(input.first_index),
                transform_buffer: None,
                transform_buffer_offset: None,
            })
            .collect();
        self.encoder.build_acceleration_structures(
            std::iter::once(&wgpu::BlasBuildEntry {
                blas: &blas,
                geometry: wgpu::BlasGeometries::TriangleGeometries(triangles),
            }),
            None,
        );
        log::trace!(
            "Encoded bottom-level build over {} geometries",
            geometries.len()
        );
        self.tables
            .structures
            .insert(desc.dest.0, AccelerationStructure::Bottom(Arc::new(blas)));
        self.record.builds += 1;
        Ok(())
    }

    /// Reads instance records from an upload buffer's CPU copy.
    fn read_instances(
        &self,
        address: GpuAddress,
        count: u32,
    ) -> Result<Vec<wgpu::TlasInstance>, ValidationError> {
        if count == 0 {
            return fail("top-level build with no instances");
        }
        let stride = std::mem::size_of::<RaytracingInstanceDesc>();
        let len = stride * count as usize;
        let (buffer, offset) = self.tables.resolve(address, len as u64)?;
        let entry = self.tables.buffer(buffer)?;
        if entry.heap != HeapKind::Upload {
            return fail(format!(
                "instance records are read from GPU-local '{}'; write them into an upload buffer",
                entry.label
            ));
        }
        let start = offset as usize;
        let Some(bytes) = entry.shadow.get(start..start + len) else {
            return fail(format!("instance records run past the end of '{}'", entry.label));
        };
        let mut instances = Vec::with_capacity(count as usize);
        for (slot, chunk) in bytes.chunks_exact(stride).enumerate() {
            let record = bytemuck::pod_read_unaligned::<RaytracingInstanceDesc>(chunk);
            let blas = match self.tables.structures.get(&record.acceleration_structure) {
                Some(AccelerationStructure::Bottom(blas)) => blas,
                _ => {
                    return fail(format!(
                        "instance {slot} references no built bottom-level structure ({:#x})",
                        record.acceleration_structure
                    ))
                }
            };
            let transform: [f32; 12] = bytemuck::cast(record.transform);
            instances.push(wgpu::TlasInstance::new(
                blas,
                transform,
                record.instance_id(),
                record.mask(),
            ));
        }
        Ok(instances)
    }

    fn build_top(
        &mut self,
        desc: &BuildAccelerationStructureDesc,
        instance_descs: GpuAddress,
        instance_count: u32,
        flags: BuildFlags,
    ) -> Result<(), ValidationError> {
        let instances = self.read_instances(instance_descs, instance_count)?;
        let (mut tlas, allow_update) = if flags.perform_update {
            let Some(source) = desc.source else {
                return fail("refit without a source structure");
            };
            match self.tables.structures.get(&source.0) {
                Some(AccelerationStructure::Top {
                    allow_update: false,
                    ..
                }) => return fail("refit of a structure built without AllowUpdate"),
                Some(AccelerationStructure::Top {
                    instance_count: count,
                    ..
                }) if *count != instance_count => {
                    return fail(format!(
                        "refit changes the instance count from {count} to {instance_count}"
                    ))
                }
                Some(AccelerationStructure::Top { .. }) => {}
                _ => return fail(format!("refit source {:#x} is not built", source.0)),
            }
            let Some(AccelerationStructure::Top { tlas, .. }) =
                self.tables.structures.remove(&source.0)
            else {
                return fail("refit source vanished");
            };
            (tlas, true)
        } else {
            let tlas = self.device.create_tlas(&wgpu::CreateTlasDescriptor {
                label: Some("Top-level structure"),
                max_instances: instance_count,
                flags: if flags.allow_update {
                    wgpu::AccelerationStructureFlags::PREFER_FAST_TRACE
                        | wgpu::AccelerationStructureFlags::ALLOW_UPDATE
                } else {
                    wgpu::AccelerationStructureFlags::PREFER_FAST_TRACE
                },
                update_mode: if flags.allow_update {
                    wgpu::AccelerationStructureUpdateMode::PreferUpdate
                } else {
                    wgpu::AccelerationStructureUpdateMode::Build
                },
            });
            (tlas, flags.allow_update)
        };
        for (slot, instance) in instances.into_iter().enumerate() {
            tlas[slot] = Some(instance);
        }

        self.flush()?;
        self.encoder.build_acceleration_structures(None, Some(&tlas));
        self.tables.structures.insert(
            desc.dest.0,
            AccelerationStructure::Top {
                tlas,
                allow_update,
                instance_count,
            },
        );
        if flags.perform_update {
            self.record.refits += 1;
        } else {
            self.record.builds += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scissor_defaults_to_the_whole_target() {
        assert_eq!(clamp_scissor(None, 640, 480), (0, 0, 640, 480));
    }

    #[test]
    fn test_scissor_is_clamped_to_the_target() {
        let rect = ScissorRect {
            left: 600,
            top: 10,
            right: 800,
            bottom: 900,
        };
        assert_eq!(clamp_scissor(Some(rect), 640, 480), (600, 10, 40, 470));

        let outside = ScissorRect {
            left: 700,
            top: 500,
            right: 900,
            bottom: 600,
        };
        assert_eq!(clamp_scissor(Some(outside), 640, 480), (640, 480, 0, 0));
    }

    #[test]
    fn test_clear_colors_widen_without_loss() {
        let color = clear_color([0.25, 0.5, 0.75, 1.0]);
        assert_eq!((color.r, color.g, color.b, color.a), (0.25, 0.5, 0.75, 1.0));
    }
}
