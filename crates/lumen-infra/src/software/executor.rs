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

//! Executes recorded command lists on a queue timeline.
//!
//! Every command is validated against the explicit state model before it takes effect:
//! barrier `before` states must match the tracked state, copies and clears need their
//! resources in the right state, draws and ray launches need every root parameter bound
//! and every descriptor they read in a readable state. The first violation stops the
//! list, is logged and recorded, and marks the device as lost.

use super::bvh::{BvhInstance, InstanceBvh, TriangleBvh};
use super::kernel::{self, TexelTarget};
use super::store::{
    decode_address, lock, AccelerationStructure, DeviceShared, PipelineEntry, ResourceStore,
};
use glam::Vec3;
use lumen_core::renderer::{
    shader_record_size, AccelerationStructureInputs, BufferId, BuildAccelerationStructureDesc,
    Command, DescriptorHeapId, DescriptorRange, DescriptorRangeKind, DispatchRaysDesc, GpuAddress,
    HeapKind, MaterialConstants, PerFrameConstants, PipelineId, QueueKind, RaytracingInstanceDesc,
    ResourceBarrier, ResourceError, ResourceRef, ResourceState, ResourceView, RootLayout,
    RootParameter, ShaderIdentifier, ShaderTableRange, SwapChainId, TextureId, Viewport,
    CONSTANT_BUFFER_ALIGNMENT, LOCAL_ROOT_ARGUMENT_SIZE, SHADER_IDENTIFIER_SIZE,
    SHADER_RECORD_ALIGNMENT, SHADER_TABLE_ALIGNMENT,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// A contract violation found while executing.
#[derive(Debug)]
pub(crate) struct ValidationError(String);

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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindPoint {
    Graphics,
    Compute,
}

#[derive(Debug, Default)]
struct Bindings {
    pipeline: Option<PipelineId>,
    heap: Option<DescriptorHeapId>,
    graphics_root: HashMap<u32, RootArgument>,
    compute_root: HashMap<u32, RootArgument>,
    color_target: Option<TextureId>,
    depth_target: Option<TextureId>,
    viewport: Option<Viewport>,
    vertex_buffer: Option<BufferId>,
    index_buffer: Option<(BufferId, u64)>,
    event_depth: usize,
}

/// What one list did, merged into the device diagnostics afterwards.
#[derive(Debug, Default)]
struct ExecutionRecord {
    events: Vec<String>,
    draws: u64,
    dispatches: u64,
    rays: u64,
    builds: u64,
    refits: u64,
}

struct Executor<'a> {
    queue: QueueKind,
    store: &'a mut ResourceStore,
    bindings: Bindings,
    record: ExecutionRecord,
}

/// Runs `commands` on the timeline of `queue`.
pub(crate) fn execute(shared: &DeviceShared, queue: QueueKind, commands: &[Command]) {
    if shared.device_lost.load(Ordering::Acquire) {
        log::debug!(
            "Skipping {} commands on the {queue:?} queue: device lost",
            commands.len()
        );
        return;
    }

    let (record, result) = {
        let mut store = lock(&shared.store);
        let mut executor = Executor {
            queue,
            store: &mut *store,
            bindings: Bindings::default(),
            record: ExecutionRecord::default(),
        };
        let result = commands.iter().try_for_each(|c| executor.command(c));
        (executor.record, result)
    };

    let mut diagnostics = lock(&shared.diagnostics);
    diagnostics.events.extend(record.events);
    diagnostics.draws += record.draws;
    diagnostics.dispatches += record.dispatches;
    diagnostics.rays_traced += record.rays;
    diagnostics.acceleration_structure_builds += record.builds;
    diagnostics.refits += record.refits;
    drop(diagnostics);

    if let Err(err) = result {
        report_failure(shared, queue, err);
    }
}

/// Retires a present on the direct timeline.
pub(crate) fn present(shared: &DeviceShared, swap_chain: SwapChainId, back_buffer: TextureId) {
    if shared.device_lost.load(Ordering::Acquire) {
        return;
    }
    let result = {
        let mut store = lock(&shared.store);
        present_checked(&mut store, swap_chain, back_buffer)
    };
    match result {
        Ok(()) => lock(&shared.diagnostics).events.push("Present".to_string()),
        Err(err) => report_failure(shared, QueueKind::Direct, err),
    }
}

fn present_checked(
    store: &mut ResourceStore,
    swap_chain: SwapChainId,
    back_buffer: TextureId,
) -> Result<(), ValidationError> {
    let state = store.texture(back_buffer)?.state;
    if state != ResourceState::Present {
        return fail(format!(
            "back buffer '{}' presented in {state:?} state",
            store.label(back_buffer.into())
        ));
    }
    let chain = store
        .swap_chains
        .get_mut(&swap_chain)
        .ok_or(ResourceError::InvalidHandle)?;
    chain.presented += 1;
    Ok(())
}

fn report_failure(shared: &DeviceShared, queue: QueueKind, err: ValidationError) {
    log::error!("GPU validation failed on the {queue:?} queue: {err}. Device is lost.");
    lock(&shared.diagnostics).validation_errors.push(err.0);
    shared.device_lost.store(true, Ordering::Release);
}

impl Executor<'_> {
    fn command(&mut self, command: &Command) -> Result<(), ValidationError> {
        match command {
            Command::BeginEvent(label) => {
                self.bindings.event_depth += 1;
                self.record.events.push(label.clone());
            }
            Command::EndEvent => {
                if self.bindings.event_depth == 0 {
                    return fail("EndEvent without a matching BeginEvent");
                }
                self.bindings.event_depth -= 1;
            }
            Command::Barrier(barriers) => {
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
                let texture = self.store.texture_mut(*target)?;
                if !texture.allow_render_target || texture.state != ResourceState::RenderTarget {
                    return fail(format!(
                        "clear of '{}' requires a render target in RenderTarget state (is {:?})",
                        texture.label, texture.state
                    ));
                }
                texture.texels.fill(*color);
            }
            Command::ClearDepth { target, depth } => {
                self.require_direct("ClearDepth")?;
                let texture = self.store.texture_mut(*target)?;
                if !texture.allow_depth_stencil || texture.state != ResourceState::DepthWrite {
                    return fail(format!(
                        "depth clear of '{}' requires a depth target in DepthWrite state (is {:?})",
                        texture.label, texture.state
                    ));
                }
                texture.texels.fill([*depth, 0.0, 0.0, 0.0]);
            }
            Command::SetRenderTargets { color, depth } => {
                if let Some(color) = color {
                    if !self.store.texture(*color)?.allow_render_target {
                        return fail(format!(
                            "'{}' cannot be bound as a render target",
                            self.store.label((*color).into())
                        ));
                    }
                }
                if let Some(depth) = depth {
                    if !self.store.texture(*depth)?.allow_depth_stencil {
                        return fail(format!(
                            "'{}' cannot be bound as a depth target",
                            self.store.label((*depth).into())
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
            Command::SetScissor(_) => {}
            Command::SetPipeline(id) => {
                if !self.store.pipelines.contains_key(id) {
                    return fail(format!("unknown pipeline {id:?}"));
                }
                self.bindings.pipeline = Some(*id);
                self.bindings.graphics_root.clear();
                self.bindings.compute_root.clear();
            }
            Command::SetDescriptorHeap(heap) => {
                if !self.store.heaps.contains_key(heap) {
                    return fail(format!("unknown descriptor heap {heap:?}"));
                }
                self.bindings.heap = Some(*heap);
            }
            Command::SetGraphicsRootConstantBuffer { parameter, address } => self.bind_root(
                BindPoint::Graphics,
                *parameter,
                RootArgument::ConstantBuffer(*address),
            )?,
            Command::SetGraphicsRootDescriptorTable {
                parameter,
                base_descriptor,
            } => self.bind_root(
                BindPoint::Graphics,
                *parameter,
                RootArgument::Table(*base_descriptor),
            )?,
            Command::SetComputeRootConstantBuffer { parameter, address } => self.bind_root(
                BindPoint::Compute,
                *parameter,
                RootArgument::ConstantBuffer(*address),
            )?,
            Command::SetComputeRootDescriptorTable {
                parameter,
                base_descriptor,
            } => self.bind_root(
                BindPoint::Compute,
                *parameter,
                RootArgument::Table(*base_descriptor),
            )?,
            Command::SetVertexBuffer {
                buffer,
                stride,
                size,
            } => {
                let entry = self.store.buffer(*buffer)?;
                if *stride == 0 || *size > entry.data.len() as u64 {
                    return fail(format!("invalid vertex buffer view on '{}'", entry.label));
                }
                self.bindings.vertex_buffer = Some(*buffer);
            }
            Command::SetIndexBuffer { buffer, size } => {
                let entry = self.store.buffer(*buffer)?;
                if *size % 4 != 0 || *size > entry.data.len() as u64 {
                    return fail(format!("invalid index buffer view on '{}'", entry.label));
                }
                self.bindings.index_buffer = Some((*buffer, *size));
            }
            Command::DrawIndexed {
                index_count,
                instance_count,
            } => self.draw(Some(*index_count), *instance_count)?,
            Command::Draw {
                vertex_count: _,
                instance_count,
            } => self.draw(None, *instance_count)?,
            Command::BuildAccelerationStructure(desc) => self.build(desc)?,
            Command::DispatchRays(desc) => self.dispatch_rays(desc)?,
        }
        Ok(())
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
                let actual = self.store.state(resource)?;
                let label = self.store.label(resource);
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
                    if self.store.buffer(id)?.heap == HeapKind::Upload {
                        return fail(format!("upload buffer '{label}' cannot leave GenericRead"));
                    }
                }
                self.store.set_state(resource, after)?;
            }
            ResourceBarrier::UnorderedAccess { resource } => {
                self.require_direct("UAV barrier")?;
                if let Some(resource) = resource {
                    let state = self.store.state(resource)?;
                    if !matches!(
                        state,
                        ResourceState::UnorderedAccess
                            | ResourceState::RaytracingAccelerationStructure
                    ) {
                        return fail(format!(
                            "UAV barrier on '{}' in {state:?} state",
                            self.store.label(resource)
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
        let source = self.store.buffer(src)?;
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
        if src_offset + size > source.data.len() as u64 {
            return fail(format!("copy reads past the end of '{}'", source.label));
        }
        let bytes = source.data[src_offset as usize..(src_offset + size) as usize].to_vec();

        let destination = self.store.buffer_mut(dst)?;
        if destination.heap != HeapKind::Default || destination.state != ResourceState::CopyDest {
            return fail(format!(
                "copy destination '{}' must be GPU-local in CopyDest state (is {:?})",
                destination.label, destination.state
            ));
        }
        if dst_offset + size > destination.data.len() as u64 {
            return fail(format!("copy writes past the end of '{}'", destination.label));
        }
        destination.data[dst_offset as usize..(dst_offset + size) as usize]
            .copy_from_slice(&bytes);
        Ok(())
    }

    fn copy_texture(&mut self, dst: TextureId, src: TextureId) -> Result<(), ValidationError> {
        let source = self.store.texture(src)?;
        if source.state != ResourceState::CopySource {
            return fail(format!(
                "texture copy source '{}' is in {:?} state",
                source.label, source.state
            ));
        }
        let (width, height, format) = (source.width, source.height, source.format);
        let texels = source.texels.clone();

        let destination = self.store.texture_mut(dst)?;
        if destination.state != ResourceState::CopyDest {
            return fail(format!(
                "texture copy destination '{}' is in {:?} state",
                destination.label, destination.state
            ));
        }
        if (destination.width, destination.height) != (width, height) {
            return fail(format!(
                "texture copy between {width}x{height} and {}x{}",
                destination.width, destination.height
            ));
        }
        if destination.format.bytes_per_texel() != format.bytes_per_texel() {
            return fail(format!(
                "texture copy between {format:?} and {:?}",
                destination.format
            ));
        }
        destination.texels = texels;
        Ok(())
    }

    fn bind_root(
        &mut self,
        bind_point: BindPoint,
        parameter: u32,
        argument: RootArgument,
    ) -> Result<(), ValidationError> {
        let Some(pipeline) = self.bindings.pipeline else {
            return fail(format!("root argument {parameter} bound before any pipeline"));
        };
        let entry = self
            .store
            .pipelines
            .get(&pipeline)
            .ok_or(ResourceError::InvalidHandle)?;
        let layout = match (bind_point, entry) {
            (BindPoint::Graphics, PipelineEntry::Graphics { root_layout, .. }) => root_layout,
            (BindPoint::Compute, PipelineEntry::Raytracing {
                global_root_layout, ..
            }) => global_root_layout,
            _ => {
                return fail(format!(
                    "{bind_point:?} root argument bound while '{}' is set",
                    entry.label()
                ))
            }
        };
        match (layout.parameter(parameter), argument) {
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
                    entry.label()
                ))
            }
            _ => {
                return fail(format!(
                    "root parameter {parameter} of '{}' bound with the wrong kind",
                    entry.label()
                ))
            }
        }
        match bind_point {
            BindPoint::Graphics => self.bindings.graphics_root.insert(parameter, argument),
            BindPoint::Compute => self.bindings.compute_root.insert(parameter, argument),
        };
        Ok(())
    }

    fn check_constant_buffer(&self, address: GpuAddress) -> Result<(), ValidationError> {
        let Some((buffer, offset)) = decode_address(address) else {
            return fail("null constant buffer address");
        };
        if offset % CONSTANT_BUFFER_ALIGNMENT != 0 {
            return fail(format!(
                "constant buffer address {:#x} is not {CONSTANT_BUFFER_ALIGNMENT}-byte aligned",
                address.0
            ));
        }
        self.store.resolve(address, 1)?;
        let entry = self.store.buffer(buffer)?;
        if !matches!(
            entry.state,
            ResourceState::GenericRead | ResourceState::VertexAndConstantBuffer
        ) {
            return fail(format!(
                "constant buffer '{}' is in {:?} state",
                entry.label, entry.state
            ));
        }
        Ok(())
    }

    /// Checks every descriptor a table starting at `base` reads.
    fn check_table(&self, ranges: &[DescriptorRange], base: u32) -> Result<(), ValidationError> {
        let Some(heap) = self.bindings.heap else {
            return fail("descriptor table used without a descriptor heap");
        };
        let mut offset = 0;
        for range in ranges {
            for i in 0..range.count {
                let index = base + offset + i;
                let Some(view) = self.store.descriptor(heap, index)? else {
                    return fail(format!("descriptor {index} read while empty"));
                };
                self.check_view(range.kind, index, view)?;
            }
            offset += range.count;
        }
        Ok(())
    }

    fn check_view(
        &self,
        kind: DescriptorRangeKind,
        index: u32,
        view: ResourceView,
    ) -> Result<(), ValidationError> {
        let readable = |state| {
            matches!(
                state,
                ResourceState::PixelShaderResource | ResourceState::NonPixelShaderResource
            )
        };
        match (kind, view) {
            (DescriptorRangeKind::Srv, ResourceView::TextureSrv(texture)) => {
                let state = self.store.texture(texture)?.state;
                if !readable(state) {
                    return fail(format!(
                        "'{}' read through descriptor {index} in {state:?} state",
                        self.store.label(texture.into())
                    ));
                }
            }
            (DescriptorRangeKind::Srv, ResourceView::BufferSrv { buffer, .. }) => {
                let state = self.store.buffer(buffer)?.state;
                if !readable(state)
                    && !matches!(
                        state,
                        ResourceState::VertexAndConstantBuffer | ResourceState::GenericRead
                    )
                {
                    return fail(format!(
                        "'{}' read through descriptor {index} in {state:?} state",
                        self.store.label(buffer.into())
                    ));
                }
            }
            (DescriptorRangeKind::Srv, ResourceView::AccelerationStructure(address)) => {
                if !matches!(
                    self.store.structures.get(&address.0),
                    Some(AccelerationStructure::Top(_))
                ) {
                    return fail(format!(
                        "descriptor {index} names no built top-level structure at {:#x}",
                        address.0
                    ));
                }
            }
            (DescriptorRangeKind::Srv, ResourceView::Overlay) => {}
            (DescriptorRangeKind::Uav, ResourceView::TextureUav(texture)) => {
                let state = self.store.texture(texture)?.state;
                if state != ResourceState::UnorderedAccess {
                    return fail(format!(
                        "'{}' written through descriptor {index} in {state:?} state",
                        self.store.label(texture.into())
                    ));
                }
            }
            (kind, view) => {
                return fail(format!(
                    "descriptor {index} holds {view:?} where a {kind:?} range expects another view"
                ))
            }
        }
        Ok(())
    }

    fn draw(&mut self, index_count: Option<u32>, instances: u32) -> Result<(), ValidationError> {
        self.require_direct("Draw")?;
        let Some(pipeline) = self.bindings.pipeline else {
            return fail("draw without a pipeline");
        };
        let entry = self
            .store
            .pipelines
            .get(&pipeline)
            .ok_or(ResourceError::InvalidHandle)?;
        let PipelineEntry::Graphics { label, root_layout } = entry else {
            return fail(format!("draw with raytracing pipeline '{}'", entry.label()));
        };

        for (slot, parameter) in root_layout.parameters.iter().enumerate() {
            match (parameter, self.bindings.graphics_root.get(&(slot as u32))) {
                (_, None) => {
                    return fail(format!(
                        "draw with '{label}': root parameter {slot} is not bound"
                    ))
                }
                (RootParameter::DescriptorTable { ranges, .. }, Some(RootArgument::Table(base))) => {
                    self.check_table(ranges, *base)?;
                }
                _ => {}
            }
        }

        if self.bindings.color_target.is_none() && self.bindings.depth_target.is_none() {
            return fail(format!("draw with '{label}' and no render target"));
        }
        if let Some(color) = self.bindings.color_target {
            let state = self.store.texture(color)?.state;
            if state != ResourceState::RenderTarget {
                return fail(format!(
                    "draw into '{}' in {state:?} state",
                    self.store.label(color.into())
                ));
            }
        }
        if let Some(depth) = self.bindings.depth_target {
            let state = self.store.texture(depth)?.state;
            if state != ResourceState::DepthWrite {
                return fail(format!(
                    "depth test against '{}' in {state:?} state",
                    self.store.label(depth.into())
                ));
            }
        }
        if self.bindings.viewport.is_none() {
            return fail(format!("draw with '{label}' and no viewport"));
        }

        if root_layout.allow_input_layout {
            let Some(vertex_buffer) = self.bindings.vertex_buffer else {
                return fail(format!("draw with '{label}' and no vertex buffer"));
            };
            let state = self.store.buffer(vertex_buffer)?.state;
            if state != ResourceState::VertexAndConstantBuffer {
                return fail(format!(
                    "vertex buffer '{}' in {state:?} state",
                    self.store.label(vertex_buffer.into())
                ));
            }
        }
        if let Some(index_count) = index_count {
            let Some((index_buffer, size)) = self.bindings.index_buffer else {
                return fail(format!("indexed draw with '{label}' and no index buffer"));
            };
            let state = self.store.buffer(index_buffer)?.state;
            if state != ResourceState::IndexBuffer {
                return fail(format!(
                    "index buffer '{}' in {state:?} state",
                    self.store.label(index_buffer.into())
                ));
            }
            if u64::from(index_count) * 4 > size {
                return fail(format!("indexed draw reads {index_count} indices past the view"));
            }
        }
        if instances == 0 {
            log::warn!("Draw with '{label}' and zero instances");
        }
        self.record.draws += 1;
        Ok(())
    }

    fn check_build_memory(&self, desc: &BuildAccelerationStructureDesc) -> Result<(), ValidationError> {
        let (dest, _) = self.store.resolve(desc.dest, 1)?;
        let state = self.store.buffer(dest)?.state;
        if state != ResourceState::RaytracingAccelerationStructure {
            return fail(format!(
                "acceleration structure '{}' built in {state:?} state",
                self.store.label(dest.into())
            ));
        }
        let (scratch, _) = self.store.resolve(desc.scratch, 1)?;
        let state = self.store.buffer(scratch)?.state;
        if state != ResourceState::UnorderedAccess {
            return fail(format!(
                "scratch '{}' used in {state:?} state",
                self.store.label(scratch.into())
            ));
        }
        Ok(())
    }

    fn build(&mut self, desc: &BuildAccelerationStructureDesc) -> Result<(), ValidationError> {
        self.require_direct("BuildAccelerationStructure")?;
        self.check_build_memory(desc)?;
        match &desc.inputs {
            AccelerationStructureInputs::BottomLevel { geometries, flags } => {
                if flags.perform_update {
                    return fail("bottom-level refits are not supported");
                }
                let mut positions = Vec::new();
                let mut indices = Vec::new();
                for geometry in geometries {
                    let (vertex_buffer, _) = self.store.resolve(geometry.vertex_buffer, 1)?;
                    if self.store.buffer(vertex_buffer)?.state == ResourceState::CopyDest {
                        return fail(format!(
                            "build reads '{}' before its upload finished",
                            self.store.label(vertex_buffer.into())
                        ));
                    }
                    let stride = geometry.vertex_stride as usize;
                    if stride < 12 {
                        return fail(format!("vertex stride {stride} cannot hold a position"));
                    }
                    let vertices = self.store.bytes_at(
                        geometry.vertex_buffer,
                        stride * geometry.vertex_count as usize,
                    )?;
                    let first = positions.len() as u32;
                    positions.extend(vertices.chunks_exact(stride).map(|vertex| {
                        Vec3::from_array(bytemuck::pod_read_unaligned::<[f32; 3]>(&vertex[..12]))
                    }));

                    let raw = self
                        .store
                        .bytes_at(geometry.index_buffer, 4 * geometry.index_count as usize)?;
                    for chunk in raw.chunks_exact(4) {
                        let index = bytemuck::pod_read_unaligned::<u32>(chunk);
                        if index >= geometry.vertex_count {
                            return fail(format!(
                                "index {index} out of range for {} vertices",
                                geometry.vertex_count
                            ));
                        }
                        indices.push(first + index);
                    }
                }
                let bvh = TriangleBvh::build(&positions, &indices);
                log::trace!(
                    "Built bottom-level structure: {} triangles, {} nodes",
                    bvh.triangle_count(),
                    bvh.node_count()
                );
                self.store
                    .structures
                    .insert(desc.dest.0, AccelerationStructure::Bottom(Arc::new(bvh)));
                self.record.builds += 1;
            }
            AccelerationStructureInputs::TopLevel {
                instance_descs,
                instance_count,
                flags,
            } => {
                let instances = self.read_instances(*instance_descs, *instance_count)?;
                if flags.perform_update {
                    let Some(source) = desc.source else {
                        return fail("refit without a source structure");
                    };
                    let allow_update = match self.store.structures.get(&source.0) {
                        Some(AccelerationStructure::Top(previous)) => previous.allow_update(),
                        _ => return fail(format!("refit source {:#x} is not built", source.0)),
                    };
                    if !allow_update {
                        return fail("refit of a structure built without AllowUpdate");
                    }
                    let Some(AccelerationStructure::Top(mut previous)) =
                        self.store.structures.remove(&source.0)
                    else {
                        return fail("refit source vanished");
                    };
                    let count = previous.instance_count();
                    if !previous.refit(instances) {
                        return fail(format!(
                            "refit changes the instance count from {count} to {instance_count}"
                        ));
                    }
                    self.store
                        .structures
                        .insert(desc.dest.0, AccelerationStructure::Top(previous));
                    self.record.refits += 1;
                } else {
                    let bvh = InstanceBvh::build(instances, flags.allow_update);
                    self.store
                        .structures
                        .insert(desc.dest.0, AccelerationStructure::Top(bvh));
                    self.record.builds += 1;
                }
            }
        }
        Ok(())
    }

    fn read_instances(
        &self,
        address: GpuAddress,
        count: u32,
    ) -> Result<Vec<BvhInstance>, ValidationError> {
        if count == 0 {
            return fail("top-level build with no instances");
        }
        let stride = std::mem::size_of::<RaytracingInstanceDesc>();
        let bytes = self.store.bytes_at(address, stride * count as usize)?;
        let mut instances = Vec::with_capacity(count as usize);
        for (slot, chunk) in bytes.chunks_exact(stride).enumerate() {
            let desc = bytemuck::pod_read_unaligned::<RaytracingInstanceDesc>(chunk);
            let geometry = match self.store.structures.get(&desc.acceleration_structure) {
                Some(AccelerationStructure::Bottom(bvh)) => bvh.clone(),
                _ => {
                    return fail(format!(
                        "instance {slot} references no built bottom-level structure ({:#x})",
                        desc.acceleration_structure
                    ))
                }
            };
            instances.push(BvhInstance {
                instance_id: desc.instance_id(),
                mask: desc.mask(),
                object_to_world: desc.matrix(),
                geometry,
            });
        }
        Ok(instances)
    }

    /// Reads the identifier at the start of a shader table range.
    fn read_record(
        &self,
        range: &ShaderTableRange,
        what: &str,
    ) -> Result<ShaderIdentifier, ValidationError> {
        if range.size < SHADER_IDENTIFIER_SIZE as u64 {
            return fail(format!("{what} range holds no record"));
        }
        let Some((table, offset)) = decode_address(range.address) else {
            return fail(format!("{what} range has a null address"));
        };
        if offset % SHADER_TABLE_ALIGNMENT != 0 {
            return fail(format!(
                "{what} range is not {SHADER_TABLE_ALIGNMENT}-byte aligned"
            ));
        }
        if range.stride != 0 && range.stride % SHADER_RECORD_ALIGNMENT != 0 {
            return fail(format!(
                "{what} stride {} is not {SHADER_RECORD_ALIGNMENT}-byte aligned",
                range.stride
            ));
        }
        let state = self.store.buffer(table)?.state;
        if !matches!(
            state,
            ResourceState::GenericRead | ResourceState::NonPixelShaderResource
        ) {
            return fail(format!("shader table read in {state:?} state"));
        }
        let bytes = self
            .store
            .bytes_at(range.address, SHADER_IDENTIFIER_SIZE)?;
        let mut identifier = [0u8; SHADER_IDENTIFIER_SIZE];
        identifier.copy_from_slice(bytes);
        Ok(ShaderIdentifier(identifier))
    }

    /// Decodes and validates the local root arguments stored after a record's identifier.
    fn local_arguments(
        &self,
        layout: &RootLayout,
        record: GpuAddress,
        record_size: u64,
        what: &str,
    ) -> Result<Vec<RootArgument>, ValidationError> {
        let needed = shader_record_size(layout.parameters.len());
        if record_size < needed {
            return fail(format!(
                "{what} record is {record_size} bytes, its local arguments need {needed}"
            ));
        }
        let mut arguments = Vec::with_capacity(layout.parameters.len());
        for (slot, parameter) in layout.parameters.iter().enumerate() {
            let at = record.offset((SHADER_IDENTIFIER_SIZE + slot * LOCAL_ROOT_ARGUMENT_SIZE) as u64);
            let raw = self.store.read_pod::<u64>(at)?;
            let argument = match parameter {
                RootParameter::ConstantBuffer { .. } => {
                    self.check_constant_buffer(GpuAddress(raw))?;
                    RootArgument::ConstantBuffer(GpuAddress(raw))
                }
                RootParameter::DescriptorTable { ranges, .. } => {
                    let Ok(base) = u32::try_from(raw) else {
                        return fail(format!("{what} local table {slot} has index {raw}"));
                    };
                    self.check_table(ranges, base)?;
                    RootArgument::Table(base)
                }
            };
            arguments.push(argument);
        }
        Ok(arguments)
    }

    fn dispatch_rays(&mut self, desc: &DispatchRaysDesc) -> Result<(), ValidationError> {
        self.require_direct("DispatchRays")?;
        let Some(pipeline) = self.bindings.pipeline else {
            return fail("DispatchRays without a pipeline");
        };
        let entry = self
            .store
            .pipelines
            .get(&pipeline)
            .ok_or(ResourceError::InvalidHandle)?;
        let PipelineEntry::Raytracing {
            label,
            global_root_layout,
            ray_generation_local_layout,
            hit_group_local_layout,
            exports,
        } = entry
        else {
            return fail(format!("DispatchRays with graphics pipeline '{}'", entry.label()));
        };

        for slot in 0..global_root_layout.parameters.len() as u32 {
            if !self.bindings.compute_root.contains_key(&slot) {
                return fail(format!(
                    "DispatchRays with '{label}': global parameter {slot} is not bound"
                ));
            }
        }
        if desc.width == 0 || desc.height == 0 || desc.depth == 0 {
            return fail("DispatchRays with an empty launch grid");
        }

        let expected = [
            (&desc.ray_generation, "ray-generation", &exports.ray_generation),
            (&desc.miss, "miss", &exports.miss),
            (&desc.hit_group, "hit-group", &exports.hit_group),
        ];
        for (range, what, export) in expected {
            let identifier = self.read_record(range, what)?;
            if exports.identifiers.get(export.as_str()) != Some(&identifier) {
                return fail(format!("{what} record does not hold '{export}' of '{label}'"));
            }
        }

        let ray_generation = self.local_arguments(
            ray_generation_local_layout,
            desc.ray_generation.address,
            desc.ray_generation.size,
            "ray-generation",
        )?;
        let hit_record_size = if desc.hit_group.stride == 0 {
            desc.hit_group.size
        } else {
            desc.hit_group.stride
        };
        let hit_group = self.local_arguments(
            hit_group_local_layout,
            desc.hit_group.address,
            hit_record_size,
            "hit-group",
        )?;

        let inputs = self.gather_inputs(ray_generation_local_layout, &ray_generation)?;
        let materials = match hit_group.iter().find_map(|argument| match argument {
            RootArgument::ConstantBuffer(address) => Some(*address),
            RootArgument::Table(_) => None,
        }) {
            Some(address) => Some(self.store.read_pod::<MaterialConstants>(address)?),
            None => None,
        };
        let frame = self.store.read_pod::<PerFrameConstants>(inputs.frame)?;

        let mut irradiance = std::mem::take(&mut self.store.texture_mut(inputs.irradiance)?.texels);
        let mut visibility = std::mem::take(&mut self.store.texture_mut(inputs.visibility)?.texels);
        let (irradiance_size, visibility_size) = (
            self.texture_size(inputs.irradiance)?,
            self.texture_size(inputs.visibility)?,
        );

        let mut rays = 0u64;
        if let Some(AccelerationStructure::Top(scene)) = self.store.structures.get(&inputs.scene.0)
        {
            let launches = desc.width * desc.height * desc.depth;
            for _ in 0..launches {
                let report = kernel::gather_probes(
                    scene,
                    &frame,
                    materials.as_ref(),
                    &mut TexelTarget {
                        texels: &mut irradiance,
                        width: irradiance_size.0,
                        height: irradiance_size.1,
                    },
                    &mut TexelTarget {
                        texels: &mut visibility,
                        width: visibility_size.0,
                        height: visibility_size.1,
                    },
                );
                rays += u64::from(report.rays);
            }
        }
        self.store.texture_mut(inputs.irradiance)?.texels = irradiance;
        self.store.texture_mut(inputs.visibility)?.texels = visibility;

        self.record.dispatches += 1;
        self.record.rays += rays;
        Ok(())
    }

    fn texture_size(&self, id: TextureId) -> Result<(u32, u32), ValidationError> {
        let texture = self.store.texture(id)?;
        Ok((texture.width, texture.height))
    }

    /// Finds the scene, both outputs and the per-frame constants among the
    /// ray-generation arguments.
    fn gather_inputs(
        &self,
        layout: &RootLayout,
        arguments: &[RootArgument],
    ) -> Result<GatherInputs, ValidationError> {
        let mut scene = None;
        let mut outputs = Vec::new();
        let mut frame = None;
        for (parameter, argument) in layout.parameters.iter().zip(arguments) {
            match (parameter, argument) {
                (RootParameter::DescriptorTable { ranges, .. }, RootArgument::Table(base)) => {
                    let Some(heap) = self.bindings.heap else {
                        return fail("ray-generation table without a descriptor heap");
                    };
                    let count: u32 = ranges.iter().map(|r| r.count).sum();
                    for index in *base..*base + count {
                        match self.store.descriptor(heap, index)? {
                            Some(ResourceView::AccelerationStructure(address)) => {
                                scene = Some(address)
                            }
                            Some(ResourceView::TextureUav(texture)) => outputs.push(texture),
                            _ => {}
                        }
                    }
                }
                (RootParameter::ConstantBuffer { .. }, RootArgument::ConstantBuffer(address)) => {
                    frame.get_or_insert(*address);
                }
                _ => {}
            }
        }
        match (scene, outputs.as_slice(), frame) {
            (Some(scene), [irradiance, visibility, ..], Some(frame))
                if irradiance != visibility =>
            {
                Ok(GatherInputs {
                    scene,
                    irradiance: *irradiance,
                    visibility: *visibility,
                    frame,
                })
            }
            _ => fail(
                "ray-generation arguments must provide a scene, two distinct outputs and per-frame constants",
            ),
        }
    }
}

struct GatherInputs {
    scene: GpuAddress,
    irradiance: TextureId,
    visibility: TextureId,
    frame: GpuAddress,
}
