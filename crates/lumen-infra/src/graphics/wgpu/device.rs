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


use super::bindings::{BindingPlan, SAMPLER_GROUP, TEXTURE_GROUP, UNIFORM_GROUP};
use super::context::{WgpuContext, WgpuDeviceDescriptor};
use super::conversions::{
    address_mode, buffer_usages, copy_aspect, decode_rows, padded_bytes_per_row, texture_usages,
    vertex_format, IntoWgpu,
};
use super::replay::{replay, ValidationError};
use super::resources::{
    AllocatorEntry, BufferEntry, Diagnostics, PipelineEntry, ResourceTables, SwapChainEntry,
    TextureEntry,
};
use crate::software::{encode_address, lock, prebuild_estimate};
use lumen_core::renderer::{
    AccelerationStructureInputs, AdapterInfo, BufferDescriptor, BufferId, CommandAllocatorId,
    CommandList, DescriptorHeapId, DeviceFeature, FenceId, GpuAddress, GpuDevice,
    GraphicsPipelineDescriptor, HeapKind, PipelineError, PipelineId, PrebuildInfo, PresentMode,
    QueueKind, RaytracingPipelineDescriptor, RenderError, ResourceError, ResourceRef,
    ResourceState, ResourceView, ShaderBlob, ShaderError, ShaderIdentifier, SwapChainDescriptor,
    SwapChainId, TextureDescriptor, TextureFormat, TextureId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

const VERTEX_ENTRY_POINT: &str = "vs_main";
const FRAGMENT_ENTRY_POINT: &str = "fs_main";

/// How long a texture readback may wait for its mapping.
const READBACK_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_micros(200);

/// A [`GpuDevice`] backed by a real graphics adapter through wgpu.
///
/// Command lists are validated against the explicit state model and translated into
/// wgpu command buffers when they are submitted. The direct, load and copy queues share
/// the adapter's single queue, so submissions retire in submission order. Fences are
/// signalled from queue completion callbacks. Back buffers are offscreen textures: no
/// window surface is involved.
///
/// The device exposes no raytracing pipelines. When the adapter supports ray queries,
/// acceleration structures are built on the GPU.
#[derive(Debug)]
pub struct WgpuDevice {
    descriptor: WgpuDeviceDescriptor,
    context: WgpuContext,
    tables: Mutex<ResourceTables>,
    diagnostics: Mutex<Diagnostics>,
    device_lost: AtomicBool,
    fences: Mutex<HashMap<FenceId, Arc<AtomicU64>>>,

    /// Serial of the last submission.
    last_serial: AtomicU64,
    /// Highest serial whose work has completed.
    completed_serial: Arc<AtomicU64>,
    /// Serial of the last direct-queue submission.
    last_direct_serial: AtomicU64,

    next_fence_id: AtomicUsize,
    next_buffer_id: AtomicUsize,
    next_texture_id: AtomicUsize,
    next_heap_id: AtomicUsize,
    next_pipeline_id: AtomicUsize,
    next_allocator_id: AtomicUsize,
    next_swap_chain_id: AtomicUsize,
}

impl WgpuDevice {
    /// Acquires an adapter and a logical device.
    ///
    /// # Errors
    /// [`RenderError::InitializationFailed`] if no adapter matches `descriptor` or the
    /// logical device cannot be created.
    pub fn new(descriptor: WgpuDeviceDescriptor) -> Result<Self, RenderError> {
        let context = pollster::block_on(WgpuContext::new(&descriptor))?;
        log::info!(
            "WgpuDevice '{}' created (backend: {:?}, ray queries: {})",
            context.adapter_name,
            context.backend,
            context.has_ray_query()
        );
        Ok(Self {
            descriptor,
            context,
            tables: Mutex::new(ResourceTables::default()),
            diagnostics: Mutex::new(Diagnostics::default()),
            device_lost: AtomicBool::new(false),
            fences: Mutex::new(HashMap::new()),
            last_serial: AtomicU64::new(0),
            completed_serial: Arc::new(AtomicU64::new(0)),
            last_direct_serial: AtomicU64::new(0),
            next_fence_id: AtomicUsize::new(0),
            next_buffer_id: AtomicUsize::new(0),
            next_texture_id: AtomicUsize::new(0),
            next_heap_id: AtomicUsize::new(0),
            next_pipeline_id: AtomicUsize::new(0),
            next_allocator_id: AtomicUsize::new(0),
            next_swap_chain_id: AtomicUsize::new(0),
        })
    }

    /// The descriptor the device was created with.
    pub fn descriptor(&self) -> &WgpuDeviceDescriptor {
        &self.descriptor
    }

    fn tables(&self) -> MutexGuard<'_, ResourceTables> {
        lock(&self.tables)
    }

    fn fence(&self, fence: FenceId) -> Result<Arc<AtomicU64>, ResourceError> {
        lock(&self.fences)
            .get(&fence)
            .cloned()
            .ok_or(ResourceError::InvalidHandle)
    }

    fn check_device(&self) -> Result<(), RenderError> {
        if self.is_device_lost() {
            let reason = self
                .validation_errors()
                .last()
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            return Err(RenderError::DeviceLost(reason));
        }
        Ok(())
    }

    /// Records a contract violation and puts the device in the lost state.
    fn lose_device(&self, queue: QueueKind, err: ValidationError) -> RenderError {
        log::error!("GPU validation failed on the {queue:?} queue: {err}. Device is lost.");
        lock(&self.diagnostics).validation_errors.push(err.0.clone());
        self.device_lost.store(true, Ordering::Release);
        RenderError::DeviceLost(err.0)
    }

    /// Submits `commands` and returns the serial that completes with them.
    fn submit(&self, commands: Option<wgpu::CommandBuffer>) -> u64 {
        let serial = self.last_serial.fetch_add(1, Ordering::AcqRel) + 1;
        self.context.queue.submit(commands);
        let completed = self.completed_serial.clone();
        self.context.queue.on_submitted_work_done(move || {
            completed.fetch_max(serial, Ordering::AcqRel);
        });
        serial
    }

    /// Whether every submission up to `serial` has completed.
    fn is_complete(&self, serial: u64) -> bool {
        if self.completed_serial.load(Ordering::Acquire) >= serial {
            return true;
        }
        self.context.poll();
        self.completed_serial.load(Ordering::Acquire) >= serial
    }

    fn new_texture(
        &self,
        tables: &mut ResourceTables,
        descriptor: &TextureDescriptor,
    ) -> Result<TextureId, ResourceError> {
        let label = descriptor.label.as_deref().unwrap_or_default();
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(ResourceError::BackendError(format!(
                "texture '{label}' has zero extent"
            )));
        }
        if descriptor.allow_depth_stencil && !descriptor.format.is_depth() {
            return Err(ResourceError::BackendError(format!(
                "texture '{label}': depth binding requires a depth format"
            )));
        }
        let id = TextureId(self.next_texture_id.fetch_add(1, Ordering::Relaxed));
        let label = if label.is_empty() {
            format!("{id:?}")
        } else {
            label.to_string()
        };
        let texture = self.context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label.as_str()),
            size: wgpu::Extent3d {
                width: descriptor.width,
                height: descriptor.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: descriptor.format.into_wgpu(),
            usage: texture_usages(descriptor),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        tables.textures.insert(
            id,
            TextureEntry {
                label,
                texture: Arc::new(texture),
                view: Arc::new(view),
                width: descriptor.width,
                height: descriptor.height,
                format: descriptor.format,
                state: descriptor.initial_state,
                allow_render_target: descriptor.allow_render_target,
                allow_depth_stencil: descriptor.allow_depth_stencil,
                allow_unordered_access: descriptor.allow_unordered_access,
            },
        );
        Ok(id)
    }

    fn create_back_buffers(
        &self,
        tables: &mut ResourceTables,
        width: u32,
        height: u32,
        count: usize,
        format: TextureFormat,
    ) -> Result<Vec<TextureId>, ResourceError> {
        (0..count)
            .map(|index| {
                self.new_texture(
                    tables,
                    &TextureDescriptor {
                        label: Some(format!("back buffer {index}").into()),
                        width,
                        height,
                        format,
                        initial_state: ResourceState::Present,
                        allow_render_target: true,
                        allow_depth_stencil: false,
                        allow_unordered_access: false,
                    },
                )
            })
            .collect()
    }

    /// Compiles a WGSL blob.
    fn shader_module(
        &self,
        pipeline: &str,
        blob: &ShaderBlob,
    ) -> Result<wgpu::ShaderModule, ResourceError> {
        if blob.bytes.is_empty() {
            return Err(PipelineError::CreationFailed {
                label: pipeline.to_string(),
                details: format!("shader '{}' is empty", blob.name),
            }
            .into());
        }
        let source = std::str::from_utf8(&blob.bytes).map_err(|e| ShaderError::Malformed {
            name: blob.name.clone(),
            reason: format!("not WGSL text: {e}"),
        })?;
        Ok(self
            .context
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(blob.name.as_str()),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            }))
    }

    fn create_samplers(&self, plan: &BindingPlan) -> Vec<wgpu::Sampler> {
        let border_supported = self.context.has_border_clamp();
        plan.samplers
            .iter()
            .map(|sampler| {
                let mode = address_mode(sampler.address_mode, border_supported);
                let filter: wgpu::FilterMode = sampler.filter.into_wgpu();
                self.context.device.create_sampler(&wgpu::SamplerDescriptor {
                    label: Some("Static sampler"),
                    address_mode_u: mode,
                    address_mode_v: mode,
                    address_mode_w: mode,
                    mag_filter: filter,
                    min_filter: filter,
                    border_color: (mode == wgpu::AddressMode::ClampToBorder)
                        .then_some(wgpu::SamplerBorderColor::OpaqueBlack),
                    ..Default::default()
                })
            })
            .collect()
    }

    // --- Diagnostics ---

    /// Labels of every executed `BeginEvent` and present, in submission order.
    pub fn executed_events(&self) -> Vec<String> {
        lock(&self.diagnostics).events.clone()
    }

    /// Every validation failure observed so far.
    pub fn validation_errors(&self) -> Vec<String> {
        lock(&self.diagnostics).validation_errors.clone()
    }

    /// Whether a validation failure has put the device in the lost state.
    pub fn is_device_lost(&self) -> bool {
        self.device_lost.load(Ordering::Acquire)
    }

    /// Number of draws submitted.
    pub fn draw_count(&self) -> u64 {
        lock(&self.diagnostics).draws
    }

    /// Number of full acceleration-structure builds submitted.
    pub fn acceleration_structure_builds(&self) -> u64 {
        lock(&self.diagnostics).acceleration_structure_builds
    }

    /// Number of top-level refits submitted.
    pub fn refit_count(&self) -> u64 {
        lock(&self.diagnostics).refits
    }

    /// Number of presents on a swap chain.
    pub fn present_count(&self, id: SwapChainId) -> Result<u64, ResourceError> {
        self.tables()
            .swap_chains
            .get(&id)
            .map(|chain| chain.presented)
            .ok_or(ResourceError::InvalidHandle)
    }

    /// The state a resource is in after every submitted command.
    pub fn resource_state(
        &self,
        resource: impl Into<ResourceRef>,
    ) -> Result<ResourceState, ResourceError> {
        self.tables().state(resource.into())
    }

    /// Whether acceleration structures can be built on this adapter.
    pub fn supports_ray_query(&self) -> bool {
        self.context.has_ray_query()
    }
}

impl Drop for WgpuDevice {
    fn drop(&mut self) {
        self.context.poll_blocking();
    }
}

impl GpuDevice for WgpuDevice {
    fn adapter_info(&self) -> AdapterInfo {
        AdapterInfo {
            name: self.context.adapter_name.clone(),
            backend: format!("{:?}", self.context.backend),
        }
    }

    fn supports_feature(&self, feature: DeviceFeature) -> bool {
        match feature {
            DeviceFeature::Tearing | DeviceFeature::Raytracing => false,
        }
    }

    fn create_fence(&self, initial_value: u64) -> Result<FenceId, ResourceError> {
        let id = FenceId(self.next_fence_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.fences).insert(id, Arc::new(AtomicU64::new(initial_value)));
        log::debug!("WgpuDevice: created fence {id:?} at {initial_value}");
        Ok(id)
    }

    fn completed_fence_value(&self, fence: FenceId) -> Result<u64, ResourceError> {
        let counter = self.fence(fence)?;
        self.context.poll();
        Ok(counter.load(Ordering::Acquire))
    }

    fn signal(&self, queue: QueueKind, fence: FenceId, value: u64) -> Result<(), RenderError> {
        self.check_device()?;
        let counter = self.fence(fence)?;
        log::trace!("WgpuDevice: signal {fence:?} to {value} on the {queue:?} queue");
        self.context.queue.on_submitted_work_done(move || {
            counter.fetch_max(value, Ordering::AcqRel);
        });
        self.context.poll();
        Ok(())
    }

    fn wait_for_fence(
        &self,
        fence: FenceId,
        value: u64,
        timeout: Duration,
    ) -> Result<(), RenderError> {
        let counter = self.fence(fence)?;
        let deadline = Instant::now() + timeout;
        loop {
            self.context.poll();
            let completed = counter.load(Ordering::Acquire);
            if completed >= value {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(RenderError::FenceTimeout { value, completed });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn destroy_fence(&self, fence: FenceId) -> Result<(), ResourceError> {
        lock(&self.fences)
            .remove(&fence)
            .map(|_| ())
            .ok_or(ResourceError::InvalidHandle)
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError> {
        let label = descriptor.label.as_deref().unwrap_or_default();
        if descriptor.size == 0 || descriptor.size > u64::from(u32::MAX) {
            return Err(ResourceError::BackendError(format!(
                "buffer '{label}' has unsupported size {}",
                descriptor.size
            )));
        }
        if descriptor.heap == HeapKind::Upload
            && descriptor.initial_state != ResourceState::GenericRead
        {
            return Err(ResourceError::BackendError(format!(
                "upload buffer '{label}' must start in GenericRead"
            )));
        }
        let id = BufferId(self.next_buffer_id.fetch_add(1, Ordering::Relaxed));
        let label = if label.is_empty() {
            format!("{id:?}")
        } else {
            label.to_string()
        };
        // wgpu copies and writes move whole 4-byte words.
        let padded = descriptor.size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label.as_str()),
            size: padded,
            usage: buffer_usages(self.context.has_ray_query()),
            mapped_at_creation: false,
        });
        let shadow = match descriptor.heap {
            HeapKind::Upload => vec![0; padded as usize],
            HeapKind::Default => Vec::new(),
        };
        log::trace!(
            "WgpuDevice: created buffer '{label}' ({id:?}, {} bytes, {:?})",
            descriptor.size,
            descriptor.heap
        );
        self.tables().buffers.insert(
            id,
            BufferEntry {
                label,
                buffer: Arc::new(buffer),
                size: descriptor.size,
                heap: descriptor.heap,
                state: descriptor.initial_state,
                shadow,
            },
        );
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        let mut tables = self.tables();
        tables
            .buffers
            .remove(&id)
            .ok_or(ResourceError::InvalidHandle)?;
        tables
            .structures
            .retain(|address, _| (address >> 32) != id.0 as u64 + 1);
        Ok(())
    }

    fn buffer_address(&self, id: BufferId) -> Result<GpuAddress, ResourceError> {
        self.tables().buffer(id)?;
        Ok(encode_address(id, 0))
    }

    fn write_mapped(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let mut tables = self.tables();
        let entry = tables.buffer_mut(id)?;
        if entry.heap != HeapKind::Upload {
            return Err(ResourceError::InvalidHandle);
        }
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= entry.size)
            .ok_or(ResourceError::OutOfBounds)?;
        entry.shadow[offset as usize..end as usize].copy_from_slice(data);

        let alignment = wgpu::COPY_BUFFER_ALIGNMENT;
        let start = offset / alignment * alignment;
        let end = end.next_multiple_of(alignment);
        if start < end {
            self.context.queue.write_buffer(
                &entry.buffer,
                start,
                &entry.shadow[start as usize..end as usize],
            );
        }
        Ok(())
    }

    fn read_mapped(
        &self,
        id: BufferId,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, ResourceError> {
        let tables = self.tables();
        let entry = tables.buffer(id)?;
        if entry.heap != HeapKind::Upload {
            return Err(ResourceError::InvalidHandle);
        }
        let end = offset
            .checked_add(len as u64)
            .filter(|end| *end <= entry.size)
            .ok_or(ResourceError::OutOfBounds)?;
        Ok(entry.shadow[offset as usize..end as usize].to_vec())
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureId, ResourceError> {
        let mut tables = self.tables();
        let id = self.new_texture(&mut tables, descriptor)?;
        log::trace!(
            "WgpuDevice: created texture '{}' ({id:?}, {}x{} {:?})",
            descriptor.label.as_deref().unwrap_or_default(),
            descriptor.width,
            descriptor.height,
            descriptor.format
        );
        Ok(id)
    }

    fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError> {
        self.tables()
            .textures
            .remove(&id)
            .map(|_| ())
            .ok_or(ResourceError::InvalidHandle)
    }

    fn read_texture(&self, id: TextureId) -> Result<Vec<[f32; 4]>, ResourceError> {
        let (label, texture, width, height, format) = {
            let tables = self.tables();
            let entry = tables.texture(id)?;
            (
                entry.label.clone(),
                entry.texture.clone(),
                entry.width,
                entry.height,
                entry.format,
            )
        };
        let bytes_per_row = padded_bytes_per_row(width, format);
        let device = &self.context.device;
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Texture readback"),
            size: u64::from(bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Texture readback"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: copy_aspect(format),
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = flume::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let deadline = Instant::now() + READBACK_TIMEOUT;
        let mapped = loop {
            self.context.poll();
            match receiver.try_recv() {
                Ok(result) => break result,
                Err(flume::TryRecvError::Empty) if Instant::now() < deadline => {
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(_) => {
                    return Err(ResourceError::BackendError(format!(
                        "readback of '{label}' did not complete"
                    )))
                }
            }
        };
        mapped.map_err(|e| {
            ResourceError::BackendError(format!("readback of '{label}' failed: {e}"))
        })?;
        let texels = {
            let view = slice.get_mapped_range();
            decode_rows(format, width, height, &view)
        };
        staging.unmap();
        Ok(texels)
    }

    fn create_descriptor_heap(&self, capacity: u32) -> Result<DescriptorHeapId, ResourceError> {
        if capacity == 0 {
            return Err(ResourceError::BackendError(
                "descriptor heap with no slots".to_string(),
            ));
        }
        let id = DescriptorHeapId(self.next_heap_id.fetch_add(1, Ordering::Relaxed));
        self.tables().heaps.insert(id, vec![None; capacity as usize]);
        Ok(id)
    }

    fn write_descriptor(
        &self,
        heap: DescriptorHeapId,
        index: u32,
        view: ResourceView,
    ) -> Result<(), ResourceError> {
        let mut tables = self.tables();
        match view {
            ResourceView::TextureSrv(texture) => {
                tables.texture(texture)?;
            }
            ResourceView::TextureUav(texture) => {
                if !tables.texture(texture)?.allow_unordered_access {
                    return Err(ResourceError::BackendError(format!(
                        "'{}' does not allow unordered access",
                        tables.label(texture.into())
                    )));
                }
            }
            ResourceView::BufferSrv {
                buffer,
                element_count,
                stride,
            } => {
                if u64::from(element_count) * u64::from(stride) > tables.buffer(buffer)?.size {
                    return Err(ResourceError::OutOfBounds);
                }
            }
            ResourceView::AccelerationStructure(address) => {
                tables.resolve(address, 1)?;
            }
            ResourceView::Overlay => {}
        }
        let slot = tables
            .heaps
            .get_mut(&heap)
            .ok_or(ResourceError::InvalidHandle)?
            .get_mut(index as usize)
            .ok_or(ResourceError::OutOfBounds)?;
        *slot = Some(view);
        Ok(())
    }

    fn create_graphics_pipeline(
        &self,
        descriptor: &GraphicsPipelineDescriptor,
    ) -> Result<PipelineId, ResourceError> {
        let label = descriptor
            .label
            .as_deref()
            .unwrap_or("graphics pipeline")
            .to_string();
        let creation_failed = |details: String| -> ResourceError {
            PipelineError::CreationFailed {
                label: label.clone(),
                details,
            }
            .into()
        };
        if descriptor.root_layout.allow_input_layout && descriptor.vertex_layout.is_empty() {
            return Err(creation_failed(
                "input layout allowed but no vertex attributes given".to_string(),
            ));
        }
        if descriptor.color_format.is_none() && descriptor.depth_format.is_none() {
            return Err(creation_failed("pipeline writes no target".to_string()));
        }
        let plan = BindingPlan::from_layout(&descriptor.root_layout).map_err(&creation_failed)?;
        let errors_before = self.context.errors.len();
        let device = &self.context.device;

        let vertex_module = self.shader_module(&label, &descriptor.vertex_shader)?;
        let pixel_module = descriptor
            .pixel_shader
            .as_ref()
            .map(|blob| self.shader_module(&label, blob))
            .transpose()?;

        let group_layouts: Vec<wgpu::BindGroupLayout> = [UNIFORM_GROUP, TEXTURE_GROUP, SAMPLER_GROUP]
            .into_iter()
            .map(|group| {
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(format!("{label} group {group}").as_str()),
                    entries: &plan.layout_entries(group),
                })
            })
            .collect();
        let layout_refs: Vec<Option<&wgpu::BindGroupLayout>> = group_layouts.iter().map(Some).collect();
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(format!("{label} layout").as_str()),
            bind_group_layouts: &layout_refs,
            immediate_size: 0,
        });

        let samplers = self.create_samplers(&plan);
        let sampler_entries: Vec<wgpu::BindGroupEntry<'_>> = samplers
            .iter()
            .zip(&plan.samplers)
            .map(|(sampler, declared)| wgpu::BindGroupEntry {
                binding: declared.register,
                resource: wgpu::BindingResource::Sampler(sampler),
            })
            .collect();
        let sampler_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(format!("{label} samplers").as_str()),
            layout: &group_layouts[SAMPLER_GROUP as usize],
            entries: &sampler_entries,
        });

        let mut attributes = Vec::with_capacity(descriptor.vertex_layout.len());
        for (location, attribute) in descriptor.vertex_layout.iter().enumerate() {
            let format = vertex_format(attribute.components).ok_or_else(|| {
                creation_failed(format!(
                    "attribute {} has {} components",
                    attribute.semantic, attribute.components
                ))
            })?;
            attributes.push(wgpu::VertexAttribute {
                format,
                offset: u64::from(attribute.offset),
                shader_location: location as u32,
            });
        }
        let vertex_stride = descriptor
            .vertex_layout
            .iter()
            .map(|a| a.offset + a.components * 4)
            .max()
            .unwrap_or(0);
        let vertex_buffers: Vec<wgpu::VertexBufferLayout<'_>> =
            if descriptor.root_layout.allow_input_layout {
                vec![wgpu::VertexBufferLayout {
                    array_stride: u64::from(vertex_stride),
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &attributes,
                }]
            } else {
                Vec::new()
            };

        let color_targets: Vec<Option<wgpu::ColorTargetState>> = descriptor
            .color_format
            .map(|format| wgpu::ColorTargetState {
                format: format.into_wgpu(),
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })
            .into_iter()
            .map(Some)
            .collect();
        let depth_stencil = descriptor.depth_format.map(|format| wgpu::DepthStencilState {
            format: format.into_wgpu(),
            depth_write_enabled: Some(true),
            depth_compare: Some(wgpu::CompareFunction::Less),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label.as_str()),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: Some(VERTEX_ENTRY_POINT),
                buffers: &vertex_buffers,
                compilation_options: Default::default(),
            },
            fragment: pixel_module.as_ref().map(|module| wgpu::FragmentState {
                module,
                entry_point: Some(FRAGMENT_ENTRY_POINT),
                targets: &color_targets,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                // Meshes are wound clockwise.
                front_face: wgpu::FrontFace::Cw,
                cull_mode: descriptor.cull_back_faces.then_some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        let errors = self.context.errors.since(errors_before);
        if !errors.is_empty() {
            log::error!("WgpuDevice: pipeline '{label}' rejected: {}", errors.join("; "));
            return Err(creation_failed(errors.join("; ")));
        }

        let id = PipelineId(self.next_pipeline_id.fetch_add(1, Ordering::Relaxed));
        log::debug!("WgpuDevice: created graphics pipeline '{label}' ({id:?})");
        self.tables().pipelines.insert(
            id,
            PipelineEntry {
                label,
                root_layout: descriptor.root_layout.clone(),
                plan,
                pipeline: Arc::new(pipeline),
                group_layouts,
                sampler_group: Arc::new(sampler_group),
                vertex_stride,
                color_format: descriptor.color_format,
                depth_format: descriptor.depth_format,
            },
        );
        Ok(id)
    }

    fn create_raytracing_pipeline(
        &self,
        _descriptor: &RaytracingPipelineDescriptor,
    ) -> Result<PipelineId, ResourceError> {
        Err(PipelineError::FeatureNotSupported("raytracing pipelines".to_string()).into())
    }

    fn shader_identifier(
        &self,
        pipeline: PipelineId,
        _export: &str,
    ) -> Result<ShaderIdentifier, ResourceError> {
        Err(PipelineError::InvalidPipeline { id: pipeline }.into())
    }

    fn destroy_pipeline(&self, id: PipelineId) -> Result<(), ResourceError> {
        self.tables()
            .pipelines
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| PipelineError::InvalidPipeline { id }.into())
    }

    fn acceleration_structure_prebuild_info(
        &self,
        inputs: &AccelerationStructureInputs,
    ) -> Result<PrebuildInfo, ResourceError> {
        if !self.context.has_ray_query() {
            return Err(PipelineError::FeatureNotSupported("ray queries".to_string()).into());
        }
        prebuild_estimate(inputs)
    }

    fn create_command_allocator(
        &self,
        queue: QueueKind,
    ) -> Result<CommandAllocatorId, ResourceError> {
        let id = CommandAllocatorId(self.next_allocator_id.fetch_add(1, Ordering::Relaxed));
        self.tables().allocators.insert(
            id,
            AllocatorEntry {
                queue,
                last_submission: 0,
            },
        );
        Ok(id)
    }

    fn reset_command_allocator(&self, allocator: CommandAllocatorId) -> Result<(), RenderError> {
        let last_submission = self
            .tables()
            .allocators
            .get(&allocator)
            .map(|entry| entry.last_submission)
            .ok_or(ResourceError::InvalidHandle)?;
        if !self.is_complete(last_submission) {
            log::error!("Command allocator {allocator:?} reset while its last list is executing");
            return Err(RenderError::ResourcesInFlight(format!(
                "command allocator {allocator:?} has lists in flight"
            )));
        }
        Ok(())
    }

    fn execute_command_list(
        &self,
        queue: QueueKind,
        list: &CommandList,
    ) -> Result<(), RenderError> {
        self.check_device()?;
        if !list.is_closed() {
            return Err(RenderError::InvalidCommandList(
                "submitted while still recording".to_string(),
            ));
        }
        if list.queue() != queue {
            return Err(RenderError::InvalidCommandList(format!(
                "list recorded for the {:?} queue submitted to the {queue:?} queue",
                list.queue()
            )));
        }

        let mut tables = self.tables();
        let owner = tables
            .allocators
            .get(&list.allocator())
            .map(|entry| entry.queue)
            .ok_or(ResourceError::InvalidHandle)?;
        if owner != queue {
            return Err(RenderError::InvalidCommandList(format!(
                "allocator {:?} belongs to the {owner:?} queue",
                list.allocator()
            )));
        }

        let errors_before = self.context.errors.len();
        let replayed = replay(
            &self.context.device,
            self.context.has_ray_query(),
            &mut tables,
            queue,
            list.commands(),
        );
        let (commands, record) = match replayed {
            Ok(replayed) => replayed,
            Err(err) => {
                drop(tables);
                return Err(self.lose_device(queue, err));
            }
        };
        let serial = self.submit(Some(commands));
        if let Some(entry) = tables.allocators.get_mut(&list.allocator()) {
            entry.last_submission = serial;
        }
        drop(tables);
        if queue == QueueKind::Direct {
            self.last_direct_serial.store(serial, Ordering::Release);
        }

        let errors = self.context.errors.since(errors_before);
        if !errors.is_empty() {
            return Err(self.lose_device(
                queue,
                ValidationError(format!("wgpu rejected the list: {}", errors.join("; "))),
            ));
        }

        let mut diagnostics = lock(&self.diagnostics);
        diagnostics.events.extend(record.events);
        diagnostics.draws += record.draws;
        diagnostics.acceleration_structure_builds += record.builds;
        diagnostics.refits += record.refits;
        Ok(())
    }

    fn create_swap_chain(
        &self,
        descriptor: &SwapChainDescriptor,
    ) -> Result<SwapChainId, ResourceError> {
        if descriptor.buffer_count < 2 {
            return Err(ResourceError::BackendError(
                "a swap chain needs at least two back buffers".to_string(),
            ));
        }
        if descriptor.allow_tearing {
            return Err(ResourceError::BackendError(
                "tearing requested but not supported".to_string(),
            ));
        }
        let mut tables = self.tables();
        let buffers = self.create_back_buffers(
            &mut tables,
            descriptor.width,
            descriptor.height,
            descriptor.buffer_count,
            descriptor.format,
        )?;
        let id = SwapChainId(self.next_swap_chain_id.fetch_add(1, Ordering::Relaxed));
        tables.swap_chains.insert(
            id,
            SwapChainEntry {
                buffers,
                current: 0,
                width: descriptor.width,
                height: descriptor.height,
                format: descriptor.format,
                presented: 0,
            },
        );
        Ok(id)
    }

    fn swap_chain_buffers(&self, id: SwapChainId) -> Result<Vec<TextureId>, ResourceError> {
        self.tables()
            .swap_chains
            .get(&id)
            .map(|chain| chain.buffers.clone())
            .ok_or(ResourceError::InvalidHandle)
    }

    fn current_back_buffer_index(&self, id: SwapChainId) -> Result<usize, ResourceError> {
        self.tables()
            .swap_chains
            .get(&id)
            .map(|chain| chain.current)
            .ok_or(ResourceError::InvalidHandle)
    }

    fn resize_swap_chain(
        &self,
        id: SwapChainId,
        width: u32,
        height: u32,
    ) -> Result<(), RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::Internal(format!(
                "swap chain resized to {width}x{height}"
            )));
        }
        if !self.is_complete(self.last_direct_serial.load(Ordering::Acquire)) {
            log::error!("Swap chain resize with direct-queue work in flight");
            return Err(RenderError::ResourcesInFlight(
                "direct-queue submissions still reference the swap chain".to_string(),
            ));
        }

        let mut tables = self.tables();
        let (old, count, format) = {
            let chain = tables
                .swap_chains
                .get(&id)
                .ok_or(ResourceError::InvalidHandle)?;
            (chain.buffers.clone(), chain.buffers.len(), chain.format)
        };
        for buffer in old {
            tables.textures.remove(&buffer);
        }
        let buffers = self.create_back_buffers(&mut tables, width, height, count, format)?;
        let chain = tables
            .swap_chains
            .get_mut(&id)
            .ok_or(ResourceError::InvalidHandle)?;
        chain.buffers = buffers;
        chain.current = 0;
        chain.width = width;
        chain.height = height;
        log::debug!("WgpuDevice: swap chain {id:?} resized to {width}x{height}");
        Ok(())
    }

    fn present(&self, id: SwapChainId, mode: PresentMode) -> Result<(), RenderError> {
        self.check_device()?;
        if mode.allow_tearing {
            return Err(RenderError::PresentFailed(
                "tearing requested on a swap chain created without it".to_string(),
            ));
        }
        if mode.sync_interval > 4 {
            return Err(RenderError::PresentFailed(format!(
                "sync interval {} out of range",
                mode.sync_interval
            )));
        }
        let mut tables = self.tables();
        let back_buffer = {
            let chain = tables
                .swap_chains
                .get(&id)
                .ok_or(ResourceError::InvalidHandle)?;
            chain
                .buffers
                .get(chain.current)
                .copied()
                .ok_or(ResourceError::OutOfBounds)?
        };
        let state = tables.texture(back_buffer)?.state;
        if state != ResourceState::Present {
            let message = format!(
                "back buffer '{}' presented in {state:?} state",
                tables.label(back_buffer.into())
            );
            drop(tables);
            return Err(self.lose_device(QueueKind::Direct, ValidationError(message)));
        }
        let chain = tables
            .swap_chains
            .get_mut(&id)
            .ok_or(ResourceError::InvalidHandle)?;
        chain.current = (chain.current + 1) % chain.buffers.len();
        chain.presented += 1;
        drop(tables);

        lock(&self.diagnostics).events.push("Present".to_string());
        self.context.poll();
        Ok(())
    }

    fn destroy_swap_chain(&self, id: SwapChainId) -> Result<(), ResourceError> {
        let mut tables = self.tables();
        let chain = tables
            .swap_chains
            .remove(&id)
            .ok_or(ResourceError::InvalidHandle)?;
        for buffer in chain.buffers {
            tables.textures.remove(&buffer);
        }
        Ok(())
    }
}
