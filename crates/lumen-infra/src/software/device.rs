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

use super::store::{
    encode_address, lock, AllocatorEntry, BufferEntry, DeviceShared, PipelineEntry,
    RaytracingExports, ResourceStore, SwapChainEntry, TextureEntry,
};
use super::timeline::{FenceTable, QueueTimeline, Submission};
use lumen_core::renderer::{
    align_to_constant_buffer, AccelerationStructureInputs, AdapterInfo, BufferDescriptor,
    BufferId, CommandAllocatorId, CommandList, DescriptorHeapId, DeviceFeature, FenceId,
    GpuAddress, GpuDevice, GraphicsPipelineDescriptor, HeapKind, PipelineError, PipelineId,
    PrebuildInfo, PresentMode, QueueKind, RaytracingPipelineDescriptor, RenderError,
    ResourceError, ResourceState, ResourceView, ShaderBlob, ShaderIdentifier,
    SwapChainDescriptor, SwapChainId, TextureDescriptor, TextureId, SHADER_IDENTIFIER_SIZE,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Capabilities of a [`SoftwareDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftwareDeviceDescriptor {
    /// Name reported by [`GpuDevice::adapter_info`].
    pub adapter_name: String,
    /// Whether swap chains may present with tearing.
    pub allow_tearing: bool,
    /// Whether raytracing pipelines and acceleration structures are available.
    pub raytracing: bool,
}

impl Default for SoftwareDeviceDescriptor {
    fn default() -> Self {
        Self {
            adapter_name: "Lumen software adapter".to_string(),
            allow_tearing: false,
            raytracing: true,
        }
    }
}

/// A CPU implementation of [`GpuDevice`].
///
/// Each queue is a worker thread executing submissions in order; fences are set by those
/// threads, so CPU/GPU overlap, frame pacing and in-flight hazards behave like they do on
/// hardware. Nothing is rasterized: draws are validated and counted, copies and clears
/// move real data, acceleration structures are real BVHs, and ray launches run the probe
/// gather program against them.
#[derive(Debug)]
pub struct SoftwareDevice {
    descriptor: SoftwareDeviceDescriptor,
    shared: Arc<DeviceShared>,
    fences: Arc<FenceTable>,
    direct: QueueTimeline,
    load: QueueTimeline,
    copy: QueueTimeline,

    next_fence_id: AtomicUsize,
    next_buffer_id: AtomicUsize,
    next_texture_id: AtomicUsize,
    next_heap_id: AtomicUsize,
    next_pipeline_id: AtomicUsize,
    next_allocator_id: AtomicUsize,
    next_swap_chain_id: AtomicUsize,
}

impl SoftwareDevice {
    /// Starts the direct, load and copy queue timelines.
    ///
    /// # Errors
    /// [`RenderError::InitializationFailed`] if a worker thread cannot be spawned.
    pub fn new(descriptor: SoftwareDeviceDescriptor) -> Result<Self, RenderError> {
        let shared = Arc::new(DeviceShared::default());
        let fences = Arc::new(FenceTable::default());
        let direct = QueueTimeline::spawn(QueueKind::Direct, shared.clone(), fences.clone())?;
        let load = QueueTimeline::spawn(QueueKind::Load, shared.clone(), fences.clone())?;
        let copy = QueueTimeline::spawn(QueueKind::Copy, shared.clone(), fences.clone())?;
        log::info!(
            "SoftwareDevice '{}' created (tearing: {}, raytracing: {})",
            descriptor.adapter_name,
            descriptor.allow_tearing,
            descriptor.raytracing
        );
        Ok(Self {
            descriptor,
            shared,
            fences,
            direct,
            load,
            copy,
            next_fence_id: AtomicUsize::new(0),
            next_buffer_id: AtomicUsize::new(0),
            next_texture_id: AtomicUsize::new(0),
            next_heap_id: AtomicUsize::new(0),
            next_pipeline_id: AtomicUsize::new(0),
            next_allocator_id: AtomicUsize::new(0),
            next_swap_chain_id: AtomicUsize::new(0),
        })
    }

    fn timeline(&self, queue: QueueKind) -> &QueueTimeline {
        match queue {
            QueueKind::Direct => &self.direct,
            QueueKind::Load => &self.load,
            QueueKind::Copy => &self.copy,
        }
    }

    fn store(&self) -> std::sync::MutexGuard<'_, ResourceStore> {
        lock(&self.shared.store)
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

    fn new_texture(
        &self,
        store: &mut ResourceStore,
        descriptor: &TextureDescriptor,
    ) -> Result<TextureId, ResourceError> {
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(ResourceError::BackendError(format!(
                "texture '{}' has zero extent",
                descriptor.label.as_deref().unwrap_or_default()
            )));
        }
        if descriptor.allow_depth_stencil && !descriptor.format.is_depth() {
            return Err(ResourceError::BackendError(format!(
                "texture '{}': depth binding requires a depth format",
                descriptor.label.as_deref().unwrap_or_default()
            )));
        }
        let id = TextureId(self.next_texture_id.fetch_add(1, Ordering::Relaxed));
        let label = descriptor
            .label
            .as_deref()
            .map_or_else(|| format!("{id:?}"), str::to_string);
        store.textures.insert(
            id,
            TextureEntry {
                label,
                width: descriptor.width,
                height: descriptor.height,
                format: descriptor.format,
                texels: vec![[0.0; 4]; (descriptor.width * descriptor.height) as usize],
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
        store: &mut ResourceStore,
        width: u32,
        height: u32,
        count: usize,
        format: lumen_core::renderer::TextureFormat,
    ) -> Result<Vec<TextureId>, ResourceError> {
        (0..count)
            .map(|index| {
                self.new_texture(
                    store,
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

    fn check_blob(label: &str, blob: &ShaderBlob) -> Result<(), ResourceError> {
        if blob.bytes.is_empty() {
            return Err(PipelineError::CreationFailed {
                label: label.to_string(),
                details: format!("shader '{}' is empty", blob.name),
            }
            .into());
        }
        Ok(())
    }

    fn identifier(pipeline: PipelineId, ordinal: usize, export: &str) -> ShaderIdentifier {
        let mut bytes = [0u8; SHADER_IDENTIFIER_SIZE];
        bytes[..8].copy_from_slice(&(pipeline.0 as u64 + 1).to_le_bytes());
        bytes[8..16].copy_from_slice(&(ordinal as u64 + 1).to_le_bytes());
        let name = export.as_bytes();
        let len = name.len().min(SHADER_IDENTIFIER_SIZE - 16);
        bytes[16..16 + len].copy_from_slice(&name[..len]);
        ShaderIdentifier(bytes)
    }

    // --- Diagnostics ---

    /// Labels of every executed `BeginEvent` and retired present, in timeline order.
    pub fn executed_events(&self) -> Vec<String> {
        lock(&self.shared.diagnostics).events.clone()
    }

    /// Every validation failure observed so far.
    pub fn validation_errors(&self) -> Vec<String> {
        lock(&self.shared.diagnostics).validation_errors.clone()
    }

    /// Whether a validation failure has put the device in the lost state.
    pub fn is_device_lost(&self) -> bool {
        self.shared.device_lost.load(Ordering::Acquire)
    }

    /// Number of draws executed.
    pub fn draw_count(&self) -> u64 {
        lock(&self.shared.diagnostics).draws
    }

    /// Number of ray launches executed.
    pub fn dispatch_count(&self) -> u64 {
        lock(&self.shared.diagnostics).dispatches
    }

    /// Number of rays traced by ray launches.
    pub fn rays_traced(&self) -> u64 {
        lock(&self.shared.diagnostics).rays_traced
    }

    /// Number of full acceleration-structure builds executed.
    pub fn acceleration_structure_builds(&self) -> u64 {
        lock(&self.shared.diagnostics).acceleration_structure_builds
    }

    /// Number of top-level refits executed.
    pub fn refit_count(&self) -> u64 {
        lock(&self.shared.diagnostics).refits
    }

    /// Number of presents retired on a swap chain.
    pub fn present_count(&self, id: SwapChainId) -> Result<u64, ResourceError> {
        self.store()
            .swap_chains
            .get(&id)
            .map(|chain| chain.presented)
            .ok_or(ResourceError::InvalidHandle)
    }

    /// Current back-buffer size of a swap chain.
    pub fn swap_chain_size(&self, id: SwapChainId) -> Result<(u32, u32), ResourceError> {
        self.store()
            .swap_chains
            .get(&id)
            .map(|chain| (chain.width, chain.height))
            .ok_or(ResourceError::InvalidHandle)
    }

    /// The state a resource is in once every submitted command has executed.
    pub fn resource_state(
        &self,
        resource: impl Into<lumen_core::renderer::ResourceRef>,
    ) -> Result<ResourceState, ResourceError> {
        self.store().state(resource.into())
    }

    /// Forgets recorded events and counters. Validation errors are kept.
    pub fn clear_diagnostics(&self) {
        let mut diagnostics = lock(&self.shared.diagnostics);
        diagnostics.events.clear();
        diagnostics.draws = 0;
        diagnostics.dispatches = 0;
        diagnostics.rays_traced = 0;
        diagnostics.acceleration_structure_builds = 0;
        diagnostics.refits = 0;
    }

    /// Stops a queue timeline from retiring work until [`resume_queue`](Self::resume_queue).
    pub fn pause_queue(&self, queue: QueueKind) {
        self.timeline(queue).pause();
    }

    /// Lets a paused queue timeline run again.
    pub fn resume_queue(&self, queue: QueueKind) {
        self.timeline(queue).resume();
    }

    /// Submissions on `queue` not yet retired.
    pub fn pending_submissions(&self, queue: QueueKind) -> usize {
        self.timeline(queue).pending()
    }
}

/// Result and scratch sizes reported for a build of `inputs`.
///
/// Sizes grow with the triangle or instance count and are aligned like constant data.
pub(crate) fn prebuild_estimate(
    inputs: &AccelerationStructureInputs,
) -> Result<PrebuildInfo, ResourceError> {
    let info = match inputs {
        AccelerationStructureInputs::BottomLevel { geometries, flags } => {
            let triangles: u64 = geometries.iter().map(|g| u64::from(g.index_count / 3)).sum();
            if triangles == 0 {
                return Err(ResourceError::BackendError(
                    "bottom-level inputs hold no triangles".to_string(),
                ));
            }
            let scratch = align_to_constant_buffer(32 * triangles + 256);
            PrebuildInfo {
                result_size: align_to_constant_buffer(64 * (2 * triangles + 1)),
                scratch_size: scratch,
                update_scratch_size: if flags.allow_update { scratch } else { 0 },
            }
        }
        AccelerationStructureInputs::TopLevel {
            instance_count,
            flags,
            ..
        } => {
            let count = u64::from(*instance_count);
            if count == 0 {
                return Err(ResourceError::BackendError(
                    "top-level inputs hold no instances".to_string(),
                ));
            }
            let scratch = align_to_constant_buffer(64 * count + 256);
            PrebuildInfo {
                result_size: align_to_constant_buffer(128 * (2 * count + 1)),
                scratch_size: scratch,
                update_scratch_size: if flags.allow_update { scratch / 2 } else { 0 },
            }
        }
    };
    Ok(info)
}

impl GpuDevice for SoftwareDevice {
    fn adapter_info(&self) -> AdapterInfo {
        AdapterInfo {
            name: self.descriptor.adapter_name.clone(),
            backend: "software".to_string(),
        }
    }

    fn supports_feature(&self, feature: DeviceFeature) -> bool {
        match feature {
            DeviceFeature::Tearing => self.descriptor.allow_tearing,
            DeviceFeature::Raytracing => self.descriptor.raytracing,
        }
    }

    fn create_fence(&self, initial_value: u64) -> Result<FenceId, ResourceError> {
        let id = FenceId(self.next_fence_id.fetch_add(1, Ordering::Relaxed));
        self.fences.create(id, initial_value);
        log::debug!("SoftwareDevice: created fence {id:?} at {initial_value}");
        Ok(id)
    }

    fn completed_fence_value(&self, fence: FenceId) -> Result<u64, ResourceError> {
        self.fences.completed(fence)
    }

    fn signal(&self, queue: QueueKind, fence: FenceId, value: u64) -> Result<(), RenderError> {
        self.fences.completed(fence)?;
        self.timeline(queue)
            .submit(Submission::Signal { fence, value })
    }

    fn wait_for_fence(
        &self,
        fence: FenceId,
        value: u64,
        timeout: Duration,
    ) -> Result<(), RenderError> {
        self.fences.wait(fence, value, timeout)
    }

    fn destroy_fence(&self, fence: FenceId) -> Result<(), ResourceError> {
        self.fences.remove(fence)
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
        self.store().buffers.insert(
            id,
            BufferEntry {
                label: if label.is_empty() {
                    format!("{id:?}")
                } else {
                    label.to_string()
                },
                heap: descriptor.heap,
                data: vec![0; descriptor.size as usize],
                state: descriptor.initial_state,
            },
        );
        log::trace!(
            "SoftwareDevice: created buffer '{label}' ({id:?}, {} bytes, {:?})",
            descriptor.size,
            descriptor.heap
        );
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        let mut store = self.store();
        store
            .buffers
            .remove(&id)
            .ok_or(ResourceError::InvalidHandle)?;
        store
            .structures
            .retain(|address, _| (address >> 32) != id.0 as u64 + 1);
        Ok(())
    }

    fn buffer_address(&self, id: BufferId) -> Result<GpuAddress, ResourceError> {
        self.store().buffer(id)?;
        Ok(encode_address(id, 0))
    }

    fn write_mapped(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let mut store = self.store();
        let buffer = store.buffer_mut(id)?;
        if buffer.heap != HeapKind::Upload {
            return Err(ResourceError::InvalidHandle);
        }
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= buffer.data.len() as u64)
            .ok_or(ResourceError::OutOfBounds)?;
        buffer.data[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn read_mapped(
        &self,
        id: BufferId,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, ResourceError> {
        let store = self.store();
        let buffer = store.buffer(id)?;
        if buffer.heap != HeapKind::Upload {
            return Err(ResourceError::InvalidHandle);
        }
        let end = offset
            .checked_add(len as u64)
            .filter(|end| *end <= buffer.data.len() as u64)
            .ok_or(ResourceError::OutOfBounds)?;
        Ok(buffer.data[offset as usize..end as usize].to_vec())
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureId, ResourceError> {
        let mut store = self.store();
        let id = self.new_texture(&mut store, descriptor)?;
        log::trace!(
            "SoftwareDevice: created texture '{}' ({id:?}, {}x{} {:?})",
            descriptor.label.as_deref().unwrap_or_default(),
            descriptor.width,
            descriptor.height,
            descriptor.format
        );
        Ok(id)
    }

    fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError> {
        self.store()
            .textures
            .remove(&id)
            .map(|_| ())
            .ok_or(ResourceError::InvalidHandle)
    }

    fn read_texture(&self, id: TextureId) -> Result<Vec<[f32; 4]>, ResourceError> {
        Ok(self.store().texture(id)?.texels.clone())
    }

    fn create_descriptor_heap(&self, capacity: u32) -> Result<DescriptorHeapId, ResourceError> {
        if capacity == 0 {
            return Err(ResourceError::BackendError(
                "descriptor heap with no slots".to_string(),
            ));
        }
        let id = DescriptorHeapId(self.next_heap_id.fetch_add(1, Ordering::Relaxed));
        self.store().heaps.insert(id, vec![None; capacity as usize]);
        Ok(id)
    }

    fn write_descriptor(
        &self,
        heap: DescriptorHeapId,
        index: u32,
        view: ResourceView,
    ) -> Result<(), ResourceError> {
        let mut store = self.store();
        match view {
            ResourceView::TextureSrv(texture) => {
                store.texture(texture)?;
            }
            ResourceView::TextureUav(texture) => {
                if !store.texture(texture)?.allow_unordered_access {
                    return Err(ResourceError::BackendError(format!(
                        "'{}' does not allow unordered access",
                        store.label(texture.into())
                    )));
                }
            }
            ResourceView::BufferSrv {
                buffer,
                element_count,
                stride,
            } => {
                let size = store.buffer(buffer)?.data.len() as u64;
                if u64::from(element_count) * u64::from(stride) > size {
                    return Err(ResourceError::OutOfBounds);
                }
            }
            ResourceView::AccelerationStructure(address) => {
                store.resolve(address, 1)?;
            }
            ResourceView::Overlay => {}
        }
        let slots = store
            .heaps
            .get_mut(&heap)
            .ok_or(ResourceError::InvalidHandle)?;
        let slot = slots
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
        Self::check_blob(&label, &descriptor.vertex_shader)?;
        if let Some(pixel) = &descriptor.pixel_shader {
            Self::check_blob(&label, pixel)?;
        }
        if descriptor.root_layout.allow_input_layout && descriptor.vertex_layout.is_empty() {
            return Err(PipelineError::CreationFailed {
                label,
                details: "input layout allowed but no vertex attributes given".to_string(),
            }
            .into());
        }
        if descriptor.color_format.is_none() && descriptor.depth_format.is_none() {
            return Err(PipelineError::CreationFailed {
                label,
                details: "pipeline writes no target".to_string(),
            }
            .into());
        }
        let id = PipelineId(self.next_pipeline_id.fetch_add(1, Ordering::Relaxed));
        log::debug!("SoftwareDevice: created graphics pipeline '{label}' ({id:?})");
        self.store().pipelines.insert(
            id,
            PipelineEntry::Graphics {
                label,
                root_layout: descriptor.root_layout.clone(),
            },
        );
        Ok(id)
    }

    fn create_raytracing_pipeline(
        &self,
        descriptor: &RaytracingPipelineDescriptor,
    ) -> Result<PipelineId, ResourceError> {
        if !self.descriptor.raytracing {
            return Err(PipelineError::FeatureNotSupported("raytracing".to_string()).into());
        }
        let label = descriptor
            .label
            .as_deref()
            .unwrap_or("raytracing pipeline")
            .to_string();
        Self::check_blob(&label, &descriptor.ray_generation.blob)?;
        Self::check_blob(&label, &descriptor.miss.blob)?;
        Self::check_blob(&label, &descriptor.closest_hit.blob)?;
        if descriptor.max_recursion_depth == 0 {
            return Err(PipelineError::CreationFailed {
                label,
                details: "recursion depth must be at least 1".to_string(),
            }
            .into());
        }

        let id = PipelineId(self.next_pipeline_id.fetch_add(1, Ordering::Relaxed));
        let names = [
            descriptor.ray_generation.export.clone(),
            descriptor.miss.export.clone(),
            descriptor.hit_group.clone(),
        ];
        let identifiers: HashMap<String, ShaderIdentifier> = names
            .iter()
            .enumerate()
            .map(|(ordinal, name)| (name.clone(), Self::identifier(id, ordinal, name)))
            .collect();
        if identifiers.len() != names.len() {
            return Err(PipelineError::CreationFailed {
                label,
                details: "export names must be unique".to_string(),
            }
            .into());
        }
        let [ray_generation, miss, hit_group] = names;

        log::debug!("SoftwareDevice: created raytracing pipeline '{label}' ({id:?})");
        self.store().pipelines.insert(
            id,
            PipelineEntry::Raytracing {
                label,
                global_root_layout: descriptor.global_root_layout.clone(),
                ray_generation_local_layout: descriptor.ray_generation_local_layout.clone(),
                hit_group_local_layout: descriptor.hit_group_local_layout.clone(),
                exports: RaytracingExports {
                    ray_generation,
                    miss,
                    hit_group,
                    identifiers,
                },
            },
        );
        Ok(id)
    }

    fn shader_identifier(
        &self,
        pipeline: PipelineId,
        export: &str,
    ) -> Result<ShaderIdentifier, ResourceError> {
        let store = self.store();
        match store.pipelines.get(&pipeline) {
            Some(PipelineEntry::Raytracing { exports, .. }) => exports
                .identifiers
                .get(export)
                .copied()
                .ok_or_else(|| {
                    PipelineError::UnknownExport {
                        id: pipeline,
                        export: export.to_string(),
                    }
                    .into()
                }),
            _ => Err(PipelineError::InvalidPipeline { id: pipeline }.into()),
        }
    }

    fn destroy_pipeline(&self, id: PipelineId) -> Result<(), ResourceError> {
        self.store()
            .pipelines
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| PipelineError::InvalidPipeline { id }.into())
    }

    fn acceleration_structure_prebuild_info(
        &self,
        inputs: &AccelerationStructureInputs,
    ) -> Result<PrebuildInfo, ResourceError> {
        if !self.descriptor.raytracing {
            return Err(PipelineError::FeatureNotSupported("raytracing".to_string()).into());
        }
        prebuild_estimate(inputs)
    }

    fn create_command_allocator(
        &self,
        queue: QueueKind,
    ) -> Result<CommandAllocatorId, ResourceError> {
        let id = CommandAllocatorId(self.next_allocator_id.fetch_add(1, Ordering::Relaxed));
        self.store()
            .allocators
            .insert(id, AllocatorEntry { queue, pending: 0 });
        Ok(id)
    }

    fn reset_command_allocator(&self, allocator: CommandAllocatorId) -> Result<(), RenderError> {
        let store = self.store();
        let entry = store
            .allocators
            .get(&allocator)
            .ok_or(ResourceError::InvalidHandle)?;
        if entry.pending > 0 {
            log::error!(
                "Command allocator {allocator:?} reset with {} lists still executing",
                entry.pending
            );
            return Err(RenderError::ResourcesInFlight(format!(
                "command allocator {allocator:?} has {} lists in flight",
                entry.pending
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
        {
            let mut store = self.store();
            let entry = store
                .allocators
                .get_mut(&list.allocator())
                .ok_or(ResourceError::InvalidHandle)?;
            if entry.queue != queue {
                return Err(RenderError::InvalidCommandList(format!(
                    "allocator {:?} belongs to the {:?} queue",
                    list.allocator(),
                    entry.queue
                )));
            }
            entry.pending += 1;
        }
        self.timeline(queue).submit(Submission::Execute {
            commands: list.commands().to_vec(),
            allocator: list.allocator(),
        })
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
        if descriptor.allow_tearing && !self.descriptor.allow_tearing {
            return Err(ResourceError::BackendError(
                "tearing requested but not supported".to_string(),
            ));
        }
        let mut store = self.store();
        let buffers = self.create_back_buffers(
            &mut store,
            descriptor.width,
            descriptor.height,
            descriptor.buffer_count,
            descriptor.format,
        )?;
        let id = SwapChainId(self.next_swap_chain_id.fetch_add(1, Ordering::Relaxed));
        store.swap_chains.insert(
            id,
            SwapChainEntry {
                buffers,
                current: 0,
                width: descriptor.width,
                height: descriptor.height,
                format: descriptor.format,
                allow_tearing: descriptor.allow_tearing,
                presented: 0,
            },
        );
        Ok(id)
    }

    fn swap_chain_buffers(&self, id: SwapChainId) -> Result<Vec<TextureId>, ResourceError> {
        self.store()
            .swap_chains
            .get(&id)
            .map(|chain| chain.buffers.clone())
            .ok_or(ResourceError::InvalidHandle)
    }

    fn current_back_buffer_index(&self, id: SwapChainId) -> Result<usize, ResourceError> {
        self.store()
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
        let pending = self.direct.pending();
        if pending > 0 {
            log::error!("Swap chain resize with {pending} submissions in flight");
            return Err(RenderError::ResourcesInFlight(format!(
                "{pending} direct-queue submissions still reference the swap chain"
            )));
        }

        let mut store = self.store();
        let (old, count, format) = {
            let chain = store
                .swap_chains
                .get(&id)
                .ok_or(ResourceError::InvalidHandle)?;
            (chain.buffers.clone(), chain.buffers.len(), chain.format)
        };
        for buffer in old {
            store.textures.remove(&buffer);
        }
        let buffers = self.create_back_buffers(&mut store, width, height, count, format)?;
        let chain = store
            .swap_chains
            .get_mut(&id)
            .ok_or(ResourceError::InvalidHandle)?;
        chain.buffers = buffers;
        chain.current = 0;
        chain.width = width;
        chain.height = height;
        log::debug!("SoftwareDevice: swap chain {id:?} resized to {width}x{height}");
        Ok(())
    }

    fn present(&self, id: SwapChainId, mode: PresentMode) -> Result<(), RenderError> {
        self.check_device()?;
        let back_buffer = {
            let mut store = self.store();
            let chain = store
                .swap_chains
                .get_mut(&id)
                .ok_or(ResourceError::InvalidHandle)?;
            if mode.allow_tearing && !chain.allow_tearing {
                return Err(RenderError::PresentFailed(
                    "tearing requested on a swap chain created without it".to_string(),
                ));
            }
            if mode.allow_tearing && mode.sync_interval != 0 {
                return Err(RenderError::PresentFailed(
                    "tearing requires a sync interval of 0".to_string(),
                ));
            }
            if mode.sync_interval > 4 {
                return Err(RenderError::PresentFailed(format!(
                    "sync interval {} out of range",
                    mode.sync_interval
                )));
            }
            let back_buffer = chain.buffers[chain.current];
            chain.current = (chain.current + 1) % chain.buffers.len();
            back_buffer
        };
        self.direct.submit(Submission::Present {
            swap_chain: id,
            back_buffer,
        })
    }

    fn destroy_swap_chain(&self, id: SwapChainId) -> Result<(), ResourceError> {
        let mut store = self.store();
        let chain = store
            .swap_chains
            .remove(&id)
            .ok_or(ResourceError::InvalidHandle)?;
        for buffer in chain.buffers {
            store.textures.remove(&buffer);
        }
        Ok(())
    }
}
