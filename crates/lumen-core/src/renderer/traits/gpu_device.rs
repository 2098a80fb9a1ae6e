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

//! The device contract every backend implements.

use crate::renderer::api::*;
use crate::renderer::error::{RenderError, ResourceError};
use std::fmt::Debug;
use std::time::Duration;

/// An explicit, low-level GPU device.
///
/// The model is deliberately close to the hardware: resources carry explicit states,
/// work is recorded into [`CommandList`]s and submitted to one of two queues, and the
/// CPU learns about completion only through fences. The device never synchronizes on
/// the caller's behalf.
pub trait GpuDevice: Send + Sync + Debug + 'static {
    /// Returns information about the adapter.
    fn adapter_info(&self) -> AdapterInfo;

    /// Checks whether an optional capability is available.
    fn supports_feature(&self, feature: DeviceFeature) -> bool;

    // --- Fences ---

    /// Creates a fence.
    /// ## Arguments
    /// * `initial_value` - The value the fence starts at.
    /// ## Errors
    /// * `ResourceError` - If the fence cannot be created. This is fatal at startup.
    fn create_fence(&self, initial_value: u64) -> Result<FenceId, ResourceError>;

    /// Returns the last value the GPU has signalled on `fence`.
    fn completed_fence_value(&self, fence: FenceId) -> Result<u64, ResourceError>;

    /// Enqueues a GPU-side signal of `fence` to `value` on `queue`.
    ///
    /// The signal executes after every piece of work previously submitted to that queue.
    /// ## Errors
    /// * `RenderError` - If the queue is unavailable or the device is lost.
    fn signal(&self, queue: QueueKind, fence: FenceId, value: u64) -> Result<(), RenderError>;

    /// Blocks the calling thread until `fence` reaches `value`.
    /// ## Arguments
    /// * `fence` - The fence to wait on.
    /// * `value` - The value to wait for.
    /// * `timeout` - Upper bound on the wait.
    /// ## Errors
    /// * `RenderError::FenceTimeout` - If the value is not reached in time.
    fn wait_for_fence(
        &self,
        fence: FenceId,
        value: u64,
        timeout: Duration,
    ) -> Result<(), RenderError>;

    /// Destroys a fence.
    fn destroy_fence(&self, fence: FenceId) -> Result<(), ResourceError>;

    // --- Buffers ---

    /// Creates a buffer.
    /// ## Arguments
    /// * `descriptor` - Size, heap and initial state of the buffer.
    /// ## Returns
    /// The ID of the new buffer.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError>;

    /// Destroys a buffer.
    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError>;

    /// Returns the GPU virtual address of the start of a buffer.
    fn buffer_address(&self, id: BufferId) -> Result<GpuAddress, ResourceError>;

    /// Copies `data` into the persistent mapping of an upload buffer.
    /// ## Errors
    /// * `ResourceError::OutOfBounds` - If the range exceeds the buffer.
    /// * `ResourceError::InvalidHandle` - If the buffer is not CPU-visible.
    fn write_mapped(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError>;

    /// Reads back `len` bytes of an upload buffer's mapping.
    fn read_mapped(&self, id: BufferId, offset: u64, len: usize)
        -> Result<Vec<u8>, ResourceError>;

    // --- Textures ---

    /// Creates a 2D texture.
    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureId, ResourceError>;

    /// Destroys a texture.
    fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError>;

    /// Reads back every texel of a texture as four `f32` channels, row by row.
    ///
    /// Intended for diagnostics and tests; callers must make sure no in-flight work
    /// writes the texture.
    fn read_texture(&self, id: TextureId) -> Result<Vec<[f32; 4]>, ResourceError>;

    // --- Descriptors ---

    /// Creates a shader-visible descriptor heap with a fixed number of slots.
    fn create_descriptor_heap(&self, capacity: u32) -> Result<DescriptorHeapId, ResourceError>;

    /// Writes a view into one slot of a descriptor heap.
    fn write_descriptor(
        &self,
        heap: DescriptorHeapId,
        index: u32,
        view: ResourceView,
    ) -> Result<(), ResourceError>;

    // --- Pipelines ---

    /// Creates a graphics pipeline state object.
    /// ## Errors
    /// * `ResourceError::Pipeline` - If the description is rejected.
    fn create_graphics_pipeline(
        &self,
        descriptor: &GraphicsPipelineDescriptor,
    ) -> Result<PipelineId, ResourceError>;

    /// Creates a raytracing state object.
    fn create_raytracing_pipeline(
        &self,
        descriptor: &RaytracingPipelineDescriptor,
    ) -> Result<PipelineId, ResourceError>;

    /// Returns the identifier of an export of a raytracing pipeline, to be copied into a
    /// shader table record.
    fn shader_identifier(
        &self,
        pipeline: PipelineId,
        export: &str,
    ) -> Result<ShaderIdentifier, ResourceError>;

    /// Destroys a pipeline.
    fn destroy_pipeline(&self, id: PipelineId) -> Result<(), ResourceError>;

    // --- Acceleration structures ---

    /// Reports the memory a build of `inputs` needs.
    fn acceleration_structure_prebuild_info(
        &self,
        inputs: &AccelerationStructureInputs,
    ) -> Result<PrebuildInfo, ResourceError>;

    // --- Command submission ---

    /// Creates a command allocator for `queue`.
    fn create_command_allocator(&self, queue: QueueKind)
        -> Result<CommandAllocatorId, ResourceError>;

    /// Reclaims an allocator's memory.
    /// ## Errors
    /// * `RenderError::ResourcesInFlight` - If the GPU has not finished executing every list
    ///   recorded from this allocator.
    fn reset_command_allocator(&self, allocator: CommandAllocatorId) -> Result<(), RenderError>;

    /// Submits a closed command list to `queue`.
    /// ## Errors
    /// * `RenderError::InvalidCommandList` - If the list is still recording or targets
    ///   another queue.
    /// * `RenderError::DeviceLost` - If earlier work failed validation.
    fn execute_command_list(&self, queue: QueueKind, list: &CommandList)
        -> Result<(), RenderError>;

    // --- Swap chain ---

    /// Creates a swap chain presented from the direct queue.
    fn create_swap_chain(
        &self,
        descriptor: &SwapChainDescriptor,
    ) -> Result<SwapChainId, ResourceError>;

    /// Returns the back buffers of a swap chain, in index order.
    fn swap_chain_buffers(&self, id: SwapChainId) -> Result<Vec<TextureId>, ResourceError>;

    /// Returns the index of the back buffer the next frame renders into.
    fn current_back_buffer_index(&self, id: SwapChainId) -> Result<usize, ResourceError>;

    /// Resizes the back buffers. Every previous back-buffer ID becomes invalid.
    /// ## Errors
    /// * `RenderError::ResourcesInFlight` - If submitted work still references the swap chain.
    fn resize_swap_chain(&self, id: SwapChainId, width: u32, height: u32)
        -> Result<(), RenderError>;

    /// Enqueues presentation of the current back buffer on the direct queue.
    fn present(&self, id: SwapChainId, mode: PresentMode) -> Result<(), RenderError>;

    /// Destroys a swap chain and its back buffers.
    fn destroy_swap_chain(&self, id: SwapChainId) -> Result<(), ResourceError>;
}
