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

//! Blocking CPU→GPU transfers on the dedicated load queue.
//!
//! Static geometry is uploaded once, at scene construction: every mesh gets an
//! intermediate upload buffer per buffer kind, the copies and the state transitions of
//! all meshes are recorded into a single command list, and the calling thread blocks on
//! the queue's fence until the GPU is done. Nothing here overlaps with frame rendering.

use crate::renderer::{
    BufferDescriptor, BufferId, Command, CommandAllocatorId, CommandList, FenceId, GpuDevice, QueueKind,
    RenderError, ResourceBarrier, ResourceError, ResourceState, ResourceView, TriangleGeometry,
    Vertex,
};
use std::sync::Arc;
use std::time::Duration;

/// Records and synchronously executes one-shot work on one queue.
#[derive(Debug)]
pub struct ImmediateSubmitter {
    device: Arc<dyn GpuDevice>,
    queue: QueueKind,
    allocator: CommandAllocatorId,
    list: CommandList,
    fence: FenceId,
    fence_value: u64,
    timeout: Duration,
}

impl ImmediateSubmitter {
    /// Creates an allocator and a fence for `queue`.
    ///
    /// Uploads that end in vertex or index-buffer states and structure builds need a
    /// direct-type queue; [`QueueKind::Load`] is the one reserved for them.
    ///
    /// # Errors
    /// Failure is fatal and reported as [`RenderError::InitializationFailed`].
    pub fn new(
        device: Arc<dyn GpuDevice>,
        queue: QueueKind,
        timeout: Duration,
    ) -> Result<Self, RenderError> {
        let allocator = device
            .create_command_allocator(queue)
            .map_err(|e| RenderError::InitializationFailed(format!("upload allocator: {e}")))?;
        let fence = device
            .create_fence(0)
            .map_err(|e| RenderError::InitializationFailed(format!("upload fence: {e}")))?;
        let mut list = CommandList::new(queue, allocator);
        list.close()?;
        Ok(Self {
            device,
            queue,
            allocator,
            list,
            fence,
            fence_value: 0,
            timeout,
        })
    }

    /// Resets the allocator and returns the list, ready for recording.
    pub fn begin(&mut self) -> Result<&mut CommandList, RenderError> {
        self.device.reset_command_allocator(self.allocator)?;
        self.list.reset(self.allocator);
        Ok(&mut self.list)
    }

    /// Closes and submits the list, then blocks until the GPU has executed it.
    pub fn submit_and_wait(&mut self) -> Result<(), RenderError> {
        self.list.close()?;
        self.device
            .execute_command_list(self.queue, &self.list)?;
        self.fence_value += 1;
        self.device
            .signal(self.queue, self.fence, self.fence_value)?;
        self.device
            .wait_for_fence(self.fence, self.fence_value, self.timeout)
    }

    /// The queue this submitter executes on.
    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    /// The device this submitter records for.
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    /// Releases the fence.
    pub fn destroy(self) -> Result<(), ResourceError> {
        self.device.destroy_fence(self.fence)
    }
}

/// CPU-side geometry of one mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    /// Debug label.
    pub label: String,
    /// Vertices.
    pub vertices: Vec<Vertex>,
    /// Triangle list indices.
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Creates mesh data.
    pub fn new(label: impl Into<String>, vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self {
            label: label.into(),
            vertices,
            indices,
        }
    }
}

/// An immutable GPU-resident mesh with its CPU shadow copy.
#[derive(Debug, Clone)]
pub struct GpuMesh {
    data: Arc<MeshData>,
    vertex_buffer: BufferId,
    index_buffer: BufferId,
}

impl GpuMesh {
    /// The CPU shadow copy.
    pub fn data(&self) -> &MeshData {
        &self.data
    }

    /// Debug label.
    pub fn label(&self) -> &str {
        &self.data.label
    }

    /// The vertex buffer, in `VertexAndConstantBuffer` state.
    pub fn vertex_buffer(&self) -> BufferId {
        self.vertex_buffer
    }

    /// The index buffer, in `IndexBuffer` state.
    pub fn index_buffer(&self) -> BufferId {
        self.index_buffer
    }

    /// Number of vertices.
    pub fn vertex_count(&self) -> u32 {
        self.data.vertices.len() as u32
    }

    /// Number of indices.
    pub fn index_count(&self) -> u32 {
        self.data.indices.len() as u32
    }

    /// Vertex buffer size in bytes.
    pub fn vertex_buffer_size(&self) -> u64 {
        std::mem::size_of_val(self.data.vertices.as_slice()) as u64
    }

    /// Index buffer size in bytes.
    pub fn index_buffer_size(&self) -> u64 {
        std::mem::size_of_val(self.data.indices.as_slice()) as u64
    }

    /// A structured-buffer view over the vertices.
    pub fn vertex_buffer_view(&self) -> ResourceView {
        ResourceView::BufferSrv {
            buffer: self.vertex_buffer,
            element_count: self.vertex_count(),
            stride: std::mem::size_of::<Vertex>() as u32,
        }
    }

    /// Describes the mesh as bottom-level build input.
    pub fn triangle_geometry(&self, device: &dyn GpuDevice) -> Result<TriangleGeometry, ResourceError> {
        Ok(TriangleGeometry {
            vertex_buffer: device.buffer_address(self.vertex_buffer)?,
            vertex_stride: std::mem::size_of::<Vertex>() as u32,
            vertex_count: self.vertex_count(),
            index_buffer: device.buffer_address(self.index_buffer)?,
            index_count: self.index_count(),
            opaque: true,
        })
    }

    /// Releases the GPU buffers.
    pub fn destroy(&self, device: &dyn GpuDevice) -> Result<(), ResourceError> {
        device.destroy_buffer(self.vertex_buffer)?;
        device.destroy_buffer(self.index_buffer)
    }
}

/// Uploads static geometry through its own allocator and fence on the load queue.
#[derive(Debug)]
pub struct StagingTransfer {
    submitter: ImmediateSubmitter,
}

impl StagingTransfer {
    /// Creates the transfer's allocator and fence.
    pub fn new(device: Arc<dyn GpuDevice>, timeout: Duration) -> Result<Self, RenderError> {
        Ok(Self {
            submitter: ImmediateSubmitter::new(device, QueueKind::Load, timeout)?,
        })
    }

    /// The queue uploads execute on.
    pub fn queue(&self) -> QueueKind {
        self.submitter.queue()
    }

    /// Uploads every mesh in one submission and blocks until the copies completed.
    ///
    /// Each destination ends in `VertexAndConstantBuffer` (vertices) or `IndexBuffer`
    /// (indices) state. The intermediate buffers are released before returning.
    ///
    /// # Errors
    /// Any creation, mapping or submission failure. These are initialization-time
    /// failures and are not retried.
    pub fn upload_meshes(&mut self, meshes: &[MeshData]) -> Result<Vec<GpuMesh>, RenderError> {
        if meshes.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(mesh) = meshes
            .iter()
            .find(|m| m.vertices.is_empty() || m.indices.is_empty())
        {
            return Err(RenderError::InitializationFailed(format!(
                "mesh '{}' has no geometry",
                mesh.label
            )));
        }
        let device = self.submitter.device().clone();
        let mut staging = Vec::with_capacity(meshes.len() * 2);
        let mut destinations = Vec::with_capacity(meshes.len() * 2);

        let result = self.record_and_submit(&*device, meshes, &mut staging, &mut destinations);
        for &buffer in &staging {
            if let Err(err) = device.destroy_buffer(buffer) {
                log::warn!("Failed to release intermediate upload buffer {buffer:?}: {err}");
            }
        }
        match result {
            Ok(uploaded) => {
                log::info!("Uploaded {} meshes to the GPU", uploaded.len());
                Ok(uploaded)
            }
            Err(err) => {
                log::error!("Mesh upload failed: {err}");
                for &buffer in &destinations {
                    if let Err(destroy_err) = device.destroy_buffer(buffer) {
                        log::warn!("Failed to release mesh buffer {buffer:?}: {destroy_err}");
                    }
                }
                Err(err)
            }
        }
    }

    /// Records every copy and barrier into one list and blocks on its execution.
    ///
    /// Every buffer created is pushed to `staging` or `destinations` before anything
    /// else can fail, so the caller can release them.
    fn record_and_submit(
        &mut self,
        device: &dyn GpuDevice,
        meshes: &[MeshData],
        staging: &mut Vec<BufferId>,
        destinations: &mut Vec<BufferId>,
    ) -> Result<Vec<GpuMesh>, RenderError> {
        let mut uploaded = Vec::with_capacity(meshes.len());
        let mut barriers = Vec::with_capacity(meshes.len() * 2);

        let list = self.submitter.begin()?;
        for mesh in meshes {
            let vertex_bytes: &[u8] = bytemuck::cast_slice(&mesh.vertices);
            let index_bytes: &[u8] = bytemuck::cast_slice(&mesh.indices);

            let vertex_buffer = Self::stage(
                device,
                list,
                staging,
                destinations,
                &format!("{} vertices", mesh.label),
                vertex_bytes,
            )?;
            let index_buffer = Self::stage(
                device,
                list,
                staging,
                destinations,
                &format!("{} indices", mesh.label),
                index_bytes,
            )?;

            barriers.push(ResourceBarrier::transition(
                vertex_buffer,
                ResourceState::CopyDest,
                ResourceState::VertexAndConstantBuffer,
            ));
            barriers.push(ResourceBarrier::transition(
                index_buffer,
                ResourceState::CopyDest,
                ResourceState::IndexBuffer,
            ));

            uploaded.push(GpuMesh {
                data: Arc::new(mesh.clone()),
                vertex_buffer,
                index_buffer,
            });
        }
        list.barrier(&barriers);

        self.submitter.submit_and_wait()?;
        Ok(uploaded)
    }

    /// Creates a GPU-local destination and an intermediate upload buffer holding `bytes`,
    /// and records the copy between them.
    fn stage(
        device: &dyn GpuDevice,
        list: &mut CommandList,
        staging: &mut Vec<BufferId>,
        destinations: &mut Vec<BufferId>,
        label: &str,
        bytes: &[u8],
    ) -> Result<BufferId, RenderError> {
        let size = bytes.len() as u64;
        let intermediate = device.create_buffer(&BufferDescriptor::upload(label, size))?;
        staging.push(intermediate);
        device.write_mapped(intermediate, 0, bytes)?;

        let destination = device.create_buffer(&BufferDescriptor::gpu_local(
            label,
            size,
            ResourceState::CopyDest,
        ))?;
        destinations.push(destination);
        list.record(Command::CopyBufferRegion {
            dst: destination,
            dst_offset: 0,
            src: intermediate,
            src_offset: 0,
            size,
        });
        Ok(destination)
    }

    /// Releases the transfer's fence.
    pub fn destroy(self) -> Result<(), ResourceError> {
        self.submitter.destroy()
    }
}
