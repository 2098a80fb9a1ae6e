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

//! Command recording.
//!
//! A [`CommandList`] is a plain recording of [`Command`] values bound to one command
//! allocator. It is reset, recorded, closed and then handed to
//! [`GpuDevice::execute_command_list`](crate::renderer::GpuDevice::execute_command_list).
//! The device copies the recorded commands, so a closed list may be reset again as soon
//! as its allocator is no longer in use by the GPU.

use super::accel::{BuildAccelerationStructureDesc, DispatchRaysDesc};
use super::pipeline::PipelineId;
use super::resource::{
    BufferId, CommandAllocatorId, DescriptorHeapId, GpuAddress, QueueKind, ResourceRef,
    ResourceState, TextureId,
};
use crate::renderer::error::RenderError;

/// A resource barrier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResourceBarrier {
    /// Moves a resource from one explicit state to another.
    Transition {
        /// The resource being transitioned.
        resource: ResourceRef,
        /// The state the resource is currently in.
        before: ResourceState,
        /// The state the resource moves to.
        after: ResourceState,
    },
    /// Orders unordered-access work on a resource.
    UnorderedAccess {
        /// The resource, or `None` for all unordered-access resources.
        resource: Option<ResourceRef>,
    },
}

impl ResourceBarrier {
    /// Shorthand for a transition barrier.
    pub fn transition(
        resource: impl Into<ResourceRef>,
        before: ResourceState,
        after: ResourceState,
    ) -> Self {
        ResourceBarrier::Transition {
            resource: resource.into(),
            before,
            after,
        }
    }

    /// Shorthand for a UAV barrier on one resource.
    pub fn uav(resource: impl Into<ResourceRef>) -> Self {
        ResourceBarrier::UnorderedAccess {
            resource: Some(resource.into()),
        }
    }

    /// Returns the barrier that undoes this transition.
    pub fn reversed(&self) -> Self {
        match *self {
            ResourceBarrier::Transition {
                resource,
                before,
                after,
            } => ResourceBarrier::Transition {
                resource,
                before: after,
                after: before,
            },
            uav => uav,
        }
    }
}

/// A rectangle in render-target space used as the viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    /// Width in pixels.
    pub width: f32,
    /// Height in pixels.
    pub height: f32,
    /// Minimum depth.
    pub min_depth: f32,
    /// Maximum depth.
    pub max_depth: f32,
}

impl Viewport {
    /// A full-target viewport with a `[0, 1]` depth range.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// A scissor rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    /// Left edge.
    pub left: u32,
    /// Top edge.
    pub top: u32,
    /// Right edge, exclusive.
    pub right: u32,
    /// Bottom edge, exclusive.
    pub bottom: u32,
}

impl ScissorRect {
    /// A scissor covering the whole target.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width,
            bottom: height,
        }
    }
}

/// One recorded GPU command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Opens a labelled region, used to identify passes on the GPU timeline.
    BeginEvent(String),
    /// Closes the innermost labelled region.
    EndEvent,
    /// A batch of barriers.
    Barrier(Vec<ResourceBarrier>),
    /// Copies a byte range between buffers.
    CopyBufferRegion {
        /// Destination buffer.
        dst: BufferId,
        /// Offset into the destination.
        dst_offset: u64,
        /// Source buffer.
        src: BufferId,
        /// Offset into the source.
        src_offset: u64,
        /// Number of bytes.
        size: u64,
    },
    /// Copies a whole texture into another of identical dimensions.
    CopyTexture {
        /// Destination texture.
        dst: TextureId,
        /// Source texture.
        src: TextureId,
    },
    /// Clears a color target.
    ClearRenderTarget {
        /// The target.
        target: TextureId,
        /// The clear color.
        color: [f32; 4],
    },
    /// Clears a depth target.
    ClearDepth {
        /// The target.
        target: TextureId,
        /// The clear depth.
        depth: f32,
    },
    /// Binds output targets.
    SetRenderTargets {
        /// The color target, if any.
        color: Option<TextureId>,
        /// The depth target, if any.
        depth: Option<TextureId>,
    },
    /// Sets the viewport.
    SetViewport(Viewport),
    /// Sets the scissor rectangle.
    SetScissor(ScissorRect),
    /// Binds a graphics or raytracing pipeline.
    SetPipeline(PipelineId),
    /// Binds the shader-visible descriptor heap.
    SetDescriptorHeap(DescriptorHeapId),
    /// Binds a constant buffer address to a graphics root parameter.
    SetGraphicsRootConstantBuffer {
        /// Root parameter index.
        parameter: u32,
        /// Address of the constant data.
        address: GpuAddress,
    },
    /// Binds a descriptor table to a graphics root parameter.
    SetGraphicsRootDescriptorTable {
        /// Root parameter index.
        parameter: u32,
        /// First descriptor index of the table.
        base_descriptor: u32,
    },
    /// Binds a constant buffer address to a compute/raytracing root parameter.
    SetComputeRootConstantBuffer {
        /// Root parameter index.
        parameter: u32,
        /// Address of the constant data.
        address: GpuAddress,
    },
    /// Binds a descriptor table to a compute/raytracing root parameter.
    SetComputeRootDescriptorTable {
        /// Root parameter index.
        parameter: u32,
        /// First descriptor index of the table.
        base_descriptor: u32,
    },
    /// Binds a vertex buffer.
    SetVertexBuffer {
        /// The buffer.
        buffer: BufferId,
        /// Size of one vertex in bytes.
        stride: u32,
        /// Bytes in the view.
        size: u64,
    },
    /// Binds a `u32` index buffer.
    SetIndexBuffer {
        /// The buffer.
        buffer: BufferId,
        /// Bytes in the view.
        size: u64,
    },
    /// Draws indexed, instanced geometry.
    DrawIndexed {
        /// Indices per instance.
        index_count: u32,
        /// Instance count.
        instance_count: u32,
    },
    /// Draws non-indexed geometry.
    Draw {
        /// Vertices per instance.
        vertex_count: u32,
        /// Instance count.
        instance_count: u32,
    },
    /// Builds or refits an acceleration structure.
    BuildAccelerationStructure(BuildAccelerationStructureDesc),
    /// Launches rays.
    DispatchRays(DispatchRaysDesc),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListState {
    Recording,
    Closed,
}

/// A command list recording work for one queue.
#[derive(Debug, Clone)]
pub struct CommandList {
    queue: QueueKind,
    allocator: CommandAllocatorId,
    commands: Vec<Command>,
    state: ListState,
}

impl CommandList {
    /// Creates a list in the recording state, bound to `allocator`.
    pub fn new(queue: QueueKind, allocator: CommandAllocatorId) -> Self {
        Self {
            queue,
            allocator,
            commands: Vec::new(),
            state: ListState::Recording,
        }
    }

    /// Discards previous commands and starts recording against `allocator`.
    pub fn reset(&mut self, allocator: CommandAllocatorId) {
        self.allocator = allocator;
        self.commands.clear();
        self.state = ListState::Recording;
    }

    /// Finishes recording.
    ///
    /// # Errors
    /// Returns [`RenderError::InvalidCommandList`] if the list is already closed.
    pub fn close(&mut self) -> Result<(), RenderError> {
        if self.state == ListState::Closed {
            return Err(RenderError::InvalidCommandList(
                "close called on a closed command list".to_string(),
            ));
        }
        self.state = ListState::Closed;
        Ok(())
    }

    /// Whether the list has been closed and may be submitted.
    pub fn is_closed(&self) -> bool {
        self.state == ListState::Closed
    }

    /// The queue this list records for.
    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    /// The allocator backing the current recording.
    pub fn allocator(&self) -> CommandAllocatorId {
        self.allocator
    }

    /// The recorded commands.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Records a raw command.
    ///
    /// Recording into a closed list is a contract violation; the command is dropped and
    /// the violation logged, and the next submission of the list is rejected by the device.
    pub fn record(&mut self, command: Command) {
        if self.state == ListState::Closed {
            log::error!("Recording {command:?} into a closed command list; command dropped");
            return;
        }
        self.commands.push(command);
    }

    /// Records a batch of barriers. Empty batches are skipped.
    pub fn barrier(&mut self, barriers: &[ResourceBarrier]) {
        if !barriers.is_empty() {
            self.record(Command::Barrier(barriers.to_vec()));
        }
    }

    /// Records one transition barrier.
    pub fn transition(
        &mut self,
        resource: impl Into<ResourceRef>,
        before: ResourceState,
        after: ResourceState,
    ) {
        self.barrier(&[ResourceBarrier::transition(resource, before, after)]);
    }

    /// Opens a labelled region.
    pub fn begin_event(&mut self, label: &str) {
        self.record(Command::BeginEvent(label.to_string()));
    }

    /// Closes the innermost labelled region.
    pub fn end_event(&mut self) {
        self.record(Command::EndEvent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reversed_transition_swaps_states() {
        let barrier = ResourceBarrier::transition(
            TextureId(3),
            ResourceState::Present,
            ResourceState::RenderTarget,
        );
        assert_eq!(
            barrier.reversed(),
            ResourceBarrier::transition(
                TextureId(3),
                ResourceState::RenderTarget,
                ResourceState::Present
            )
        );
    }

    #[test]
    fn test_closed_list_rejects_second_close_and_drops_commands() {
        let mut list = CommandList::new(QueueKind::Direct, CommandAllocatorId(0));
        list.begin_event("Shadow");
        list.close().unwrap();
        assert!(list.is_closed());
        assert!(list.close().is_err());

        list.end_event();
        assert_eq!(list.commands().len(), 1);
    }

    #[test]
    fn test_reset_clears_and_rebinds() {
        let mut list = CommandList::new(QueueKind::Direct, CommandAllocatorId(0));
        list.begin_event("Color");
        list.close().unwrap();

        list.reset(CommandAllocatorId(2));
        assert!(!list.is_closed());
        assert!(list.commands().is_empty());
        assert_eq!(list.allocator(), CommandAllocatorId(2));
    }

    #[test]
    fn test_empty_barrier_batch_is_not_recorded() {
        let mut list = CommandList::new(QueueKind::Copy, CommandAllocatorId(0));
        list.barrier(&[]);
        assert!(list.commands().is_empty());
    }
}
