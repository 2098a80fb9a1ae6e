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

//! Handles and descriptors for GPU memory objects, plus the explicit resource-state model.

use std::borrow::Cow;

/// An opaque handle to a GPU buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub usize);

/// An opaque handle to a GPU texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub usize);

/// An opaque handle to a fence, a monotonically increasing GPU-signalled counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceId(pub usize);

/// An opaque handle to a shader-visible descriptor heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorHeapId(pub usize);

/// An opaque handle to a command allocator, the memory backing recorded command lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandAllocatorId(pub usize);

/// A GPU virtual address.
///
/// Addresses are produced by [`GpuDevice::buffer_address`](crate::renderer::GpuDevice::buffer_address)
/// and may be offset within the buffer they point into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GpuAddress(pub u64);

impl GpuAddress {
    /// The null address.
    pub const NULL: GpuAddress = GpuAddress(0);

    /// Returns this address advanced by `bytes`.
    pub fn offset(self, bytes: u64) -> Self {
        GpuAddress(self.0 + bytes)
    }

    /// Returns `true` for the null address.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// The submission queue a piece of work belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// The queue used for frame rendering.
    Direct,
    /// A second direct-type queue, dedicated to initialization-time mesh uploads and
    /// acceleration-structure builds.
    Load,
    /// A copy-only queue. Lists may copy and move resources between `Common`,
    /// `CopySource` and `CopyDest`; nothing else.
    Copy,
}

impl QueueKind {
    /// Whether lists on this queue are restricted to copies.
    pub fn is_copy_only(self) -> bool {
        self == QueueKind::Copy
    }

    /// Whether a resource may enter or leave `state` on this queue.
    pub fn allows_state(self, state: ResourceState) -> bool {
        !self.is_copy_only()
            || matches!(
                state,
                ResourceState::Common | ResourceState::CopySource | ResourceState::CopyDest
            )
    }
}

/// The memory heap a buffer lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapKind {
    /// GPU-local memory. Not CPU-visible.
    Default,
    /// CPU-writable memory, persistently mapped, readable by the GPU.
    Upload,
}

/// Explicit resource states. Every barrier names the state a resource leaves and the
/// state it enters; nothing is tracked implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// The initial state of default-heap resources.
    Common,
    /// A swap-chain buffer ready for presentation.
    Present,
    /// Bound as a color render target.
    RenderTarget,
    /// Bound as a depth target.
    DepthWrite,
    /// Read by pixel shaders.
    PixelShaderResource,
    /// Read by non-pixel shader stages (including ray tracing).
    NonPixelShaderResource,
    /// Source of a copy.
    CopySource,
    /// Destination of a copy.
    CopyDest,
    /// Read as a vertex or constant buffer.
    VertexAndConstantBuffer,
    /// Read as an index buffer.
    IndexBuffer,
    /// Read and written through an unordered-access view.
    UnorderedAccess,
    /// The fixed state of upload-heap resources.
    GenericRead,
    /// Holds acceleration-structure data.
    RaytracingAccelerationStructure,
}

/// Describes a buffer to be created.
#[derive(Debug, Clone)]
pub struct BufferDescriptor<'a> {
    /// A debug label.
    pub label: Option<Cow<'a, str>>,
    /// The size of the buffer in bytes.
    pub size: u64,
    /// The heap the buffer is placed in.
    pub heap: HeapKind,
    /// The state the buffer starts in. Upload buffers must start in `GenericRead`.
    pub initial_state: ResourceState,
    /// Whether the buffer may be bound for unordered access.
    pub allow_unordered_access: bool,
}

impl<'a> BufferDescriptor<'a> {
    /// A persistently mapped upload buffer.
    pub fn upload(label: &'a str, size: u64) -> Self {
        Self {
            label: Some(Cow::Borrowed(label)),
            size,
            heap: HeapKind::Upload,
            initial_state: ResourceState::GenericRead,
            allow_unordered_access: false,
        }
    }

    /// A GPU-local buffer starting in `initial_state`.
    pub fn gpu_local(label: &'a str, size: u64, initial_state: ResourceState) -> Self {
        Self {
            label: Some(Cow::Borrowed(label)),
            size,
            heap: HeapKind::Default,
            initial_state,
            allow_unordered_access: false,
        }
    }
}

/// Texel formats used by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit RGBA, normalized.
    Rgba8Unorm,
    /// 16-bit float RGBA.
    Rgba16Float,
    /// Packed 11/11/10 float RGB.
    Rg11B10Float,
    /// 16-bit float RG.
    Rg16Float,
    /// 32-bit float single channel.
    R32Float,
    /// 32-bit float depth.
    Depth32Float,
}

impl TextureFormat {
    /// The number of bytes one texel occupies on a real device.
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rg11B10Float
            | TextureFormat::Rg16Float
            | TextureFormat::R32Float
            | TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }

    /// Returns `true` for depth formats.
    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }
}

/// Describes a 2D texture to be created.
#[derive(Debug, Clone)]
pub struct TextureDescriptor<'a> {
    /// A debug label.
    pub label: Option<Cow<'a, str>>,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Texel format.
    pub format: TextureFormat,
    /// The state the texture starts in.
    pub initial_state: ResourceState,
    /// Whether the texture may be bound as a color render target.
    pub allow_render_target: bool,
    /// Whether the texture may be bound as a depth target.
    pub allow_depth_stencil: bool,
    /// Whether the texture may be bound for unordered access.
    pub allow_unordered_access: bool,
}

impl<'a> TextureDescriptor<'a> {
    /// A shader-readable texture with no special binding capabilities.
    pub fn sampled(label: &'a str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: Some(Cow::Borrowed(label)),
            width,
            height,
            format,
            initial_state: ResourceState::PixelShaderResource,
            allow_render_target: false,
            allow_depth_stencil: false,
            allow_unordered_access: false,
        }
    }
}

/// A reference to any resource that participates in barriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    /// A buffer.
    Buffer(BufferId),
    /// A texture.
    Texture(TextureId),
}

impl From<BufferId> for ResourceRef {
    fn from(id: BufferId) -> Self {
        ResourceRef::Buffer(id)
    }
}

impl From<TextureId> for ResourceRef {
    fn from(id: TextureId) -> Self {
        ResourceRef::Texture(id)
    }
}

/// A view written into a shader-visible descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResourceView {
    /// Shader-readable texture.
    TextureSrv(TextureId),
    /// Read-write texture.
    TextureUav(TextureId),
    /// Shader-readable structured buffer.
    BufferSrv {
        /// The buffer.
        buffer: BufferId,
        /// The number of elements.
        element_count: u32,
        /// The size of one element in bytes.
        stride: u32,
    },
    /// A top-level acceleration structure.
    AccelerationStructure(GpuAddress),
    /// Reserved for the GUI overlay's font atlas.
    Overlay,
}

/// Optional capabilities a device may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFeature {
    /// Presentation with tearing (variable refresh rate).
    Tearing,
    /// Hardware ray tracing.
    Raytracing,
}

/// Information about the adapter behind a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// The adapter name.
    pub name: String,
    /// The backend name.
    pub backend: String,
}
