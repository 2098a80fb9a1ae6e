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

//! The five frame passes, in recording order.

mod color;
mod gi_gather;
mod overlay;
mod screen;
mod shadow;

pub use color::ColorLane;
pub use gi_gather::{GiGatherLane, GiScene};
pub use overlay::{OverlayLane, OverlayRenderer};
pub use screen::ScreenLane;
pub use shadow::ShadowLane;

use lumen_core::renderer::{
    Command, CommandList, PerObjectConstants, RenderStats, ResourceBarrier, ResourceError,
    ResourceState, TextureId, Vertex,
};
use lumen_core::{GpuMesh, UploadRing};

/// Copies `src` into `dst` and returns both to the states they were in.
pub(crate) fn copy_texture(
    list: &mut CommandList,
    src: TextureId,
    src_state: ResourceState,
    dst: TextureId,
    dst_state: ResourceState,
) {
    let barriers = [
        ResourceBarrier::transition(src, src_state, ResourceState::CopySource),
        ResourceBarrier::transition(dst, dst_state, ResourceState::CopyDest),
    ];
    list.barrier(&barriers);
    list.record(Command::CopyTexture { dst, src });
    list.barrier(&barriers.map(|b| b.reversed()));
}

/// Binds the mesh buffers.
pub(crate) fn bind_mesh(list: &mut CommandList, mesh: &GpuMesh) {
    list.record(Command::SetVertexBuffer {
        buffer: mesh.vertex_buffer(),
        stride: std::mem::size_of::<Vertex>() as u32,
        size: mesh.vertex_buffer_size(),
    });
    list.record(Command::SetIndexBuffer {
        buffer: mesh.index_buffer(),
        size: mesh.index_buffer_size(),
    });
}

/// Writes the next per-object slot, binds it at `parameter` and draws `mesh`.
pub(crate) fn record_mesh_draw(
    list: &mut CommandList,
    upload: &mut UploadRing,
    stats: &mut RenderStats,
    parameter: u32,
    mesh: &GpuMesh,
    constants: &PerObjectConstants,
) -> Result<(), ResourceError> {
    let address = upload.push_object(constants)?;
    list.record(Command::SetGraphicsRootConstantBuffer { parameter, address });
    bind_mesh(list, mesh);
    list.record(Command::DrawIndexed {
        index_count: mesh.index_count(),
        instance_count: 1,
    });
    stats.draw_calls += 1;
    Ok(())
}
