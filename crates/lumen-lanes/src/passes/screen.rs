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

use super::bind_mesh;
use crate::lane::{FrameContext, FrameLane, LaneInit, LaneKind};
use crate::pipelines::{screen_root, PipelineKind};
use crate::LaneError;
use lumen_core::renderer::{Command, GpuDevice, Vertex};
use lumen_core::{DescriptorIndex, GpuMesh, MeshData};

/// A clip-space quad covering the whole target.
pub(crate) fn screen_quad() -> MeshData {
    let normal = [0.0, 0.0, -1.0];
    MeshData::new(
        "screen quad",
        vec![
            Vertex::new([-1.0, 1.0, 0.0], [0.0, 0.0], normal),
            Vertex::new([1.0, 1.0, 0.0], [1.0, 0.0], normal),
            Vertex::new([1.0, -1.0, 0.0], [1.0, 1.0], normal),
            Vertex::new([-1.0, -1.0, 0.0], [0.0, 1.0], normal),
        ],
        vec![0, 1, 2, 0, 2, 3],
    )
}

/// Composites the copied scene color onto the back buffer.
#[derive(Debug, Default)]
pub struct ScreenLane {
    quad: Option<GpuMesh>,
}

impl ScreenLane {
    /// Creates an uninitialized lane.
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameLane for ScreenLane {
    fn strategy_name(&self) -> &'static str {
        "Screen"
    }

    fn lane_kind(&self) -> LaneKind {
        LaneKind::Screen
    }

    fn on_initialize(&mut self, init: &mut LaneInit<'_>) -> Result<(), LaneError> {
        let mut meshes = init.staging.upload_meshes(&[screen_quad()])?;
        self.quad = meshes.pop();
        Ok(())
    }

    fn execute(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), LaneError> {
        let quad = self
            .quad
            .as_ref()
            .ok_or_else(|| LaneError::not_initialized(self.strategy_name()))?;
        let pipeline = ctx.pipelines.get(PipelineKind::Screen)?;
        let targets = ctx.targets;

        let list = &mut *ctx.list;
        pipeline.bind(list);
        list.record(Command::SetGraphicsRootDescriptorTable {
            parameter: screen_root::SCENE_COLOR,
            base_descriptor: DescriptorIndex::SceneColorSrv.index(),
        });
        list.record(Command::SetViewport(targets.viewport));
        list.record(Command::SetScissor(targets.scissor));
        list.record(Command::SetRenderTargets {
            color: Some(targets.back_buffer),
            depth: None,
        });
        bind_mesh(list, quad);
        list.record(Command::DrawIndexed {
            index_count: quad.index_count(),
            instance_count: 1,
        });
        ctx.stats.draw_calls += 1;
        Ok(())
    }

    fn on_shutdown(&mut self, device: &dyn GpuDevice) -> Result<(), LaneError> {
        if let Some(quad) = self.quad.take() {
            quad.destroy(device)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_quad_covers_clip_space() {
        let quad = screen_quad();
        assert_eq!(quad.indices.len(), 6);
        for corner in [[-1.0, 1.0], [1.0, 1.0], [1.0, -1.0], [-1.0, -1.0]] {
            assert!(quad
                .vertices
                .iter()
                .any(|v| v.position[0] == corner[0] && v.position[1] == corner[1]));
        }
    }
}
