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

//! # Lumen Lanes
//!
//! The hot path of a frame. A lane is one pass of the fixed per-frame sequence
//! (shadow, GI gather, color, screen, overlay); the [`CommandSequencer`] owns the
//! lanes, the graphics [`PipelineRegistry`] and the frame's command list, and
//! drives the components of `lumen-core` through one tick.

#![warn(missing_docs)]

mod error;
pub mod lane;
pub mod passes;
pub mod pipelines;
pub mod probes;
pub mod raytracing;
pub mod sequencer;

pub use error::LaneError;
pub use lane::{FrameContext, FrameLane, FrameTargets, LaneInit, LaneKind, SceneDraw};
pub use passes::{GiScene, OverlayRenderer};
pub use pipelines::{GraphicsPipeline, PipelineKind, PipelineRegistry};
pub use probes::{light_matrix, ProbeVolume};
pub use raytracing::RaytracingPipeline;
pub use sequencer::{CommandSequencer, FrameServices};
