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

//! Frame statistics for the rendering system.

/// Counters describing the most recent frame and the session so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderStats {
    /// A sequential counter for submitted frames.
    pub frame_number: u64,
    /// The number of draw calls recorded in the last frame.
    pub draw_calls: u32,
    /// The number of GI gathers dispatched since startup.
    pub gi_gathers: u64,
    /// The number of top-level refits recorded since startup.
    pub tlas_refits: u64,
    /// CPU time spent recording and submitting the last frame.
    pub cpu_frame_time_ms: f32,
}
