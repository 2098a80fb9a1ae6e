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

//! Errors raised while setting up or recording frame lanes.

use crate::pipelines::PipelineKind;
use lumen_core::renderer::{RenderError, ResourceError, ShaderError};
use thiserror::Error;

/// Error type for lane operations.
#[derive(Debug, Error)]
pub enum LaneError {
    /// A device or submission failure.
    #[error(transparent)]
    Render(#[from] RenderError),
    /// A resource could not be created, written or bound.
    #[error(transparent)]
    Resource(#[from] ResourceError),
    /// A shader blob could not be loaded.
    #[error(transparent)]
    Shader(#[from] ShaderError),
    /// The registry holds no pipeline of this kind.
    #[error("No {0:?} pipeline is registered")]
    MissingPipeline(PipelineKind),
    /// A lane was executed before `on_initialize` created its resources.
    #[error("Lane '{0}' was used before it was initialized")]
    NotInitialized(&'static str),
    /// `start_frame` was called while a frame was already being recorded.
    #[error("A frame is already being recorded")]
    FrameInProgress,
    /// A per-frame operation was called outside `start_frame`/`end_frame`.
    #[error("No frame is being recorded")]
    NoFrameInProgress,
}

impl LaneError {
    /// Shorthand for [`LaneError::NotInitialized`].
    pub fn not_initialized(lane: &'static str) -> Self {
        LaneError::NotInitialized(lane)
    }
}

impl From<LaneError> for RenderError {
    fn from(err: LaneError) -> Self {
        match err {
            LaneError::Render(err) => err,
            LaneError::Resource(err) => RenderError::ResourceError(err),
            LaneError::Shader(err) => RenderError::ResourceError(ResourceError::Shader(err)),
            other => RenderError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_errors_survive_conversion() {
        let err: RenderError = LaneError::from(ResourceError::UpdateNotAllowed).into();
        assert!(matches!(
            err,
            RenderError::ResourceError(ResourceError::UpdateNotAllowed)
        ));
    }

    #[test]
    fn test_lane_specific_errors_become_internal() {
        let err: RenderError = LaneError::not_initialized("Shadow").into();
        match err {
            RenderError::Internal(msg) => assert!(msg.contains("Shadow")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
