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

//! Defines the hierarchy of error types for the rendering subsystem.
//!
//! Three families exist:
//! - initialization failures (device, fence, resource or pipeline creation),
//! - runtime failures (submission, present, fence waits),
//! - contract violations by the client (bad instance id, exhausted constant region,
//!   refit of a non-updatable structure, reserved descriptor slot).
//!
//! None of them is retried. Callers propagate them up to the frame loop, which stops.

use crate::renderer::api::pipeline::PipelineId;
use std::fmt;

/// An error related to loading an opaque compiled shader blob.
#[derive(Debug)]
pub enum ShaderError {
    /// The blob could not be read from its storage location.
    LoadError {
        /// The path of the file that failed to load.
        path: String,
        /// The underlying I/O error.
        source_error: String,
    },
    /// No blob is registered under the requested logical name.
    NotFound {
        /// The logical shader name, e.g. `RayGen`.
        name: String,
    },
    /// The blob exists but cannot be used (for instance, it is empty).
    Malformed {
        /// The logical shader name.
        name: String,
        /// Why the blob was rejected.
        reason: String,
    },
}

impl fmt::Display for ShaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderError::LoadError { path, source_error } => {
                write!(f, "Failed to load shader blob from '{path}': {source_error}")
            }
            ShaderError::NotFound { name } => {
                write!(f, "No shader blob registered for '{name}'")
            }
            ShaderError::Malformed { name, reason } => {
                write!(f, "Shader blob '{name}' is malformed: {reason}")
            }
        }
    }
}

impl std::error::Error for ShaderError {}

/// An error related to the creation or use of a pipeline state object.
#[derive(Debug)]
pub enum PipelineError {
    /// The backend rejected the pipeline description.
    CreationFailed {
        /// A descriptive label for the pipeline.
        label: String,
        /// Detailed error message from the backend.
        details: String,
    },
    /// The specified pipeline ID is not valid.
    InvalidPipeline {
        /// The ID of the invalid pipeline.
        id: PipelineId,
    },
    /// A raytracing pipeline does not export the requested shader.
    UnknownExport {
        /// The pipeline that was queried.
        id: PipelineId,
        /// The export name that was not found.
        export: String,
    },
    /// A required device feature is not supported.
    FeatureNotSupported(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::CreationFailed { label, details } => {
                write!(f, "Pipeline creation failed for '{label}': {details}")
            }
            PipelineError::InvalidPipeline { id } => {
                write!(f, "Invalid pipeline ID: {id:?}")
            }
            PipelineError::UnknownExport { id, export } => {
                write!(f, "Pipeline {id:?} does not export '{export}'")
            }
            PipelineError::FeatureNotSupported(feature) => {
                write!(f, "Required feature not supported: {feature}")
            }
        }
    }
}

impl std::error::Error for PipelineError {}

/// A general error related to the management of GPU resources.
#[derive(Debug)]
pub enum ResourceError {
    /// An error originating from a shader blob.
    Shader(ShaderError),
    /// An error originating from a pipeline.
    Pipeline(PipelineError),
    /// A generic resource could not be found.
    NotFound,
    /// The handle used to reference a resource is invalid or stale.
    InvalidHandle,
    /// An error specific to the backend implementation.
    BackendError(String),
    /// A byte range falls outside the bounds of a resource.
    OutOfBounds,
    /// A fixed-capacity region has no room for the requested slot.
    CapacityExceeded {
        /// What was being allocated, e.g. `per-object constants`.
        what: &'static str,
        /// The fixed capacity of the region.
        capacity: usize,
        /// The index that was requested.
        requested: usize,
    },
    /// A top-level instance index is not below the structure's instance count.
    InvalidInstance {
        /// The requested instance index.
        instance_id: u32,
        /// The instance count fixed at construction.
        instance_count: u32,
    },
    /// A refit was requested on a structure built without update support.
    UpdateNotAllowed,
    /// A structure was used before its initial build.
    NotBuilt,
    /// A descriptor index is reserved or already allocated.
    ReservedDescriptor(u32),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::Shader(err) => write!(f, "Shader resource error: {err}"),
            ResourceError::Pipeline(err) => write!(f, "Pipeline resource error: {err}"),
            ResourceError::NotFound => write!(f, "Resource not found."),
            ResourceError::InvalidHandle => write!(f, "Invalid resource handle."),
            ResourceError::BackendError(msg) => write!(f, "Backend-specific resource error: {msg}"),
            ResourceError::OutOfBounds => write!(f, "Resource access out of bounds."),
            ResourceError::CapacityExceeded {
                what,
                capacity,
                requested,
            } => write!(
                f,
                "Capacity exceeded for {what}: index {requested} is not below {capacity}"
            ),
            ResourceError::InvalidInstance {
                instance_id,
                instance_count,
            } => write!(
                f,
                "Invalid instance ID {instance_id}: structure holds {instance_count} instances"
            ),
            ResourceError::UpdateNotAllowed => {
                write!(f, "Refit requested on a structure built without AllowUpdate")
            }
            ResourceError::NotBuilt => write!(f, "Acceleration structure has not been built"),
            ResourceError::ReservedDescriptor(index) => {
                write!(f, "Descriptor index {index} is reserved or already in use")
            }
        }
    }
}

impl std::error::Error for ResourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResourceError::Shader(err) => Some(err),
            ResourceError::Pipeline(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ShaderError> for ResourceError {
    fn from(err: ShaderError) -> Self {
        ResourceError::Shader(err)
    }
}

impl From<PipelineError> for ResourceError {
    fn from(err: PipelineError) -> Self {
        ResourceError::Pipeline(err)
    }
}

/// A high-level error that can occur within the renderer.
#[derive(Debug)]
pub enum RenderError {
    /// The device failed to initialize one of its fatal prerequisites.
    InitializationFailed(String),
    /// A fence wait did not complete within the allowed timeout.
    FenceTimeout {
        /// The value the CPU was waiting for.
        value: u64,
        /// The value the GPU had reached when the wait gave up.
        completed: u64,
    },
    /// A command list was used in the wrong lifecycle state.
    InvalidCommandList(String),
    /// Submission of recorded work failed.
    SubmissionFailed(String),
    /// Presenting the back buffer failed.
    PresentFailed(String),
    /// An operation required the GPU to be idle but work was still in flight.
    ResourcesInFlight(String),
    /// An error occurred while managing a resource.
    ResourceError(ResourceError),
    /// The GPU device was lost (e.g., driver crash, validation failure).
    DeviceLost(String),
    /// An unexpected internal error.
    Internal(String),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::InitializationFailed(msg) => {
                write!(f, "Renderer initialization failed: {msg}")
            }
            RenderError::FenceTimeout { value, completed } => write!(
                f,
                "Timed out waiting for fence value {value} (completed: {completed})"
            ),
            RenderError::InvalidCommandList(msg) => write!(f, "Invalid command list use: {msg}"),
            RenderError::SubmissionFailed(msg) => write!(f, "Command submission failed: {msg}"),
            RenderError::PresentFailed(msg) => write!(f, "Present failed: {msg}"),
            RenderError::ResourcesInFlight(msg) => {
                write!(f, "GPU work still in flight: {msg}")
            }
            RenderError::ResourceError(err) => write!(f, "Resource error: {err}"),
            RenderError::DeviceLost(msg) => write!(f, "The rendering device was lost: {msg}"),
            RenderError::Internal(msg) => write!(f, "Internal renderer error: {msg}"),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::ResourceError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ResourceError> for RenderError {
    fn from(err: ResourceError) -> Self {
        RenderError::ResourceError(err)
    }
}

impl From<ShaderError> for RenderError {
    fn from(err: ShaderError) -> Self {
        RenderError::ResourceError(ResourceError::Shader(err))
    }
}

impl From<PipelineError> for RenderError {
    fn from(err: PipelineError) -> Self {
        RenderError::ResourceError(ResourceError::Pipeline(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_exceeded_display() {
        let err = ResourceError::CapacityExceeded {
            what: "per-object constants",
            capacity: 256,
            requested: 256,
        };
        assert_eq!(
            err.to_string(),
            "Capacity exceeded for per-object constants: index 256 is not below 256"
        );
    }

    #[test]
    fn test_invalid_instance_display() {
        let err = ResourceError::InvalidInstance {
            instance_id: 9,
            instance_count: 8,
        };
        assert!(err.to_string().contains("Invalid instance ID 9"));
    }

    #[test]
    fn test_render_error_wraps_resource_error() {
        let err: RenderError = ResourceError::UpdateNotAllowed.into();
        assert!(matches!(
            err,
            RenderError::ResourceError(ResourceError::UpdateNotAllowed)
        ));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_shader_error_converts_through_resource_error() {
        let err: RenderError = ShaderError::NotFound {
            name: "RayGen".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Resource error: Shader resource error: No shader blob registered for 'RayGen'"
        );
    }

    #[test]
    fn test_fence_timeout_display() {
        let err = RenderError::FenceTimeout {
            value: 4,
            completed: 2,
        };
        assert_eq!(
            err.to_string(),
            "Timed out waiting for fence value 4 (completed: 2)"
        );
    }
}
