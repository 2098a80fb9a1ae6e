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

//! # Lumen Core
//!
//! Foundational crate containing the GPU device contract, the resource and command
//! descriptors that travel across it, and the components that own the GPU resource
//! lifecycle of a frame: fence synchronization, constant upload, descriptor allocation,
//! staging transfers, acceleration structures and the swap chain.
//!
//! Nothing in this crate knows about a concrete backend. Every component is driven
//! through a [`renderer::GpuDevice`] trait object.

#![warn(missing_docs)]

pub mod accel;
pub mod descriptors;
pub mod frame;
pub mod memory;
pub mod renderer;
pub mod staging;
pub mod swapchain;

pub use accel::{
    AccelerationStructureManager, BlasHandle, BottomLevelStructure, TlasHandle, TopLevelStructure,
};
pub use descriptors::{DescriptorAllocator, DescriptorIndex};
pub use frame::{FrameSynchronizer, MAX_FRAMES_IN_FLIGHT};
pub use memory::{ConstantCategory, MappedArena, UploadRing};
pub use staging::{GpuMesh, MeshData, StagingTransfer};
pub use swapchain::SwapChainManager;
