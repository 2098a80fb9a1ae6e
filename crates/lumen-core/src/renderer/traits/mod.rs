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

//! Traits at the seams of the renderer: the device, the shader source and the input source.

mod gpu_device;
mod input;
mod shader_source;

pub use self::gpu_device::GpuDevice;
pub use self::input::{CameraState, InputSource};
pub use self::shader_source::{InMemoryShaderBlobs, ShaderBlobProvider};
