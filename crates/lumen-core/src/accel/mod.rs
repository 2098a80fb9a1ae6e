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

//! Raytracing acceleration structures.
//!
//! One bottom-level structure per static mesh, built once. One top-level structure over
//! a fixed set of instances, built once and refitted in place whenever instance
//! transforms change.

mod blas;
mod manager;
mod tlas;

pub use self::blas::{BlasState, BottomLevelStructure};
pub use self::manager::{AccelerationStructureManager, BlasHandle, TlasHandle};
pub use self::tlas::{TlasState, TopLevelStructure};
