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

use super::blas::BottomLevelStructure;
use super::tlas::TopLevelStructure;
use crate::renderer::{CommandList, GpuDevice, QueueKind, RenderError, ResourceError};
use crate::staging::{GpuMesh, ImmediateSubmitter};
use glam::Mat4;
use std::sync::Arc;
use std::time::Duration;

/// Handle to a bottom-level structure owned by an [`AccelerationStructureManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlasHandle(pub usize);

/// Handle to a top-level structure owned by an [`AccelerationStructureManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TlasHandle(pub usize);

/// Owns every acceleration structure of the scene.
///
/// Initial builds go through a private submitter and block until complete. Refits are
/// recorded into the caller's frame command list instead, so they execute in order
/// with the passes that read the structure.
#[derive(Debug)]
pub struct AccelerationStructureManager {
    submitter: ImmediateSubmitter,
    bottom: Vec<BottomLevelStructure>,
    top: Vec<TopLevelStructure>,
}

impl AccelerationStructureManager {
    /// Creates a manager with its own load-queue allocator and fence.
    pub fn new(device: Arc<dyn GpuDevice>, timeout: Duration) -> Result<Self, RenderError> {
        Ok(Self {
            submitter: ImmediateSubmitter::new(device, QueueKind::Load, timeout)?,
            bottom: Vec::new(),
            top: Vec::new(),
        })
    }

    fn device(&self) -> Arc<dyn GpuDevice> {
        self.submitter.device().clone()
    }

    /// Allocates a bottom-level structure for `mesh`. Nothing is built yet.
    pub fn create_bottom_level(&mut self, mesh: &GpuMesh) -> Result<BlasHandle, ResourceError> {
        let blas = BottomLevelStructure::new(&*self.device(), mesh)?;
        self.bottom.push(blas);
        Ok(BlasHandle(self.bottom.len() - 1))
    }

    /// Allocates a top-level structure with a fixed number of instances.
    pub fn create_top_level(
        &mut self,
        allow_update: bool,
        instance_count: u32,
    ) -> Result<TlasHandle, ResourceError> {
        let tlas = TopLevelStructure::new(self.device(), allow_update, instance_count)?;
        self.top.push(tlas);
        Ok(TlasHandle(self.top.len() - 1))
    }

    /// Builds the given bottom-level structures in one blocking submission.
    ///
    /// Structures that are already built are skipped: a bottom-level build is one-way.
    pub fn build_bottom_level(&mut self, handles: &[BlasHandle]) -> Result<(), RenderError> {
        for handle in handles {
            self.bottom_level(*handle)?;
        }
        let pending: Vec<usize> = handles
            .iter()
            .map(|h| h.0)
            .filter(|&i| {
                let built = self.bottom[i].is_built();
                if built {
                    log::warn!("BLAS '{}' is already built; skipping", self.bottom[i].label());
                }
                !built
            })
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let list = self.submitter.begin()?;
        for &i in &pending {
            self.bottom[i].record_build(list);
        }
        self.submitter.submit_and_wait()?;

        for &i in &pending {
            self.bottom[i].mark_built();
        }
        log::info!("Built {} bottom-level structures", pending.len());
        Ok(())
    }

    /// Fully builds the given top-level structures in one blocking submission.
    ///
    /// Instance records must have been written with
    /// [`set_instance_blas_and_transform`](Self::set_instance_blas_and_transform) first.
    pub fn build_top_level(&mut self, handles: &[TlasHandle]) -> Result<(), RenderError> {
        for handle in handles {
            self.top_level(*handle)?;
        }
        if handles.is_empty() {
            return Ok(());
        }

        let list = self.submitter.begin()?;
        for handle in handles {
            self.top[handle.0].record_build(list);
        }
        self.submitter.submit_and_wait()?;

        for handle in handles {
            self.top[handle.0].mark_built();
        }
        log::info!("Built {} top-level structures", handles.len());
        Ok(())
    }

    /// Points instance `instance_id` of `tlas` at `blas`, placed by `transform`.
    ///
    /// # Errors
    /// [`ResourceError::InvalidInstance`] if the instance is out of range, or
    /// [`ResourceError::InvalidHandle`] for an unknown handle.
    pub fn set_instance_blas_and_transform(
        &self,
        tlas: TlasHandle,
        instance_id: u32,
        blas: BlasHandle,
        transform: &Mat4,
    ) -> Result<(), ResourceError> {
        let blas = self.bottom_level(blas)?;
        self.top_level(tlas)?
            .set_instance_blas_and_transform(instance_id, blas, transform)
    }

    /// Records an in-place refit of `tlas` into the frame command list.
    ///
    /// # Errors
    /// * [`ResourceError::UpdateNotAllowed`] if `tlas` was created without `allow_update`.
    /// * [`ResourceError::NotBuilt`] before the first full build.
    pub fn rebuild_tlas(
        &mut self,
        tlas: TlasHandle,
        list: &mut CommandList,
    ) -> Result<(), ResourceError> {
        self.top
            .get_mut(tlas.0)
            .ok_or(ResourceError::InvalidHandle)?
            .record_refit(list)
    }

    /// Looks up a bottom-level structure.
    pub fn bottom_level(&self, handle: BlasHandle) -> Result<&BottomLevelStructure, ResourceError> {
        self.bottom.get(handle.0).ok_or(ResourceError::InvalidHandle)
    }

    /// Looks up a top-level structure.
    pub fn top_level(&self, handle: TlasHandle) -> Result<&TopLevelStructure, ResourceError> {
        self.top.get(handle.0).ok_or(ResourceError::InvalidHandle)
    }

    /// Releases every structure and the submitter's fence.
    ///
    /// The caller must have flushed every queue that could still reference them.
    pub fn destroy(self) -> Result<(), ResourceError> {
        let device = self.device();
        for tlas in self.top {
            tlas.destroy(&*device)?;
        }
        for blas in &self.bottom {
            blas.destroy(&*device)?;
        }
        self.submitter.destroy()
    }
}
