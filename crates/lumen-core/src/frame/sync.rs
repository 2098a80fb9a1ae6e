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

//! Fence-based CPU/GPU synchronization for frame slots.

use crate::renderer::{FenceId, GpuDevice, QueueKind, RenderError};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct FrameSlot {
    fence: FenceId,
    /// The value the slot's current or latest frame signals on completion.
    target: u64,
    /// The latest value actually enqueued for signalling.
    signalled: u64,
}

/// Bounds how far the CPU runs ahead of the GPU.
///
/// Each frame slot owns a fence. [`begin_frame`](Self::begin_frame) blocks until the
/// slot's previous frame has completed on the GPU, so the slot's command allocator and
/// constant regions can be reused. [`end_frame`](Self::end_frame) enqueues the signal
/// that marks the frame complete.
#[derive(Debug)]
pub struct FrameSynchronizer {
    device: Arc<dyn GpuDevice>,
    queue: QueueKind,
    slots: Vec<FrameSlot>,
    timeout: Duration,
}

impl FrameSynchronizer {
    /// Creates one fence per frame slot.
    ///
    /// # Errors
    /// Fence creation failure is fatal and returned as
    /// [`RenderError::InitializationFailed`].
    pub fn new(
        device: Arc<dyn GpuDevice>,
        queue: QueueKind,
        slot_count: usize,
        timeout: Duration,
    ) -> Result<Self, RenderError> {
        if slot_count == 0 {
            return Err(RenderError::InitializationFailed(
                "a frame synchronizer needs at least one slot".to_string(),
            ));
        }

        let mut slots = Vec::with_capacity(slot_count);
        for index in 0..slot_count {
            let fence = device.create_fence(0).map_err(|e| {
                RenderError::InitializationFailed(format!(
                    "failed to create fence for frame slot {index}: {e}"
                ))
            })?;
            slots.push(FrameSlot {
                fence,
                target: 0,
                signalled: 0,
            });
        }
        log::info!("FrameSynchronizer created with {slot_count} frame slots on {queue:?} queue");

        Ok(Self {
            device,
            queue,
            slots,
            timeout,
        })
    }

    /// The number of frame slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// The fence target value currently associated with `slot`.
    pub fn fence_value(&self, slot: usize) -> u64 {
        self.slots[slot].target
    }

    /// The value the GPU has reached on the fence of `slot`.
    pub fn completed_value(&self, slot: usize) -> Result<u64, RenderError> {
        Ok(self.device.completed_fence_value(self.slots[slot].fence)?)
    }

    /// The fence of `slot`.
    pub fn fence(&self, slot: usize) -> FenceId {
        self.slots[slot].fence
    }

    /// Waits until `slot` is free for reuse, then raises its target for the new frame.
    ///
    /// Returns the value [`end_frame`](Self::end_frame) will signal.
    pub fn begin_frame(&mut self, slot: usize) -> Result<u64, RenderError> {
        let required = self.slots[slot].target;
        self.wait(slot, required)?;

        let entry = &mut self.slots[slot];
        entry.target += 1;
        log::trace!("Frame slot {slot} acquired (fence target {})", entry.target);
        Ok(entry.target)
    }

    /// Enqueues the signal marking the current frame of `slot` as complete.
    ///
    /// Must follow the submission of that frame's command list.
    pub fn end_frame(&mut self, slot: usize) -> Result<(), RenderError> {
        let entry = self.slots[slot];
        self.device.signal(self.queue, entry.fence, entry.target)?;
        self.slots[slot].signalled = entry.target;
        Ok(())
    }

    /// Waits for every slot to drain.
    ///
    /// A slot whose frame was begun but never ended gets its pending signal enqueued
    /// first. Slots with nothing outstanding are only waited on, so consecutive flushes
    /// with no work in between leave every fence value unchanged.
    pub fn flush(&mut self) -> Result<(), RenderError> {
        for slot in 0..self.slots.len() {
            if self.slots[slot].signalled < self.slots[slot].target {
                self.end_frame(slot)?;
            }
            let target = self.slots[slot].target;
            self.wait(slot, target)?;
        }
        log::debug!("FrameSynchronizer flushed {} slots", self.slots.len());
        Ok(())
    }

    /// Number of slots whose latest frame the GPU has not finished yet.
    pub fn frames_in_flight(&self) -> Result<usize, RenderError> {
        let mut count = 0;
        for slot in &self.slots {
            if self.device.completed_fence_value(slot.fence)? < slot.signalled {
                count += 1;
            }
        }
        Ok(count)
    }

    fn wait(&self, slot: usize, value: u64) -> Result<(), RenderError> {
        let fence = self.slots[slot].fence;
        if self.device.completed_fence_value(fence)? >= value {
            return Ok(());
        }
        log::trace!("Waiting on frame slot {slot} for fence value {value}");
        self.device.wait_for_fence(fence, value, self.timeout)
    }

    /// Drains the GPU and releases the fences.
    pub fn destroy(mut self) -> Result<(), RenderError> {
        self.flush()?;
        for slot in &self.slots {
            self.device.destroy_fence(slot.fence)?;
        }
        Ok(())
    }
}
