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

//! GPU timelines: one worker thread per queue, fed in submission order.
//!
//! The CPU side never executes work itself. It pushes [`Submission`]s into the queue's
//! channel and learns about their completion through the [`FenceTable`], exactly like
//! it would with a hardware queue.

use super::executor;
use super::store::{lock, DeviceShared};
use lumen_core::renderer::{
    Command, CommandAllocatorId, FenceId, QueueKind, RenderError, ResourceError, SwapChainId,
    TextureId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// A unit of work on a queue timeline.
#[derive(Debug)]
pub(crate) enum Submission {
    /// Runs a recorded command list.
    Execute {
        commands: Vec<Command>,
        allocator: CommandAllocatorId,
    },
    /// Sets a fence once everything before it has executed.
    Signal { fence: FenceId, value: u64 },
    /// Hands a back buffer to the display.
    Present {
        swap_chain: SwapChainId,
        back_buffer: TextureId,
    },
}

/// Fence values, written by the timelines and waited on by the CPU.
#[derive(Debug, Default)]
pub(crate) struct FenceTable {
    values: Mutex<HashMap<FenceId, u64>>,
    reached: Condvar,
}

impl FenceTable {
    pub fn create(&self, fence: FenceId, initial_value: u64) {
        lock(&self.values).insert(fence, initial_value);
    }

    pub fn remove(&self, fence: FenceId) -> Result<(), ResourceError> {
        lock(&self.values)
            .remove(&fence)
            .map(|_| ())
            .ok_or(ResourceError::InvalidHandle)
    }

    pub fn completed(&self, fence: FenceId) -> Result<u64, ResourceError> {
        lock(&self.values)
            .get(&fence)
            .copied()
            .ok_or(ResourceError::InvalidHandle)
    }

    /// Fences only move forward.
    fn signal(&self, fence: FenceId, value: u64) {
        let mut values = lock(&self.values);
        match values.get_mut(&fence) {
            Some(current) => *current = (*current).max(value),
            None => log::warn!("Signal of destroyed fence {fence:?} ignored"),
        }
        drop(values);
        self.reached.notify_all();
    }

    pub fn wait(&self, fence: FenceId, value: u64, timeout: Duration) -> Result<(), RenderError> {
        let deadline = Instant::now() + timeout;
        let mut values = lock(&self.values);
        loop {
            let completed = *values.get(&fence).ok_or(ResourceError::InvalidHandle)?;
            if completed >= value {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RenderError::FenceTimeout { value, completed });
            }
            values = self
                .reached
                .wait_timeout(values, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }
}

/// Holds a timeline back while paused. Used to keep work in flight on purpose.
#[derive(Debug, Default)]
struct Gate {
    paused: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    fn set_paused(&self, paused: bool) {
        *lock(&self.paused) = paused;
        self.changed.notify_all();
    }

    fn wait_open(&self) {
        let mut paused = lock(&self.paused);
        while *paused {
            paused = self
                .changed
                .wait(paused)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

/// One queue: a channel into a worker thread that executes submissions in order.
#[derive(Debug)]
pub(crate) struct QueueTimeline {
    kind: QueueKind,
    sender: Option<flume::Sender<Submission>>,
    worker: Option<JoinHandle<()>>,
    pending: Arc<AtomicUsize>,
    gate: Arc<Gate>,
}

impl QueueTimeline {
    pub fn spawn(
        kind: QueueKind,
        shared: Arc<DeviceShared>,
        fences: Arc<FenceTable>,
    ) -> Result<Self, RenderError> {
        let (sender, receiver) = flume::unbounded::<Submission>();
        let pending = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Gate::default());

        let worker_pending = pending.clone();
        let worker_gate = gate.clone();
        let worker = std::thread::Builder::new()
            .name(format!("lumen-{kind:?}-queue").to_lowercase())
            .spawn(move || {
                while let Ok(submission) = receiver.recv() {
                    worker_gate.wait_open();
                    run(kind, &shared, &fences, &worker_pending, submission);
                }
                log::debug!("{kind:?} queue timeline stopped");
            })
            .map_err(|e| RenderError::InitializationFailed(format!("{kind:?} queue: {e}")))?;

        Ok(Self {
            kind,
            sender: Some(sender),
            worker: Some(worker),
            pending,
            gate,
        })
    }

    pub fn submit(&self, submission: Submission) -> Result<(), RenderError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| RenderError::SubmissionFailed(format!("{:?} queue closed", self.kind)))?;
        self.pending.fetch_add(1, Ordering::AcqRel);
        sender.send(submission).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            RenderError::SubmissionFailed(format!("{:?} queue worker is gone", self.kind))
        })
    }

    /// Submissions not yet retired by the worker.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn pause(&self) {
        log::debug!("{:?} queue paused", self.kind);
        self.gate.set_paused(true);
    }

    pub fn resume(&self) {
        log::debug!("{:?} queue resumed", self.kind);
        self.gate.set_paused(false);
    }
}

impl Drop for QueueTimeline {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.sender.take();
        self.gate.set_paused(false);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("{:?} queue worker panicked", self.kind);
            }
        }
    }
}

fn run(
    kind: QueueKind,
    shared: &DeviceShared,
    fences: &FenceTable,
    pending: &AtomicUsize,
    submission: Submission,
) {
    match submission {
        Submission::Execute {
            commands,
            allocator,
        } => {
            executor::execute(shared, kind, &commands);
            if let Some(entry) = lock(&shared.store).allocators.get_mut(&allocator) {
                entry.pending = entry.pending.saturating_sub(1);
            }
            pending.fetch_sub(1, Ordering::AcqRel);
        }
        Submission::Present {
            swap_chain,
            back_buffer,
        } => {
            executor::present(shared, swap_chain, back_buffer);
            pending.fetch_sub(1, Ordering::AcqRel);
        }
        Submission::Signal { fence, value } => {
            // Retired before the fence moves, so a CPU woken by it sees an idle queue.
            pending.fetch_sub(1, Ordering::AcqRel);
            fences.signal(fence, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_wait_times_out_with_completed_value() {
        let fences = FenceTable::default();
        fences.create(FenceId(0), 2);
        let err = fences
            .wait(FenceId(0), 3, Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(
            err,
            RenderError::FenceTimeout {
                value: 3,
                completed: 2
            }
        ));
        assert!(fences.wait(FenceId(0), 2, Duration::ZERO).is_ok());
    }

    #[test]
    fn test_fences_never_move_backwards() {
        let fences = FenceTable::default();
        fences.create(FenceId(1), 0);
        fences.signal(FenceId(1), 5);
        fences.signal(FenceId(1), 3);
        assert_eq!(fences.completed(FenceId(1)).unwrap(), 5);
    }

    #[test]
    fn test_paused_timeline_holds_signals() {
        let shared = Arc::new(DeviceShared::default());
        let fences = Arc::new(FenceTable::default());
        fences.create(FenceId(0), 0);
        let timeline = QueueTimeline::spawn(QueueKind::Direct, shared, fences.clone()).unwrap();

        timeline.pause();
        timeline
            .submit(Submission::Signal {
                fence: FenceId(0),
                value: 1,
            })
            .unwrap();
        assert!(fences
            .wait(FenceId(0), 1, Duration::from_millis(20))
            .is_err());
        assert_eq!(timeline.pending(), 1);

        timeline.resume();
        fences.wait(FenceId(0), 1, Duration::from_secs(5)).unwrap();
        assert_eq!(timeline.pending(), 0);
    }
}
