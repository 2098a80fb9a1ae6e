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

//! Frame pacing against the software device's queue timelines.

use lumen_core::renderer::{
    CommandList, GpuDevice, QueueKind, RenderError, ResourceError, ResourceState,
};
use lumen_core::{FrameSynchronizer, SwapChainManager};
use lumen_infra::{SoftwareDevice, SoftwareDeviceDescriptor};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn software_device() -> (Arc<SoftwareDevice>, Arc<dyn GpuDevice>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let software = Arc::new(SoftwareDevice::new(SoftwareDeviceDescriptor::default()).unwrap());
    let device: Arc<dyn GpuDevice> = software.clone();
    (software, device)
}

#[test]
fn test_begin_frame_times_out_while_slot_is_in_flight() {
    let (software, device) = software_device();
    let mut sync =
        FrameSynchronizer::new(device, QueueKind::Direct, 2, Duration::from_millis(50)).unwrap();

    software.pause_queue(QueueKind::Direct);
    assert_eq!(sync.begin_frame(0).unwrap(), 1);
    sync.end_frame(0).unwrap();
    assert_eq!(sync.begin_frame(1).unwrap(), 1);
    sync.end_frame(1).unwrap();
    assert_eq!(sync.frames_in_flight().unwrap(), 2);

    // Slot 0 comes around again while its first frame is still queued.
    let err = sync.begin_frame(0).unwrap_err();
    assert!(matches!(
        err,
        RenderError::FenceTimeout {
            value: 1,
            completed: 0
        }
    ));

    software.resume_queue(QueueKind::Direct);
    assert_eq!(sync.begin_frame(0).unwrap(), 2);
    sync.end_frame(0).unwrap();
    sync.flush().unwrap();
    assert_eq!(sync.frames_in_flight().unwrap(), 0);
}

#[test]
fn test_begin_frame_blocks_until_the_gpu_catches_up() {
    let (software, device) = software_device();
    let mut sync =
        FrameSynchronizer::new(device, QueueKind::Direct, 1, Duration::from_secs(10)).unwrap();

    software.pause_queue(QueueKind::Direct);
    sync.begin_frame(0).unwrap();
    sync.end_frame(0).unwrap();

    let resumer = {
        let software = software.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(60));
            software.resume_queue(QueueKind::Direct);
        })
    };

    let started = Instant::now();
    assert_eq!(sync.begin_frame(0).unwrap(), 2);
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert_eq!(sync.completed_value(0).unwrap(), 1);
    resumer.join().unwrap();
}

#[test]
fn test_flush_twice_keeps_fence_values() {
    let (_software, device) = software_device();
    let mut sync =
        FrameSynchronizer::new(device, QueueKind::Direct, 3, Duration::from_secs(5)).unwrap();

    for slot in 0..3 {
        sync.begin_frame(slot).unwrap();
        sync.end_frame(slot).unwrap();
    }
    sync.flush().unwrap();
    let values: Vec<u64> = (0..3).map(|slot| sync.fence_value(slot)).collect();
    let completed: Vec<u64> = (0..3).map(|slot| sync.completed_value(slot).unwrap()).collect();

    sync.flush().unwrap();
    assert_eq!(values, (0..3).map(|s| sync.fence_value(s)).collect::<Vec<_>>());
    assert_eq!(
        completed,
        (0..3)
            .map(|s| sync.completed_value(s).unwrap())
            .collect::<Vec<_>>()
    );
    assert_eq!(values, vec![1, 1, 1]);
}

#[test]
fn test_flush_signals_a_frame_that_was_never_ended() {
    let (_software, device) = software_device();
    let mut sync =
        FrameSynchronizer::new(device, QueueKind::Direct, 2, Duration::from_secs(5)).unwrap();

    sync.begin_frame(0).unwrap();
    sync.flush().unwrap();
    assert_eq!(sync.completed_value(0).unwrap(), 1);
}

#[test]
fn test_allocator_reset_is_rejected_while_its_list_executes() {
    let (software, device) = software_device();
    let allocator = device.create_command_allocator(QueueKind::Direct).unwrap();
    let mut list = CommandList::new(QueueKind::Direct, allocator);
    list.begin_event("Work");
    list.end_event();
    list.close().unwrap();

    software.pause_queue(QueueKind::Direct);
    device
        .execute_command_list(QueueKind::Direct, &list)
        .unwrap();
    assert!(matches!(
        device.reset_command_allocator(allocator),
        Err(RenderError::ResourcesInFlight(_))
    ));

    let fence = device.create_fence(0).unwrap();
    device.signal(QueueKind::Direct, fence, 1).unwrap();
    software.resume_queue(QueueKind::Direct);
    device
        .wait_for_fence(fence, 1, Duration::from_secs(5))
        .unwrap();
    device.reset_command_allocator(allocator).unwrap();
    assert_eq!(software.executed_events(), vec!["Work".to_string()]);
}

#[test]
fn test_submitting_an_open_list_fails() {
    let (_software, device) = software_device();
    let allocator = device.create_command_allocator(QueueKind::Direct).unwrap();
    let list = CommandList::new(QueueKind::Direct, allocator);
    assert!(matches!(
        device.execute_command_list(QueueKind::Direct, &list),
        Err(RenderError::InvalidCommandList(_))
    ));
}

#[test]
fn test_raw_resize_with_work_in_flight_is_rejected() {
    let (software, device) = software_device();
    let mut sync =
        FrameSynchronizer::new(device.clone(), QueueKind::Direct, 2, Duration::from_secs(5))
            .unwrap();
    let mut swap_chain = SwapChainManager::new(device.clone(), 64, 32, 2).unwrap();

    software.pause_queue(QueueKind::Direct);
    let fence = device.create_fence(0).unwrap();
    device.signal(QueueKind::Direct, fence, 1).unwrap();
    let raw = swap_chain.id();
    assert!(matches!(
        device.resize_swap_chain(raw, 128, 64),
        Err(RenderError::ResourcesInFlight(_))
    ));
    software.resume_queue(QueueKind::Direct);
    device
        .wait_for_fence(fence, 1, Duration::from_secs(5))
        .unwrap();

    // The manager flushes first, so the same resize goes through.
    assert!(swap_chain.resize(&mut sync, 128, 64).unwrap());
    assert_eq!(swap_chain.size(), (128, 64));
    assert_eq!(software.swap_chain_size(raw).unwrap(), (128, 64));
    assert_eq!(swap_chain.current_index().unwrap(), 0);
    assert_eq!(
        software.resource_state(swap_chain.depth_target()).unwrap(),
        ResourceState::DepthWrite
    );

    // Zero and same-size requests are no-ops.
    assert!(!swap_chain.resize(&mut sync, 0, 64).unwrap());
    assert!(!swap_chain.resize(&mut sync, 128, 64).unwrap());
}

#[test]
fn test_present_rotates_back_buffers() {
    let (software, device) = software_device();
    let swap_chain = SwapChainManager::new(device.clone(), 16, 16, 3).unwrap();
    let buffers = swap_chain.back_buffers().to_vec();

    for expected in [0, 1, 2, 0] {
        assert_eq!(swap_chain.current_index().unwrap(), expected);
        assert_eq!(swap_chain.current_back_buffer().unwrap(), buffers[expected]);
        let mode = swap_chain.present(true).unwrap();
        assert_eq!(mode.sync_interval, 1);
        assert!(!mode.allow_tearing);
    }

    let fence = device.create_fence(0).unwrap();
    device.signal(QueueKind::Direct, fence, 1).unwrap();
    device
        .wait_for_fence(fence, 1, Duration::from_secs(5))
        .unwrap();
    let raw = swap_chain.id();
    assert_eq!(software.present_count(raw).unwrap(), 4);
    assert!(software.validation_errors().is_empty());
}

#[test]
fn test_unknown_fence_is_an_invalid_handle() {
    let (_software, device) = software_device();
    let fence = device.create_fence(3).unwrap();
    device.destroy_fence(fence).unwrap();
    assert!(matches!(
        device.completed_fence_value(fence),
        Err(ResourceError::InvalidHandle)
    ));
}
