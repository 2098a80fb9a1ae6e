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

//! Resource lifecycles and GPU-side validation on the software device.

use approx::assert_relative_eq;
use glam::{Mat4, Quat, Vec3, Vec4};
use lumen_core::renderer::{
    BufferDescriptor, BufferId, CommandList, GpuDevice, PerObjectConstants, QueueKind, RenderError,
    ResourceError, ResourceState, ResourceView, TextureDescriptor, TextureFormat, Vertex,
    MAX_DRAWS_PER_FRAME,
};
use lumen_core::staging::ImmediateSubmitter;
use lumen_core::{
    AccelerationStructureManager, ConstantCategory, DescriptorAllocator, DescriptorIndex,
    MeshData, StagingTransfer, UploadRing,
};
use lumen_infra::{SoftwareDevice, SoftwareDeviceDescriptor};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn software_device() -> (Arc<SoftwareDevice>, Arc<dyn GpuDevice>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let software = Arc::new(SoftwareDevice::new(SoftwareDeviceDescriptor::default()).unwrap());
    let device: Arc<dyn GpuDevice> = software.clone();
    (software, device)
}

fn unit_cube() -> MeshData {
    let corners = [
        [-0.5, -0.5, -0.5],
        [0.5, -0.5, -0.5],
        [0.5, 0.5, -0.5],
        [-0.5, 0.5, -0.5],
        [-0.5, -0.5, 0.5],
        [0.5, -0.5, 0.5],
        [0.5, 0.5, 0.5],
        [-0.5, 0.5, 0.5],
    ];
    let vertices = corners
        .iter()
        .map(|&p| Vertex::new(p, [0.0, 0.0], Vec3::from(p).normalize().to_array()))
        .collect();
    let indices = vec![
        0, 2, 1, 0, 3, 2, // back
        4, 5, 6, 4, 6, 7, // front
        0, 1, 5, 0, 5, 4, // bottom
        3, 7, 6, 3, 6, 2, // top
        0, 4, 7, 0, 7, 3, // left
        1, 2, 6, 1, 6, 5, // right
    ];
    MeshData::new("cube", vertices, indices)
}

fn wait_idle(device: &dyn GpuDevice, queue: QueueKind) {
    let fence = device.create_fence(0).unwrap();
    device.signal(queue, fence, 1).unwrap();
    device.wait_for_fence(fence, 1, TIMEOUT).unwrap();
    device.destroy_fence(fence).unwrap();
}

#[test]
fn test_mismatched_barrier_loses_the_device() {
    let (software, device) = software_device();
    let texture = device
        .create_texture(&TextureDescriptor::sampled(
            "probe texture",
            4,
            4,
            TextureFormat::Rgba16Float,
        ))
        .unwrap();

    let allocator = device.create_command_allocator(QueueKind::Direct).unwrap();
    let mut list = CommandList::new(QueueKind::Direct, allocator);
    // Declared before-state does not match the actual PixelShaderResource state.
    list.transition(
        texture,
        ResourceState::RenderTarget,
        ResourceState::CopySource,
    );
    list.close().unwrap();
    device
        .execute_command_list(QueueKind::Direct, &list)
        .unwrap();
    wait_idle(&*device, QueueKind::Direct);

    assert!(software.is_device_lost());
    let errors = software.validation_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("probe texture"));
    assert_eq!(
        software.resource_state(texture).unwrap(),
        ResourceState::PixelShaderResource
    );

    // Further submissions are refused.
    device.reset_command_allocator(allocator).unwrap();
    list.reset(allocator);
    list.close().unwrap();
    assert!(matches!(
        device.execute_command_list(QueueKind::Direct, &list),
        Err(RenderError::DeviceLost(_))
    ));
}

#[test]
fn test_upload_ring_slots_are_constant_buffer_aligned() {
    let (_software, device) = software_device();
    let mut ring = UploadRing::new(device, 3).unwrap();
    ring.begin_frame(1);

    for index in 0..4 {
        let constants = PerObjectConstants::new(
            Mat4::from_translation(Vec3::splat(index as f32)),
            Vec4::ONE,
            true,
        );
        let address = ring.push_object(&constants).unwrap();
        assert_eq!(ring.offset(ConstantCategory::PerObject, index).unwrap(), index as u64 * 256);
        assert_eq!(
            address,
            ring.address(ConstantCategory::PerObject, index).unwrap()
        );
        assert_eq!(ring.read_object(index).unwrap(), constants);
    }
    assert_eq!(ring.draw_count(), 4);
    assert_eq!(ring.capacity(ConstantCategory::PerObject), MAX_DRAWS_PER_FRAME);
}

#[test]
fn test_upload_ring_rejects_the_257th_object() {
    let (_software, device) = software_device();
    let mut ring = UploadRing::new(device, 3).unwrap();
    ring.begin_frame(0);

    let constants = PerObjectConstants::default();
    for _ in 0..MAX_DRAWS_PER_FRAME {
        ring.push_object(&constants).unwrap();
    }
    let err = ring.push_object(&constants).unwrap_err();
    assert!(matches!(
        err,
        ResourceError::CapacityExceeded {
            capacity: 256,
            requested: 256,
            ..
        }
    ));

    // A new frame starts counting from zero again.
    ring.begin_frame(1);
    assert_eq!(ring.draw_count(), 0);
    assert!(ring.push_object(&constants).is_ok());
}

#[test]
fn test_frame_slots_do_not_share_constant_memory() {
    let (_software, device) = software_device();
    let mut ring = UploadRing::new(device, 3).unwrap();

    let mut addresses = Vec::new();
    for slot in 0..3 {
        ring.begin_frame(slot);
        addresses.push(ring.address(ConstantCategory::PerFrame, 0).unwrap());
    }
    addresses.sort_by_key(|a| a.0);
    addresses.dedup();
    assert_eq!(addresses.len(), 3);
}

#[test]
fn test_descriptor_slot_zero_is_reserved_for_the_overlay() {
    let (_software, device) = software_device();
    let texture = device
        .create_texture(&TextureDescriptor::sampled(
            "scene color",
            8,
            8,
            TextureFormat::Rgba8Unorm,
        ))
        .unwrap();
    let mut descriptors = DescriptorAllocator::new(device, DescriptorIndex::COUNT).unwrap();

    assert!(matches!(
        descriptors.allocate(DescriptorIndex::Overlay, ResourceView::TextureSrv(texture)),
        Err(ResourceError::ReservedDescriptor(0))
    ));
    assert_eq!(descriptors.allocate_overlay().unwrap(), 0);

    assert_eq!(
        descriptors
            .allocate(
                DescriptorIndex::SceneColorSrv,
                ResourceView::TextureSrv(texture)
            )
            .unwrap(),
        4
    );
    assert!(matches!(
        descriptors.allocate(
            DescriptorIndex::SceneColorSrv,
            ResourceView::TextureSrv(texture)
        ),
        Err(ResourceError::ReservedDescriptor(4))
    ));
    assert!(descriptors.is_allocated(DescriptorIndex::SceneColorSrv));
    assert!(!descriptors.is_allocated(DescriptorIndex::ShadowMapSrv));
}

#[test]
fn test_staged_meshes_end_in_vertex_and_index_states() {
    let (software, device) = software_device();
    let mut staging = StagingTransfer::new(device.clone(), TIMEOUT).unwrap();
    let meshes = staging.upload_meshes(&[unit_cube()]).unwrap();
    let cube = &meshes[0];

    assert_eq!(cube.vertex_count(), 8);
    assert_eq!(cube.index_count(), 36);
    assert_eq!(
        software.resource_state(cube.vertex_buffer()).unwrap(),
        ResourceState::VertexAndConstantBuffer
    );
    assert_eq!(
        software.resource_state(cube.index_buffer()).unwrap(),
        ResourceState::IndexBuffer
    );
    assert_eq!(cube.index_buffer_size(), 36 * 4);
    assert_eq!(cube.vertex_buffer_size(), 8 * 32);
    // GPU-local memory is not mappable.
    assert!(matches!(
        device.read_mapped(cube.index_buffer(), 0, 12),
        Err(ResourceError::InvalidHandle)
    ));
    assert!(software.validation_errors().is_empty());
}

#[test]
fn test_empty_mesh_upload_fails_at_initialization() {
    let (_software, device) = software_device();
    let mut staging = StagingTransfer::new(device, TIMEOUT).unwrap();
    let empty = MeshData::new("nothing", Vec::new(), Vec::new());
    assert!(matches!(
        staging.upload_meshes(&[empty]),
        Err(RenderError::InitializationFailed(_))
    ));
}

#[test]
fn test_failed_mesh_upload_releases_every_buffer() {
    let (software, device) = software_device();
    let mut staging = StagingTransfer::new(device.clone(), Duration::from_millis(50)).unwrap();
    let before = device
        .create_buffer(&BufferDescriptor::upload("before", 16))
        .unwrap();

    software.pause_queue(QueueKind::Load);
    assert!(matches!(
        staging.upload_meshes(&[unit_cube(), unit_cube()]),
        Err(RenderError::FenceTimeout { .. })
    ));

    let after = device
        .create_buffer(&BufferDescriptor::upload("after", 16))
        .unwrap();
    assert!(after.0 > before.0 + 1);
    for id in before.0 + 1..after.0 {
        assert!(matches!(
            software.resource_state(BufferId(id)),
            Err(ResourceError::InvalidHandle)
        ));
    }
    assert!(software.resource_state(before).is_ok());
}

#[test]
fn test_tlas_instances_store_transposed_transforms() {
    let (software, device) = software_device();
    let mut staging = StagingTransfer::new(device.clone(), TIMEOUT).unwrap();
    let meshes = staging.upload_meshes(&[unit_cube()]).unwrap();

    let mut accel = AccelerationStructureManager::new(device.clone(), TIMEOUT).unwrap();
    let blas = accel.create_bottom_level(&meshes[0]).unwrap();
    let tlas = accel.create_top_level(true, 2).unwrap();

    let transform = Mat4::from_scale_rotation_translation(
        Vec3::new(1.0, 2.0, 0.5),
        Quat::from_rotation_y(0.7),
        Vec3::new(3.0, -1.0, 4.0),
    );
    accel
        .set_instance_blas_and_transform(tlas, 1, blas, &transform)
        .unwrap();
    accel
        .set_instance_blas_and_transform(tlas, 0, blas, &Mat4::IDENTITY)
        .unwrap();

    let record = accel.top_level(tlas).unwrap().instance(1).unwrap();
    assert_eq!(record.instance_id(), 1);
    assert_eq!(record.mask(), 0xFF);
    // Row 0 of the stored 3x4 matrix is column 0 of the transposed transform.
    let rows = record.transform;
    assert_relative_eq!(rows[0][3], 3.0);
    assert_relative_eq!(rows[1][3], -1.0);
    assert_relative_eq!(rows[2][3], 4.0);
    assert!(record.matrix().abs_diff_eq(transform, 1e-5));

    assert!(matches!(
        accel.set_instance_blas_and_transform(tlas, 2, blas, &transform),
        Err(ResourceError::InvalidInstance {
            instance_id: 2,
            instance_count: 2
        })
    ));

    accel.build_bottom_level(&[blas]).unwrap();
    accel.build_top_level(&[tlas]).unwrap();
    assert_eq!(software.acceleration_structure_builds(), 2);
    assert!(software.validation_errors().is_empty());
}

#[test]
fn test_refit_requires_allow_update() {
    let (software, device) = software_device();
    let mut staging = StagingTransfer::new(device.clone(), TIMEOUT).unwrap();
    let meshes = staging.upload_meshes(&[unit_cube()]).unwrap();

    let mut accel = AccelerationStructureManager::new(device.clone(), TIMEOUT).unwrap();
    let blas = accel.create_bottom_level(&meshes[0]).unwrap();
    let frozen = accel.create_top_level(false, 1).unwrap();
    let dynamic = accel.create_top_level(true, 1).unwrap();
    for tlas in [frozen, dynamic] {
        accel
            .set_instance_blas_and_transform(tlas, 0, blas, &Mat4::IDENTITY)
            .unwrap();
    }

    let allocator = device.create_command_allocator(QueueKind::Direct).unwrap();
    let mut list = CommandList::new(QueueKind::Direct, allocator);
    assert!(matches!(
        accel.rebuild_tlas(dynamic, &mut list),
        Err(ResourceError::NotBuilt)
    ));

    accel.build_bottom_level(&[blas]).unwrap();
    accel.build_top_level(&[frozen, dynamic]).unwrap();

    assert!(matches!(
        accel.rebuild_tlas(frozen, &mut list),
        Err(ResourceError::UpdateNotAllowed)
    ));
    assert!(list.commands().is_empty());

    accel
        .set_instance_blas_and_transform(dynamic, 0, blas, &Mat4::from_translation(Vec3::X))
        .unwrap();
    accel.rebuild_tlas(dynamic, &mut list).unwrap();
    list.close().unwrap();
    device
        .execute_command_list(QueueKind::Direct, &list)
        .unwrap();
    wait_idle(&*device, QueueKind::Direct);

    assert_eq!(software.refit_count(), 1);
    assert!(software.validation_errors().is_empty());
}

#[test]
fn test_copy_queue_only_moves_resources_between_copy_states() {
    let (software, device) = software_device();
    let buffer = device
        .create_buffer(&BufferDescriptor::gpu_local(
            "mesh indices",
            64,
            ResourceState::CopyDest,
        ))
        .unwrap();

    let mut submitter = ImmediateSubmitter::new(device.clone(), QueueKind::Copy, TIMEOUT).unwrap();
    let list = submitter.begin().unwrap();
    list.transition(buffer, ResourceState::CopyDest, ResourceState::IndexBuffer);
    submitter.submit_and_wait().unwrap();

    assert!(software.is_device_lost());
    let errors = software.validation_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("mesh indices"));
    assert!(errors[0].contains("Copy queue"));
    assert_eq!(
        software.resource_state(buffer).unwrap(),
        ResourceState::CopyDest
    );
}

#[test]
fn test_uploads_and_builds_run_on_the_load_queue() {
    let (software, device) = software_device();
    let mut staging = StagingTransfer::new(device.clone(), TIMEOUT).unwrap();
    assert_eq!(staging.queue(), QueueKind::Load);
    let meshes = staging.upload_meshes(&[unit_cube()]).unwrap();

    let mut accel = AccelerationStructureManager::new(device.clone(), TIMEOUT).unwrap();
    let blas = accel.create_bottom_level(&meshes[0]).unwrap();
    let tlas = accel.create_top_level(true, 1).unwrap();
    accel
        .set_instance_blas_and_transform(tlas, 0, blas, &Mat4::IDENTITY)
        .unwrap();
    accel.build_bottom_level(&[blas]).unwrap();
    accel.build_top_level(&[tlas]).unwrap();
    assert_eq!(software.acceleration_structure_builds(), 2);
    assert!(software.validation_errors().is_empty());

    // The same refit recorded for the copy queue is refused there.
    let allocator = device.create_command_allocator(QueueKind::Copy).unwrap();
    let mut list = CommandList::new(QueueKind::Copy, allocator);
    accel.rebuild_tlas(tlas, &mut list).unwrap();
    list.close().unwrap();
    device.execute_command_list(QueueKind::Copy, &list).unwrap();
    wait_idle(&*device, QueueKind::Copy);

    assert!(software.is_device_lost());
    assert_eq!(software.refit_count(), 0);
    assert!(software.validation_errors()[0]
        .contains("BuildAccelerationStructure is not allowed on the copy queue"));
}
