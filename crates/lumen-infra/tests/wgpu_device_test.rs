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


//! The wgpu device against a real adapter. Every test passes vacuously on machines
//! without one.

#![cfg(feature = "wgpu")]

use approx::assert_relative_eq;
use lumen_core::renderer::{
    BufferDescriptor, Command, CommandList, DescriptorRange, DescriptorRangeKind, DeviceFeature,
    GpuDevice, GraphicsPipelineDescriptor, PipelineError, PresentMode, QueueKind, RenderError,
    ResourceError, ResourceState, RootLayout, RootParameter, SamplerAddressMode, SamplerFilter,
    ShaderBlob, ShaderBlobProvider, ShaderVisibility, StaticSampler, SwapChainDescriptor,
    TextureDescriptor, TextureFormat, VertexAttribute,
};
use lumen_infra::{wgsl_shader_blobs, WgpuDevice, WgpuDeviceDescriptor};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn wgpu_device() -> Option<WgpuDevice> {
    let _ = env_logger::builder().is_test(true).try_init();
    match WgpuDevice::new(WgpuDeviceDescriptor::default()) {
        Ok(device) => Some(device),
        Err(e) => {
            log::warn!("Skipping: {e}");
            None
        }
    }
}

fn wait_idle(device: &dyn GpuDevice, queue: QueueKind) {
    let fence = device.create_fence(0).unwrap();
    device.signal(queue, fence, 1).unwrap();
    device.wait_for_fence(fence, 1, TIMEOUT).unwrap();
    device.destroy_fence(fence).unwrap();
}

fn screen_pipeline(vertex: ShaderBlob, pixel: ShaderBlob) -> GraphicsPipelineDescriptor<'static> {
    GraphicsPipelineDescriptor {
        label: Some("screen test pipeline".into()),
        root_layout: RootLayout {
            parameters: vec![RootParameter::DescriptorTable {
                ranges: vec![DescriptorRange {
                    kind: DescriptorRangeKind::Srv,
                    base_register: 0,
                    space: 0,
                    count: 1,
                }],
                visibility: ShaderVisibility::Pixel,
            }],
            static_samplers: vec![StaticSampler {
                filter: SamplerFilter::Linear,
                address_mode: SamplerAddressMode::Clamp,
                register: 0,
                space: 0,
            }],
            allow_input_layout: true,
        },
        vertex_shader: vertex,
        pixel_shader: Some(pixel),
        vertex_layout: vec![
            VertexAttribute {
                semantic: "POSITION",
                components: 3,
                offset: 0,
            },
            VertexAttribute {
                semantic: "TEXCOORD",
                components: 2,
                offset: 12,
            },
            VertexAttribute {
                semantic: "NORMAL",
                components: 3,
                offset: 20,
            },
        ],
        color_format: Some(TextureFormat::Rgba8Unorm),
        depth_format: None,
        cull_back_faces: false,
    }
}

#[test]
fn test_cleared_render_target_reads_back() {
    let Some(device) = wgpu_device() else { return };
    let target = device
        .create_texture(&TextureDescriptor {
            label: Some("clear target".into()),
            initial_state: ResourceState::RenderTarget,
            allow_render_target: true,
            ..TextureDescriptor::sampled("", 4, 4, TextureFormat::Rgba8Unorm)
        })
        .unwrap();

    let allocator = device.create_command_allocator(QueueKind::Direct).unwrap();
    let mut list = CommandList::new(QueueKind::Direct, allocator);
    list.record(Command::ClearRenderTarget {
        target,
        color: [0.25, 0.5, 0.75, 1.0],
    });
    list.transition(target, ResourceState::RenderTarget, ResourceState::CopySource);
    list.close().unwrap();
    device
        .execute_command_list(QueueKind::Direct, &list)
        .unwrap();
    wait_idle(&device, QueueKind::Direct);

    let texels = device.read_texture(target).unwrap();
    assert_eq!(texels.len(), 16);
    for texel in texels {
        for (actual, expected) in texel.iter().zip([0.25, 0.5, 0.75, 1.0]) {
            assert_relative_eq!(*actual, expected, epsilon = 0.01);
        }
    }
    assert_eq!(
        device.resource_state(target).unwrap(),
        ResourceState::CopySource
    );
    device.reset_command_allocator(allocator).unwrap();
}

#[test]
fn test_mapped_writes_stay_inside_upload_buffers() {
    let Some(device) = wgpu_device() else { return };
    let upload = device
        .create_buffer(&BufferDescriptor::upload("constants", 10))
        .unwrap();
    device.write_mapped(upload, 3, &[1, 2, 3]).unwrap();
    assert_eq!(device.read_mapped(upload, 2, 5).unwrap(), [0, 1, 2, 3, 0]);
    assert!(matches!(
        device.write_mapped(upload, 8, &[0; 4]),
        Err(ResourceError::OutOfBounds)
    ));

    let local = device
        .create_buffer(&BufferDescriptor::gpu_local(
            "vertices",
            64,
            ResourceState::CopyDest,
        ))
        .unwrap();
    assert!(matches!(
        device.read_mapped(local, 0, 4),
        Err(ResourceError::InvalidHandle)
    ));

    let allocator = device.create_command_allocator(QueueKind::Copy).unwrap();
    let mut list = CommandList::new(QueueKind::Copy, allocator);
    list.record(Command::CopyBufferRegion {
        dst: local,
        dst_offset: 0,
        src: upload,
        src_offset: 0,
        size: 8,
    });
    list.close().unwrap();
    device.execute_command_list(QueueKind::Copy, &list).unwrap();
    wait_idle(&device, QueueKind::Copy);
    assert!(device.validation_errors().is_empty());
}

#[test]
fn test_fence_reaches_signalled_value() {
    let Some(device) = wgpu_device() else { return };
    let fence = device.create_fence(3).unwrap();
    assert_eq!(device.completed_fence_value(fence).unwrap(), 3);
    device.signal(QueueKind::Direct, fence, 7).unwrap();
    device.wait_for_fence(fence, 7, TIMEOUT).unwrap();
    assert_eq!(device.completed_fence_value(fence).unwrap(), 7);
    assert!(matches!(
        device.wait_for_fence(fence, 8, Duration::from_millis(20)),
        Err(RenderError::FenceTimeout {
            value: 8,
            completed: 7
        })
    ));
}

#[test]
fn test_mismatched_barrier_loses_the_device() {
    let Some(device) = wgpu_device() else { return };
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
    list.transition(texture, ResourceState::RenderTarget, ResourceState::CopySource);
    list.close().unwrap();
    assert!(matches!(
        device.execute_command_list(QueueKind::Direct, &list),
        Err(RenderError::DeviceLost(_))
    ));
    assert!(device.is_device_lost());
    assert!(device.validation_errors()[0].contains("probe texture"));
    assert_eq!(
        device.resource_state(texture).unwrap(),
        ResourceState::PixelShaderResource
    );
}

#[test]
fn test_wgsl_pipelines_compile_and_bad_sources_are_rejected() {
    let Some(device) = wgpu_device() else { return };
    let blobs = wgsl_shader_blobs();
    let vertex = blobs.load("ScreenVertexShader").unwrap();
    let pixel = blobs.load("ScreenPixelShader").unwrap();

    let pipeline = device
        .create_graphics_pipeline(&screen_pipeline(vertex.clone(), pixel))
        .unwrap();
    device.destroy_pipeline(pipeline).unwrap();

    let broken = ShaderBlob::new("ScreenPixelShader", b"fn fs_main( {".to_vec());
    assert!(matches!(
        device.create_graphics_pipeline(&screen_pipeline(vertex.clone(), broken)),
        Err(ResourceError::Pipeline(PipelineError::CreationFailed { .. }))
    ));

    let binary = ShaderBlob::new("ScreenPixelShader", vec![0xFF, 0xFE, 0x00]);
    assert!(matches!(
        device.create_graphics_pipeline(&screen_pipeline(vertex, binary)),
        Err(ResourceError::Shader(_))
    ));
}

#[test]
fn test_present_requires_the_present_state() {
    let Some(device) = wgpu_device() else { return };
    assert!(!device.supports_feature(DeviceFeature::Tearing));
    let chain = device
        .create_swap_chain(&SwapChainDescriptor {
            width: 8,
            height: 8,
            buffer_count: 2,
            format: TextureFormat::Rgba8Unorm,
            allow_tearing: false,
        })
        .unwrap();
    let vsync = PresentMode {
        sync_interval: 1,
        allow_tearing: false,
    };
    device.present(chain, vsync).unwrap();
    assert_eq!(device.current_back_buffer_index(chain).unwrap(), 1);
    assert_eq!(device.present_count(chain).unwrap(), 1);

    let back_buffer = device.swap_chain_buffers(chain).unwrap()[1];
    let allocator = device.create_command_allocator(QueueKind::Direct).unwrap();
    let mut list = CommandList::new(QueueKind::Direct, allocator);
    list.transition(back_buffer, ResourceState::Present, ResourceState::RenderTarget);
    list.close().unwrap();
    device
        .execute_command_list(QueueKind::Direct, &list)
        .unwrap();

    assert!(matches!(
        device.present(chain, vsync),
        Err(RenderError::DeviceLost(_))
    ));
    assert!(device.validation_errors()[0].contains("back buffer 1"));
}

#[test]
fn test_raytracing_pipelines_are_not_offered() {
    let Some(device) = wgpu_device() else { return };
    assert!(!device.supports_feature(DeviceFeature::Raytracing));
    assert!(device.shader_identifier(lumen_core::renderer::PipelineId(0), "RayGen").is_err());
}
