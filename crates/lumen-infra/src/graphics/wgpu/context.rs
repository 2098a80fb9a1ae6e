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


//! Headless adapter, device and queue acquisition.

use crate::software::lock;
use lumen_core::renderer::RenderError;
use std::sync::{Arc, Mutex};

/// How a [`WgpuDevice`](super::WgpuDevice) picks and configures its adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgpuDeviceDescriptor {
    /// Adapter preference.
    pub power_preference: wgpu::PowerPreference,
    /// Forces the software fallback adapter (for instance on CI machines).
    pub force_fallback_adapter: bool,
    /// Enables ray queries, and with them acceleration-structure builds, when the
    /// adapter supports them.
    pub ray_query: bool,
}

impl Default for WgpuDeviceDescriptor {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            ray_query: true,
        }
    }
}

/// Errors reported by wgpu outside of any error scope.
#[derive(Debug, Clone, Default)]
pub(crate) struct ErrorSink {
    errors: Arc<Mutex<Vec<String>>>,
}

impl ErrorSink {
    fn install(&self, device: &wgpu::Device) {
        let errors = self.errors.clone();
        device.on_uncaptured_error(Arc::new(move |error: wgpu::Error| {
            log::error!("wgpu uncaptured error: {error}");
            lock(&errors).push(error.to_string());
        }));
    }

    /// Number of errors seen so far.
    pub fn len(&self) -> usize {
        lock(&self.errors).len()
    }

    /// Errors reported after the first `from`.
    pub fn since(&self, from: usize) -> Vec<String> {
        lock(&self.errors).get(from..).map(<[String]>::to_vec).unwrap_or_default()
    }
}

/// The adapter, logical device and queue behind a [`WgpuDevice`](super::WgpuDevice).
///
/// No surface is created: back buffers are offscreen textures.
#[derive(Debug)]
pub(crate) struct WgpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_name: String,
    pub backend: wgpu::Backend,
    pub features: wgpu::Features,
    pub errors: ErrorSink,
}

impl WgpuContext {
    pub async fn new(descriptor: &WgpuDeviceDescriptor) -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::new_without_display_handle());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: descriptor.power_preference,
                force_fallback_adapter: descriptor.force_fallback_adapter,
                compatible_surface: None,
            })
            .await
            .map_err(|e| RenderError::InitializationFailed(format!("no graphics adapter: {e}")))?;

        let info = adapter.get_info();
        log::info!(
            "Using graphics adapter \"{}\" (backend: {:?})",
            info.name,
            info.backend
        );

        let mut wanted = wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER;
        if descriptor.ray_query {
            wanted |= wgpu::Features::EXPERIMENTAL_RAY_QUERY;
        }
        let features = adapter.features() & wanted;
        let ray_query = features.contains(wgpu::Features::EXPERIMENTAL_RAY_QUERY);
        if descriptor.ray_query && !ray_query {
            log::warn!("Adapter has no ray-query support; acceleration structures are unavailable");
        }

        let (required_limits, experimental_features) = if ray_query {
            (
                wgpu::Limits::default().using_minimum_supported_acceleration_structure_values(),
                // SAFETY: only ray queries are used from the experimental set, and every
                // acceleration-structure build is validated before it is encoded.
                unsafe { wgpu::ExperimentalFeatures::enabled() },
            )
        } else {
            (wgpu::Limits::default(), wgpu::ExperimentalFeatures::default())
        };

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Lumen logical device"),
                required_features: features,
                required_limits,
                experimental_features,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                RenderError::InitializationFailed(format!("failed to create logical device: {e}"))
            })?;

        let errors = ErrorSink::default();
        errors.install(&device);
        log::debug!("Active device features: {:?}", device.features());

        Ok(Self {
            device,
            queue,
            adapter_name: info.name,
            backend: info.backend,
            features,
            errors,
        })
    }

    /// Processes finished work and fires completion callbacks without blocking.
    pub fn poll(&self) {
        if let Err(e) = self.device.poll(wgpu::PollType::Poll) {
            log::warn!("Failed to poll device (non-blocking): {e:?}");
        }
    }

    /// Blocks until the queue is empty and every completion callback has run.
    pub fn poll_blocking(&self) {
        if let Err(e) = self.device.poll(wgpu::PollType::wait_indefinitely()) {
            log::warn!("Failed to poll device (blocking): {e:?}");
        }
    }

    pub fn has_ray_query(&self) -> bool {
        self.features.contains(wgpu::Features::EXPERIMENTAL_RAY_QUERY)
    }

    pub fn has_border_clamp(&self) -> bool {
        self.features
            .contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER)
    }
}
