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

//! Headless sandbox: renders the demo room for a fixed number of frames on the
//! software device, or on a hardware adapter with `--wgpu`.
//!
//! Usage: `sandbox [--wgpu] [frames] [settings.ron]`

mod geometry;
mod scene;

use anyhow::{bail, Context, Result};
use lumen_sdk::prelude::*;
use scene::DemoScene;
use std::path::Path;
use std::sync::Arc;

const DEFAULT_FRAMES: u64 = 180;
const FRAME_DELTA_SECS: f32 = 1.0 / 60.0;

fn load_settings(path: Option<&str>) -> Result<RenderSettings> {
    match path {
        Some(path) => RenderSettings::load(Path::new(path))
            .with_context(|| format!("failed to load render settings from '{path}'")),
        None => Ok(RenderSettings::default()),
    }
}

fn software_renderer(settings: RenderSettings) -> Result<Renderer> {
    let device: Arc<dyn GpuDevice> =
        Arc::new(SoftwareDevice::new(SoftwareDeviceDescriptor::default())?);
    let renderer = if settings.shader_dir.is_dir() {
        let shaders = FileShaderBlobs::new(&settings.shader_dir);
        log::info!("Loading shaders from {}", shaders.directory().display());
        Renderer::new(device, &shaders, settings)?
    } else {
        Renderer::new(device, &builtin_shader_blobs(), settings)?
    };
    Ok(renderer)
}

#[cfg(feature = "wgpu")]
fn hardware_renderer(settings: RenderSettings) -> Result<Renderer> {
    Ok(Renderer::wgpu(settings)?)
}

#[cfg(not(feature = "wgpu"))]
fn hardware_renderer(_settings: RenderSettings) -> Result<Renderer> {
    bail!("--wgpu needs a sandbox built with the `wgpu` feature")
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info"))
        .filter_module("lumen_infra::software", log::LevelFilter::Warn)
        .init();

    let (flags, positional): (Vec<String>, Vec<String>) =
        std::env::args().skip(1).partition(|arg| arg.starts_with("--"));
    let use_wgpu = match flags.as_slice() {
        [] => false,
        [flag] if flag == "--wgpu" => true,
        _ => bail!("unknown flags {flags:?}; usage: sandbox [--wgpu] [frames] [settings.ron]"),
    };
    let mut args = positional.into_iter();
    let frames = match args.next() {
        Some(arg) => arg
            .parse::<u64>()
            .with_context(|| format!("'{arg}' is not a frame count"))?,
        None => DEFAULT_FRAMES,
    };
    let settings = load_settings(args.next().as_deref())?;

    let mut renderer = if use_wgpu {
        hardware_renderer(settings)?
    } else {
        software_renderer(settings)?
    };
    log::info!("Rendering on '{}'", renderer.device().adapter_info().name);

    let mut scene = DemoScene::new(&mut renderer)?;
    for frame in 0..frames {
        if frame == frames / 6 {
            scene.slide_door();
        }
        if frame == frames / 2 {
            let (width, height) = renderer.context().swap_chain().size();
            renderer.resize(width / 2, height / 2)?;
        }
        scene.tick(&mut renderer, FRAME_DELTA_SECS)?;
        scene.draw(&mut renderer);
        let stats = renderer.render_frame(scene.camera())?;
        if stats.frame_number % 60 == 0 {
            log::info!(
                "Frame {}: {} draw calls, {} GI gathers, {:.2} ms",
                stats.frame_number,
                stats.draw_calls,
                stats.gi_gathers,
                stats.cpu_frame_time_ms
            );
        }
    }

    renderer.flush()?;
    let stats = renderer.stats().clone();
    log::info!(
        "Rendered {} frames ({} GI gathers, {} TLAS refits)",
        stats.frame_number,
        stats.gi_gathers,
        stats.tlas_refits
    );
    renderer.shutdown()?;
    Ok(())
}
