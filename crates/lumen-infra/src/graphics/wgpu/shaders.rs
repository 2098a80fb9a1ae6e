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


//! WGSL sources of the raster pipelines, compiled into the binary.

use lumen_core::renderer::InMemoryShaderBlobs;

/// Logical name and WGSL source of every raster shader.
const WGSL_SOURCES: [(&str, &str); 5] = [
    (
        "ShadowMapVertexShader",
        include_str!("shaders/ShadowMapVertexShader.wgsl"),
    ),
    ("VertexShader", include_str!("shaders/VertexShader.wgsl")),
    ("PixelShader", include_str!("shaders/PixelShader.wgsl")),
    (
        "ScreenVertexShader",
        include_str!("shaders/ScreenVertexShader.wgsl"),
    ),
    (
        "ScreenPixelShader",
        include_str!("shaders/ScreenPixelShader.wgsl"),
    ),
];

/// Blobs for a [`WgpuDevice`](super::WgpuDevice): the raster shaders as WGSL text.
///
/// The raytracing names are absent since the device creates no raytracing pipelines.
pub fn wgsl_shader_blobs() -> InMemoryShaderBlobs {
    let mut blobs = InMemoryShaderBlobs::new();
    for (name, source) in WGSL_SOURCES {
        blobs.insert(name, source.as_bytes().to_vec());
    }
    blobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::renderer::ShaderBlobProvider;

    #[test]
    fn test_every_raster_shader_has_an_entry_point() {
        let blobs = wgsl_shader_blobs();
        for (name, _) in WGSL_SOURCES {
            let blob = blobs.load(name).unwrap();
            let source = std::str::from_utf8(&blob.bytes).unwrap();
            let entry = if name.ends_with("VertexShader") {
                "fn vs_main"
            } else {
                "fn fs_main"
            };
            assert!(source.contains(entry), "{name} lacks {entry}");
        }
        assert!(blobs.load("RayGen").is_err());
    }
}
