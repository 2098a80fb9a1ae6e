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


//! Renderer-type to wgpu-type conversions and texel decoding for readback.

use lumen_core::renderer::{
    SamplerAddressMode, SamplerFilter, ShaderVisibility, TextureDescriptor, TextureFormat,
};

/// Row pitch alignment of texture-to-buffer copies.
pub(crate) const COPY_ROW_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

/// Trait for converting renderer types into their wgpu equivalents.
pub(crate) trait IntoWgpu<T> {
    fn into_wgpu(self) -> T;
}

impl IntoWgpu<wgpu::TextureFormat> for TextureFormat {
    fn into_wgpu(self) -> wgpu::TextureFormat {
        match self {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Rg11B10Float => wgpu::TextureFormat::Rg11b10Ufloat,
            TextureFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
            TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }
}

impl IntoWgpu<wgpu::ShaderStages> for ShaderVisibility {
    fn into_wgpu(self) -> wgpu::ShaderStages {
        match self {
            ShaderVisibility::All => wgpu::ShaderStages::VERTEX_FRAGMENT,
            ShaderVisibility::Vertex => wgpu::ShaderStages::VERTEX,
            ShaderVisibility::Pixel => wgpu::ShaderStages::FRAGMENT,
        }
    }
}

impl IntoWgpu<wgpu::FilterMode> for SamplerFilter {
    fn into_wgpu(self) -> wgpu::FilterMode {
        match self {
            SamplerFilter::Point => wgpu::FilterMode::Nearest,
            SamplerFilter::Linear => wgpu::FilterMode::Linear,
        }
    }
}

impl IntoWgpu<wgpu::SamplerBindingType> for SamplerFilter {
    fn into_wgpu(self) -> wgpu::SamplerBindingType {
        match self {
            SamplerFilter::Point => wgpu::SamplerBindingType::NonFiltering,
            SamplerFilter::Linear => wgpu::SamplerBindingType::Filtering,
        }
    }
}

/// Maps an addressing mode, falling back to edge clamping when the device cannot
/// clamp to a border color.
pub(crate) fn address_mode(mode: SamplerAddressMode, border_supported: bool) -> wgpu::AddressMode {
    match mode {
        SamplerAddressMode::Border if border_supported => wgpu::AddressMode::ClampToBorder,
        SamplerAddressMode::Border | SamplerAddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
    }
}

/// The vertex format of an attribute made of `components` 32-bit floats.
pub(crate) fn vertex_format(components: u32) -> Option<wgpu::VertexFormat> {
    match components {
        1 => Some(wgpu::VertexFormat::Float32),
        2 => Some(wgpu::VertexFormat::Float32x2),
        3 => Some(wgpu::VertexFormat::Float32x3),
        4 => Some(wgpu::VertexFormat::Float32x4),
        _ => None,
    }
}

/// Whether wgpu can bind `format` as a storage texture without optional features.
pub(crate) fn supports_storage(format: TextureFormat) -> bool {
    matches!(
        format,
        TextureFormat::Rgba8Unorm | TextureFormat::Rgba16Float | TextureFormat::R32Float
    )
}

/// Every buffer may be copied, bound as vertex, index, constant or structured data.
pub(crate) fn buffer_usages(ray_query: bool) -> wgpu::BufferUsages {
    let usages = wgpu::BufferUsages::COPY_SRC
        | wgpu::BufferUsages::COPY_DST
        | wgpu::BufferUsages::VERTEX
        | wgpu::BufferUsages::INDEX
        | wgpu::BufferUsages::UNIFORM
        | wgpu::BufferUsages::STORAGE;
    if ray_query {
        usages | wgpu::BufferUsages::BLAS_INPUT
    } else {
        usages
    }
}

pub(crate) fn texture_usages(descriptor: &TextureDescriptor) -> wgpu::TextureUsages {
    let mut usages = wgpu::TextureUsages::TEXTURE_BINDING
        | wgpu::TextureUsages::COPY_SRC
        | wgpu::TextureUsages::COPY_DST;
    if descriptor.allow_render_target || descriptor.allow_depth_stencil {
        usages |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if descriptor.allow_unordered_access {
        if supports_storage(descriptor.format) {
            usages |= wgpu::TextureUsages::STORAGE_BINDING;
        } else {
            log::debug!(
                "'{}': {:?} has no storage binding; unordered access is dropped",
                descriptor.label.as_deref().unwrap_or_default(),
                descriptor.format
            );
        }
    }
    usages
}

/// The aspect copied when a texture is read back or used as a copy source.
pub(crate) fn copy_aspect(format: TextureFormat) -> wgpu::TextureAspect {
    if format.is_depth() {
        wgpu::TextureAspect::DepthOnly
    } else {
        wgpu::TextureAspect::All
    }
}

/// How a whole-texture copy between two formats is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CopyRoute {
    /// A texture-to-texture copy.
    Direct,
    /// Depth read into a buffer, then written into a float color texture.
    ThroughBuffer,
    /// The formats cannot be copied into one another.
    Incompatible,
}

pub(crate) fn copy_route(src: TextureFormat, dst: TextureFormat) -> CopyRoute {
    match (src, dst) {
        (src, dst) if src == dst && !src.is_depth() => CopyRoute::Direct,
        (TextureFormat::Depth32Float, TextureFormat::R32Float) => CopyRoute::ThroughBuffer,
        _ => CopyRoute::Incompatible,
    }
}

/// Bytes per row of a copy of `width` texels, padded to the copy alignment.
pub(crate) fn padded_bytes_per_row(width: u32, format: TextureFormat) -> u32 {
    let unpadded = width * format.bytes_per_texel();
    unpadded.div_ceil(COPY_ROW_ALIGNMENT) * COPY_ROW_ALIGNMENT
}

fn small_float(bits: u32, mantissa_bits: u32) -> f32 {
    let exponent = (bits >> mantissa_bits) & 0x1F;
    let mantissa = (bits & ((1 << mantissa_bits) - 1)) as f32 / (1u32 << mantissa_bits) as f32;
    match exponent {
        0 => mantissa * 2f32.powi(-14),
        0x1F if mantissa == 0.0 => f32::INFINITY,
        0x1F => f32::NAN,
        e => (1.0 + mantissa) * 2f32.powi(e as i32 - 15),
    }
}

/// Decodes an IEEE half-precision float.
pub(crate) fn f16_to_f32(bits: u16) -> f32 {
    let magnitude = small_float(u32::from(bits & 0x7FFF), 10);
    if bits & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Decodes one texel of `format`. Channels the format lacks read as zero, alpha as one.
pub(crate) fn decode_texel(format: TextureFormat, bytes: &[u8]) -> [f32; 4] {
    let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
    let half = |i: usize| f16_to_f32(u16::from_le_bytes([bytes[i], bytes[i + 1]]));
    match format {
        TextureFormat::Rgba8Unorm => {
            let unorm = |i: usize| f32::from(bytes[i]) / 255.0;
            [unorm(0), unorm(1), unorm(2), unorm(3)]
        }
        TextureFormat::Rgba16Float => [half(0), half(2), half(4), half(6)],
        TextureFormat::Rg16Float => [half(0), half(2), 0.0, 1.0],
        TextureFormat::Rg11B10Float => {
            let packed = word(0);
            [
                small_float(packed & 0x7FF, 6),
                small_float((packed >> 11) & 0x7FF, 6),
                small_float(packed >> 22, 5),
                1.0,
            ]
        }
        TextureFormat::R32Float | TextureFormat::Depth32Float => {
            [f32::from_bits(word(0)), 0.0, 0.0, 1.0]
        }
    }
}

/// Decodes a padded readback of a `width`×`height` texture, row by row.
pub(crate) fn decode_rows(
    format: TextureFormat,
    width: u32,
    height: u32,
    bytes: &[u8],
) -> Vec<[f32; 4]> {
    let texel = format.bytes_per_texel() as usize;
    let pitch = padded_bytes_per_row(width, format) as usize;
    (0..height as usize)
        .flat_map(|y| {
            let row = &bytes[y * pitch..y * pitch + width as usize * texel];
            row.chunks_exact(texel).map(move |t| decode_texel(format, t))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_half_floats_decode() {
        assert_relative_eq!(f16_to_f32(0x3C00), 1.0);
        assert_relative_eq!(f16_to_f32(0xC000), -2.0);
        assert_relative_eq!(f16_to_f32(0x3555), 0.333_251_95, epsilon = 1e-6);
        assert_eq!(f16_to_f32(0x0000), 0.0);
        assert!(f16_to_f32(0x7C00).is_infinite());
        assert!(f16_to_f32(0x7E00).is_nan());
        // Smallest subnormal.
        assert_relative_eq!(f16_to_f32(0x0001), 2f32.powi(-24));
    }

    #[test]
    fn test_packed_float_channels_decode() {
        // r = 1.0 (exp 15, 6-bit mantissa), g = 2.0, b = 0.5 (exp 14, 5-bit mantissa).
        let packed: u32 = (15 << 6) | ((16 << 6) << 11) | ((14 << 5) << 22);
        let texel = decode_texel(TextureFormat::Rg11B10Float, &packed.to_le_bytes());
        assert_eq!(texel, [1.0, 2.0, 0.5, 1.0]);
    }

    #[test]
    fn test_missing_channels_read_as_zero_with_opaque_alpha() {
        let depth = decode_texel(TextureFormat::Depth32Float, &0.25f32.to_le_bytes());
        assert_eq!(depth, [0.25, 0.0, 0.0, 1.0]);
        let rg = decode_texel(TextureFormat::Rg16Float, &[0x00, 0x3C, 0x00, 0x40]);
        assert_eq!(rg, [1.0, 2.0, 0.0, 1.0]);
        let rgba8 = decode_texel(TextureFormat::Rgba8Unorm, &[255, 0, 51, 255]);
        assert_relative_eq!(rgba8[2], 0.2);
    }

    #[test]
    fn test_rows_skip_copy_padding() {
        let width = 3;
        let pitch = padded_bytes_per_row(width, TextureFormat::R32Float) as usize;
        assert_eq!(pitch, 256);

        let mut bytes = vec![0xFFu8; pitch * 2];
        for (y, row) in bytes.chunks_exact_mut(pitch).enumerate() {
            for x in 0..width as usize {
                let value = (y * 10 + x) as f32;
                row[x * 4..x * 4 + 4].copy_from_slice(&value.to_le_bytes());
            }
        }
        let texels = decode_rows(TextureFormat::R32Float, width, 2, &bytes);
        let reds: Vec<f32> = texels.iter().map(|t| t[0]).collect();
        assert_eq!(reds, vec![0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_wide_rows_pad_to_the_next_multiple() {
        assert_eq!(padded_bytes_per_row(64, TextureFormat::Rgba8Unorm), 256);
        assert_eq!(padded_bytes_per_row(65, TextureFormat::Rgba8Unorm), 512);
        assert_eq!(padded_bytes_per_row(350, TextureFormat::Rgba16Float), 2816);
    }

    #[test]
    fn test_depth_copies_go_through_a_buffer() {
        assert_eq!(
            copy_route(TextureFormat::Rgba8Unorm, TextureFormat::Rgba8Unorm),
            CopyRoute::Direct
        );
        assert_eq!(
            copy_route(TextureFormat::Depth32Float, TextureFormat::R32Float),
            CopyRoute::ThroughBuffer
        );
        assert_eq!(
            copy_route(TextureFormat::Depth32Float, TextureFormat::Depth32Float),
            CopyRoute::Incompatible
        );
        assert_eq!(
            copy_route(TextureFormat::R32Float, TextureFormat::Rgba8Unorm),
            CopyRoute::Incompatible
        );
        assert_eq!(
            copy_aspect(TextureFormat::Depth32Float),
            wgpu::TextureAspect::DepthOnly
        );
    }

    #[test]
    fn test_usages_follow_the_descriptor() {
        let sampled = TextureDescriptor::sampled("probe", 4, 4, TextureFormat::Rg16Float);
        let usages = texture_usages(&sampled);
        assert!(usages.contains(wgpu::TextureUsages::TEXTURE_BINDING));
        assert!(!usages.contains(wgpu::TextureUsages::RENDER_ATTACHMENT));

        let storage = TextureDescriptor {
            allow_unordered_access: true,
            ..sampled.clone()
        };
        assert!(!texture_usages(&storage).contains(wgpu::TextureUsages::STORAGE_BINDING));
        let storage = TextureDescriptor {
            format: TextureFormat::Rgba16Float,
            ..storage
        };
        assert!(texture_usages(&storage).contains(wgpu::TextureUsages::STORAGE_BINDING));

        assert!(buffer_usages(true).contains(wgpu::BufferUsages::BLAS_INPUT));
        assert!(!buffer_usages(false).contains(wgpu::BufferUsages::BLAS_INPUT));
    }

    #[test]
    fn test_border_addressing_falls_back_to_clamp() {
        assert_eq!(
            address_mode(SamplerAddressMode::Border, true),
            wgpu::AddressMode::ClampToBorder
        );
        assert_eq!(
            address_mode(SamplerAddressMode::Border, false),
            wgpu::AddressMode::ClampToEdge
        );
        assert_eq!(vertex_format(3), Some(wgpu::VertexFormat::Float32x3));
        assert_eq!(vertex_format(5), None);
    }
}
