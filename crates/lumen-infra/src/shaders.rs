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

//! Compiled shader blobs loaded from disk.

use lumen_core::renderer::{InMemoryShaderBlobs, ShaderBlob, ShaderBlobProvider, ShaderError};
use std::path::{Path, PathBuf};

/// File extensions tried, in order, for a logical shader name.
pub const SHADER_EXTENSIONS: [&str; 3] = ["cso", "dxil", "wgsl"];

/// Logical names of every shader the renderer loads.
pub const SHADER_NAMES: [&str; 8] = [
    "VertexShader",
    "PixelShader",
    "ShadowMapVertexShader",
    "ScreenVertexShader",
    "ScreenPixelShader",
    "RayGen",
    "Miss",
    "ClosestHit",
];

/// Resolves `<dir>/<name>.cso` (or `.dxil`, or `.wgsl`) for each logical name.
#[derive(Debug, Clone)]
pub struct FileShaderBlobs {
    directory: PathBuf,
}

impl FileShaderBlobs {
    /// Creates a provider reading from `directory`.
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    /// The directory blobs are read from.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn candidates(&self, name: &str) -> impl Iterator<Item = PathBuf> + '_ {
        let name = name.to_string();
        SHADER_EXTENSIONS
            .iter()
            .map(move |ext| self.directory.join(format!("{name}.{ext}")))
    }
}

impl ShaderBlobProvider for FileShaderBlobs {
    fn load(&self, name: &str) -> Result<ShaderBlob, ShaderError> {
        let Some(path) = self.candidates(name).find(|p| p.is_file()) else {
            return Err(ShaderError::NotFound {
                name: name.to_string(),
            });
        };
        let bytes = std::fs::read(&path).map_err(|e| ShaderError::LoadError {
            path: path.display().to_string(),
            source_error: e.to_string(),
        })?;
        if bytes.is_empty() {
            return Err(ShaderError::Malformed {
                name: name.to_string(),
                reason: format!("'{}' is empty", path.display()),
            });
        }
        log::debug!("Loaded shader '{name}' from '{}' ({} bytes)", path.display(), bytes.len());
        Ok(ShaderBlob::new(name, bytes))
    }
}

/// Blobs understood by the software device: every known name maps to a small tagged
/// payload, since the device runs its ray program natively.
pub fn builtin_shader_blobs() -> InMemoryShaderBlobs {
    let mut blobs = InMemoryShaderBlobs::new();
    for name in SHADER_NAMES {
        blobs.insert(name, format!("lumen-software:{name}").into_bytes());
    }
    blobs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_blobs_resolve_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("RayGen.cso"), [0xDE, 0xAD]).unwrap();
        std::fs::write(dir.path().join("Miss.dxil"), [0xBE, 0xEF, 0x01]).unwrap();
        std::fs::write(dir.path().join("ClosestHit.cso"), b"").unwrap();
        std::fs::write(dir.path().join("PixelShader.wgsl"), b"@fragment fn fs_main() {}").unwrap();

        let blobs = FileShaderBlobs::new(dir.path());
        assert_eq!(&*blobs.load("RayGen").unwrap().bytes, &[0xDE, 0xAD]);
        assert_eq!(blobs.load("Miss").unwrap().bytes.len(), 3);
        assert!(blobs.load("PixelShader").unwrap().bytes.starts_with(b"@fragment"));
        assert!(matches!(
            blobs.load("ClosestHit"),
            Err(ShaderError::Malformed { .. })
        ));
        assert!(matches!(
            blobs.load("VertexShader"),
            Err(ShaderError::NotFound { .. })
        ));
    }

    #[test]
    fn test_builtin_blobs_cover_every_name() {
        let blobs = builtin_shader_blobs();
        for name in SHADER_NAMES {
            let blob = blobs.load(name).unwrap();
            assert_eq!(blob.name, name);
            assert!(!blob.bytes.is_empty());
        }
    }
}
