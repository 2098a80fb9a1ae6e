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

//! Access to compiled shader bytecode by logical name.

use crate::renderer::api::ShaderBlob;
use crate::renderer::error::ShaderError;
use std::collections::HashMap;
use std::fmt::Debug;

/// Supplies opaque compiled-shader blobs by logical name (e.g. `VertexShader`, `RayGen`).
///
/// A missing or malformed blob is fatal for the pipeline that needs it.
pub trait ShaderBlobProvider: Send + Sync + Debug {
    /// Loads the blob registered under `name`.
    fn load(&self, name: &str) -> Result<ShaderBlob, ShaderError>;
}

/// A provider backed by blobs registered in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryShaderBlobs {
    blobs: HashMap<String, Vec<u8>>,
}

impl InMemoryShaderBlobs {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `bytes` under `name`, replacing any previous blob.
    pub fn insert(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> &mut Self {
        self.blobs.insert(name.into(), bytes.into());
        self
    }
}

impl ShaderBlobProvider for InMemoryShaderBlobs {
    fn load(&self, name: &str) -> Result<ShaderBlob, ShaderError> {
        let bytes = self.blobs.get(name).ok_or_else(|| ShaderError::NotFound {
            name: name.to_string(),
        })?;
        if bytes.is_empty() {
            return Err(ShaderError::Malformed {
                name: name.to_string(),
                reason: "blob is empty".to_string(),
            });
        }
        Ok(ShaderBlob::new(name, bytes.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_blobs() {
        let mut blobs = InMemoryShaderBlobs::new();
        blobs.insert("RayGen", vec![1, 2, 3]).insert("Miss", Vec::new());

        assert_eq!(&*blobs.load("RayGen").unwrap().bytes, &[1, 2, 3]);
        assert!(matches!(
            blobs.load("Miss"),
            Err(ShaderError::Malformed { .. })
        ));
        assert!(matches!(
            blobs.load("ClosestHit"),
            Err(ShaderError::NotFound { .. })
        ));
    }
}
