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

//! Swap-chain descriptors.

use super::resource::TextureFormat;

/// An opaque handle to a swap chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapChainId(pub usize);

/// Describes a swap chain to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapChainDescriptor {
    /// Back-buffer width.
    pub width: u32,
    /// Back-buffer height.
    pub height: u32,
    /// Number of back buffers.
    pub buffer_count: usize,
    /// Back-buffer format.
    pub format: TextureFormat,
    /// Whether the swap chain is created with tearing support.
    pub allow_tearing: bool,
}

/// How a frame is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentMode {
    /// Number of vertical blanks to wait for. Zero presents immediately.
    pub sync_interval: u32,
    /// Whether presentation may tear.
    pub allow_tearing: bool,
}

impl PresentMode {
    /// Picks the presentation mode: tearing when the swap chain supports it,
    /// otherwise vsync according to the runtime toggle.
    pub fn select(tearing_supported: bool, vsync: bool) -> Self {
        if tearing_supported {
            Self {
                sync_interval: 0,
                allow_tearing: true,
            }
        } else {
            Self {
                sync_interval: u32::from(vsync),
                allow_tearing: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_mode_prefers_tearing() {
        let mode = PresentMode::select(true, true);
        assert_eq!(mode.sync_interval, 0);
        assert!(mode.allow_tearing);
    }

    #[test]
    fn test_present_mode_vsync_toggle() {
        assert_eq!(PresentMode::select(false, true).sync_interval, 1);
        assert_eq!(PresentMode::select(false, false).sync_interval, 0);
        assert!(!PresentMode::select(false, false).allow_tearing);
    }
}
