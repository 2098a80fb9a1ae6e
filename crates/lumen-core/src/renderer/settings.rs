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

//! Global settings for the rendering system.
//!
//! Settings can be written by hand as a RON file. Every field is optional; missing
//! fields take their [`Default`] value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A collection of global settings that affect the rendering process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Initial back-buffer width.
    pub width: u32,
    /// Initial back-buffer height.
    pub height: u32,
    /// Number of swap-chain back buffers.
    pub back_buffer_count: usize,
    /// Waits for vertical blank when tearing is unavailable.
    pub vsync: bool,
    /// Enables the raytraced GI gather pass.
    pub gi_gather_enabled: bool,
    /// Minimum time between two GI gathers, in seconds.
    pub gi_gather_interval_secs: f32,
    /// Side length of the square shadow map.
    pub shadow_map_resolution: u32,
    /// Color the scene target is cleared to.
    pub clear_color: [f32; 4],
    /// Upper bound on any CPU wait for a fence, in milliseconds.
    pub fence_timeout_ms: u64,
    /// Directory holding the compiled shader blobs.
    pub shader_dir: PathBuf,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            back_buffer_count: 3,
            vsync: true,
            gi_gather_enabled: true,
            gi_gather_interval_secs: 0.1,
            shadow_map_resolution: 1024,
            clear_color: [0.005, 0.005, 0.005, 1.0],
            // Practically infinite; a fence that takes this long indicates a lost device.
            fence_timeout_ms: 60_000,
            shader_dir: PathBuf::from("Shaders/Binary"),
        }
    }
}

impl RenderSettings {
    /// The GI gather interval as a [`Duration`].
    ///
    /// Negative values mean "every frame"; values too large for a [`Duration`] saturate.
    pub fn gi_gather_interval(&self) -> Duration {
        Duration::try_from_secs_f32(self.gi_gather_interval_secs.max(0.0))
            .unwrap_or(Duration::MAX)
    }

    /// Checks the values serde cannot constrain.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let interval = self.gi_gather_interval_secs;
        if !interval.is_finite() || Duration::try_from_secs_f32(interval.max(0.0)).is_err() {
            return Err(SettingsError::Invalid {
                field: "gi_gather_interval_secs",
                reason: format!("{interval} is not a representable number of seconds"),
            });
        }
        Ok(())
    }

    /// The fence timeout as a [`Duration`].
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    /// Parses settings from RON text.
    pub fn from_ron_str(text: &str) -> Result<Self, SettingsError> {
        let settings: Self =
            ron::from_str(text).map_err(|e| SettingsError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serializes the settings to pretty RON text.
    pub fn to_ron_string(&self) -> Result<String, SettingsError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| SettingsError::Parse(e.to_string()))
    }

    /// Loads settings from a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| SettingsError::Io {
            path: path.display().to_string(),
            source_error: e.to_string(),
        })?;
        let settings = Self::from_ron_str(&text)?;
        log::info!("Loaded render settings from '{}'", path.display());
        Ok(settings)
    }
}

/// An error raised while loading [`RenderSettings`].
#[derive(Debug)]
pub enum SettingsError {
    /// The settings file could not be read.
    Io {
        /// The path that failed.
        path: String,
        /// The underlying I/O error.
        source_error: String,
    },
    /// The RON text could not be parsed or produced.
    Parse(String),
    /// A field parsed but holds an unusable value.
    Invalid {
        /// The offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Io { path, source_error } => {
                write!(f, "Failed to read settings '{path}': {source_error}")
            }
            SettingsError::Parse(msg) => write!(f, "Invalid render settings: {msg}"),
            SettingsError::Invalid { field, reason } => {
                write!(f, "Invalid render setting '{field}': {reason}")
            }
        }
    }
}

impl std::error::Error for SettingsError {}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults_match_frame_budget() {
        let settings = RenderSettings::default();
        assert_eq!(settings.back_buffer_count, 3);
        assert_eq!(settings.shadow_map_resolution, 1024);
        assert_relative_eq!(settings.gi_gather_interval_secs, 0.1);
        assert_eq!(settings.gi_gather_interval(), Duration::from_secs_f32(0.1));
    }

    #[test]
    fn test_partial_ron_falls_back_to_defaults() {
        let settings = RenderSettings::from_ron_str("(vsync: false, gi_gather_enabled: false)")
            .expect("valid settings");
        assert!(!settings.vsync);
        assert!(!settings.gi_gather_enabled);
        assert_eq!(settings.width, 1280);
        assert_eq!(settings.shader_dir, PathBuf::from("Shaders/Binary"));
    }

    #[test]
    fn test_ron_round_trip() {
        let mut settings = RenderSettings::default();
        settings.width = 640;
        settings.gi_gather_interval_secs = 0.25;
        let text = settings.to_ron_string().unwrap();
        assert_eq!(RenderSettings::from_ron_str(&text).unwrap(), settings);
    }

    #[test]
    fn test_invalid_ron_is_rejected() {
        let err = RenderSettings::from_ron_str("(width: \"wide\")").unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }

    #[test]
    fn test_unrepresentable_gather_interval_is_rejected() {
        for text in [
            "(gi_gather_interval_secs: 1e20)",
            "(gi_gather_interval_secs: inf)",
            "(gi_gather_interval_secs: NaN)",
        ] {
            let err = RenderSettings::from_ron_str(text).unwrap_err();
            assert!(
                matches!(err, SettingsError::Invalid { field: "gi_gather_interval_secs", .. }),
                "{text} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_gather_interval_saturates_when_set_in_code() {
        let mut settings = RenderSettings::default();
        settings.gi_gather_interval_secs = f32::INFINITY;
        assert_eq!(settings.gi_gather_interval(), Duration::MAX);
        settings.gi_gather_interval_secs = -2.0;
        assert_eq!(settings.gi_gather_interval(), Duration::ZERO);
        assert!(settings.validate().is_ok());
    }
}
