//! Bake settings and their RON persistence.

use std::path::Path;

use bevy::prelude::Entity;
use serde::{Deserialize, Serialize};

use crate::GridMode;

pub const MIN_FRAMES: u32 = 4;
pub const MAX_FRAMES: u32 = 32;
pub const MAX_SUPERSAMPLE: u32 = 8;

/// Errors raised while loading or saving a config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to write config: {0}")]
    Write(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] ron::error::SpannedError),

    #[error("failed to serialize config: {0}")]
    Serialize(#[source] ron::Error),
}

/// Supported atlas edge lengths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum AtlasResolution {
    R1024,
    #[default]
    R2048,
    R4096,
    R8192,
}

impl AtlasResolution {
    pub const ALL: [AtlasResolution; 4] = [
        AtlasResolution::R1024,
        AtlasResolution::R2048,
        AtlasResolution::R4096,
        AtlasResolution::R8192,
    ];

    pub fn pixels(self) -> u32 {
        match self {
            AtlasResolution::R1024 => 1024,
            AtlasResolution::R2048 => 2048,
            AtlasResolution::R4096 => 4096,
            AtlasResolution::R8192 => 8192,
        }
    }
}

impl TryFrom<u32> for AtlasResolution {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        AtlasResolution::ALL
            .into_iter()
            .find(|r| r.pixels() == value)
            .ok_or_else(|| format!("unsupported atlas resolution {value}"))
    }
}

impl From<AtlasResolution> for u32 {
    fn from(value: AtlasResolution) -> Self {
        value.pixels()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImposterConfig {
    pub atlas_resolution: AtlasResolution,
    /// Frames along each axis of the atlas.
    pub frames: u32,
    pub mode: GridMode,
    /// Root of a custom light rig. When set, the color pass is rendered lit
    /// by the rig's lights only instead of as unlit albedo.
    #[serde(skip)]
    pub lighting_rig: Option<Entity>,
    /// Appended to the asset name when persisting.
    pub suffix: String,
    /// Working resolution multiplier for each captured frame.
    pub supersample: u32,
    /// Render layer the target is moved to while capturing.
    pub capture_layer: usize,
}

impl Default for ImposterConfig {
    fn default() -> Self {
        Self {
            atlas_resolution: AtlasResolution::default(),
            frames: 12,
            mode: GridMode::Hemispherical,
            lighting_rig: None,
            suffix: "IMP".to_owned(),
            supersample: 4,
            capture_layer: 30,
        }
    }
}

impl ImposterConfig {
    /// Frame count clamped to `[4, 32]` and rounded down to even.
    pub fn normalized_frames(&self) -> u32 {
        let mut frames = self.frames.clamp(MIN_FRAMES, MAX_FRAMES);
        if frames % 2 != 0 {
            frames -= 1;
        }
        frames.max(2)
    }

    pub fn normalized(mut self) -> Self {
        self.frames = self.normalized_frames();
        self.supersample = self.normalized_supersample();
        self
    }

    pub fn normalized_supersample(&self) -> u32 {
        self.supersample.clamp(1, MAX_SUPERSAMPLE)
    }

    /// Edge length of a single atlas cell.
    pub fn cell_resolution(&self) -> u32 {
        self.atlas_resolution.pixels() / self.normalized_frames()
    }

    /// Edge length a frame is rendered at before downsampling.
    pub fn working_resolution(&self) -> u32 {
        self.cell_resolution() * self.normalized_supersample()
    }

    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        ron::from_str::<Self>(text).map_err(ConfigError::Parse)
    }

    pub fn to_ron(&self) -> Result<String, ConfigError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(ConfigError::Serialize)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        Self::from_ron(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_ron()?).map_err(ConfigError::Write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_normalized() {
        let with = |frames| ImposterConfig {
            frames,
            ..Default::default()
        };
        assert_eq!(with(12).normalized_frames(), 12);
        assert_eq!(with(13).normalized_frames(), 12);
        assert_eq!(with(1).normalized_frames(), 4);
        assert_eq!(with(3).normalized_frames(), 4);
        assert_eq!(with(33).normalized_frames(), 32);
        assert_eq!(with(64).normalized_frames(), 32);
    }

    #[test]
    fn cell_and_working_resolution() {
        let config = ImposterConfig {
            atlas_resolution: AtlasResolution::R1024,
            frames: 8,
            supersample: 4,
            ..Default::default()
        };
        assert_eq!(config.cell_resolution(), 128);
        assert_eq!(config.working_resolution(), 512);
    }

    #[test]
    fn supersample_is_bounded() {
        let config = ImposterConfig::from_ron("(supersample: 4000000000)").unwrap();
        assert_eq!(config.working_resolution(), config.cell_resolution() * 8);
        assert_eq!(config.clone().normalized().supersample, 8);

        let config = ImposterConfig {
            supersample: 0,
            ..Default::default()
        };
        assert_eq!(config.normalized().supersample, 1);
    }

    #[test]
    fn ron_round_trip() {
        let config = ImposterConfig {
            atlas_resolution: AtlasResolution::R4096,
            frames: 16,
            mode: GridMode::Spherical,
            suffix: "LOD1".to_owned(),
            ..Default::default()
        };
        let text = config.to_ron().unwrap();
        assert!(text.contains("4096"));
        assert_eq!(ImposterConfig::from_ron(&text).unwrap(), config);
    }

    #[test]
    fn partial_ron_uses_defaults() {
        let config = ImposterConfig::from_ron("(frames: 8)").unwrap();
        assert_eq!(config.frames, 8);
        assert_eq!(config.atlas_resolution, AtlasResolution::R2048);
        assert_eq!(config.suffix, "IMP");
    }

    #[test]
    fn rejects_unknown_resolution() {
        assert!(ImposterConfig::from_ron("(atlas_resolution: 1000)").is_err());
    }
}
