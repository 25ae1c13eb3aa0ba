//! Renderer settings with persistence
//!
//! Settings are saved to `~/.config/granularity/settings.toml`

use std::fs;
use std::path::PathBuf;

use glam::Vec4;
use granularity_core::{clamp_tess_factor, TimerConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// All renderer settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RenderSettings {
    pub video: VideoSettings,
    pub scene: SceneSettings,
    pub run: RunSettings,
}

impl RenderSettings {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("granularity"))
    }

    /// Get the settings file path
    fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.toml"))
    }

    /// Whether a settings file exists on disk
    pub fn is_persisted() -> bool {
        Self::settings_path().is_some_and(|p| p.exists())
    }

    /// Load settings from disk, or return defaults if not found
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else {
            warn!("Could not determine config directory");
            return Self::default();
        };

        if !path.exists() {
            info!("No settings file found, using defaults");
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match Self::parse(&content) {
                Ok(settings) => {
                    info!("Loaded settings from {:?}", path);
                    settings
                }
                Err(e) => {
                    warn!("Failed to parse settings: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read settings file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save settings to disk
    pub fn save(&self) -> anyhow::Result<()> {
        let Some(dir) = Self::config_dir() else {
            anyhow::bail!("Could not determine config directory");
        };

        let path = dir.join("settings.toml");

        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }
}

/// Output resolution and camera
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub width: u32,
    pub height: u32,
    /// Vertical field of view in degrees
    pub fov: f32,
    /// Camera position, looking at the origin
    pub eye: [f32; 3],
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fov: 45.0,
            eye: [0.0, 2.0, -6.0],
        }
    }
}

impl VideoSettings {
    /// Get the resolution as a tuple
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

/// What gets rendered
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneSettings {
    /// Directory relative asset paths resolve against
    pub asset_dir: PathBuf,
    pub mesh: PathBuf,
    pub environment: PathBuf,
    /// Model position (xyz) and uniform scale (w)
    pub pos_scale: [f32; 4],
    /// Requested tessellation factor, clamped to the supported range
    pub tess_factor: u32,
}

impl Default for SceneSettings {
    fn default() -> Self {
        Self {
            asset_dir: PathBuf::from("assets"),
            mesh: PathBuf::from("bunny.obj"),
            environment: PathBuf::from("environment.hdr"),
            pos_scale: [0.0, 0.0, 0.0, 1.0],
            tess_factor: 2,
        }
    }
}

impl SceneSettings {
    pub fn pos_scale(&self) -> Vec4 {
        Vec4::from_array(self.pos_scale)
    }

    pub fn tess_factor(&self) -> u32 {
        clamp_tess_factor(self.tess_factor)
    }
}

/// Frame driver behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Number of frames to render before exiting
    pub frames: u32,
    /// Animation seconds per real second
    pub time_scale: f32,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            frames: 300,
            time_scale: 1.0,
        }
    }
}

impl RunSettings {
    pub fn timer_config(&self) -> TimerConfig {
        TimerConfig {
            time_scale: self.time_scale,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_through_toml() {
        let mut settings = RenderSettings::default();
        settings.scene.tess_factor = 7;
        settings.video.width = 640;
        let text = toml::to_string_pretty(&settings).unwrap();
        let parsed = RenderSettings::parse(&text).unwrap();
        assert_eq!(parsed.scene.tess_factor, 7);
        assert_eq!(parsed.video.resolution(), (640, 720));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed = RenderSettings::parse("[scene]\ntess_factor = 40\n").unwrap();
        assert_eq!(parsed.scene.tess_factor(), 16);
        assert_eq!(parsed.video.resolution(), (1280, 720));
        assert_eq!(parsed.run.frames, 300);
        assert_eq!(parsed.scene.pos_scale(), Vec4::new(0.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        assert!(RenderSettings::parse("[video]\nwidth = \"wide\"\n").is_err());
    }
}
