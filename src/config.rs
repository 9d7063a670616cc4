// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{anyhow, bail, Context, Result};
use glam::{Vec3, Vec4};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::headless::{AdapterSpec, GpuTiming, HeadlessConfig};
use crate::backend::FeatureLevel;
use crate::device::FEATURE_LEVEL_LADDER;
use crate::frame::RendererDesc;
use crate::scene::{Material, SceneState};
use crate::sync::WaitPolicy;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub sync: SyncConfig,
    pub scene: SceneConfig,
    pub debug: DebugConfig,
    pub headless: HeadlessSection,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "DirectXGame".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Which backend `main` drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// D3D12 on Windows, headless elsewhere
    #[default]
    Auto,
    D3d12,
    Headless,
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub backend: BackendKind,
    pub clear_color: [f32; 4],
    pub sync_interval: u32,
    pub vertex_shader: PathBuf,
    pub pixel_shader: PathBuf,
    pub upload_slots: usize,
    pub upload_slot_size: u64,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            clear_color: [0.1, 0.25, 0.5, 1.0],
            sync_interval: 1,
            vertex_shader: PathBuf::from("shaders/Object3d.VS.cso"),
            pixel_shader: PathBuf::from("shaders/Object3d.PS.cso"),
            upload_slots: 2,
            upload_slot_size: 64 * 1024,
        }
    }
}

/// Fence wait settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 0 waits forever
    pub fence_timeout_ms: u64,
    pub reset_history: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fence_timeout_ms: 5000,
            reset_history: 64,
        }
    }
}

/// Scene settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub rotation_speed: f32,
    pub material_color: [f32; 4],
    pub camera_distance: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            rotation_speed: 0.03,
            material_color: [1.0, 0.0, 0.0, 1.0],
            camera_distance: 5.0,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub gpu_based_validation: bool,
    pub log_to_file: bool,
    pub log_dir: PathBuf,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            gpu_based_validation: false,
            log_to_file: true,
            log_dir: PathBuf::from("Logs"),
            show_fps: true,
        }
    }
}

/// Simulated adapter entry
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdapterEntry {
    pub description: String,
    pub software: bool,
    pub max_feature_level: String,
}

impl Default for AdapterEntry {
    fn default() -> Self {
        Self {
            description: "Headless Reference GPU".to_string(),
            software: false,
            max_feature_level: "12.2".to_string(),
        }
    }
}

/// Headless run settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HeadlessSection {
    pub frames: u64,
    /// immediate | on_wait | threaded | hung
    pub timing: String,
    pub latency_ms: u64,
    pub back_buffer_script: Vec<u32>,
    pub adapters: Vec<AdapterEntry>,
}

impl Default for HeadlessSection {
    fn default() -> Self {
        Self {
            frames: 120,
            timing: "threaded".to_string(),
            latency_ms: 1,
            back_buffer_script: Vec::new(),
            adapters: vec![AdapterEntry::default()],
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy::from_millis(self.sync.fence_timeout_ms)
    }

    pub fn renderer_desc(&self) -> RendererDesc {
        RendererDesc {
            width: self.window.width,
            height: self.window.height,
            clear_color: self.graphics.clear_color,
            sync_interval: self.graphics.sync_interval,
            wait_policy: self.wait_policy(),
            upload_slots: self.graphics.upload_slots,
            upload_slot_size: self.graphics.upload_slot_size,
            reset_history: self.sync.reset_history,
            feature_levels: FEATURE_LEVEL_LADDER.to_vec(),
        }
    }

    pub fn scene_state(&self) -> SceneState {
        let mut scene = SceneState {
            material: Material { color: Vec4::from_array(self.scene.material_color) },
            rotation_speed: self.scene.rotation_speed,
            ..SceneState::default()
        };
        scene.camera.transform.translate = Vec3::new(0.0, 0.0, -self.scene.camera_distance);
        scene
    }

    /// Get the headless timing mode
    pub fn gpu_timing(&self) -> Result<GpuTiming> {
        let latency = Duration::from_millis(self.headless.latency_ms);
        match self.headless.timing.to_lowercase().as_str() {
            "immediate" => Ok(GpuTiming::Immediate),
            "on_wait" => Ok(GpuTiming::OnWait),
            "threaded" => Ok(GpuTiming::Threaded { latency }),
            "hung" => Ok(GpuTiming::Hung),
            other => bail!("Unknown headless timing '{}'", other),
        }
    }

    pub fn headless_config(&self) -> Result<HeadlessConfig> {
        let adapters = self
            .headless
            .adapters
            .iter()
            .map(|entry| {
                let level: FeatureLevel = entry.max_feature_level.parse().map_err(|e: String| {
                    anyhow!("Adapter '{}': {}", entry.description, e)
                })?;
                let spec = if entry.software {
                    AdapterSpec::software(&entry.description)
                } else {
                    AdapterSpec::hardware(&entry.description, level)
                };
                Ok(AdapterSpec { max_feature_level: level, ..spec })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(HeadlessConfig {
            adapters,
            timing: self.gpu_timing()?,
            back_buffer_script: self.headless.back_buffer_script.clone(),
            record_timeline: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.window.title, "DirectXGame");
        assert_eq!(config.graphics.backend, BackendKind::Auto);
        assert_eq!(config.wait_policy(), WaitPolicy::Bounded(Duration::from_secs(5)));
        assert_eq!(config.renderer_desc().upload_slots, 2);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [graphics]
            backend = "headless"

            [sync]
            fence_timeout_ms = 0

            [headless]
            timing = "on_wait"
            back_buffer_script = [0, 0, 1, 0]
            "#,
        )
        .unwrap();

        assert_eq!(config.graphics.backend, BackendKind::Headless);
        assert_eq!(config.graphics.sync_interval, 1);
        assert_eq!(config.wait_policy(), WaitPolicy::Unbounded);

        let headless = config.headless_config().unwrap();
        assert_eq!(headless.timing, GpuTiming::OnWait);
        assert_eq!(headless.back_buffer_script, vec![0, 0, 1, 0]);
        assert_eq!(headless.adapters.len(), 1);
    }

    #[rstest]
    #[case("immediate", GpuTiming::Immediate)]
    #[case("hung", GpuTiming::Hung)]
    #[case("Threaded", GpuTiming::Threaded { latency: Duration::from_millis(1) })]
    fn timing_names(#[case] name: &str, #[case] expected: GpuTiming) {
        let mut config = Config::default();
        config.headless.timing = name.to_string();
        assert_eq!(config.gpu_timing().unwrap(), expected);
    }

    #[test]
    fn adapter_list_parses_feature_levels() {
        let config: Config = toml::from_str(
            r#"
            [[headless.adapters]]
            description = "WARP"
            software = true

            [[headless.adapters]]
            description = "Older GPU"
            max_feature_level = "12_0"
            "#,
        )
        .unwrap();

        let adapters = config.headless_config().unwrap().adapters;
        assert!(adapters[0].software);
        assert_eq!(adapters[1].max_feature_level, FeatureLevel::Level12_0);
    }

    #[test]
    fn bad_feature_level_is_reported() {
        let mut config = Config::default();
        config.headless.adapters[0].max_feature_level = "9.3".to_string();
        assert!(config.headless_config().is_err());
    }

    #[test]
    fn scene_uses_camera_distance() {
        let mut config = Config::default();
        config.scene.camera_distance = 8.0;
        assert_eq!(config.scene_state().camera.transform.translate.z, -8.0);
    }
}
