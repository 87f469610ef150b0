use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(
        option_env!("FACETRACK_CONFIG_PATH").unwrap_or("/usr/local/etc/facetrack/config.toml"),
    )
});

pub static MODEL_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACETRACK_MODEL_PREFIX").unwrap_or("/usr/local/share/facetrack"))
});

/// Name given to identities created from unrecognized faces.
pub const UNKNOWN_NAME: &str = "unknown";

/// Display name of faces the quality gate discarded.
pub const IGNORED_NAME: &str = "ignored";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub matching: MatchingConfig,
    pub quality: QualityConfig,
    pub tracking: TrackingConfig,
    pub models: ModelConfig,
    pub camera: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            matching: MatchingConfig::default(),
            quality: QualityConfig::default(),
            tracking: TrackingConfig::default(),
            models: ModelConfig::default(),
            camera: "/dev/video0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Largest euclidean embedding distance still accepted as the same person.
    /// Depends on the encoder's embedding scale.
    pub tolerance: f32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self { tolerance: 0.6 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Scores strictly above this pass the gate.
    pub threshold: f32,
    /// Maximum lateral nose offset, as a fraction of the inter-eye distance.
    pub forward_fraction: f32,
    /// Side length the encoder expects; faces this size or larger get a full size term.
    pub encoder_input_size: f32,
    /// Multiply the pose term into the score.
    pub pose_in_score: bool,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            forward_fraction: 0.10,
            encoder_input_size: 112.0,
            pose_in_score: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Box centres that moved further than this (pixels) count as a new face.
    pub distance_threshold: f32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub detector: PathBuf,
    pub encoder: PathBuf,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub crop_size: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector: MODEL_PREFIX.join("face_detection_yunet_2023mar.onnx"),
            encoder: MODEL_PREFIX.join("face_recognition_sface_2021dec.onnx"),
            score_threshold: 0.6,
            nms_threshold: 0.3,
            crop_size: 112,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() -> Result<()> {
        let cfg: Config = toml::from_str(
            r#"
            camera = "/dev/video2"

            [matching]
            tolerance = 0.9
            "#,
        )?;
        assert_eq!(cfg.camera, "/dev/video2");
        assert_eq!(cfg.matching.tolerance, 0.9);
        assert_eq!(cfg.quality.threshold, 0.5);
        assert_eq!(cfg.tracking.distance_threshold, 50.0);
        Ok(())
    }

    #[test]
    fn test_missing_file_yields_defaults() -> Result<()> {
        let cfg = load_config(Some(Path::new("/nonexistent/facetrack.toml")))?;
        assert_eq!(cfg.matching.tolerance, 0.6);
        Ok(())
    }

    #[test]
    fn test_save_and_reload() -> Result<()> {
        let path = std::env::temp_dir().join(format!("facetrack-{}.toml", uuid::Uuid::new_v4()));
        let mut cfg = Config::default();
        cfg.quality.threshold = 0.8;
        save_config(&cfg, Some(&path))?;
        let loaded = load_config(Some(&path))?;
        std::fs::remove_file(&path)?;
        assert_eq!(loaded.quality.threshold, 0.8);
        Ok(())
    }
}
