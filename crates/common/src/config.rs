//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory where exports land when no explicit target is given.
    pub output_dir: PathBuf,

    /// Export pipeline defaults.
    #[serde(default)]
    pub export: ExportDefaults,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Export pipeline parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportDefaults {
    /// Codec FourCCs probed for video export, in discovery order.
    pub codec_candidates: Vec<String>,

    /// Codecs that outrank discovery order when supported, best first.
    pub preferred_codecs: Vec<String>,

    /// Encoded video smaller than this is rejected as unusable.
    pub min_video_bytes: u64,

    /// Cancellation cadence (in frames) for long video jobs.
    pub video_cancel_check_interval: u64,

    /// Jobs with at most this many frames check cancellation every frame.
    pub short_job_frames: u64,

    /// Image format extension used for frame-sequence exports.
    pub frame_image_extension: String,

    /// Timestamp banner appearance.
    pub banner: BannerConfig,
}

/// Timestamp banner composited at the bottom of every exported frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BannerConfig {
    /// Band height in pixels (clamped to the frame height).
    pub height_px: u32,

    /// Opacity of the dark band, `[0.0, 1.0]`.
    pub opacity: f32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "sightline=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            export: ExportDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            codec_candidates: vec!["mp4v".to_string(), "XVID".to_string(), "MJPG".to_string()],
            preferred_codecs: vec!["XVID".to_string(), "MJPG".to_string()],
            min_video_bytes: 1024,
            video_cancel_check_interval: 30,
            short_job_frames: 30,
            frame_image_extension: "jpg".to_string(),
            banner: BannerConfig::default(),
        }
    }
}

impl Default for BannerConfig {
    fn default() -> Self {
        Self {
            height_px: 24,
            opacity: 0.7,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from an explicit path, falling back to defaults.
    pub fn load_from(config_path: &std::path::Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        self.save_to(&config_file_path())
    }

    /// Save config to an explicit path.
    pub fn save_to(&self, config_path: &std::path::Path) -> Result<(), std::io::Error> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("sightline").join("config.json")
}

/// Default export directory.
fn default_output_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("sightline").join("exports")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_defaults_match_pipeline_constants() {
        let defaults = ExportDefaults::default();
        assert_eq!(defaults.codec_candidates, vec!["mp4v", "XVID", "MJPG"]);
        assert_eq!(defaults.preferred_codecs, vec!["XVID", "MJPG"]);
        assert_eq!(defaults.min_video_bytes, 1024);
        assert_eq!(defaults.video_cancel_check_interval, 30);
        assert!((defaults.banner.opacity - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{"output_dir":"/data/out","export":{"min_video_bytes":4096}}"#)
                .unwrap();
        assert_eq!(parsed.output_dir, PathBuf::from("/data/out"));
        assert_eq!(parsed.export.min_video_bytes, 4096);
        assert_eq!(parsed.export.frame_image_extension, "jpg");
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn test_save_and_load_roundtrip_through_file() {
        let dir = std::env::temp_dir().join("sightline_test_config");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.export.frame_image_extension = "png".to_string();
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.export.frame_image_extension, "png");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_from_garbage_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join("sightline_test_config_garbage");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, "{not json").unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.export.min_video_bytes, 1024);

        std::fs::remove_dir_all(&dir).ok();
    }
}
