use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConvertError, Result};
use crate::media::presets::{DEFAULT_QUALITY, ORIGINAL};

/// Looked up in the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "ffconvert.toml";

fn default_binary_path() -> String {
    "ffmpeg".to_string()
}

fn default_probe_path() -> String {
    "ffprobe".to_string()
}

fn default_kill_grace_ms() -> u64 {
    2000
}

fn default_format() -> String {
    "mp4".to_string()
}

fn default_quality() -> String {
    DEFAULT_QUALITY.to_string()
}

fn default_original() -> String {
    ORIGINAL.to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ffmpeg: FfmpegConfig,
    #[serde(default)]
    pub defaults: ConversionDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FfmpegConfig {
    /// Path to ffmpeg binary
    #[serde(default = "default_binary_path")]
    pub binary_path: String,
    /// Path to ffprobe binary
    #[serde(default = "default_probe_path")]
    pub probe_path: String,
    /// Milliseconds between SIGTERM and SIGKILL when cancelling
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionDefaults {
    /// Target format key (see `ffconvert formats`)
    #[serde(default = "default_format")]
    pub format: String,
    /// Quality key: low, medium, high, lossless
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default = "default_original")]
    pub resolution: String,
    #[serde(default = "default_original")]
    pub frame_rate: String,
    /// Output directory; defaults to each input's own directory
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Arguments appended to every ffmpeg invocation before the output path
    /// e.g. ["-pix_fmt", "yuv420p"]
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary_path: default_binary_path(),
            probe_path: default_probe_path(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

impl Default for ConversionDefaults {
    fn default() -> Self {
        Self {
            format: default_format(),
            quality: default_quality(),
            resolution: default_original(),
            frame_rate: default_original(),
            output_dir: None,
            extra_args: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConvertError::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Explicit path, else `./ffconvert.toml` if present, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    Self::from_file(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConvertError::Config(format!("Failed to serialize config: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content)
            .map_err(|e| ConvertError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.ffmpeg.binary_path, "ffmpeg");
        assert_eq!(config.ffmpeg.probe_path, "ffprobe");
        assert_eq!(config.ffmpeg.kill_grace_ms, 2000);
        assert_eq!(config.defaults.format, "mp4");
        assert_eq!(config.defaults.quality, "medium");
        assert_eq!(config.defaults.resolution, "original");
        assert_eq!(config.defaults.frame_rate, "original");
        assert!(config.defaults.output_dir.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = Config::from_toml(
            r#"
            [ffmpeg]
            binary_path = "/opt/ffmpeg/bin/ffmpeg"

            [defaults]
            format = "webm"
            extra_args = ["-pix_fmt", "yuv420p"]
            "#,
        )
        .unwrap();

        assert_eq!(config.ffmpeg.binary_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.ffmpeg.probe_path, "ffprobe");
        assert_eq!(config.defaults.format, "webm");
        assert_eq!(config.defaults.quality, "medium");
        assert_eq!(config.defaults.extra_args, vec!["-pix_fmt", "yuv420p"]);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.defaults.format, "mp4");
        assert_eq!(config.ffmpeg.kill_grace_ms, 2000);
    }

    #[test]
    fn test_invalid_toml_is_toml_error() {
        let err = Config::from_toml("[ffmpeg\nbinary_path = 1").unwrap_err();
        assert!(matches!(err, ConvertError::Toml(_)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ffconvert.toml");

        let mut config = Config::default();
        config.defaults.output_dir = Some(PathBuf::from("/tmp/out"));
        config.save_to_file(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.defaults.output_dir, Some(PathBuf::from("/tmp/out")));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let err = Config::load(Some(Path::new("/nonexistent/ffconvert.toml"))).unwrap_err();
        assert!(matches!(err, ConvertError::Config(_)));
    }
}
