use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ConvertError, Result};

/// Source of the input duration, used to turn elapsed time into a percentage
#[async_trait]
pub trait DurationProbe: Send + Sync {
    /// Duration in seconds
    async fn duration(&self, path: &Path) -> Result<f64>;
}

/// Container and stream facts for display
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaInfo {
    pub duration: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub bitrate: Option<u64>,
    pub size: u64,
    pub format: String,
    pub has_video: bool,
    pub has_audio: bool,
}

// Subset of `ffprobe -print_format json -show_format -show_streams`
#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

impl MediaInfo {
    /// Build from ffprobe's JSON output; `size` comes from the filesystem
    pub fn from_ffprobe_json(json: &str, size: u64) -> Result<Self> {
        let output: ProbeOutput = serde_json::from_str(json)?;

        let video = output.streams.iter().find(|s| s.codec_type.as_deref() == Some("video"));
        let audio = output.streams.iter().find(|s| s.codec_type.as_deref() == Some("audio"));

        let duration = [
            output.format.duration.as_deref(),
            video.and_then(|s| s.duration.as_deref()),
            audio.and_then(|s| s.duration.as_deref()),
        ]
        .into_iter()
        .flatten()
        .find_map(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

        let fps = video
            .and_then(|s| {
                s.r_frame_rate
                    .as_deref()
                    .and_then(parse_frame_rate)
                    .or_else(|| s.avg_frame_rate.as_deref().and_then(parse_frame_rate))
            })
            .filter(|fps| *fps > 0.0 && *fps < 1000.0);

        Ok(Self {
            duration,
            width: video.and_then(|s| s.width),
            height: video.and_then(|s| s.height),
            fps,
            video_codec: video.and_then(|s| s.codec_name.clone()),
            audio_codec: audio.and_then(|s| s.codec_name.clone()),
            bitrate: output.format.bit_rate.as_deref().and_then(|b| b.parse().ok()),
            size,
            format: output.format.format_name.unwrap_or_else(|| "unknown".to_string()),
            has_video: video.is_some(),
            has_audio: audio.is_some(),
        })
    }
}

/// `30000/1001` or `29.97`
fn parse_frame_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => rate.parse().ok(),
    }
}

/// ffprobe-backed prober
pub struct FfprobeProbe {
    binary_path: String,
}

impl FfprobeProbe {
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    /// Full media info; falls back to size-only info when ffprobe cannot read the file
    pub async fn media_info(&self, path: &Path) -> Result<MediaInfo> {
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|_| ConvertError::FileNotFound(path.display().to_string()))?
            .len();

        let json = self
            .run(&[
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ], path)
            .await;

        match json.and_then(|json| MediaInfo::from_ffprobe_json(&json, size)) {
            Ok(info) => Ok(info),
            Err(e) => {
                debug!("ffprobe could not read {}: {}", path.display(), e);
                Ok(MediaInfo {
                    size,
                    format: "unknown".to_string(),
                    ..MediaInfo::default()
                })
            }
        }
    }

    async fn run(&self, args: &[&str], path: &Path) -> Result<String> {
        let output = Command::new(&self.binary_path)
            .args(args)
            .arg(path)
            .output()
            .await
            .map_err(|e| ConvertError::Probe(format!("Failed to execute {}: {}", self.binary_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConvertError::Probe(format!("{} failed: {}", self.binary_path, stderr.trim())));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl DurationProbe for FfprobeProbe {
    async fn duration(&self, path: &Path) -> Result<f64> {
        let stdout = self
            .run(&[
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ], path)
            .await?;

        stdout
            .trim()
            .parse::<f64>()
            .map_err(|_| ConvertError::Probe(format!("Unreadable duration '{}'", stdout.trim())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
             "r_frame_rate": "30000/1001", "avg_frame_rate": "30000/1001"},
            {"codec_type": "audio", "codec_name": "aac", "duration": "12.0"}
        ],
        "format": {"duration": "12.345000", "bit_rate": "4500000", "format_name": "mov,mp4,m4a,3gp,3g2,mj2"}
    }"#;

    #[test]
    fn test_media_info_from_json() {
        let info = MediaInfo::from_ffprobe_json(SAMPLE, 2048).unwrap();
        assert_eq!(info.duration, 12.345);
        assert_eq!(info.width, Some(1920));
        assert_eq!(info.height, Some(1080));
        assert!((info.fps.unwrap() - 29.97).abs() < 0.01);
        assert_eq!(info.video_codec.as_deref(), Some("h264"));
        assert_eq!(info.audio_codec.as_deref(), Some("aac"));
        assert_eq!(info.bitrate, Some(4_500_000));
        assert_eq!(info.size, 2048);
        assert!(info.has_video && info.has_audio);
    }

    #[test]
    fn test_media_info_audio_only_uses_stream_duration() {
        let json = r#"{"streams": [{"codec_type": "audio", "codec_name": "flac", "duration": "61.5"}],
                       "format": {"format_name": "flac"}}"#;
        let info = MediaInfo::from_ffprobe_json(json, 10).unwrap();
        assert_eq!(info.duration, 61.5);
        assert!(!info.has_video);
        assert_eq!(info.fps, None);
        assert_eq!(info.format, "flac");
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("25/1"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("23.976"), Some(23.976));
    }

    #[tokio::test]
    async fn test_missing_probe_binary_is_probe_error() {
        let probe = FfprobeProbe::new("ffconvert-no-such-ffprobe");
        let err = probe.duration(Path::new("whatever.mp4")).await.unwrap_err();
        assert!(matches!(err, ConvertError::Probe(_)));
    }
}
