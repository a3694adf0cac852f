use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use super::presets::{self, Codecs, FormatPreset, MediaKind, RateControl, VideoCodec};
use crate::error::{ConvertError, Result};

/// Interval, in seconds, at which ffmpeg refreshes its progress report
pub const STATS_PERIOD: &str = "0.5";

/// Extensions whose container benefits from moving the index to the front
const FASTSTART_EXTENSIONS: &[&str] = &[".mp4", ".m4v", ".mov"];

const GIF_DEFAULT_FPS: u32 = 15;
const GIF_DEFAULT_SCALE: &str = "480:-2";

/// Abstract media processing command representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Catalog key of the format this command was compiled against
    pub format_key: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
            input_path: PathBuf::new(),
            output_path: PathBuf::new(),
            format_key: String::new(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.input_path = path.as_ref().to_path_buf();
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.output_path = path.as_ref().to_path_buf();
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Set video codec
    pub fn video_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    /// Set audio codec
    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    pub fn audio_bitrate<S: Into<String>>(self, bitrate: S) -> Self {
        self.arg("-b:a").arg(bitrate)
    }

    /// Disable video
    pub fn no_video(self) -> Self {
        self.arg("-vn")
    }

    /// Disable audio
    pub fn no_audio(self) -> Self {
        self.arg("-an")
    }

    /// Set audio sample rate
    pub fn audio_sample_rate(self, rate: u32) -> Self {
        self.arg("-ar").arg(rate.to_string())
    }

    /// Add video filter
    pub fn video_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-vf").arg(filter)
    }

    /// Ask ffmpeg for machine-readable progress on stderr
    pub fn progress_to_stderr(self) -> Self {
        self.arg("-progress")
            .arg("pipe:2")
            .arg("-stats_period")
            .arg(STATS_PERIOD)
    }

    fn format_key<S: Into<String>>(mut self, key: S) -> Self {
        self.format_key = key.into();
        self
    }
}

impl fmt::Display for MediaCommand {
    /// Shell-like rendering for logs and previews; whitespace-bearing tokens are quoted
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.binary_path)?;
        for arg in &self.args {
            if arg.chars().any(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Optional cut of the input, timestamps in `H:MM:SS[.fraction]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimSpec {
    pub enabled: bool,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl TrimSpec {
    /// Build an enabled trim when either bound is present
    pub fn between(start: Option<String>, end: Option<String>) -> Self {
        Self {
            enabled: start.is_some() || end.is_some(),
            start,
            end,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for ts in self.start.iter().chain(self.end.iter()) {
            if !is_valid_timestamp(ts) {
                return Err(ConvertError::InvalidTimestamp(ts.clone()));
            }
        }
        Ok(())
    }
}

/// `H:MM:SS` with an optional fraction of any length; hours may exceed two digits
pub fn is_valid_timestamp(ts: &str) -> bool {
    let (clock, fraction) = match ts.split_once('.') {
        Some((clock, fraction)) => (clock, Some(fraction)),
        None => (ts, None),
    };
    if let Some(fraction) = fraction {
        if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
    }

    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() != 3 || !parts.iter().all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit())) {
        return false;
    }
    let two_digit_below_60 = |p: &str| p.len() == 2 && p.parse::<u32>().map_or(false, |v| v < 60);
    two_digit_below_60(parts[1]) && two_digit_below_60(parts[2])
}

/// Everything needed to compile one ffmpeg invocation for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub format: String,
    pub quality: String,
    pub resolution: String,
    pub frame_rate: String,
    pub trim: TrimSpec,
    pub remove_audio: bool,
    pub remove_video: bool,
    /// Appended verbatim before the output path
    pub extra_args: Vec<String>,
}

impl ConversionConfig {
    /// Config with the sentinel defaults: medium quality, original resolution and frame rate
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>, S: Into<String>>(input: P, output: Q, format: S) -> Self {
        Self {
            input_path: input.into(),
            output_path: output.into(),
            format: format.into(),
            quality: presets::DEFAULT_QUALITY.to_string(),
            resolution: presets::ORIGINAL.to_string(),
            frame_rate: presets::ORIGINAL.to_string(),
            trim: TrimSpec::default(),
            remove_audio: false,
            remove_video: false,
            extra_args: Vec::new(),
        }
    }
}

/// Compiles a [`ConversionConfig`] into an ffmpeg [`MediaCommand`]
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    binary_path: String,
}

impl CommandCompiler {
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    pub fn compile(&self, config: &ConversionConfig) -> Result<MediaCommand> {
        let format = presets::format(&config.format)
            .ok_or_else(|| ConvertError::UnknownFormat(config.format.clone()))?;
        let resolution = presets::resolution(&config.resolution)
            .ok_or_else(|| ConvertError::UnknownResolution(config.resolution.clone()))?;
        let frame_rate = presets::frame_rate(&config.frame_rate)
            .ok_or_else(|| ConvertError::UnknownFrameRate(config.frame_rate.clone()))?;

        let mut cmd = MediaCommand::new(&self.binary_path, describe(config, format))
            .format_key(format.key)
            .overwrite();

        let trim = &config.trim;
        if trim.enabled {
            if let Some(start) = &trim.start {
                // Before -i: input seeking is fast
                cmd = cmd.arg("-ss").arg(start.as_str());
            }
        }

        cmd = cmd.input(&config.input_path);

        if trim.enabled {
            if let Some(end) = &trim.end {
                // After -i: output-side cut is frame accurate
                cmd = cmd.arg("-to").arg(end.as_str());
            }
        }

        cmd = match format.codecs {
            Codecs::Video { video, audio } => {
                let quality = presets::video_quality(&config.quality).ok_or_else(|| {
                    ConvertError::UnknownQuality {
                        key: config.quality.clone(),
                        kind: MediaKind::Video,
                    }
                })?;
                let scale = resolution.scale;
                let fps = frame_rate.fps;

                if video == VideoCodec::Gif {
                    gif_args(cmd, scale, fps)
                } else if config.remove_video {
                    let cmd = cmd.no_video();
                    match audio {
                        Some(audio) => cmd.audio_codec(audio.name()).audio_bitrate(quality.audio_bitrate),
                        None => cmd,
                    }
                } else {
                    video_args(cmd, config, format, video, audio, quality, scale, fps)
                }
            }
            Codecs::Audio { audio } => {
                let quality = presets::audio_quality(&config.quality).ok_or_else(|| {
                    ConvertError::UnknownQuality {
                        key: config.quality.clone(),
                        kind: MediaKind::Audio,
                    }
                })?;

                let mut cmd = cmd.no_video().audio_codec(audio.name());
                if let Some(bitrate) = quality.bitrate {
                    cmd = cmd.audio_bitrate(bitrate);
                }
                if let Some(rate) = audio.required_sample_rate() {
                    cmd = cmd.audio_sample_rate(rate);
                }
                cmd
            }
        };

        Ok(cmd
            .args(config.extra_args.iter().cloned())
            .progress_to_stderr()
            .output(&config.output_path))
    }
}

#[allow(clippy::too_many_arguments)]
fn video_args(
    cmd: MediaCommand,
    config: &ConversionConfig,
    format: &FormatPreset,
    video: VideoCodec,
    audio: Option<presets::AudioCodec>,
    quality: &presets::VideoQuality,
    scale: Option<&str>,
    fps: Option<u32>,
) -> MediaCommand {
    let mut cmd = cmd.video_codec(video.name());

    cmd = match video.rate_control() {
        RateControl::Crf => cmd
            .arg("-crf")
            .arg(quality.crf.to_string())
            .arg("-preset")
            .arg(quality.preset)
            .arg("-pix_fmt")
            .arg("yuv420p"),
        RateControl::ScaledCrf => {
            let cq_level = quality.crf * 3 / 2;
            cmd.arg("-crf").arg(cq_level.to_string()).arg("-b:v").arg("0")
        }
        RateControl::CrfWithEffort => cmd
            .arg("-crf")
            .arg(quality.crf.to_string())
            .arg("-cpu-used")
            .arg(cpu_used(quality.preset)),
        RateControl::EncoderDefault | RateControl::AnimatedImage => cmd,
    };

    let mut filters = Vec::new();
    if let Some(scale) = scale {
        filters.push(format!("scale={}", scale));
    }
    if let Some(fps) = fps {
        filters.push(format!("fps={}", fps));
    }
    if !filters.is_empty() {
        cmd = cmd.video_filter(filters.join(","));
    }

    if config.remove_audio {
        cmd = cmd.no_audio();
    } else if let Some(audio) = audio {
        cmd = cmd.audio_codec(audio.name()).audio_bitrate(quality.audio_bitrate);
    }

    if FASTSTART_EXTENSIONS.contains(&format.ext) {
        cmd = cmd.arg("-movflags").arg("+faststart");
    }

    cmd
}

/// Palette-generating filter graph; never touches audio or rate control
fn gif_args(cmd: MediaCommand, scale: Option<&str>, fps: Option<u32>) -> MediaCommand {
    let fps = fps.unwrap_or(GIF_DEFAULT_FPS);
    let scale = scale.unwrap_or(GIF_DEFAULT_SCALE);

    cmd.video_filter(format!(
        "fps={},scale={}:flags=lanczos,split[s0][s1];[s0]palettegen=max_colors=256:stats_mode=diff[p];[s1][p]paletteuse=dither=bayer:bayer_scale=5:diff_mode=rectangle",
        fps, scale
    ))
    .arg("-loop")
    .arg("0")
}

/// libaom effort level from an x264-style preset name
fn cpu_used(preset: &str) -> &'static str {
    match preset {
        "veryslow" => "2",
        "slow" => "4",
        _ => "6",
    }
}

fn describe(config: &ConversionConfig, format: &FormatPreset) -> String {
    let mut parts = vec![format!("Convert to {}", format.label)];

    if config.quality != presets::DEFAULT_QUALITY {
        parts.push(format!("({} quality)", config.quality));
    }
    if config.resolution != presets::ORIGINAL {
        let label = presets::resolution(&config.resolution).map_or(config.resolution.as_str(), |r| r.label);
        parts.push(format!("at {}", label));
    }
    if config.frame_rate != presets::ORIGINAL {
        match presets::frame_rate(&config.frame_rate).and_then(|r| r.fps) {
            Some(fps) => parts.push(format!("{} FPS", fps)),
            None => parts.push(format!("{} FPS", config.frame_rate)),
        }
    }
    if config.trim.enabled {
        parts.push("(trimmed)".to_string());
    }
    if config.remove_audio {
        parts.push("(no audio)".to_string());
    }
    if config.remove_video {
        parts.push("(audio only)".to_string());
    }

    parts.join(" ")
}
