use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::batch::BatchSettings;
use crate::config::ConversionDefaults;
use crate::error::{ConvertError, Result};
use crate::media::{TrimSpec, presets};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path (defaults to ./ffconvert.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert files, or every media file under the given directories
    Convert {
        /// Input files or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        options: ConvertOptions,

        /// Write a JSON summary of the batch to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print the ffmpeg command that would be run for one file
    Preview {
        /// Input file
        input: PathBuf,

        #[command(flatten)]
        options: ConvertOptions,
    },

    /// List output formats and quality, resolution and frame-rate presets
    Formats,

    /// Show duration, streams and size of a media file
    Info {
        /// Input file
        input: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default configuration as TOML
    Config,
}

/// Conversion options; unset values fall back to the config file defaults
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Target format key (see `formats`)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Quality: low, medium, high, lossless
    #[arg(short, long)]
    pub quality: Option<String>,

    /// Resolution key (see `formats`)
    #[arg(long)]
    pub resolution: Option<String>,

    /// Frame rate key (see `formats`)
    #[arg(long)]
    pub fps: Option<String>,

    /// Trim start, H:MM:SS[.fraction]
    #[arg(long)]
    pub start: Option<String>,

    /// Trim end, H:MM:SS[.fraction]
    #[arg(long)]
    pub end: Option<String>,

    /// Drop the audio streams
    #[arg(long, conflicts_with = "no_video")]
    pub no_audio: bool,

    /// Drop the video streams
    #[arg(long)]
    pub no_video: bool,

    /// Output directory (defaults to each input's directory)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Extra ffmpeg arguments, placed before the output path
    #[arg(last = true, allow_hyphen_values = true)]
    pub extra_args: Vec<String>,
}

impl ConvertOptions {
    /// Overlay these options on the config defaults and check what can be checked early
    pub fn into_settings(self, defaults: &ConversionDefaults) -> Result<BatchSettings> {
        let mut settings = BatchSettings::from_defaults(defaults);

        if let Some(format) = self.format {
            settings.format = format;
        }
        if let Some(quality) = self.quality {
            settings.quality = quality;
        }
        if let Some(resolution) = self.resolution {
            settings.resolution = resolution;
        }
        if let Some(fps) = self.fps {
            settings.frame_rate = fps;
        }
        if self.output_dir.is_some() {
            settings.output_dir = self.output_dir;
        }

        settings.trim = TrimSpec::between(self.start, self.end);
        settings.trim.validate()?;
        settings.remove_audio = self.no_audio;
        settings.remove_video = self.no_video;
        settings.extra_args.extend(self.extra_args);

        if presets::format(&settings.format).is_none() {
            return Err(ConvertError::UnknownFormat(settings.format));
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_convert() {
        let args = Args::try_parse_from([
            "ffconvert", "-v", "convert", "a.mov", "dir", "-f", "webm", "-q", "high", "--fps", "30", "--start",
            "00:00:05", "--no-audio", "-o", "out", "--report", "r.json", "--", "-pix_fmt", "yuv420p",
        ])
        .unwrap();

        assert!(args.verbose);
        match args.command {
            Commands::Convert { inputs, options, report } => {
                assert_eq!(inputs, vec![PathBuf::from("a.mov"), PathBuf::from("dir")]);
                assert_eq!(options.format.as_deref(), Some("webm"));
                assert_eq!(options.quality.as_deref(), Some("high"));
                assert_eq!(options.fps.as_deref(), Some("30"));
                assert_eq!(options.start.as_deref(), Some("00:00:05"));
                assert!(options.no_audio);
                assert_eq!(options.output_dir, Some(PathBuf::from("out")));
                assert_eq!(options.extra_args, vec!["-pix_fmt", "yuv420p"]);
                assert_eq!(report, Some(PathBuf::from("r.json")));
            }
            _ => panic!("expected convert"),
        }
    }

    #[test]
    fn test_no_audio_conflicts_with_no_video() {
        assert!(Args::try_parse_from(["ffconvert", "convert", "a.mov", "--no-audio", "--no-video"]).is_err());
    }

    #[test]
    fn test_convert_requires_input() {
        assert!(Args::try_parse_from(["ffconvert", "convert"]).is_err());
    }

    #[test]
    fn test_options_override_defaults() {
        let defaults = ConversionDefaults {
            format: "mkv".to_string(),
            extra_args: vec!["-threads".to_string(), "2".to_string()],
            ..ConversionDefaults::default()
        };
        let options = ConvertOptions {
            quality: Some("low".to_string()),
            end: Some("00:01:00".to_string()),
            extra_args: vec!["-pix_fmt".to_string(), "yuv420p".to_string()],
            ..ConvertOptions::default()
        };

        let settings = options.into_settings(&defaults).unwrap();
        assert_eq!(settings.format, "mkv");
        assert_eq!(settings.quality, "low");
        assert!(settings.trim.enabled);
        assert_eq!(settings.trim.start, None);
        assert_eq!(settings.extra_args, vec!["-threads", "2", "-pix_fmt", "yuv420p"]);
    }

    #[test]
    fn test_options_reject_bad_timestamp_and_format() {
        let defaults = ConversionDefaults::default();

        let bad_time = ConvertOptions {
            start: Some("5s".to_string()),
            ..ConvertOptions::default()
        };
        assert!(matches!(bad_time.into_settings(&defaults), Err(ConvertError::InvalidTimestamp(_))));

        let bad_format = ConvertOptions {
            format: Some("betamax".to_string()),
            ..ConvertOptions::default()
        };
        assert!(matches!(bad_format.into_settings(&defaults), Err(ConvertError::UnknownFormat(_))));
    }
}
