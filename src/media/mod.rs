// Media conversion pipeline
//
// - Presets: catalog of formats and quality/resolution/frame-rate choices
// - Commands: ffmpeg argument compilation
// - Progress: parsing of ffmpeg's stderr
// - Probe: duration and stream info via ffprobe
// - Runner: single-slot process supervision with cancellation

pub mod commands;
pub mod presets;
pub mod probe;
pub mod progress;
pub mod runner;

pub use commands::{CommandCompiler, ConversionConfig, MediaCommand, TrimSpec};
pub use presets::{FormatPreset, MediaKind};
pub use probe::{DurationProbe, FfprobeProbe, MediaInfo};
pub use progress::ProgressSnapshot;
pub use runner::{CancelHandle, ConversionResult, ConversionStatus, RunEvent, RunHandle, RunState, Runner};

use std::sync::Arc;

use crate::config::FfmpegConfig;
use crate::error::Result;

/// Starts supervised conversions
pub trait Transcoder: Send + Sync {
    /// Begin running `command`; events arrive on the returned handle
    fn start(&self, command: MediaCommand) -> Result<RunHandle>;
}

/// Factory for the ffmpeg-backed pipeline pieces
pub struct MediaFactory;

impl MediaFactory {
    pub fn compiler(config: &FfmpegConfig) -> CommandCompiler {
        CommandCompiler::new(config.binary_path.clone())
    }

    pub fn probe(config: &FfmpegConfig) -> Arc<FfprobeProbe> {
        Arc::new(FfprobeProbe::new(config.probe_path.clone()))
    }

    pub fn runner(config: &FfmpegConfig) -> Runner {
        Runner::new(Self::probe(config)).with_kill_grace(std::time::Duration::from_millis(config.kill_grace_ms))
    }
}
