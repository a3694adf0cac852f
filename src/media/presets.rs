//! Static preset catalog: output formats, quality levels, resolutions and frame rates.
//!
//! Everything here is `'static` data. Lookups return `Option` and the command
//! compiler turns a miss into a typed error.

use serde::Serialize;
use std::fmt;

/// Whether a format produces a video or an audio-only container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => f.write_str("video"),
            MediaKind::Audio => f.write_str("audio"),
        }
    }
}

/// Video encoders known to the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    X264,
    X265,
    Vp9,
    Av1,
    Xvid,
    Wmv2,
    Flv1,
    Gif,
}

/// How an encoder consumes the quality preset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateControl {
    /// `-crf` and `-preset` taken as-is
    Crf,
    /// `-crf` scaled up, target bitrate pinned to zero
    ScaledCrf,
    /// `-crf` plus a numeric `-cpu-used` effort level
    CrfWithEffort,
    /// Encoder defaults, no quality flags
    EncoderDefault,
    /// Palette-based animated image
    AnimatedImage,
}

impl VideoCodec {
    pub fn name(&self) -> &'static str {
        match self {
            VideoCodec::X264 => "libx264",
            VideoCodec::X265 => "libx265",
            VideoCodec::Vp9 => "libvpx-vp9",
            VideoCodec::Av1 => "libaom-av1",
            VideoCodec::Xvid => "libxvid",
            VideoCodec::Wmv2 => "wmv2",
            VideoCodec::Flv1 => "flv1",
            VideoCodec::Gif => "gif",
        }
    }

    pub fn rate_control(&self) -> RateControl {
        match self {
            VideoCodec::X264 | VideoCodec::X265 => RateControl::Crf,
            VideoCodec::Vp9 => RateControl::ScaledCrf,
            VideoCodec::Av1 => RateControl::CrfWithEffort,
            VideoCodec::Xvid | VideoCodec::Wmv2 | VideoCodec::Flv1 => RateControl::EncoderDefault,
            VideoCodec::Gif => RateControl::AnimatedImage,
        }
    }
}

/// Audio encoders known to the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCodec {
    Mp3Lame,
    Aac,
    PcmS16le,
    PcmS16be,
    Flac,
    Vorbis,
    Opus,
    Wmav2,
    Alac,
}

impl AudioCodec {
    pub fn name(&self) -> &'static str {
        match self {
            AudioCodec::Mp3Lame => "libmp3lame",
            AudioCodec::Aac => "aac",
            AudioCodec::PcmS16le => "pcm_s16le",
            AudioCodec::PcmS16be => "pcm_s16be",
            AudioCodec::Flac => "flac",
            AudioCodec::Vorbis => "libvorbis",
            AudioCodec::Opus => "libopus",
            AudioCodec::Wmav2 => "wmav2",
            AudioCodec::Alac => "alac",
        }
    }

    /// Sample rate the encoder must be forced to, if any
    pub fn required_sample_rate(&self) -> Option<u32> {
        match self {
            AudioCodec::Opus => Some(48_000),
            _ => None,
        }
    }
}

/// Codec selection, tagged by media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codecs {
    Video {
        video: VideoCodec,
        audio: Option<AudioCodec>,
    },
    Audio {
        audio: AudioCodec,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatPreset {
    pub key: &'static str,
    pub label: &'static str,
    /// Target extension including the leading dot
    pub ext: &'static str,
    pub codecs: Codecs,
    pub description: Option<&'static str>,
}

impl FormatPreset {
    pub fn kind(&self) -> MediaKind {
        match self.codecs {
            Codecs::Video { .. } => MediaKind::Video,
            Codecs::Audio { .. } => MediaKind::Audio,
        }
    }

    pub fn audio_codec(&self) -> Option<AudioCodec> {
        match self.codecs {
            Codecs::Video { audio, .. } => audio,
            Codecs::Audio { audio } => Some(audio),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoQuality {
    pub key: &'static str,
    pub label: &'static str,
    pub crf: u32,
    pub preset: &'static str,
    pub audio_bitrate: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioQuality {
    pub key: &'static str,
    pub label: &'static str,
    /// `None` for lossless output
    pub bitrate: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionPreset {
    pub key: &'static str,
    pub label: &'static str,
    pub scale: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRatePreset {
    pub key: &'static str,
    pub label: &'static str,
    pub fps: Option<u32>,
}

pub const DEFAULT_QUALITY: &str = "medium";
pub const ORIGINAL: &str = "original";

const fn video(
    key: &'static str,
    label: &'static str,
    ext: &'static str,
    video: VideoCodec,
    audio: Option<AudioCodec>,
    description: &'static str,
) -> FormatPreset {
    FormatPreset {
        key,
        label,
        ext,
        codecs: Codecs::Video { video, audio },
        description: Some(description),
    }
}

const fn audio(
    key: &'static str,
    label: &'static str,
    ext: &'static str,
    audio: AudioCodec,
    description: &'static str,
) -> FormatPreset {
    FormatPreset {
        key,
        label,
        ext,
        codecs: Codecs::Audio { audio },
        description: Some(description),
    }
}

pub static FORMATS: &[FormatPreset] = &[
    video("mp4", "MP4 (H.264)", ".mp4", VideoCodec::X264, Some(AudioCodec::Aac), "Most compatible video format"),
    video("mp4_h265", "MP4 (H.265/HEVC)", ".mp4", VideoCodec::X265, Some(AudioCodec::Aac), "Better compression, less compatible"),
    video("mkv", "MKV (Matroska)", ".mkv", VideoCodec::X264, Some(AudioCodec::Aac), "Flexible container, great for archiving"),
    video("webm", "WebM (VP9)", ".webm", VideoCodec::Vp9, Some(AudioCodec::Opus), "Open format, good for web"),
    video("webm_av1", "WebM (AV1)", ".webm", VideoCodec::Av1, Some(AudioCodec::Opus), "Best compression, very slow encoding"),
    video("avi", "AVI", ".avi", VideoCodec::Xvid, Some(AudioCodec::Mp3Lame), "Legacy format, widely supported"),
    video("mov", "MOV (QuickTime)", ".mov", VideoCodec::X264, Some(AudioCodec::Aac), "Apple QuickTime format"),
    video("wmv", "WMV (Windows Media)", ".wmv", VideoCodec::Wmv2, Some(AudioCodec::Wmav2), "Windows Media format"),
    video("flv", "FLV (Flash Video)", ".flv", VideoCodec::Flv1, Some(AudioCodec::Mp3Lame), "Flash video format (legacy)"),
    video("gif", "GIF (Animated)", ".gif", VideoCodec::Gif, None, "Animated image, no audio"),
    video("ts", "MPEG-TS", ".ts", VideoCodec::X264, Some(AudioCodec::Aac), "Transport stream for broadcasting"),
    audio("mp3", "MP3", ".mp3", AudioCodec::Mp3Lame, "Most compatible audio format"),
    audio("aac", "AAC", ".aac", AudioCodec::Aac, "Better quality than MP3 at same bitrate"),
    audio("m4a", "M4A (AAC)", ".m4a", AudioCodec::Aac, "AAC in MPEG-4 container"),
    audio("wav", "WAV (Lossless)", ".wav", AudioCodec::PcmS16le, "Uncompressed audio, large files"),
    audio("flac", "FLAC (Lossless)", ".flac", AudioCodec::Flac, "Lossless compression"),
    audio("ogg", "OGG Vorbis", ".ogg", AudioCodec::Vorbis, "Open audio format"),
    audio("opus", "Opus", ".opus", AudioCodec::Opus, "Best quality at low bitrates"),
    audio("wma", "WMA", ".wma", AudioCodec::Wmav2, "Windows Media Audio"),
    audio("aiff", "AIFF (Lossless)", ".aiff", AudioCodec::PcmS16be, "Apple uncompressed audio"),
    audio("alac", "ALAC (Apple Lossless)", ".m4a", AudioCodec::Alac, "Apple lossless compression"),
];

pub static VIDEO_QUALITY: &[VideoQuality] = &[
    VideoQuality { key: "low", label: "Low (Fast, Small)", crf: 30, preset: "faster", audio_bitrate: "96k" },
    VideoQuality { key: "medium", label: "Medium (Balanced)", crf: 23, preset: "medium", audio_bitrate: "160k" },
    VideoQuality { key: "high", label: "High (Better Quality)", crf: 18, preset: "slow", audio_bitrate: "256k" },
    VideoQuality { key: "lossless", label: "Lossless (Very Large)", crf: 0, preset: "veryslow", audio_bitrate: "320k" },
];

pub static AUDIO_QUALITY: &[AudioQuality] = &[
    AudioQuality { key: "low", label: "Low (96 kbps)", bitrate: Some("96k") },
    AudioQuality { key: "medium", label: "Medium (192 kbps)", bitrate: Some("192k") },
    AudioQuality { key: "high", label: "High (320 kbps)", bitrate: Some("320k") },
    AudioQuality { key: "lossless", label: "Lossless", bitrate: None },
];

pub static RESOLUTIONS: &[ResolutionPreset] = &[
    ResolutionPreset { key: "original", label: "Original", scale: None },
    ResolutionPreset { key: "4k", label: "4K (2160p)", scale: Some("3840:-2") },
    ResolutionPreset { key: "1440p", label: "1440p (QHD)", scale: Some("2560:-2") },
    ResolutionPreset { key: "1080p", label: "1080p (Full HD)", scale: Some("1920:-2") },
    ResolutionPreset { key: "720p", label: "720p (HD)", scale: Some("1280:-2") },
    ResolutionPreset { key: "480p", label: "480p (SD)", scale: Some("854:-2") },
    ResolutionPreset { key: "360p", label: "360p (Mobile)", scale: Some("640:-2") },
    ResolutionPreset { key: "240p", label: "240p (Low)", scale: Some("426:-2") },
];

pub static FRAME_RATES: &[FrameRatePreset] = &[
    FrameRatePreset { key: "original", label: "Original", fps: None },
    FrameRatePreset { key: "60", label: "60 FPS (Smooth)", fps: Some(60) },
    FrameRatePreset { key: "30", label: "30 FPS (Standard)", fps: Some(30) },
    FrameRatePreset { key: "24", label: "24 FPS (Film)", fps: Some(24) },
    FrameRatePreset { key: "15", label: "15 FPS (GIF)", fps: Some(15) },
    FrameRatePreset { key: "10", label: "10 FPS (Low)", fps: Some(10) },
];

pub fn format(key: &str) -> Option<&'static FormatPreset> {
    FORMATS.iter().find(|f| f.key == key)
}

/// Formats of one media kind, in catalog order
pub fn formats_of(kind: MediaKind) -> impl Iterator<Item = &'static FormatPreset> {
    FORMATS.iter().filter(move |f| f.kind() == kind)
}

/// First format writing the given extension; accepts `mp4`, `.mp4`, `.MP4`
pub fn format_by_extension(ext: &str) -> Option<&'static FormatPreset> {
    let ext = ext.to_lowercase();
    let normalized = if ext.starts_with('.') { ext } else { format!(".{}", ext) };
    FORMATS.iter().find(|f| f.ext == normalized)
}

pub fn video_quality(key: &str) -> Option<&'static VideoQuality> {
    VIDEO_QUALITY.iter().find(|q| q.key == key)
}

pub fn audio_quality(key: &str) -> Option<&'static AudioQuality> {
    AUDIO_QUALITY.iter().find(|q| q.key == key)
}

pub fn resolution(key: &str) -> Option<&'static ResolutionPreset> {
    RESOLUTIONS.iter().find(|r| r.key == key)
}

pub fn frame_rate(key: &str) -> Option<&'static FrameRatePreset> {
    FRAME_RATES.iter().find(|r| r.key == key)
}
