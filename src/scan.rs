use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{ConvertError, Result};
use crate::media::presets::MediaKind;

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "avi", "mov", "wmv", "flv", "m4v", "mpg", "mpeg", "3gp", "3g2", "ogv", "ts", "mts",
    "m2ts", "vob", "divx", "xvid", "rm", "rmvb", "asf",
];

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "aac", "wav", "flac", "ogg", "m4a", "wma", "opus", "aiff", "aif", "ape", "alac", "dsd", "dsf", "dff",
    "mka", "ac3", "dts", "ra", "mid", "midi",
];

/// Video or audio, judged by extension
pub fn media_kind(path: &Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Audio)
    } else {
        None
    }
}

pub fn is_media_file(path: &Path) -> bool {
    media_kind(path).is_some()
}

/// Resolve command-line inputs into files to convert.
///
/// Files are taken as given, even without a media extension. Directories are walked
/// recursively and contribute their media files in sorted order. Duplicates are kept
/// once, at their first position.
pub fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && is_media_file(e.path()))
                .map(|e| e.into_path())
                .collect();
            found.sort();
            files.extend(found);
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            return Err(ConvertError::FileNotFound(input.display().to_string()));
        }
    }

    let mut seen = std::collections::HashSet::new();
    files.retain(|f| seen.insert(f.clone()));

    Ok(files)
}
