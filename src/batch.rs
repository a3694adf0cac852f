//! Sequential conversion of a list of files.
//!
//! One run at a time goes through the [`Transcoder`]. Each input gets exactly one
//! [`ConversionResult`] unless the batch is cancelled before reaching it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ConversionDefaults;
use crate::error::Result;
use crate::media::presets::ORIGINAL;
use crate::media::{
    CancelHandle, CommandCompiler, ConversionConfig, ConversionResult, ConversionStatus, RunEvent, Transcoder,
    TrimSpec, presets,
};

/// Conversion options shared by every file of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    pub format: String,
    pub quality: String,
    pub resolution: String,
    pub frame_rate: String,
    pub trim: TrimSpec,
    pub remove_audio: bool,
    pub remove_video: bool,
    /// Defaults to each input's own directory
    pub output_dir: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl BatchSettings {
    pub fn new<S: Into<String>>(format: S) -> Self {
        Self {
            format: format.into(),
            quality: presets::DEFAULT_QUALITY.to_string(),
            resolution: ORIGINAL.to_string(),
            frame_rate: ORIGINAL.to_string(),
            trim: TrimSpec::default(),
            remove_audio: false,
            remove_video: false,
            output_dir: None,
            extra_args: Vec::new(),
        }
    }

    pub fn from_defaults(defaults: &ConversionDefaults) -> Self {
        Self {
            quality: defaults.quality.clone(),
            resolution: defaults.resolution.clone(),
            frame_rate: defaults.frame_rate.clone(),
            output_dir: defaults.output_dir.clone(),
            extra_args: defaults.extra_args.clone(),
            ..Self::new(defaults.format.clone())
        }
    }

    /// Target extension with the leading dot, falling back to the format key
    fn extension(&self) -> String {
        presets::format(&self.format)
            .map(|f| f.ext.to_string())
            .unwrap_or_else(|| format!(".{}", self.format))
    }

    pub fn output_path_for(&self, input: &Path) -> PathBuf {
        derive_output_path(input, self.output_dir.as_deref(), &self.extension())
    }

    pub fn conversion_config(&self, input: &Path, output: &Path) -> ConversionConfig {
        ConversionConfig {
            quality: self.quality.clone(),
            resolution: self.resolution.clone(),
            frame_rate: self.frame_rate.clone(),
            trim: self.trim.clone(),
            remove_audio: self.remove_audio,
            remove_video: self.remove_video,
            extra_args: self.extra_args.clone(),
            ..ConversionConfig::new(input, output, self.format.clone())
        }
    }
}

/// `<dir>/<stem><ext>`, where `dir` is `output_dir` or the input's directory.
///
/// A `_converted` suffix is added to the stem when the result would overwrite the input.
pub fn derive_output_path(input: &Path, output_dir: Option<&Path>, ext: &str) -> PathBuf {
    let dir = match output_dir {
        Some(dir) => dir.to_path_buf(),
        None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());

    let candidate = dir.join(format!("{}{}", stem, ext));
    if candidate == input {
        dir.join(format!("{}_converted{}", stem, ext))
    } else {
        candidate
    }
}

#[derive(Debug, Default)]
struct ControlState {
    cancelled: AtomicBool,
    // index + 1 of the file being converted, 0 when idle
    current: AtomicUsize,
    active: Mutex<Option<CancelHandle>>,
}

/// Cloneable remote control for a running batch
#[derive(Debug, Clone, Default)]
pub struct BatchControl {
    inner: Arc<ControlState>,
}

impl BatchControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop after the current file and cancel its run
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        if let Some(handle) = self.active().as_ref() {
            handle.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Zero-based index of the file in progress
    pub fn current_index(&self) -> Option<usize> {
        self.inner.current.load(Ordering::SeqCst).checked_sub(1)
    }

    fn active(&self) -> std::sync::MutexGuard<'_, Option<CancelHandle>> {
        self.inner.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self, index: usize) {
        self.inner.current.store(index + 1, Ordering::SeqCst);
    }

    fn attach(&self, handle: CancelHandle) {
        *self.active() = Some(handle);
        // A cancel that landed between the flag check and attach still reaches the run
        if self.is_cancelled() {
            if let Some(handle) = self.active().as_ref() {
                handle.cancel();
            }
        }
    }

    fn finish(&self) {
        *self.active() = None;
        self.inner.current.store(0, Ordering::SeqCst);
    }
}

/// Run event tagged with its position in the batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEvent {
    pub index: usize,
    pub total: usize,
    pub event: RunEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub status: BatchStatus,
    /// In input order; files skipped by a cancel have no entry
    pub results: Vec<ConversionResult>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl BatchOutcome {
    pub fn count(&self, status: ConversionStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn failed_count(&self) -> usize {
        self.count(ConversionStatus::Failed)
    }

    pub fn report(&self) -> BatchReport {
        BatchReport {
            id: Uuid::new_v4(),
            started_at: self.started_at,
            elapsed_secs: self.elapsed.as_secs_f64(),
            status: self.status,
            completed: self.count(ConversionStatus::Completed),
            failed: self.failed_count(),
            cancelled: self.count(ConversionStatus::Cancelled),
            files: self.results.iter().map(FileReport::from).collect(),
        }
    }
}

/// Machine-readable summary of a batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub status: BatchStatus,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub files: Vec<FileReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub status: ConversionStatus,
    pub elapsed_secs: f64,
    pub output_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ConversionResult> for FileReport {
    fn from(result: &ConversionResult) -> Self {
        Self {
            input: result.input_path.clone(),
            output: result.output_path.clone(),
            status: result.status,
            elapsed_secs: result.elapsed.as_secs_f64(),
            output_size: result.output_size,
            error: result.error.clone(),
        }
    }
}

impl BatchReport {
    pub async fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

/// Aggregate status: cancelled, then all completed, then all failed, else completed
pub fn aggregate_status(cancelled: bool, results: &[ConversionResult]) -> BatchStatus {
    if cancelled {
        BatchStatus::Cancelled
    } else if results.iter().all(|r| r.status == ConversionStatus::Completed) {
        BatchStatus::Completed
    } else if results.iter().all(|r| r.status == ConversionStatus::Failed) {
        BatchStatus::Failed
    } else {
        BatchStatus::Completed
    }
}

pub struct BatchConverter<T: Transcoder> {
    transcoder: T,
    compiler: CommandCompiler,
    settings: BatchSettings,
    control: BatchControl,
}

impl<T: Transcoder> BatchConverter<T> {
    pub fn new(transcoder: T, compiler: CommandCompiler, settings: BatchSettings) -> Self {
        Self {
            transcoder,
            compiler,
            settings,
            control: BatchControl::new(),
        }
    }

    pub fn with_control(mut self, control: BatchControl) -> Self {
        self.control = control;
        self
    }

    pub fn control(&self) -> BatchControl {
        self.control.clone()
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Convert `inputs` one after another, forwarding every run event to `events`
    pub async fn run(
        &self,
        inputs: &[PathBuf],
        events: Option<&mpsc::UnboundedSender<BatchEvent>>,
    ) -> BatchOutcome {
        let started_at = Utc::now();
        let clock = Instant::now();
        let total = inputs.len();
        let mut results = Vec::with_capacity(total);

        info!("Starting batch of {} file(s) to {}", total, self.settings.format);

        for (index, input) in inputs.iter().enumerate() {
            if self.control.is_cancelled() {
                info!("Batch cancelled, skipping remaining {} file(s)", total - index);
                break;
            }

            self.control.begin(index);
            info!("Converting file {}/{}: {}", index + 1, total, input.display());
            let result = self.convert_one(index, total, input, events).await;
            self.control.finish();

            results.push(result);
        }

        let status = aggregate_status(self.control.is_cancelled(), &results);
        let outcome = BatchOutcome {
            status,
            results,
            started_at,
            elapsed: clock.elapsed(),
        };
        info!(
            "Batch finished: {:?} ({} failed of {})",
            outcome.status,
            outcome.failed_count(),
            outcome.results.len()
        );
        outcome
    }

    async fn convert_one(
        &self,
        index: usize,
        total: usize,
        input: &Path,
        events: Option<&mpsc::UnboundedSender<BatchEvent>>,
    ) -> ConversionResult {
        let forward = |event: RunEvent| {
            if let Some(events) = events {
                let _ = events.send(BatchEvent { index, total, event });
            }
        };

        let output = self.settings.output_path_for(input);
        let config = self.settings.conversion_config(input, &output);

        let started = self
            .compiler
            .compile(&config)
            .and_then(|command| self.transcoder.start(command));
        let mut handle = match started {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Cannot convert {}: {}", input.display(), e);
                let result = ConversionResult::failed(input.to_path_buf(), output, Duration::ZERO, e.to_string());
                forward(RunEvent::Failed(result.clone()));
                return result;
            }
        };

        self.control.attach(handle.cancel_handle());

        while let Some(event) = handle.next_event().await {
            if events.is_some() {
                forward(event.clone());
            }
            if let Some(result) = event.into_result() {
                return result;
            }
        }

        ConversionResult::failed(
            input.to_path_buf(),
            output,
            Duration::ZERO,
            "Conversion task ended without reporting a result",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvertError;
    use crate::media::{MediaCommand, ProgressSnapshot, RunHandle};

    /// Replays a scripted outcome for each call to `start`
    struct FakeTranscoder {
        outcomes: Vec<ConversionStatus>,
        calls: AtomicUsize,
        cancel_during: Option<(usize, BatchControl)>,
        // Cancels the batch once this call's run has already completed
        cancel_after: Option<(usize, BatchControl)>,
        handles: Mutex<Vec<CancelHandle>>,
    }

    impl FakeTranscoder {
        fn new(outcomes: Vec<ConversionStatus>) -> Self {
            Self {
                outcomes,
                calls: AtomicUsize::new(0),
                cancel_during: None,
                cancel_after: None,
                handles: Mutex::new(Vec::new()),
            }
        }
    }

    impl Transcoder for FakeTranscoder {
        fn start(&self, command: MediaCommand) -> Result<RunHandle> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded_channel();
            let cancel = CancelHandle::new();
            self.handles.lock().unwrap().push(cancel.clone());

            tx.send(RunEvent::Started {
                command_line: command.to_string(),
            })
            .unwrap();
            tx.send(RunEvent::Progress(ProgressSnapshot {
                time: 1.0,
                percent: 50.0,
                ..ProgressSnapshot::default()
            }))
            .unwrap();

            let mut status = self.outcomes[call];
            if let Some((index, control)) = &self.cancel_during {
                if *index == call {
                    control.cancel();
                    status = ConversionStatus::Cancelled;
                }
            }

            if let Some((index, control)) = &self.cancel_after {
                if *index == call {
                    control.cancel();
                }
            }

            let result = ConversionResult {
                input_path: command.input_path.clone(),
                output_path: command.output_path.clone(),
                status,
                elapsed: Duration::from_millis(10),
                output_size: if status == ConversionStatus::Completed { 100 } else { 0 },
                error: (status == ConversionStatus::Failed).then(|| "No such file or directory".to_string()),
            };
            tx.send(match status {
                ConversionStatus::Completed => RunEvent::Completed(result),
                ConversionStatus::Failed => RunEvent::Failed(result),
                ConversionStatus::Cancelled => RunEvent::Cancelled(result),
            })
            .unwrap();

            Ok(RunHandle::new(rx, cancel, command.input_path, command.output_path))
        }
    }

    struct BusyTranscoder;

    impl Transcoder for BusyTranscoder {
        fn start(&self, _command: MediaCommand) -> Result<RunHandle> {
            Err(ConvertError::Busy)
        }
    }

    fn inputs(n: usize) -> Vec<PathBuf> {
        (1..=n).map(|i| PathBuf::from(format!("/media/clip{}.mov", i))).collect()
    }

    fn converter<T: Transcoder>(transcoder: T, format: &str) -> BatchConverter<T> {
        BatchConverter::new(transcoder, CommandCompiler::new("ffmpeg"), BatchSettings::new(format))
    }

    #[test]
    fn test_derive_output_path() {
        assert_eq!(
            derive_output_path(Path::new("/a/b/movie.mkv"), None, ".mp4"),
            PathBuf::from("/a/b/movie.mp4")
        );
        assert_eq!(
            derive_output_path(Path::new("/a/b/movie.mkv"), Some(Path::new("/out")), ".mp3"),
            PathBuf::from("/out/movie.mp3")
        );
        assert_eq!(derive_output_path(Path::new("song.wav"), None, ".flac"), PathBuf::from("song.flac"));
    }

    #[test]
    fn test_derive_output_path_avoids_overwriting_input() {
        assert_eq!(
            derive_output_path(Path::new("/a/movie.mp4"), None, ".mp4"),
            PathBuf::from("/a/movie_converted.mp4")
        );
        assert_eq!(
            derive_output_path(Path::new("/a/movie.mp4"), Some(Path::new("/a")), ".mp4"),
            PathBuf::from("/a/movie_converted.mp4")
        );
    }

    #[test]
    fn test_settings_from_defaults() {
        let defaults = ConversionDefaults {
            format: "webm".to_string(),
            quality: "high".to_string(),
            output_dir: Some(PathBuf::from("/out")),
            ..ConversionDefaults::default()
        };
        let settings = BatchSettings::from_defaults(&defaults);
        let config = settings.conversion_config(Path::new("/in/a.mov"), &settings.output_path_for(Path::new("/in/a.mov")));

        assert_eq!(config.format, "webm");
        assert_eq!(config.quality, "high");
        assert_eq!(config.resolution, "original");
        assert_eq!(config.output_path, PathBuf::from("/out/a.webm"));
    }

    #[test]
    fn test_aggregate_status() {
        let result = |status| ConversionResult {
            input_path: PathBuf::new(),
            output_path: PathBuf::new(),
            status,
            elapsed: Duration::ZERO,
            output_size: 0,
            error: None,
        };
        use ConversionStatus::*;

        assert_eq!(aggregate_status(false, &[]), BatchStatus::Completed);
        assert_eq!(aggregate_status(false, &[result(Completed)]), BatchStatus::Completed);
        assert_eq!(aggregate_status(false, &[result(Failed), result(Failed)]), BatchStatus::Failed);
        assert_eq!(aggregate_status(false, &[result(Completed), result(Failed)]), BatchStatus::Completed);
        assert_eq!(aggregate_status(true, &[result(Completed)]), BatchStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_failure_in_middle_keeps_going() {
        use ConversionStatus::*;
        let batch = converter(FakeTranscoder::new(vec![Completed, Failed, Completed]), "mp4");
        let files = inputs(3);

        let outcome = batch.run(&files, None).await;

        assert_eq!(outcome.status, BatchStatus::Completed);
        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.failed_count(), 1);
        let statuses: Vec<_> = outcome.results.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![Completed, Failed, Completed]);
        for (result, input) in outcome.results.iter().zip(&files) {
            assert_eq!(&result.input_path, input);
            assert_eq!(result.output_path, input.with_extension("mp4"));
        }
        assert_eq!(
            outcome.results[1].error.as_deref(),
            Some("No such file or directory")
        );
    }

    #[tokio::test]
    async fn test_cancel_after_first_file_completes_stops_batch() {
        use ConversionStatus::*;
        let control = BatchControl::new();
        let mut fake = FakeTranscoder::new(vec![Completed, Completed, Completed]);
        fake.cancel_after = Some((0, control.clone()));
        let batch = converter(fake, "mp4").with_control(control.clone());

        let outcome = batch.run(&inputs(3), None).await;

        assert_eq!(outcome.status, BatchStatus::Cancelled);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].status, Completed);
        assert_eq!(outcome.results[0].output_size, 100);
        assert_eq!(batch.settings().format, "mp4");
        assert_eq!(batch.transcoder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_first_file_stops_batch() {
        use ConversionStatus::*;
        let control = BatchControl::new();
        let mut fake = FakeTranscoder::new(vec![Completed, Completed, Completed]);
        fake.cancel_during = Some((0, control.clone()));
        let batch = converter(fake, "mp3").with_control(control.clone());

        let outcome = batch.run(&inputs(3), None).await;

        assert_eq!(outcome.status, BatchStatus::Cancelled);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].status, Cancelled);
        assert_eq!(batch.transcoder.calls.load(Ordering::SeqCst), 1);
        // The cancel raced ahead of attach and was still delivered to the run
        assert!(batch.transcoder.handles.lock().unwrap()[0].is_cancelled());
        assert!(control.current_index().is_none());
    }

    #[tokio::test]
    async fn test_unknown_format_fails_every_file_without_starting() {
        let batch = converter(FakeTranscoder::new(vec![]), "betamax");
        let outcome = batch.run(&inputs(2), None).await;

        assert_eq!(outcome.status, BatchStatus::Failed);
        assert_eq!(outcome.failed_count(), 2);
        assert_eq!(outcome.results[0].output_path, PathBuf::from("/media/clip1.betamax"));
        assert_eq!(outcome.results[0].error.as_deref(), Some("Unknown format: betamax"));
        assert_eq!(batch.transcoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_error_is_failed_result() {
        let outcome = converter(BusyTranscoder, "mp4").run(&inputs(1), None).await;
        assert_eq!(outcome.status, BatchStatus::Failed);
        assert_eq!(
            outcome.results[0].error.as_deref(),
            Some("A conversion is already running")
        );
    }

    #[tokio::test]
    async fn test_empty_batch_is_completed() {
        let outcome = converter(FakeTranscoder::new(vec![]), "mp4").run(&[], None).await;
        assert_eq!(outcome.status, BatchStatus::Completed);
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_events_are_tagged_with_position() {
        use ConversionStatus::*;
        let batch = converter(FakeTranscoder::new(vec![Completed, Completed]), "mkv");
        let (tx, mut rx) = mpsc::unbounded_channel();

        batch.run(&inputs(2), Some(&tx)).await;
        drop(tx);

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            assert_eq!(event.total, 2);
            seen.push((event.index, event.event.is_terminal()));
        }
        assert_eq!(
            seen,
            vec![(0, false), (0, false), (0, true), (1, false), (1, false), (1, true)]
        );
    }

    #[test]
    fn test_report_counts() {
        let outcome = BatchOutcome {
            status: BatchStatus::Completed,
            results: vec![
                ConversionResult {
                    input_path: PathBuf::from("a.mov"),
                    output_path: PathBuf::from("a.mp4"),
                    status: ConversionStatus::Completed,
                    elapsed: Duration::from_millis(1500),
                    output_size: 42,
                    error: None,
                },
                ConversionResult::failed(PathBuf::from("b.mov"), PathBuf::from("b.mp4"), Duration::ZERO, "boom"),
            ],
            started_at: Utc::now(),
            elapsed: Duration::from_secs(2),
        };

        let report = outcome.report();
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.files[0].elapsed_secs, 1.5);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["files"][1]["status"], "failed");
        assert_eq!(json["files"][1]["error"], "boom");
        assert!(json["files"][0].get("error").is_none());
    }
}
