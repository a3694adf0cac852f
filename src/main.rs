//! ffconvert - Batch media conversion on top of ffmpeg
//!
//! Command-line entry point: converts files with live progress, previews the
//! generated ffmpeg commands, lists presets and inspects media files.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{Level, info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use ffconvert::batch::{BatchConverter, BatchEvent, BatchStatus};
use ffconvert::cli::{Args, Commands, ConvertOptions};
use ffconvert::config::Config;
use ffconvert::display::{format_bitrate, format_bytes, format_duration, format_eta};
use ffconvert::media::presets::{self, MediaKind};
use ffconvert::media::{ConversionStatus, MediaFactory, RunEvent};
use ffconvert::scan;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Commands::Convert { inputs, options, report } => {
            let failed = run_convert(&config, &inputs, options, report.as_deref()).await?;
            if failed > 0 {
                std::process::exit(1);
            }
        }
        Commands::Preview { input, options } => {
            let settings = options.into_settings(&config.defaults)?;
            let output = settings.output_path_for(&input);
            let command = MediaFactory::compiler(&config.ffmpeg).compile(&settings.conversion_config(&input, &output))?;

            println!("# {}", command.description);
            println!("{}", command);
        }
        Commands::Formats => print_formats(),
        Commands::Info { input, json } => {
            let probe = MediaFactory::probe(&config.ffmpeg);
            let info = probe.media_info(&input).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("File:       {}", input.display());
                println!("Format:     {}", info.format);
                println!("Duration:   {}", format_duration(info.duration));
                println!("Size:       {}", format_bytes(info.size));
                if let Some(bitrate) = info.bitrate {
                    println!("Bitrate:    {}", format_bitrate(bitrate));
                }
                if info.has_video {
                    let resolution = match (info.width, info.height) {
                        (Some(w), Some(h)) => format!("{}x{}", w, h),
                        _ => "unknown".to_string(),
                    };
                    let fps = info.fps.map(|f| format!(" @ {:.2} fps", f)).unwrap_or_default();
                    println!(
                        "Video:      {} {}{}",
                        info.video_codec.as_deref().unwrap_or("unknown"),
                        resolution,
                        fps
                    );
                }
                if info.has_audio {
                    println!("Audio:      {}", info.audio_codec.as_deref().unwrap_or("unknown"));
                }
            }
        }
        Commands::Config => {
            print!("{}", Config::default().to_toml()?);
        }
    }

    Ok(())
}

/// Convert every input and return how many files failed
async fn run_convert(config: &Config, inputs: &[PathBuf], options: ConvertOptions, report: Option<&Path>) -> Result<usize> {
    let settings = options.into_settings(&config.defaults)?;
    let files = scan::collect_inputs(inputs)?;
    if files.is_empty() {
        warn!("No media files found in the given inputs");
        return Ok(0);
    }

    let batch = BatchConverter::new(
        MediaFactory::runner(&config.ffmpeg),
        MediaFactory::compiler(&config.ffmpeg),
        settings,
    );

    if let Some(dir) = &batch.settings().output_dir {
        tokio::fs::create_dir_all(dir).await?;
    }

    let control = batch.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling conversion...");
            control.cancel();
        }
    });

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let renderer = tokio::spawn(render_progress(events_rx));

    let outcome = batch.run(&files, Some(&events_tx)).await;
    drop(events_tx);
    if let Err(e) = renderer.await {
        warn!("Progress display stopped: {}", e);
    }

    println!();
    println!("{:<10} {:<50} {:>12} {:>10}", "Status", "Output", "Size", "Time");
    println!("{}", "-".repeat(85));
    for result in &outcome.results {
        let status = match result.status {
            ConversionStatus::Completed => "done",
            ConversionStatus::Failed => "FAILED",
            ConversionStatus::Cancelled => "cancelled",
        };
        println!(
            "{:<10} {:<50} {:>12} {:>10}",
            status,
            result.output_path.display(),
            format_bytes(result.output_size),
            format_duration(result.elapsed.as_secs_f64())
        );
        if let Some(error) = &result.error {
            println!("           {}", error);
        }
    }

    let failed = outcome.failed_count();
    match outcome.status {
        BatchStatus::Cancelled => println!("\nBatch cancelled after {} file(s)", outcome.results.len()),
        _ if failed > 0 => println!("\n{} of {} file(s) failed", failed, outcome.results.len()),
        _ => println!("\nAll {} file(s) converted", outcome.results.len()),
    }

    if let Some(path) = report {
        outcome.report().write_json(path).await?;
        info!("Batch report written to {}", path.display());
    }

    Ok(failed)
}

/// One progress bar per file, driven by the batch event stream
async fn render_progress(mut events: mpsc::UnboundedReceiver<BatchEvent>) {
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent:>3}% {prefix} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");

    let mut bar: Option<ProgressBar> = None;

    while let Some(BatchEvent { index, total, event }) = events.recv().await {
        match event {
            RunEvent::Started { .. } => {
                let pb = ProgressBar::new(100);
                pb.set_style(style.clone());
                pb.set_prefix(format!("{}/{}", index + 1, total));
                bar = Some(pb);
            }
            RunEvent::Progress(snapshot) => {
                if let Some(pb) = &bar {
                    pb.set_position(snapshot.percent as u64);
                    let speed = snapshot.speed.map(|s| format!("{:.2}x", s)).unwrap_or_default();
                    pb.set_message(format!("{} eta {}", speed, format_eta(snapshot.eta)));
                }
            }
            RunEvent::Completed(result) => {
                if let Some(pb) = bar.take() {
                    pb.set_position(100);
                    pb.finish_with_message(format!("{}", result.output_path.display()));
                }
            }
            RunEvent::Failed(result) | RunEvent::Cancelled(result) => {
                let label = if result.status == ConversionStatus::Failed { "failed" } else { "cancelled" };
                match bar.take() {
                    Some(pb) => pb.abandon_with_message(format!("{}: {}", label, result.input_path.display())),
                    None => eprintln!("[{}/{}] {}: {}", index + 1, total, label, result.input_path.display()),
                }
            }
        }
    }
}

fn print_formats() {
    for (kind, title) in [(MediaKind::Video, "Video formats"), (MediaKind::Audio, "Audio formats")] {
        println!("\n{}:", title);
        println!("{:<12} {:<8} {:<28} {}", "Key", "Ext", "Label", "Description");
        println!("{}", "-".repeat(80));
        for format in presets::formats_of(kind) {
            println!(
                "{:<12} {:<8} {:<28} {}",
                format.key,
                format.ext,
                format.label,
                format.description.unwrap_or("")
            );
        }
    }

    println!("\nVideo quality:");
    for q in presets::VIDEO_QUALITY {
        println!("  {:<10} {:<24} crf {:<3} preset {:<9} audio {}", q.key, q.label, q.crf, q.preset, q.audio_bitrate);
    }

    println!("\nAudio quality:");
    for q in presets::AUDIO_QUALITY {
        println!("  {:<10} {:<24} {}", q.key, q.label, q.bitrate.unwrap_or("lossless"));
    }

    println!("\nResolutions:");
    for r in presets::RESOLUTIONS {
        println!("  {:<10} {}", r.key, r.label);
    }

    println!("\nFrame rates:");
    for f in presets::FRAME_RATES {
        println!("  {:<10} {}", f.key, f.label);
    }
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = std::env::current_dir()?.join(".ffconvert").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "ffconvert.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // stdout is reserved for command output
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}", log_level, log_dir.join("ffconvert.log").display());

    Ok(())
}
