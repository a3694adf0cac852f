//! ffconvert - Batch media conversion on top of ffmpeg
//!
//! Compiles conversion presets into ffmpeg invocations, supervises the running
//! process with structured progress and cancellation, and sequences batches of files.

pub mod batch;
pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod media;
pub mod scan;
