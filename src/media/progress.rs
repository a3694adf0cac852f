//! Parsing of ffmpeg's diagnostic stream.
//!
//! ffmpeg reports progress as human-oriented text on stderr. Two shapes show up,
//! often interleaved:
//!
//! ```text
//! frame=  150 fps=30 q=28.0 size=    1024kB time=00:00:05.00 bitrate=1677.7kbits/s speed=1.00x
//! out_time_us=5000000
//! progress=continue
//! ```
//!
//! The vocabulary matched here is owned by ffmpeg and pinned by the tests below.

use serde::Serialize;

/// Lines marking the end of the encode
const COMPLETION_MARKERS: &[&str] = &["progress=end", "muxing overhead"];

/// Any of these in the accumulated stderr means the run failed
const FATAL_MARKERS: &[&str] = &[
    "Error",
    "Invalid",
    "No such file",
    "Permission denied",
    "Unknown encoder",
    "Conversion failed",
];

/// Lines containing any of these make up the error summary
const ERROR_LINE_MARKERS: &[&str] = &[
    "Error",
    "error",
    "Invalid",
    "No such file",
    "Permission denied",
    "Unknown encoder",
    "Unrecognized option",
    "does not contain",
];

const SUMMARY_FALLBACK_LINES: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// Position in the output, seconds
    pub time: f64,
    /// 0..=100
    pub percent: f64,
    pub speed: Option<f64>,
    pub fps: Option<f64>,
    pub bitrate: Option<String>,
    pub size: Option<String>,
    pub frame: Option<u64>,
    /// Seconds remaining at the current speed
    pub eta: Option<f64>,
}

/// Parse one diagnostic line. `None` unless the line carries a timestamp.
pub fn parse_progress_line(line: &str, total_duration: f64) -> Option<ProgressSnapshot> {
    let time = clock_time(line).or_else(|| micros_time(line))?;

    let speed = field(line, "speed", speed_value);
    let percent = if total_duration > 0.0 {
        (time / total_duration * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };
    let eta = match speed {
        Some(speed) if speed > 0.0 && total_duration > 0.0 => Some(((total_duration - time) / speed).max(0.0)),
        _ => None,
    };

    Some(ProgressSnapshot {
        time,
        percent,
        speed,
        fps: field(line, "fps", decimal_value),
        bitrate: field(line, "bitrate", text_value),
        size: field(line, "size", text_value),
        frame: field(line, "frame", |v| integer_prefix(v).parse().ok()),
        eta,
    })
}

pub fn is_progress_complete(line: &str) -> bool {
    COMPLETION_MARKERS.iter().any(|m| line.contains(m))
}

pub fn has_fatal_error(buffer: &str) -> bool {
    FATAL_MARKERS.iter().any(|m| buffer.contains(m))
}

/// Error lines from the buffer, or its tail when nothing matches
pub fn extract_error_summary(buffer: &str) -> String {
    let errors: Vec<&str> = buffer
        .lines()
        .filter(|line| ERROR_LINE_MARKERS.iter().any(|m| line.contains(m)))
        .map(str::trim)
        .collect();

    if !errors.is_empty() {
        return errors.join("\n");
    }

    let tail: Vec<&str> = buffer.lines().filter(|l| !l.trim().is_empty()).collect();
    let skip = tail.len().saturating_sub(SUMMARY_FALLBACK_LINES);
    tail[skip..].join("\n")
}

/// Splits a byte stream on CR or LF, carrying partial lines across chunks.
///
/// ffmpeg rewrites its stats line in place with bare `\r`, so both count as breaks.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every line it completed. Empty lines are dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                self.take_line(&mut lines);
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Remaining partial line at end of stream
    pub fn finish(&mut self) -> Option<String> {
        let mut lines = Vec::with_capacity(1);
        self.take_line(&mut lines);
        lines.pop()
    }

    fn take_line(&mut self, lines: &mut Vec<String>) {
        if self.pending.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
}

/// `time=HH:MM:SS[.fraction]`, also matching inside `out_time=`
fn clock_time(line: &str) -> Option<f64> {
    let bytes = line.as_bytes();
    let mut from = 0;
    while let Some(found) = line[from..].find("time") {
        let key_end = from + found + "time".len();
        from = key_end;
        if !matches!(bytes.get(key_end), Some(b'=') | Some(b':')) {
            continue;
        }
        if let Some(seconds) = parse_clock(&line[key_end + 1..]) {
            return Some(seconds);
        }
    }
    None
}

fn parse_clock(s: &str) -> Option<f64> {
    let b = s.as_bytes();
    let two_digits = |i: usize| -> Option<f64> {
        let (hi, lo) = (*b.get(i)?, *b.get(i + 1)?);
        if hi.is_ascii_digit() && lo.is_ascii_digit() {
            Some(f64::from((hi - b'0') * 10 + (lo - b'0')))
        } else {
            None
        }
    };

    if b.get(2) != Some(&b':') || b.get(5) != Some(&b':') {
        return None;
    }
    let hours = two_digits(0)?;
    let minutes = two_digits(3)?;
    let seconds = two_digits(6)?;

    let mut total = hours * 3600.0 + minutes * 60.0 + seconds;
    if b.get(8) == Some(&b'.') {
        let digits = integer_prefix(&s[9..]);
        if !digits.is_empty() {
            total += format!("0.{}", digits).parse::<f64>().unwrap_or(0.0);
        }
    }
    Some(total)
}

/// `out_time_us=<microseconds>`
fn micros_time(line: &str) -> Option<f64> {
    let start = line.find("out_time_us")? + "out_time_us".len();
    let rest = line[start..].strip_prefix(['=', ':'])?;
    let digits = integer_prefix(rest);
    let micros: u64 = digits.parse().ok()?;
    Some(micros as f64 / 1_000_000.0)
}

/// Case-insensitive `key[=:]? value` lookup. The first occurrence whose value
/// parses wins, so `N/A` values fall through to later matches or `None`.
fn field<T>(line: &str, key: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let lower = line.to_ascii_lowercase();
    let mut from = 0;
    while let Some(found) = lower[from..].find(key) {
        let mut rest = &line[from + found + key.len()..];
        from += found + key.len();
        rest = rest.strip_prefix(['=', ':']).unwrap_or(rest);
        if let Some(value) = parse(rest.trim_start()) {
            return Some(value);
        }
    }
    None
}

fn integer_prefix(s: &str) -> &str {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    &s[..end]
}

fn decimal_prefix(s: &str) -> &str {
    let end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    &s[..end]
}

fn decimal_value(s: &str) -> Option<f64> {
    decimal_prefix(s).parse().ok()
}

/// `2.0x` -> 2.0; the `x` suffix is required
fn speed_value(s: &str) -> Option<f64> {
    let number = decimal_prefix(s);
    if number.is_empty() || !s[number.len()..].starts_with('x') {
        return None;
    }
    number.parse().ok()
}

/// Whitespace-delimited token starting with a digit, e.g. `1677.7kbits/s`
fn text_value(s: &str) -> Option<String> {
    if !s.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    Some(s[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stats_line() {
        let line = "frame=100 fps=30 time=00:00:10.00 bitrate=1000kbits/s speed=2.0x";
        let p = parse_progress_line(line, 20.0).unwrap();

        assert_eq!(p.time, 10.0);
        assert_eq!(p.percent, 50.0);
        assert_eq!(p.eta, Some(5.0));
        assert_eq!(p.speed, Some(2.0));
        assert_eq!(p.fps, Some(30.0));
        assert_eq!(p.frame, Some(100));
        assert_eq!(p.bitrate.as_deref(), Some("1000kbits/s"));
        assert_eq!(p.size, None);
    }

    #[test]
    fn test_parse_padded_stats_line() {
        let line = "frame=  150 fps= 29.97 q=28.0 size=    1024kB time=00:01:05.50 bitrate=1677.7kbits/s speed=1.5x    ";
        let p = parse_progress_line(line, 0.0).unwrap();

        assert_eq!(p.time, 65.5);
        assert_eq!(p.frame, Some(150));
        assert_eq!(p.fps, Some(29.97));
        assert_eq!(p.size.as_deref(), Some("1024kB"));
        assert_eq!(p.percent, 0.0);
        assert_eq!(p.eta, None);
    }

    #[test]
    fn test_line_without_time_is_none() {
        assert!(parse_progress_line("frame=100 fps=30 speed=2.0x", 20.0).is_none());
        assert!(parse_progress_line("progress=continue", 20.0).is_none());
        assert!(parse_progress_line("time=N/A bitrate=N/A", 20.0).is_none());
    }

    #[test]
    fn test_microsecond_time() {
        let p = parse_progress_line("out_time_us=5000000", 10.0).unwrap();
        assert_eq!(p.time, 5.0);
        assert_eq!(p.percent, 50.0);
        assert_eq!(p.speed, None);
        assert_eq!(p.eta, None);
    }

    #[test]
    fn test_colon_time_preferred_over_micros() {
        let p = parse_progress_line("out_time_us=9000000 out_time=00:00:02.500000", 10.0).unwrap();
        assert_eq!(p.time, 2.5);
    }

    #[test]
    fn test_time_without_fraction() {
        assert_eq!(parse_progress_line("time=01:00:00", 0.0).unwrap().time, 3600.0);
    }

    #[test]
    fn test_percent_is_clamped() {
        let p = parse_progress_line("time=00:00:30.00 speed=1.0x", 20.0).unwrap();
        assert_eq!(p.percent, 100.0);
        assert_eq!(p.eta, Some(0.0));
    }

    #[test]
    fn test_missing_fields_do_not_block_others() {
        let p = parse_progress_line("size=N/A time=00:00:01.00 bitrate=N/A speed=N/A fps=12", 4.0).unwrap();
        assert_eq!(p.size, None);
        assert_eq!(p.bitrate, None);
        assert_eq!(p.speed, None);
        assert_eq!(p.fps, Some(12.0));
        assert_eq!(p.percent, 25.0);
    }

    #[test]
    fn test_completion_markers() {
        assert!(is_progress_complete("progress=end"));
        assert!(is_progress_complete(
            "video:1024kB audio:128kB subtitle:0kB other streams:0kB global headers:0kB muxing overhead: 0.5%"
        ));
        assert!(!is_progress_complete("progress=continue"));
    }

    #[test]
    fn test_error_summary_picks_error_lines() {
        let buffer = "ffmpeg version 6.1\n  built with gcc\nmissing.mp4: No such file or directory\n";
        assert!(has_fatal_error(buffer));
        assert_eq!(extract_error_summary(buffer), "missing.mp4: No such file or directory");
    }

    #[test]
    fn test_error_summary_falls_back_to_tail() {
        let buffer = "a\nb\n\nc\nd\ne\nf\n  \n";
        assert!(!has_fatal_error(buffer));
        assert_eq!(extract_error_summary(buffer), "b\nc\nd\ne\nf");
    }

    #[test]
    fn test_lowercase_error_is_summarized_but_not_fatal() {
        let buffer = "[aac @ 0x1] some error concealment applied\n";
        assert!(!has_fatal_error(buffer));
        assert_eq!(extract_error_summary(buffer), "[aac @ 0x1] some error concealment applied");
    }

    #[test]
    fn test_splitter_carries_partial_lines() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(b"frame=1 time=00:0").is_empty());
        assert_eq!(splitter.push(b"0:01.00\rframe=2"), vec!["frame=1 time=00:00:01.00"]);
        assert_eq!(splitter.push(b" time=00:00:02.00\r\n\nprogress=end\n"), vec![
            "frame=2 time=00:00:02.00",
            "progress=end"
        ]);
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_splitter_flushes_tail() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(b"Conversion failed!").is_empty());
        assert_eq!(splitter.finish().as_deref(), Some("Conversion failed!"));
    }
}
