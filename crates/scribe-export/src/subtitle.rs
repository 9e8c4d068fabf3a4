//! Shared helpers for the subtitle formats.

/// Maximum visible characters per subtitle line.
pub const MAX_LINE_CHARS: usize = 42;

/// Greedy word wrap. Words longer than the limit get a line of their own
/// rather than being split mid-word.
pub fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
        } else if current.chars().count() + 1 + word.chars().count() <= max_chars {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// `HH:MM:SS,mmm` (SRT dialect).
pub fn srt_timestamp(seconds: f64) -> String {
    format_timestamp(seconds, ',')
}

/// `HH:MM:SS.mmm` (WebVTT dialect).
pub fn vtt_timestamp(seconds: f64) -> String {
    format_timestamp(seconds, '.')
}

fn format_timestamp(seconds: f64, ms_sep: char) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let s = total_secs % 60;
    let m = (total_secs / 60) % 60;
    let h = total_secs / 3600;
    format!("{h:02}:{m:02}:{s:02}{ms_sep}{ms:03}")
}
