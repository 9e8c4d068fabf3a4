//! Pure transcript rendering. `render` never touches job state or does
//! I/O; identical input yields byte-identical output, so responses can be
//! cached or regenerated at will.

pub mod subtitle;

use thiserror::Error;

use scribe_core::{Segment, Transcript};
use subtitle::{srt_timestamp, vtt_timestamp, wrap, MAX_LINE_CHARS};

#[derive(Debug, Error)]
pub enum ExportError {
    /// Subtitle formats need both endpoints of every segment.
    #[error("segment {order} is missing timing data")]
    MissingTimingData { order: u32 },

    #[error("unsupported export format: {0}")]
    UnsupportedFormat(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Txt,
    Json,
    Srt,
    Vtt,
    Csv,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Txt => "text/plain; charset=utf-8",
            Self::Json => "application/json",
            Self::Srt => "application/x-subrip",
            Self::Vtt => "text/vtt",
            Self::Csv => "text/csv",
        }
    }

    /// File extension, used for download filenames.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Txt => "txt",
            Self::Json => "json",
            Self::Srt => "srt",
            Self::Vtt => "vtt",
            Self::Csv => "csv",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = ExportError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "txt" => Ok(Self::Txt),
            "json" => Ok(Self::Json),
            "srt" => Ok(Self::Srt),
            "vtt" => Ok(Self::Vtt),
            "csv" => Ok(Self::Csv),
            other => Err(ExportError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Render `transcript` into the requested format.
pub fn render(transcript: &Transcript, format: ExportFormat) -> Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Txt => Ok(render_txt(transcript).into_bytes()),
        ExportFormat::Json => serde_json::to_vec_pretty(transcript)
            .map_err(|e| ExportError::Serialization(e.to_string())),
        ExportFormat::Srt => Ok(render_srt(transcript)?.into_bytes()),
        ExportFormat::Vtt => Ok(render_vtt(transcript)?.into_bytes()),
        ExportFormat::Csv => Ok(render_csv(transcript).into_bytes()),
    }
}

fn ordered_segments(transcript: &Transcript) -> Vec<&Segment> {
    let mut segments: Vec<&Segment> = transcript.segments.iter().collect();
    segments.sort_by_key(|s| s.order);
    segments
}

fn label_for(transcript: &Transcript, speaker_id: u32) -> String {
    transcript
        .speaker_label(speaker_id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Speaker {speaker_id}"))
}

/// Paragraphs grouped by contiguous same-speaker runs, each prefixed with
/// the speaker label.
fn render_txt(transcript: &Transcript) -> String {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current_speaker: Option<u32> = None;
    for segment in ordered_segments(transcript) {
        let text = segment.text.trim();
        match paragraphs.last_mut() {
            Some(paragraph) if current_speaker == Some(segment.speaker_id) => {
                paragraph.push(' ');
                paragraph.push_str(text);
            }
            _ => {
                current_speaker = Some(segment.speaker_id);
                paragraphs.push(format!(
                    "{}: {text}",
                    label_for(transcript, segment.speaker_id)
                ));
            }
        }
    }
    paragraphs.join("\n")
}

fn require_timing(segment: &Segment) -> Result<(f64, f64), ExportError> {
    match (segment.start_time, segment.end_time) {
        (Some(start), Some(end)) => Ok((start, end)),
        _ => Err(ExportError::MissingTimingData {
            order: segment.order,
        }),
    }
}

fn render_srt(transcript: &Transcript) -> Result<String, ExportError> {
    let mut out = String::new();
    for (index, segment) in ordered_segments(transcript).iter().enumerate() {
        let (start, end) = require_timing(segment)?;
        if index > 0 {
            out.push('\n');
        }
        out.push_str(&format!(
            "{}\n{} --> {}\n",
            index + 1,
            srt_timestamp(start),
            srt_timestamp(end)
        ));
        let line = format!(
            "{}: {}",
            label_for(transcript, segment.speaker_id),
            segment.text.trim()
        );
        for wrapped in wrap(&line, MAX_LINE_CHARS) {
            out.push_str(&wrapped);
            out.push('\n');
        }
    }
    Ok(out)
}

fn render_vtt(transcript: &Transcript) -> Result<String, ExportError> {
    let mut out = String::from("WEBVTT\n");
    for segment in ordered_segments(transcript) {
        let (start, end) = require_timing(segment)?;
        out.push('\n');
        out.push_str(&format!(
            "{} --> {}\n",
            vtt_timestamp(start),
            vtt_timestamp(end)
        ));
        let lines = wrap(segment.text.trim(), MAX_LINE_CHARS);
        for (i, wrapped) in lines.iter().enumerate() {
            if i == 0 {
                out.push_str(&format!(
                    "<v {}>{wrapped}\n",
                    label_for(transcript, segment.speaker_id)
                ));
            } else {
                out.push_str(wrapped);
                out.push('\n');
            }
        }
    }
    Ok(out)
}

fn render_csv(transcript: &Transcript) -> String {
    let mut out = String::from("order,speaker,start,end,confidence,text\r\n");
    for segment in ordered_segments(transcript) {
        let row = [
            segment.order.to_string(),
            label_for(transcript, segment.speaker_id),
            segment.start_time.map(|v| v.to_string()).unwrap_or_default(),
            segment.end_time.map(|v| v.to_string()).unwrap_or_default(),
            segment.confidence.to_string(),
            segment.text.clone(),
        ];
        let encoded: Vec<String> = row.iter().map(|field| csv_field(field)).collect();
        out.push_str(&encoded.join(","));
        out.push_str("\r\n");
    }
    out
}

/// RFC 4180 field encoding: quote when the field contains a comma, quote,
/// or line break, doubling any embedded quotes.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
