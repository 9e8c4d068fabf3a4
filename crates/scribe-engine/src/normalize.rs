use std::cmp::Ordering;
use std::collections::HashMap;

use scribe_core::model::{Segment, Speaker, Transcript};
use scribe_core::provider::{ProviderChunk, ProviderResult};

use crate::error::EngineError;

/// Turns raw recognition output into the canonical transcript shape:
/// speakers renumbered 1..k in order of first appearance, segments in
/// chronological order with a contiguous 0-based sequence.
pub fn normalize(
    result: ProviderResult,
    requested_language: &str,
    processing_duration_seconds: f64,
) -> Result<Transcript, EngineError> {
    let mut chunks: Vec<ProviderChunk> = result
        .chunks
        .into_iter()
        .filter(|c| !c.text.trim().is_empty())
        .collect();
    if chunks.is_empty() {
        return Err(EngineError::EmptyResult);
    }

    // Chronological order is only well-defined when every chunk carries a
    // start time. Otherwise the provider's own ordering stands.
    if chunks.iter().all(|c| c.start_seconds.is_some()) {
        chunks.sort_by(|a, b| {
            a.start_seconds
                .partial_cmp(&b.start_seconds)
                .unwrap_or(Ordering::Equal)
        });
    }

    let mut speaker_ids: HashMap<u32, u32> = HashMap::new();
    let mut speakers: Vec<Speaker> = Vec::new();
    let mut segments: Vec<Segment> = Vec::with_capacity(chunks.len());

    for (index, chunk) in chunks.iter().enumerate() {
        let next_id = speaker_ids.len() as u32 + 1;
        let speaker_id = *speaker_ids.entry(chunk.speaker_tag).or_insert_with(|| {
            speakers.push(Speaker {
                speaker_id: next_id,
                label: format!("Speaker {next_id}"),
                total_speaking_seconds: 0.0,
                segment_count: 0,
            });
            next_id
        });

        let entry = &mut speakers[(speaker_id - 1) as usize];
        entry.segment_count += 1;
        if let (Some(start), Some(end)) = (chunk.start_seconds, chunk.end_seconds) {
            entry.total_speaking_seconds += (end - start).max(0.0);
        }

        segments.push(Segment {
            order: index as u32,
            speaker_id,
            start_time: chunk.start_seconds,
            end_time: chunk.end_seconds,
            text: chunk.text.trim().to_string(),
            confidence: chunk.confidence.unwrap_or(0.0),
        });
    }

    let mean_confidence =
        segments.iter().map(|s| s.confidence).sum::<f64>() / segments.len() as f64;
    let confidence_score = result.confidence.unwrap_or(mean_confidence);
    let language_detected = result
        .language
        .unwrap_or_else(|| requested_language.to_string());

    Ok(Transcript {
        raw_provider_payload: result.raw,
        speakers,
        segments,
        confidence_score,
        language_detected,
        processing_duration_seconds,
    })
}
