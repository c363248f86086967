//! Caption segmentation for the narration track.
//!
//! Sentences are timed proportionally to their character count across the
//! measured audio duration, then rendered as SRT for the caption burner.
//! Very short sentences get a minimum display time and the whole track is
//! rescaled to fit the audio.

use std::fmt::Write;

/// Shortest time a caption stays on screen before the track is rescaled.
pub const MIN_SEGMENT_SECS: f64 = 1.5;

#[derive(Debug, Clone, PartialEq)]
pub struct CaptionSegment {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptionTrack {
    pub language: String,
    pub segments: Vec<CaptionSegment>,
}

impl CaptionTrack {
    pub fn from_text(text: &str, duration_secs: f64, language: &str) -> Self {
        let sentences = split_sentences(text);
        let total_chars: usize = sentences.iter().map(|s| s.chars().count()).sum();

        let mut segments = Vec::with_capacity(sentences.len());
        if total_chars > 0 && duration_secs > 0.0 {
            let lengths: Vec<f64> = sentences
                .iter()
                .map(|s| {
                    let share = s.chars().count() as f64 / total_chars as f64;
                    (duration_secs * share).max(MIN_SEGMENT_SECS)
                })
                .collect();
            // Minimums only ever lengthen the track, so this shrinks it back onto the audio.
            let scale = duration_secs / lengths.iter().sum::<f64>();

            let last = sentences.len() - 1;
            let mut cursor = 0.0;
            for (i, (sentence, length)) in sentences.into_iter().zip(lengths).enumerate() {
                let end = if i == last { duration_secs } else { cursor + length * scale };
                segments.push(CaptionSegment {
                    text: sentence,
                    start: cursor,
                    end,
                });
                cursor = end;
            }
        }

        Self {
            language: language.to_string(),
            segments,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn to_srt(&self) -> String {
        let mut out = String::new();
        for (i, segment) in self.segments.iter().enumerate() {
            let _ = write!(
                out,
                "{}\n{} --> {}\n{}\n\n",
                i + 1,
                format_srt_time(segment.start),
                format_srt_time(segment.end),
                segment.text
            );
        }
        out
    }
}

/// Split after `.`, `!` or `?` when followed by whitespace or the end of the
/// text, keeping the terminators with their sentence. Decimals such as `3.5`
/// and runs like `...` stay inside one sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        current.push(ch);
        let boundary = chars.peek().is_none_or(|next| next.is_whitespace());
        if matches!(ch, '.' | '!' | '?') && boundary {
            let sentence = current.trim();
            if !sentence.is_empty() && sentence.chars().any(char::is_alphanumeric) {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }

    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }

    sentences
}

/// `HH:MM:SS,mmm`
pub fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    format!(
        "{:02}:{:02}:{:02},{:03}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60,
        ms
    )
}
