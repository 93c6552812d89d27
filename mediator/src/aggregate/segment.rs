use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// A segment's place in the PARTIAL -> FINAL -> COMMITTED lifecycle (§4.D).
/// Transitions never run backwards; only a strictly greater `revision`
/// replaces the cached segment for a given id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Partial,
    Final,
    Committed,
}

/// One tracked segment in the UnconsolidatedView (§3 Data Model).
///
/// `confidence` is carried for parity with the data model but has no source
/// on the wire today (`WireSegment` in `protocol::wire` has no confidence
/// field, §6) — it is always `None` until an upstream version starts
/// emitting one.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptSegment {
    pub segment_id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    pub status: SegmentStatus,
    pub revision: u64,
    pub source_client_uid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub language: Option<String>,
    pub confidence: Option<f64>,
    pub is_english: bool,
    pub text_hash: String,
}

/// Collapses whitespace and trims the space that precedes sentence
/// punctuation (§4.D.1). Applied once per inbound event before the segment
/// cache or hash ever sees the text.
pub fn normalize_text(text: &str) -> String {
    let trimmed = text.trim();
    let mut collapsed = String::with_capacity(trimmed.len());
    let mut last_was_space = false;
    for ch in trimmed.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                collapsed.push(' ');
            }
            last_was_space = true;
        } else {
            collapsed.push(ch);
            last_was_space = false;
        }
    }

    let mut result = String::with_capacity(collapsed.len());
    let chars: Vec<char> = collapsed.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ' ' && i + 1 < chars.len() && matches!(chars[i + 1], '.' | ',' | '!' | '?' | ';' | ':') {
            i += 1;
            continue;
        }
        result.push(chars[i]);
        i += 1;
    }
    result
}

/// First 16 hex characters of the SHA-256 of the lowercased text (§4.D.3,
/// §4.D.4 both key off this same hash function).
pub fn text_hash(normalized_lowercased: &str) -> String {
    let digest = Sha256::digest(normalized_lowercased.as_bytes());
    let hex = format!("{digest:x}");
    hex[..16].to_string()
}

impl TranscriptSegment {
    pub fn new(
        segment_id: String,
        start_time: f64,
        end_time: f64,
        text: String,
        status: SegmentStatus,
        revision: u64,
        source_client_uid: Option<String>,
        language: Option<String>,
        is_english: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let hash = text_hash(&text.to_lowercase());
        Self {
            segment_id,
            start_time,
            end_time,
            text,
            status,
            revision,
            source_client_uid,
            created_at: now,
            updated_at: now,
            language,
            confidence: None,
            is_english,
            text_hash: hash,
        }
    }

    pub fn with_updated_text(&self, text: String, status: SegmentStatus, now: DateTime<Utc>) -> Self {
        Self {
            segment_id: self.segment_id.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            text_hash: text_hash(&text.to_lowercase()),
            text,
            status,
            revision: self.revision + 1,
            source_client_uid: self.source_client_uid.clone(),
            created_at: self.created_at,
            updated_at: now,
            language: self.language.clone(),
            confidence: self.confidence,
            is_english: self.is_english,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_collapses_whitespace_and_trims_punctuation_space() {
        assert_eq!(normalize_text("  hello   world ,  there . "), "hello world, there.");
    }

    #[test]
    fn text_hash_is_sixteen_hex_chars() {
        let hash = text_hash("hello world");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn text_hash_is_case_sensitive_to_caller_but_deterministic() {
        assert_eq!(text_hash("hello"), text_hash("hello"));
        assert_ne!(text_hash("hello"), text_hash("world"));
    }
}
