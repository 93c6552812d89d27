use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::segment::{text_hash, TranscriptSegment};

const INTERROGATIVE_WORDS: &[&str] = &["what", "how", "why", "when", "where", "who", "which", "whose"];
const IMPERATIVE_MARKERS: &[&str] = &[
    "imagine", "describe", "show me", "tell me", "present", "explain", "what if", "let's say",
    "suppose", "consider",
];

/// Which lexical test(s) (§4.D.4) flagged a segment as a question. A segment
/// can match both (e.g. "what if..." is both interrogative by word and
/// imperative by leading phrase), so this is a set, not a single tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionSourceType {
    Interrogative,
    Imperative,
}

/// A question surfaced from COMMITTED, English segments (§4.D.4). Multiple
/// segments can restate the same question; `segment_ids` accumulates every
/// source instead of creating duplicates.
#[derive(Debug, Clone, Serialize)]
pub struct Question {
    pub question_id: String,
    pub text: String,
    pub normalized_text: String,
    pub segment_ids: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub source_types: Vec<QuestionSourceType>,
    pub is_explicit: bool,
}

/// §4.D.4's "contains any word from {...}" is a whole-word test: punctuation
/// is stripped from each token before comparing, so e.g. "show me" does not
/// false-positive on "how" the way a raw substring search would ("show"
/// contains the substring "how").
fn detect(text_lower: &str) -> Vec<QuestionSourceType> {
    let mut types = Vec::new();
    let has_question_mark = text_lower.contains('?');
    let has_marker_word = text_lower
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .any(|w| INTERROGATIVE_WORDS.contains(&w));
    if has_question_mark || has_marker_word {
        types.push(QuestionSourceType::Interrogative);
    }
    if IMPERATIVE_MARKERS.iter().any(|m| text_lower.starts_with(m)) {
        types.push(QuestionSourceType::Imperative);
    }
    types
}

/// Builds a `Question` from a segment's text, or `None` if it isn't
/// interrogative or imperative. The caller is responsible for the
/// `is_english` gate (§4.D.5) before calling this.
pub fn from_segment(segment: &TranscriptSegment, now: DateTime<Utc>) -> Option<Question> {
    let text = segment.text.clone();
    let text_lower = text.to_lowercase();
    let source_types = detect(&text_lower);
    if source_types.is_empty() {
        return None;
    }
    let is_explicit = source_types.contains(&QuestionSourceType::Interrogative);

    Some(Question {
        question_id: text_hash(text_lower.trim()),
        text: text.clone(),
        normalized_text: text_lower.trim().to_string(),
        segment_ids: vec![segment.segment_id.clone()],
        first_seen: now,
        last_seen: now,
        source_types,
        is_explicit,
    })
}

/// In-memory question set with FIFO eviction by `first_seen` on overflow
/// (§4.D.4). Owned exclusively by the Aggregator task.
#[derive(Debug, Default)]
pub struct QuestionSet {
    questions: HashMap<String, Question>,
}

impl QuestionSet {
    pub fn record(&mut self, segment: &TranscriptSegment, now: DateTime<Utc>, max_questions: usize) {
        let Some(question) = from_segment(segment, now) else { return };
        match self.questions.get_mut(&question.question_id) {
            Some(existing) => {
                if !existing.segment_ids.contains(&segment.segment_id) {
                    existing.segment_ids.push(segment.segment_id.clone());
                }
                existing.last_seen = now;
            }
            None => {
                self.questions.insert(question.question_id.clone(), question);
                self.enforce_limit(max_questions);
            }
        }
    }

    fn enforce_limit(&mut self, max_questions: usize) {
        while self.questions.len() > max_questions {
            let Some(oldest_id) = self
                .questions
                .values()
                .min_by_key(|q| q.first_seen)
                .map(|q| q.question_id.clone())
            else {
                break;
            };
            self.questions.remove(&oldest_id);
        }
    }

    pub fn snapshot(&self) -> Vec<Question> {
        let mut values: Vec<Question> = self.questions.values().cloned().collect();
        values.sort_by_key(|q| q.first_seen);
        values
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::segment::SegmentStatus;

    fn seg(id: &str, text: &str) -> TranscriptSegment {
        TranscriptSegment::new(
            id.into(),
            0.0,
            1.0,
            text.into(),
            SegmentStatus::Committed,
            1,
            None,
            Some("en".into()),
            true,
            Utc::now(),
        )
    }

    #[test]
    fn interrogative_detected_by_marker_word() {
        let s = seg("1", "what time is it");
        let q = from_segment(&s, Utc::now()).unwrap();
        assert!(q.is_explicit);
    }

    #[test]
    fn imperative_requires_leading_marker() {
        let s = seg("1", "imagine a world without borders");
        let q = from_segment(&s, Utc::now()).unwrap();
        assert!(!q.is_explicit);
        assert_eq!(q.source_types, vec![QuestionSourceType::Imperative]);

        let not_leading = seg("2", "well, imagine that");
        assert!(from_segment(&not_leading, Utc::now()).is_none());
    }

    #[test]
    fn plain_statement_yields_no_question() {
        let s = seg("1", "the weather is nice today");
        assert!(from_segment(&s, Utc::now()).is_none());
    }

    #[test]
    fn marker_word_match_is_whole_word_not_substring() {
        // "show" contains the substring "how" but is not the word "how".
        let s = seg("1", "the show starts at noon");
        assert!(from_segment(&s, Utc::now()).is_none());
    }

    #[test]
    fn repeated_question_accumulates_segment_ids_without_duplicating() {
        let mut set = QuestionSet::default();
        let now = Utc::now();
        set.record(&seg("1", "why is the sky blue"), now, 500);
        set.record(&seg("2", "why is the sky blue"), now, 500);
        set.record(&seg("1", "why is the sky blue"), now, 500);

        let snapshot = set.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].segment_ids, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn overflow_evicts_oldest_by_first_seen() {
        let mut set = QuestionSet::default();
        let t0 = Utc::now();
        set.record(&seg("1", "who is there"), t0, 2);
        set.record(&seg("2", "how does this work"), t0 + chrono::Duration::seconds(1), 2);
        set.record(&seg("3", "where did it go"), t0 + chrono::Duration::seconds(2), 2);

        let snapshot = set.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|q| q.segment_ids != vec!["1".to_string()]));
    }
}
