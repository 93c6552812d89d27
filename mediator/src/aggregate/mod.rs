mod consolidate;
mod question;
mod segment;
mod view;

pub use consolidate::ConsolidatedTranscript;
pub use question::{Question, QuestionSet};
pub use segment::{SegmentStatus, TranscriptSegment};
pub use view::UnconsolidatedView;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use protocol::{NormalizedEvent, SegmentEvent};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Config;
use crate::metrics::Metrics;
use segment::normalize_text;

/// A read-only, point-in-time copy of everything the control API needs to
/// expose, taken under a brief read lock (§5 "Shared resources").
#[derive(Debug)]
pub struct AggregatorSnapshot {
    pub unconsolidated: Vec<TranscriptSegment>,
    pub consolidated_text: String,
    pub consolidated_revision: u64,
    pub questions: Vec<Question>,
}

struct AggregatorState {
    view: UnconsolidatedView,
    consolidated: ConsolidatedTranscript,
    questions: QuestionSet,
    commit_timestamps: HashMap<String, DateTime<Utc>>,
}

impl AggregatorState {
    fn new() -> Self {
        Self {
            view: UnconsolidatedView::default(),
            consolidated: ConsolidatedTranscript::default(),
            questions: QuestionSet::default(),
            commit_timestamps: HashMap::new(),
        }
    }

    fn reset(&mut self) {
        self.view = UnconsolidatedView::default();
        self.consolidated.reset();
        self.questions = QuestionSet::default();
        self.commit_timestamps.clear();
    }

    /// The commit-delay gate (§4.D.2). The first FINAL observation for a
    /// segment id records `t0` and always returns `false` for that same
    /// call; only a later call, once `commit_delay_seconds` has elapsed,
    /// returns `true` (preserved exactly as observed upstream — see
    /// DESIGN.md Open Question 3).
    fn should_commit(&mut self, segment_id: &str, commit_delay_seconds: f64, now: DateTime<Utc>) -> bool {
        match self.commit_timestamps.get(segment_id) {
            Some(&t0) => {
                let elapsed = (now - t0).num_milliseconds() as f64 / 1000.0;
                elapsed >= commit_delay_seconds
            }
            None => {
                self.commit_timestamps.insert(segment_id.to_string(), now);
                false
            }
        }
    }

    /// §4.D.5: a segment is only marked non-English when its language tag is
    /// present, isn't en/english, and the tag's confidence clears
    /// `min_english_confidence`. Absent a language tag, or with
    /// `enforce_english` off, the segment is treated as English.
    fn is_english(&self, language: &Option<String>, confidence: Option<f64>, config: &Config) -> bool {
        if !config.enforce_english {
            return true;
        }
        let Some(lang) = language else { return true };
        let is_en = matches!(lang.to_lowercase().as_str(), "en" | "english");
        if is_en {
            return true;
        }
        match confidence {
            Some(p) if p >= config.min_english_confidence => false,
            _ => true,
        }
    }

    fn live_text_hashes(&self) -> HashSet<String> {
        self.view.snapshot().into_iter().map(|s| s.text_hash.clone()).collect()
    }
}

/// Consumes normalized events serially, maintaining the UnconsolidatedView,
/// the commit-delay ledger, the ConsolidatedTranscript and the question map
/// (§4.D). The heaviest single piece of pipeline logic; everything here
/// runs inside one task so no lock is needed on the core state, only on the
/// `Arc<RwLock<..>>` snapshot readers use.
pub struct Aggregator {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    state: Arc<RwLock<AggregatorState>>,
}

impl Aggregator {
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>) -> Self {
        Self { config, metrics, state: Arc::new(RwLock::new(AggregatorState::new())) }
    }

    pub fn handle(&self) -> AggregatorHandle {
        AggregatorHandle { state: self.state.clone() }
    }

    pub async fn reset(&self) {
        self.state.write().await.reset();
    }

    pub async fn run(
        self,
        mut event_rx: mpsc::Receiver<NormalizedEvent>,
        broadcast_tx: mpsc::Sender<NormalizedEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe_event = event_rx.recv() => {
                    match maybe_event {
                        Some(event) => self.process_event(event, &broadcast_tx).await,
                        None => break,
                    }
                }
            }
        }
    }

    async fn process_event(&self, event: NormalizedEvent, broadcast_tx: &mpsc::Sender<NormalizedEvent>) {
        let now = Utc::now();
        match &event {
            NormalizedEvent::Partial(seg) => {
                self.handle_segment_event(seg, false, now).await;
                self.metrics.segments_received.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            NormalizedEvent::Final(seg) => {
                self.handle_segment_event(seg, true, now).await;
                self.metrics.segments_received.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            NormalizedEvent::LanguageDetected { language, probability } => {
                let state = self.state.write().await;
                if !state.is_english(&Some(language.clone()), *probability, &self.config) {
                    warn!(language, ?probability, "non-English speech detected");
                }
            }
            _ => {}
        }

        if broadcast_tx.try_send(event).is_err() {
            self.metrics.events_dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    /// The three-branch segment update rule from §4.D.2: same cached text
    /// (maybe commits), differing text (new revision), or unseen id (fresh
    /// segment).
    async fn handle_segment_event(&self, event: &SegmentEvent, is_final: bool, now: DateTime<Utc>) {
        let normalized_text = normalize_text(&event.text);
        let mut state = self.state.write().await;
        let is_english = state.is_english(&event.language, event.language_prob, &self.config);

        let existing_text = state.view.get(&event.segment_id).map(|s| s.text.clone());

        match existing_text {
            Some(current_text) if current_text == normalized_text => {
                let already_committed =
                    state.view.get(&event.segment_id).map(|s| s.status == SegmentStatus::Committed).unwrap_or(true);
                if is_final && !already_committed {
                    let delay = self.config.commit_delay_seconds;
                    if state.should_commit(&event.segment_id, delay, now) {
                        state.view.commit(&event.segment_id, now);
                        self.consolidate_and_extract(&mut state, now).await;
                    }
                }
            }
            Some(_) => {
                let existing = state.view.get(&event.segment_id).cloned();
                if let Some(existing) = existing {
                    let new_status = if is_final { SegmentStatus::Final } else { SegmentStatus::Partial };
                    let mut updated = existing.with_updated_text(normalized_text, new_status, now);
                    updated.is_english = is_english;
                    updated.language = event.language.clone();
                    updated.start_time = event.start_time;
                    updated.end_time = event.end_time;
                    state.view.upsert(updated, now);
                }
                self.finish_new_or_updated_segment(&mut state, &event.segment_id, is_final, now).await;
            }
            None => {
                let status = if is_final { SegmentStatus::Final } else { SegmentStatus::Partial };
                let fresh = TranscriptSegment::new(
                    event.segment_id.clone(),
                    event.start_time,
                    event.end_time,
                    normalized_text,
                    status,
                    1,
                    event.client_uid.clone(),
                    event.language.clone(),
                    is_english,
                    now,
                );
                state.view.upsert(fresh, now);
                self.finish_new_or_updated_segment(&mut state, &event.segment_id, is_final, now).await;
            }
        }
    }

    async fn finish_new_or_updated_segment(
        &self,
        state: &mut AggregatorState,
        segment_id: &str,
        is_final: bool,
        now: DateTime<Utc>,
    ) {
        state.view.enforce_limit(self.config.max_unconsolidated_segments);

        if is_final {
            let delay = self.config.commit_delay_seconds;
            if state.should_commit(segment_id, delay, now) {
                state.view.commit(segment_id, now);
                self.consolidate_and_extract(state, now).await;
            }
        }
    }

    async fn consolidate_and_extract(&self, state: &mut AggregatorState, now: DateTime<Utc>) {
        let committed = state.view.committed();
        state.consolidated.absorb(&committed, now, self.config.max_consolidated_length);

        let live_hashes = state.live_text_hashes();
        state.consolidated.prune_ledger(&live_hashes, self.config.max_unconsolidated_segments);
        self.metrics.segments_committed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let english_committed: Vec<TranscriptSegment> =
            state.view.committed().into_iter().filter(|s| s.is_english).cloned().collect();
        let max_questions = self.config.max_questions;
        for seg in &english_committed {
            let before = state.questions.len();
            state.questions.record(seg, now, max_questions);
            if state.questions.len() > before {
                self.metrics.questions_extracted.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
    }
}

/// A cheap, cloneable read handle onto the Aggregator's state, for the
/// control API's snapshot endpoints (§5 "Shared resources": readers observe
/// a point-in-time view, never the live mutable state).
#[derive(Clone)]
pub struct AggregatorHandle {
    state: Arc<RwLock<AggregatorState>>,
}

impl AggregatorHandle {
    pub async fn snapshot(&self) -> AggregatorSnapshot {
        let state = self.state.read().await;
        AggregatorSnapshot {
            unconsolidated: state.view.snapshot().into_iter().cloned().collect(),
            consolidated_text: state.consolidated.text.clone(),
            consolidated_revision: state.consolidated.revision,
            questions: state.questions.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn test_config() -> Arc<Config> {
        Arc::new(Config::parse_from(["mediator", "--commit-delay-seconds", "0"]))
    }

    fn seg_event(id: &str, text: &str) -> SegmentEvent {
        SegmentEvent {
            segment_id: id.into(),
            start_time: 0.0,
            end_time: 1.0,
            text: text.into(),
            language: None,
            language_prob: None,
            client_uid: None,
        }
    }

    async fn drive(aggregator: &Aggregator, event: NormalizedEvent, broadcast_tx: &mpsc::Sender<NormalizedEvent>) {
        aggregator.process_event(event, broadcast_tx).await;
    }

    #[tokio::test]
    async fn first_final_observation_never_commits_on_the_same_call() {
        let config = test_config();
        let metrics = Arc::new(Metrics::default());
        let aggregator = Aggregator::new(config, metrics);
        let (tx, mut rx) = mpsc::channel(10);

        drive(&aggregator, NormalizedEvent::Final(seg_event("1", "hello")), &tx).await;
        rx.try_recv().unwrap();

        let snapshot = aggregator.handle().snapshot().await;
        assert_eq!(snapshot.unconsolidated[0].status as u8, SegmentStatus::Final as u8);
        assert_eq!(snapshot.consolidated_text, "");
    }

    #[tokio::test]
    async fn second_call_after_delay_commits_and_consolidates() {
        let config = test_config();
        let metrics = Arc::new(Metrics::default());
        let aggregator = Aggregator::new(config, metrics);
        let (tx, mut rx) = mpsc::channel(10);

        drive(&aggregator, NormalizedEvent::Final(seg_event("1", "hello")), &tx).await;
        rx.try_recv().unwrap();
        // Same id, same (already-normalized) text, still FINAL: the "same
        // cached text" branch re-checks the commit-delay gate.
        drive(&aggregator, NormalizedEvent::Final(seg_event("1", "hello")), &tx).await;
        rx.try_recv().unwrap();

        let snapshot = aggregator.handle().snapshot().await;
        assert_eq!(snapshot.unconsolidated[0].status as u8, SegmentStatus::Committed as u8);
        assert_eq!(snapshot.consolidated_text, "hello");
    }

    #[tokio::test]
    async fn partial_then_final_with_different_text_bumps_revision() {
        let config = test_config();
        let metrics = Arc::new(Metrics::default());
        let aggregator = Aggregator::new(config, metrics);
        let (tx, mut rx) = mpsc::channel(10);

        drive(&aggregator, NormalizedEvent::Partial(seg_event("1", "hel")), &tx).await;
        rx.try_recv().unwrap();
        drive(&aggregator, NormalizedEvent::Partial(seg_event("1", "hello there")), &tx).await;
        rx.try_recv().unwrap();

        let snapshot = aggregator.handle().snapshot().await;
        assert_eq!(snapshot.unconsolidated.len(), 1);
        assert_eq!(snapshot.unconsolidated[0].revision, 2);
        assert_eq!(snapshot.unconsolidated[0].text, "hello there");
    }

    #[tokio::test]
    async fn committed_interrogative_segment_is_extracted_as_a_question() {
        let config = test_config();
        let metrics = Arc::new(Metrics::default());
        let aggregator = Aggregator::new(config, metrics);
        let (tx, mut rx) = mpsc::channel(10);

        drive(&aggregator, NormalizedEvent::Final(seg_event("1", "what time is it")), &tx).await;
        rx.try_recv().unwrap();
        drive(&aggregator, NormalizedEvent::Final(seg_event("1", "what time is it")), &tx).await;
        rx.try_recv().unwrap();

        let snapshot = aggregator.handle().snapshot().await;
        assert_eq!(snapshot.questions.len(), 1);
        assert!(snapshot.questions[0].is_explicit);
    }

    #[tokio::test]
    async fn reset_clears_all_state() {
        let config = test_config();
        let metrics = Arc::new(Metrics::default());
        let aggregator = Aggregator::new(config, metrics);
        let (tx, mut rx) = mpsc::channel(10);

        drive(&aggregator, NormalizedEvent::Final(seg_event("1", "hello")), &tx).await;
        rx.try_recv().unwrap();
        aggregator.reset().await;

        let snapshot = aggregator.handle().snapshot().await;
        assert!(snapshot.unconsolidated.is_empty());
        assert_eq!(snapshot.consolidated_text, "");
        assert!(snapshot.questions.is_empty());
    }
}
