use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::segment::{SegmentStatus, TranscriptSegment};

/// The live, bounded window of segments the aggregator is currently
/// tracking (§3 Data Model `UnconsolidatedView`). `insertion_order` holds
/// each `segment_id` once, in the order its id first arrived, so `snapshot`
/// can honor §3's "ordered by insertion" even though updates to an existing
/// id never move it. Oldest-by-`created_at` eviction keeps the view within
/// `max_unconsolidated_segments`.
#[derive(Debug, Default, Serialize)]
pub struct UnconsolidatedView {
    segments: HashMap<String, TranscriptSegment>,
    insertion_order: Vec<String>,
    pub last_update: Option<DateTime<Utc>>,
}

impl UnconsolidatedView {
    pub fn get(&self, segment_id: &str) -> Option<&TranscriptSegment> {
        self.segments.get(segment_id)
    }

    /// Inserts or replaces a segment; a replacement only takes effect if its
    /// revision is strictly greater than what's cached (§4.D.2 monotonicity).
    /// A brand-new id is appended to `insertion_order`; an update to an
    /// existing id keeps its original arrival position.
    pub fn upsert(&mut self, segment: TranscriptSegment, now: DateTime<Utc>) {
        match self.segments.get(&segment.segment_id) {
            Some(existing) if segment.revision <= existing.revision => {}
            None => {
                self.insertion_order.push(segment.segment_id.clone());
                self.segments.insert(segment.segment_id.clone(), segment);
            }
            _ => {
                self.segments.insert(segment.segment_id.clone(), segment);
            }
        }
        self.last_update = Some(now);
    }

    pub fn commit(&mut self, segment_id: &str, now: DateTime<Utc>) -> bool {
        if let Some(seg) = self.segments.get_mut(segment_id) {
            if seg.status == SegmentStatus::Final {
                seg.status = SegmentStatus::Committed;
                seg.updated_at = now;
                self.last_update = Some(now);
                return true;
            }
        }
        false
    }

    pub fn committed(&self) -> Vec<&TranscriptSegment> {
        self.segments.values().filter(|s| s.status == SegmentStatus::Committed).collect()
    }

    pub fn enforce_limit(&mut self, max_segments: usize) {
        while self.segments.len() > max_segments {
            let Some(oldest_id) = self
                .segments
                .values()
                .min_by_key(|s| s.created_at)
                .map(|s| s.segment_id.clone())
            else {
                break;
            };
            self.segments.remove(&oldest_id);
            self.insertion_order.retain(|id| id != &oldest_id);
        }
    }

    /// Segments in arrival order (§3: "insertion order is the arrival order
    /// of a new segment_id"), not re-sorted by `start_time`.
    pub fn snapshot(&self) -> Vec<&TranscriptSegment> {
        self.insertion_order.iter().filter_map(|id| self.segments.get(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(id: &str, revision: u64, now: DateTime<Utc>) -> TranscriptSegment {
        TranscriptSegment::new(
            id.into(),
            0.0,
            1.0,
            "text".into(),
            SegmentStatus::Partial,
            revision,
            None,
            None,
            true,
            now,
        )
    }

    #[test]
    fn upsert_rejects_non_increasing_revision() {
        let mut view = UnconsolidatedView::default();
        let now = Utc::now();
        view.upsert(seg("1", 2, now), now);
        view.upsert(seg("1", 1, now), now);
        assert_eq!(view.get("1").unwrap().revision, 2);
        view.upsert(seg("1", 3, now), now);
        assert_eq!(view.get("1").unwrap().revision, 3);
    }

    #[test]
    fn enforce_limit_evicts_oldest_by_created_at() {
        let mut view = UnconsolidatedView::default();
        let t0 = Utc::now();
        view.upsert(seg("old", 1, t0), t0);
        view.upsert(seg("new", 1, t0 + chrono::Duration::seconds(5)), t0);
        view.enforce_limit(1);
        assert!(view.get("old").is_none());
        assert!(view.get("new").is_some());
    }

    #[test]
    fn snapshot_is_ordered_by_arrival_not_start_time() {
        let mut view = UnconsolidatedView::default();
        let now = Utc::now();
        let mut later = seg("first", 1, now);
        later.start_time = 10.0;
        let mut earlier = seg("second", 1, now);
        earlier.start_time = 0.0;
        view.upsert(later, now);
        view.upsert(earlier, now);

        let ids: Vec<&str> = view.snapshot().iter().map(|s| s.segment_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[test]
    fn snapshot_keeps_original_position_across_updates() {
        let mut view = UnconsolidatedView::default();
        let now = Utc::now();
        view.upsert(seg("a", 1, now), now);
        view.upsert(seg("b", 1, now), now);
        view.upsert(seg("a", 2, now), now);

        let ids: Vec<&str> = view.snapshot().iter().map(|s| s.segment_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
