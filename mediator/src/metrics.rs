use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Pipeline-wide counters and gauges (§8's exposed `metrics` operation).
/// Each counter is incremented by its owning task only; readers (the
/// control API) may observe slightly stale values, which is allowed by
/// §5's "Shared resources" note.
#[derive(Debug, Default)]
pub struct Metrics {
    pub segments_received: AtomicU64,
    pub segments_committed: AtomicU64,
    pub segments_dropped: AtomicU64,
    pub audio_frames_sent: AtomicU64,
    pub audio_frames_dropped: AtomicU64,
    pub reconnect_count: AtomicU64,
    pub connected_sse_clients: AtomicI64,
    pub connected_ws_clients: AtomicI64,
    pub audio_queue_depth: AtomicI64,
    pub event_queue_depth: AtomicI64,
    pub events_dropped: AtomicU64,
    pub questions_extracted: AtomicU64,
    pub audio_queue_overflow: AtomicBool,
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub segments_received: u64,
    pub segments_committed: u64,
    pub segments_dropped: u64,
    pub audio_frames_sent: u64,
    pub audio_frames_dropped: u64,
    pub reconnect_count: u64,
    pub connected_sse_clients: i64,
    pub connected_ws_clients: i64,
    pub audio_queue_depth: i64,
    pub event_queue_depth: i64,
    pub events_dropped: u64,
    pub questions_extracted: u64,
    pub audio_queue_overflow: bool,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            segments_received: self.segments_received.load(Ordering::Relaxed),
            segments_committed: self.segments_committed.load(Ordering::Relaxed),
            segments_dropped: self.segments_dropped.load(Ordering::Relaxed),
            audio_frames_sent: self.audio_frames_sent.load(Ordering::Relaxed),
            audio_frames_dropped: self.audio_frames_dropped.load(Ordering::Relaxed),
            reconnect_count: self.reconnect_count.load(Ordering::Relaxed),
            connected_sse_clients: self.connected_sse_clients.load(Ordering::Relaxed),
            connected_ws_clients: self.connected_ws_clients.load(Ordering::Relaxed),
            audio_queue_depth: self.audio_queue_depth.load(Ordering::Relaxed),
            event_queue_depth: self.event_queue_depth.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            questions_extracted: self.questions_extracted.load(Ordering::Relaxed),
            audio_queue_overflow: self.audio_queue_overflow.load(Ordering::Relaxed),
        }
    }
}
