use serde::{Deserialize, Serialize};

use crate::wire::WireMessage;

/// One committed-or-not segment as it arrives off the wire, already
/// carrying a normalized `segment_id` (§4.C).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentEvent {
    pub segment_id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    pub language: Option<String>,
    pub language_prob: Option<f64>,
    pub client_uid: Option<String>,
}

/// The closed set of events `EventNormalizer` emits into `eventQ` (§4.C).
/// Every downstream stage (`aggregate`, `broadcast`, `api`) operates on this
/// enum only — never on the loose upstream JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum NormalizedEvent {
    ServerReady {
        backend: Option<String>,
    },
    Disconnect,
    Wait {
        message: Option<String>,
    },
    Error {
        message: Option<String>,
    },
    LanguageDetected {
        language: String,
        probability: Option<f64>,
    },
    Partial(SegmentEvent),
    Final(SegmentEvent),
}

impl NormalizedEvent {
    pub fn is_segment_event(&self) -> bool {
        matches!(self, NormalizedEvent::Partial(_) | NormalizedEvent::Final(_))
    }
}

/// Translate one loose upstream JSON object into zero or more normalized
/// events (§4.C). A single wire message can carry a status line, a language
/// hint, and a batch of segments all at once, so this can fan out.
pub fn normalize(msg: &WireMessage) -> Vec<NormalizedEvent> {
    let mut events = Vec::new();

    if msg.message.as_deref() == Some("SERVER_READY") {
        events.push(NormalizedEvent::ServerReady {
            backend: msg.backend.clone(),
        });
    } else if msg.message.as_deref() == Some("DISCONNECT") {
        events.push(NormalizedEvent::Disconnect);
    } else if msg.status.as_deref() == Some("WAIT") {
        events.push(NormalizedEvent::Wait {
            message: msg.message.clone(),
        });
    } else if let Some(language) = msg.language.clone() {
        events.push(NormalizedEvent::LanguageDetected {
            language,
            probability: msg.language_prob,
        });
    }

    if let Some(segments) = &msg.segments {
        for (index, seg) in segments.iter().enumerate() {
            let segment_id = match &seg.id {
                Some(raw) => raw.normalize(),
                None => format!("{:.3}_{}", seg.start, index),
            };
            let event = SegmentEvent {
                segment_id,
                start_time: seg.start,
                end_time: seg.end,
                text: seg.text.trim().to_string(),
                language: msg.language.clone(),
                language_prob: msg.language_prob,
                client_uid: msg.uid.clone(),
            };
            events.push(if seg.completed {
                NormalizedEvent::Final(event)
            } else {
                NormalizedEvent::Partial(event)
            });
        }
    }

    if msg.status.as_deref() == Some("ERROR") {
        events.push(NormalizedEvent::Error {
            message: msg.message.clone(),
        });
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{RawSegmentId, WireSegment};

    fn base() -> WireMessage {
        WireMessage::default()
    }

    #[test]
    fn server_ready_captures_backend() {
        let mut msg = base();
        msg.message = Some("SERVER_READY".into());
        msg.backend = Some("faster_whisper".into());
        let events = normalize(&msg);
        assert_eq!(events.len(), 1);
        match &events[0] {
            NormalizedEvent::ServerReady { backend } => {
                assert_eq!(backend.as_deref(), Some("faster_whisper"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn wait_status_does_not_also_emit_disconnect() {
        let mut msg = base();
        msg.status = Some("WAIT".into());
        msg.message = Some("2".into());
        let events = normalize(&msg);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], NormalizedEvent::Wait { .. }));
    }

    #[test]
    fn segment_with_explicit_id_normalizes_to_string() {
        let mut msg = base();
        msg.segments = Some(vec![WireSegment {
            id: Some(RawSegmentId::Int(7)),
            start: 0.0,
            end: 1.0,
            text: "  hello  ".into(),
            completed: true,
        }]);
        let events = normalize(&msg);
        assert_eq!(events.len(), 1);
        match &events[0] {
            NormalizedEvent::Final(seg) => {
                assert_eq!(seg.segment_id, "7");
                assert_eq!(seg.text, "hello");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn segment_without_id_is_synthesized_from_start_and_index() {
        let mut msg = base();
        msg.segments = Some(vec![WireSegment {
            id: None,
            start: 3.25,
            end: 4.0,
            text: "world".into(),
            completed: false,
        }]);
        let events = normalize(&msg);
        match &events[0] {
            NormalizedEvent::Partial(seg) => assert_eq!(seg.segment_id, "3.250_0"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn error_status_is_emitted_alongside_segments() {
        let mut msg = base();
        msg.status = Some("ERROR".into());
        msg.message = Some("boom".into());
        msg.segments = Some(vec![WireSegment {
            id: Some(RawSegmentId::Str("a".into())),
            start: 0.0,
            end: 1.0,
            text: "hi".into(),
            completed: true,
        }]);
        let events = normalize(&msg);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], NormalizedEvent::Final(_)));
        assert!(matches!(events[1], NormalizedEvent::Error { .. }));
    }

    #[test]
    fn malformed_empty_message_yields_no_events() {
        let msg = base();
        assert!(normalize(&msg).is_empty());
    }
}
