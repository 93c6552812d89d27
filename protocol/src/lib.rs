//! Wire message shapes and the closed normalized-event vocabulary shared by
//! every stage of the transcription mediator pipeline. Kept in its own
//! crate so `upstream`, `normalize`, `aggregate`, `broadcast` and `api` all
//! depend on one definition of "what an event is" instead of wiring
//! modules together with ad hoc callbacks (§9).

mod event;
mod wire;

pub use event::{normalize, NormalizedEvent, SegmentEvent};
pub use wire::{AudioFormat, Handshake, RawSegmentId, WireMessage, WireSegment, END_OF_AUDIO};

pub const SAMPLE_RATE: u32 = 16_000;
