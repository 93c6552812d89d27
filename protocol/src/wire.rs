use serde::{Deserialize, Serialize};

/// Wire sample format for outbound audio frames (§6, `audio_format`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Int16,
    Float32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        AudioFormat::Float32
    }
}

/// Outbound handshake, sent once as a JSON text frame before any audio (§4.B step 2).
#[derive(Debug, Clone, Serialize)]
pub struct Handshake {
    pub uid: String,
    pub language: Option<String>,
    pub task: String,
    pub model: String,
    pub use_vad: bool,
    pub send_last_n_segments: u32,
}

/// `segment_id` is inconsistent across upstream versions (int vs string, §9
/// Open Questions). Accept either on the wire and normalize to `String`
/// everywhere past this boundary.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawSegmentId {
    Int(i64),
    Str(String),
}

impl RawSegmentId {
    pub fn normalize(&self) -> String {
        match self {
            RawSegmentId::Int(n) => n.to_string(),
            RawSegmentId::Str(s) => s.clone(),
        }
    }
}

/// One segment inside an inbound `segments[]` array (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct WireSegment {
    #[serde(default)]
    pub id: Option<RawSegmentId>,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub completed: bool,
}

/// Loosely-typed inbound JSON object from the upstream transcription
/// service (§6). Every field is optional since the service multiplexes
/// several unrelated message shapes over the same socket.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireMessage {
    pub uid: Option<String>,
    pub message: Option<String>,
    pub status: Option<String>,
    pub language: Option<String>,
    pub language_prob: Option<f64>,
    pub segments: Option<Vec<WireSegment>>,
    pub translated_segments: Option<Vec<WireSegment>>,
    pub backend: Option<String>,
}

pub const END_OF_AUDIO: &str = "END_OF_AUDIO";
