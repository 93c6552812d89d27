use clap::Parser;
use protocol::AudioFormat;

/// Mediator configuration. Every field is overridable via the environment
/// variable named in its `env` attribute (§6 Configuration), with the CLI
/// flag taking precedence when both are present (clap's default
/// resolution order).
#[derive(Parser, Debug, Clone)]
#[command(name = "mediator", about = "Real-time speech-transcription mediator")]
pub struct Config {
    /// Upstream transcription service host.
    #[arg(long, env = "WS_HOST", default_value = "localhost")]
    pub ws_host: String,

    /// Upstream transcription service port.
    #[arg(long, env = "WS_PORT", default_value_t = 9090)]
    pub ws_port: u16,

    /// Handshake `language` field (`auto` for autodetect).
    #[arg(long, env = "LANGUAGE", default_value = "en")]
    pub language: String,

    /// Handshake `task` field.
    #[arg(long, env = "TASK", default_value = "transcribe")]
    pub task: String,

    /// Handshake `model` field.
    #[arg(long, env = "MODEL", default_value = "base")]
    pub model: String,

    /// Handshake `use_vad` field.
    #[arg(long, env = "USE_VAD", default_value_t = true)]
    pub use_vad: bool,

    /// Handshake `send_last_n_segments` field.
    #[arg(long, env = "SEND_LAST_N_SEGMENTS", default_value_t = 10)]
    pub send_last_n_segments: u32,

    /// Wire sample format for outbound audio frames.
    #[arg(long, env = "AUDIO_FORMAT", value_enum, default_value = "float32")]
    pub audio_format: AudioFormatArg,

    /// Audio sample rate in Hz.
    #[arg(long, env = "SAMPLE_RATE", default_value_t = 16_000)]
    pub sample_rate: u32,

    /// Audio channel count.
    #[arg(long, env = "CHANNELS", default_value_t = 1)]
    pub channels: u16,

    /// Frame size in samples.
    #[arg(long, env = "CHUNK_SIZE", default_value_t = 4096)]
    pub chunk_size: u32,

    /// `microphone` or `file`.
    #[arg(long, env = "INPUT_MODE", default_value = "microphone")]
    pub input_mode: String,

    /// Explicit input device index (-1 = unset, use name or default).
    #[arg(long, env = "DEVICE_INDEX", default_value_t = -1)]
    pub device_index: i32,

    /// Case-insensitive substring match against device names.
    #[arg(long, env = "DEVICE_NAME")]
    pub device_name: Option<String>,

    /// Path to a WAV file, used when `input_mode = file`.
    #[arg(long, env = "INPUT_FILE")]
    pub input_file: Option<String>,

    /// Bound on the live unconsolidated segment window.
    #[arg(long, env = "MAX_UNCONSOLIDATED_SEGMENTS", default_value_t = 1000)]
    pub max_unconsolidated_segments: usize,

    /// Cap on the consolidated transcript's length in characters.
    #[arg(long, env = "MAX_CONSOLIDATED_LENGTH", default_value_t = 100_000)]
    pub max_consolidated_length: usize,

    /// Bound on the live question set.
    #[arg(long, env = "MAX_QUESTIONS", default_value_t = 500)]
    pub max_questions: usize,

    /// Minimum wall-clock seconds between first FINAL observation and commit.
    #[arg(long, env = "COMMIT_DELAY_SECONDS", default_value_t = 2.0)]
    pub commit_delay_seconds: f64,

    /// Gate non-English segments out of question extraction.
    #[arg(long, env = "ENFORCE_ENGLISH", default_value_t = true)]
    pub enforce_english: bool,

    /// Confidence threshold above which a non-English language tag is trusted.
    #[arg(long, env = "MIN_ENGLISH_CONFIDENCE", default_value_t = 0.8)]
    pub min_english_confidence: f64,

    /// Control-surface bind host (ambient: needed to run the API at all).
    #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub server_host: String,

    /// Control-surface bind port.
    #[arg(long, env = "SERVER_PORT", default_value_t = 8001)]
    pub server_port: u16,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormatArg {
    Int16,
    Float32,
}

impl From<AudioFormatArg> for AudioFormat {
    fn from(value: AudioFormatArg) -> Self {
        match value {
            AudioFormatArg::Int16 => AudioFormat::Int16,
            AudioFormatArg::Float32 => AudioFormat::Float32,
        }
    }
}

impl Config {
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.ws_host, self.ws_port)
    }
}
