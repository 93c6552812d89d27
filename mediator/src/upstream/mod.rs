mod backoff;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use protocol::{normalize, AudioFormat, Handshake, WireMessage};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audio::AudioFrame;
use crate::config::Config;
use crate::error::MediatorError;
use crate::metrics::Metrics;

use backoff::backoff_seconds;

const OPEN_TIMEOUT: Duration = Duration::from_secs(10);
const READY_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state the control surface's `status`/`health` operations read
/// (§6). Updated only by the owning `UpstreamLink` task; readers see a
/// point-in-time snapshot, same as every other cross-task counter (§5).
#[derive(Debug, Default)]
pub struct UpstreamStatus {
    connected: AtomicBool,
    ready: AtomicBool,
}

impl UpstreamStatus {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Resets to "never connected" at the start of a fresh supervisor run.
    pub fn reset(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.ready.store(false, Ordering::Relaxed);
    }

    fn set_connected(&self, value: bool) {
        self.connected.store(value, Ordering::Relaxed);
    }

    fn set_ready(&self, value: bool) {
        self.ready.store(value, Ordering::Relaxed);
    }
}

/// How one transport session ended, driving the reconnect policy in §4.B.
enum SessionEnd {
    /// Local `stop()`; no reconnect, the link is done.
    Cancelled,
    /// Remote `DISCONNECT` or an unexpected close. Normal backoff.
    Remote,
    /// Server signalled `WAIT`. Gentler backoff growth.
    Wait,
    /// Transport-level failure before or during the session. Normal backoff.
    Error(String),
}

/// Owns exactly one upstream transcription session at a time (§4.B). Runs
/// the open/handshake/ready/steady-state/terminate lifecycle, reconnecting
/// with backoff on non-graceful termination while the supervisor keeps it
/// running.
pub struct UpstreamLink {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    status: Arc<UpstreamStatus>,
    audio_rx: mpsc::Receiver<AudioFrame>,
    event_tx: mpsc::Sender<protocol::NormalizedEvent>,
    cancel: CancellationToken,
}

impl UpstreamLink {
    pub fn new(
        config: Arc<Config>,
        metrics: Arc<Metrics>,
        status: Arc<UpstreamStatus>,
        audio_rx: mpsc::Receiver<AudioFrame>,
        event_tx: mpsc::Sender<protocol::NormalizedEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self { config, metrics, status, audio_rx, event_tx, cancel }
    }

    pub async fn run(mut self) -> Result<(), MediatorError> {
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let outcome = self.connect_once(attempt > 0).await;
            self.status.set_connected(false);
            self.status.set_ready(false);

            match outcome {
                SessionEnd::Cancelled => return Ok(()),
                SessionEnd::Remote => {
                    warn!("upstream disconnected, reconnecting");
                    attempt += 1;
                    self.wait_before_reconnect(attempt, false).await?;
                }
                SessionEnd::Wait => {
                    warn!("upstream busy (WAIT), reconnecting with gentler backoff");
                    attempt += 1;
                    self.wait_before_reconnect(attempt, true).await?;
                }
                SessionEnd::Error(msg) => {
                    warn!(error = %msg, "upstream transport error, reconnecting");
                    attempt += 1;
                    self.wait_before_reconnect(attempt, false).await?;
                }
            }
        }
    }

    async fn wait_before_reconnect(&self, attempt: u32, gentle: bool) -> Result<(), MediatorError> {
        if attempt > MAX_RECONNECT_ATTEMPTS {
            return Err(MediatorError::TransportExhausted);
        }
        let delay = backoff_seconds(attempt, gentle);
        info!(attempt, delay, gentle, "backing off before reconnect");
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(Duration::from_secs_f64(delay)) => {}
        }
        Ok(())
    }

    async fn connect_once(&mut self, is_reconnect: bool) -> SessionEnd {
        let ws_url = self.config.ws_url();
        let stream = match tokio::time::timeout(OPEN_TIMEOUT, tokio_tungstenite::connect_async(&ws_url)).await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => return SessionEnd::Error(format!("connect failed: {e}")),
            Err(_) => return SessionEnd::Error("connect timed out".into()),
        };
        info!(url = %ws_url, "upstream connection established");
        self.status.set_connected(true);

        let (mut sink, mut source) = stream.split();

        let handshake = Handshake {
            uid: Uuid::new_v4().to_string(),
            language: Some(self.config.language.clone()),
            task: self.config.task.clone(),
            model: self.config.model.clone(),
            use_vad: self.config.use_vad,
            send_last_n_segments: self.config.send_last_n_segments,
        };
        let handshake_json = match serde_json::to_string(&handshake) {
            Ok(s) => s,
            Err(e) => return SessionEnd::Error(format!("failed to encode handshake: {e}")),
        };
        if let Err(e) = sink.send(Message::Text(handshake_json)).await {
            return SessionEnd::Error(format!("failed to send handshake: {e}"));
        }

        match self.await_ready(&mut source).await {
            Ok(true) => {}
            Ok(false) => return SessionEnd::Wait,
            Err(e) => return SessionEnd::Error(e),
        }

        if is_reconnect {
            self.metrics.reconnect_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        self.status.set_ready(true);
        info!("upstream session ready");

        self.steady_state(sink, source).await
    }

    async fn await_ready(&self, source: &mut futures_util::stream::SplitStream<WsStream>) -> Result<bool, String> {
        loop {
            let message = match tokio::time::timeout(READY_TIMEOUT, source.next()).await {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(e))) => return Err(format!("error waiting for ready: {e}")),
                Ok(None) => return Err("connection closed before ready".into()),
                Err(_) => return Err("timed out waiting for SERVER_READY".into()),
            };

            let text = match message {
                Message::Text(t) => t,
                Message::Close(_) => return Err("connection closed before ready".into()),
                _ => continue,
            };

            let wire: WireMessage = match serde_json::from_str(&text) {
                Ok(w) => w,
                Err(_) => continue,
            };

            if wire.status.as_deref() == Some("WAIT") {
                return Ok(false);
            }
            if wire.message.as_deref() == Some("SERVER_READY") {
                info!(backend = ?wire.backend, "server ready");
                return Ok(true);
            }
        }
    }

    async fn steady_state(
        &mut self,
        mut sink: futures_util::stream::SplitSink<WsStream, Message>,
        mut source: futures_util::stream::SplitStream<WsStream>,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Text(protocol::END_OF_AUDIO.to_string())).await;
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Cancelled;
                }
                maybe_frame = self.audio_rx.recv() => {
                    match maybe_frame {
                        Some(frame) => {
                            let bytes = encode_frame(&frame, self.config.audio_format.into());
                            if let Err(e) = sink.send(Message::Binary(bytes)).await {
                                return SessionEnd::Error(format!("audio send failed: {e}"));
                            }
                        }
                        None => return SessionEnd::Cancelled,
                    }
                }
                maybe_msg = source.next() => {
                    match maybe_msg {
                        Some(Ok(Message::Text(text))) => {
                            if self.handle_inbound(&text) {
                                return SessionEnd::Remote;
                            }
                        }
                        Some(Ok(Message::Close(_))) => return SessionEnd::Remote,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return SessionEnd::Error(format!("receive error: {e}")),
                        None => return SessionEnd::Remote,
                    }
                }
            }
        }
    }

    /// Parses and normalizes one inbound text frame. Returns `true` if this
    /// message signalled a remote disconnect (the caller should end the
    /// session).
    fn handle_inbound(&self, text: &str) -> bool {
        let wire: WireMessage = match serde_json::from_str(text) {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, "malformed upstream message, dropping");
                self.metrics.events_dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return false;
            }
        };

        let mut disconnected = false;
        for event in normalize(&wire) {
            if matches!(event, protocol::NormalizedEvent::Disconnect) {
                disconnected = true;
            }
            match self.event_tx.try_send(event) {
                Ok(()) => {}
                Err(_) => {
                    self.metrics.events_dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }
        }
        disconnected
    }
}

fn encode_frame(frame: &AudioFrame, format: AudioFormat) -> Vec<u8> {
    match format {
        AudioFormat::Int16 => {
            let mut bytes = Vec::with_capacity(frame.len() * 2);
            for sample in frame {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
            bytes
        }
        AudioFormat::Float32 => {
            let mut bytes = Vec::with_capacity(frame.len() * 4);
            for sample in frame {
                let normalized = *sample as f32 / 32768.0;
                bytes.extend_from_slice(&normalized.to_le_bytes());
            }
            bytes
        }
    }
}
