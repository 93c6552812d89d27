use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::aggregate::{Aggregator, AggregatorHandle, AggregatorSnapshot};
use crate::audio::{AudioSource, AudioStats};
use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::error::MediatorError;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::upstream::{UpstreamLink, UpstreamStatus};

/// Capacity shared by `audioQ` and `eventQ` (§5: "capacity 100-200").
const QUEUE_CAPACITY: usize = 150;
/// §4.F: "STARTING -> RUNNING when AudioSource reports running within 1 s."
const STARTUP_GRACE: Duration = Duration::from_secs(1);
/// How often the depth/client gauges are refreshed while a session runs.
const GAUGE_INTERVAL: Duration = Duration::from_millis(250);

/// The six states of §4.F. STOPPED is both the initial and the only state
/// `start()` and `stop()` accept as a clean slate alongside ERROR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PipelineState {
    Stopped,
    Starting,
    Running,
    Degraded,
    Stopping,
    Error,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: PipelineState,
    pub audio_device: Option<String>,
    pub sample_rate: u32,
    pub ws_connection: String,
    /// Mirrors the original service's `queue_depths=self.metrics.to_dict()`
    /// — the whole metrics snapshot doubles as "queue depths" there, so we
    /// keep that shape rather than inventing a narrower one.
    pub queue_depths: MetricsSnapshot,
    pub last_error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub whisperlive_ready: bool,
    pub whisperlive_connected: bool,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
}

impl HealthResponse {
    fn healthy(connected: bool) -> Self {
        Self {
            status: if connected { "healthy" } else { "degraded" },
            whisperlive_ready: true,
            whisperlive_connected: connected,
            timestamp: Utc::now(),
            details: json!({}),
        }
    }

    fn unhealthy(reason: String) -> Self {
        Self {
            status: "unhealthy",
            whisperlive_ready: false,
            whisperlive_connected: false,
            timestamp: Utc::now(),
            details: json!({ "reason": reason }),
        }
    }
}

enum TaskOutcome {
    Audio(Result<(), MediatorError>),
    Upstream(Result<(), MediatorError>),
    Aggregator,
    Broadcaster,
}

struct Inner {
    state: PipelineState,
    last_error: Option<String>,
    audio_stats: Option<Arc<AudioStats>>,
    aggregator_handle: Option<AggregatorHandle>,
    cancel: Option<CancellationToken>,
    monitor: Option<JoinHandle<()>>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            state: PipelineState::Stopped,
            last_error: None,
            audio_stats: None,
            aggregator_handle: None,
            cancel: None,
            monitor: None,
        }
    }
}

/// Owns the pipeline's lifecycle (§4.F): wiring fresh queues and tasks on
/// `start()`, tearing them down on `stop()`, and exposing the read-only
/// control-surface operations (§6). One `Supervisor` lives for the whole
/// process; each `start()` spawns a fresh generation of tasks rather than a
/// process-global pipeline object (§9 "global singleton -> owned instance").
pub struct Supervisor {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    broadcaster: Arc<Broadcaster>,
    upstream_status: Arc<UpstreamStatus>,
    inner: RwLock<Inner>,
}

impl Supervisor {
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            config,
            metrics,
            broadcaster,
            upstream_status: Arc::new(UpstreamStatus::default()),
            inner: RwLock::new(Inner::default()),
        }
    }

    pub async fn state(&self) -> PipelineState {
        self.inner.read().await.state
    }

    /// §4.F: rejected with `InvalidState` unless STOPPED or ERROR. Spawns
    /// fresh AudioSource/UpstreamLink/Aggregator/Broadcaster tasks wired by
    /// brand-new bounded queues, waits the 1s startup grace period, then
    /// settles on RUNNING or DEGRADED depending on whether audio capture
    /// came up in time.
    pub async fn start(self: &Arc<Self>) -> Result<PipelineState, MediatorError> {
        {
            let inner = self.inner.read().await;
            if !matches!(inner.state, PipelineState::Stopped | PipelineState::Error) {
                return Err(MediatorError::InvalidState);
            }
        }

        info!("starting pipeline");
        let cancel = CancellationToken::new();
        let (audio_tx, audio_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(QUEUE_CAPACITY);
        let audio_tx_probe = audio_tx.clone();
        let event_tx_probe = event_tx.clone();

        let audio_stats = Arc::new(AudioStats::default());
        let audio_source = match AudioSource::from_config(&self.config, audio_stats.clone()) {
            Ok(source) => source,
            Err(e) => {
                let mut inner = self.inner.write().await;
                inner.state = PipelineState::Error;
                inner.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        self.upstream_status.reset();
        self.metrics.audio_queue_overflow.store(false, Ordering::Relaxed);

        let aggregator = Aggregator::new(self.config.clone(), self.metrics.clone());
        let aggregator_handle = aggregator.handle();

        let upstream = UpstreamLink::new(
            self.config.clone(),
            self.metrics.clone(),
            self.upstream_status.clone(),
            audio_rx,
            event_tx,
            cancel.child_token(),
        );

        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<TaskOutcome>();

        {
            let tx = done_tx.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                let result = audio_source.run(audio_tx, cancel).await;
                let _ = tx.send(TaskOutcome::Audio(result));
            });
        }
        {
            let tx = done_tx.clone();
            tokio::spawn(async move {
                let result = upstream.run().await;
                let _ = tx.send(TaskOutcome::Upstream(result));
            });
        }
        {
            let tx = done_tx.clone();
            let broadcast_tx = broadcast_tx.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                aggregator.run(event_rx, broadcast_tx, cancel).await;
                let _ = tx.send(TaskOutcome::Aggregator);
            });
        }
        {
            let tx = done_tx.clone();
            let broadcaster = self.broadcaster.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                broadcaster.run(broadcast_rx, cancel).await;
                let _ = tx.send(TaskOutcome::Broadcaster);
            });
        }
        drop(done_tx);

        // Fire-and-forget gauge refresher: non-critical, so it isn't tracked
        // through `done_tx`/the monitor the way the four pipeline stages are.
        // Holds its own clones of the producer-side senders purely to read
        // `.capacity()`; it never sends anything.
        {
            let metrics = self.metrics.clone();
            let broadcaster = self.broadcaster.clone();
            let audio_stats = audio_stats.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(GAUGE_INTERVAL);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            metrics.audio_frames_sent.store(
                                audio_stats.frames_captured.load(Ordering::Relaxed),
                                Ordering::Relaxed,
                            );
                            let dropped = audio_stats.frames_dropped.load(Ordering::Relaxed);
                            metrics.audio_frames_dropped.store(dropped, Ordering::Relaxed);
                            if dropped > 0 {
                                metrics.audio_queue_overflow.store(true, Ordering::Relaxed);
                            }
                            let audio_depth = QUEUE_CAPACITY.saturating_sub(audio_tx_probe.capacity());
                            let event_depth = QUEUE_CAPACITY.saturating_sub(event_tx_probe.capacity());
                            metrics.audio_queue_depth.store(audio_depth as i64, Ordering::Relaxed);
                            metrics.event_queue_depth.store(event_depth as i64, Ordering::Relaxed);
                            metrics.connected_sse_clients.store(broadcaster.sse_count().await as i64, Ordering::Relaxed);
                            metrics.connected_ws_clients.store(broadcaster.ws_count().await as i64, Ordering::Relaxed);
                        }
                    }
                }
            });
        }

        let monitor_supervisor = Arc::clone(self);
        let monitor = tokio::spawn(async move {
            while let Some(outcome) = done_rx.recv().await {
                match outcome {
                    TaskOutcome::Audio(Err(e)) => monitor_supervisor.note_fatal(e.to_string()).await,
                    TaskOutcome::Upstream(Err(e)) => monitor_supervisor.note_fatal(e.to_string()).await,
                    TaskOutcome::Audio(Ok(())) | TaskOutcome::Upstream(Ok(())) => {}
                    TaskOutcome::Aggregator | TaskOutcome::Broadcaster => {}
                }
            }
            monitor_supervisor.note_tasks_exited().await;
        });

        {
            let mut inner = self.inner.write().await;
            inner.cancel = Some(cancel);
            inner.audio_stats = Some(audio_stats.clone());
            inner.aggregator_handle = Some(aggregator_handle);
            inner.monitor = Some(monitor);
        }

        tokio::time::sleep(STARTUP_GRACE).await;

        let mut inner = self.inner.write().await;
        if inner.state == PipelineState::Error {
            return Ok(PipelineState::Error);
        }
        inner.state =
            if audio_stats.is_running() { PipelineState::Running } else { PipelineState::Degraded };
        Ok(inner.state)
    }

    /// Idempotent from STOPPED (§4.F). Cancels every task, waits for the
    /// generation's monitor to observe all four exit, then settles STOPPED.
    pub async fn stop(self: &Arc<Self>) -> PipelineState {
        let (cancel, monitor) = {
            let mut inner = self.inner.write().await;
            if inner.state == PipelineState::Stopped {
                return PipelineState::Stopped;
            }
            info!("stopping pipeline");
            inner.state = PipelineState::Stopping;
            (inner.cancel.take(), inner.monitor.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(monitor) = monitor {
            if monitor.await.is_err() {
                error!("supervisor monitor task panicked during shutdown");
            }
        }

        let mut inner = self.inner.write().await;
        inner.state = PipelineState::Stopped;
        inner.aggregator_handle = None;
        inner.audio_stats = None;
        PipelineState::Stopped
    }

    async fn note_fatal(&self, message: String) {
        let mut inner = self.inner.write().await;
        if !matches!(inner.state, PipelineState::Stopping | PipelineState::Stopped) {
            error!(error = %message, "pipeline entering ERROR state");
            inner.state = PipelineState::Error;
            inner.last_error = Some(message);
        }
    }

    async fn note_tasks_exited(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            PipelineState::Stopping => inner.state = PipelineState::Stopped,
            PipelineState::Error => {}
            _ => {
                inner.state = PipelineState::Error;
                inner.last_error.get_or_insert_with(|| "pipeline tasks exited unexpectedly".into());
            }
        }
    }

    pub async fn status(&self) -> StatusResponse {
        let inner = self.inner.read().await;
        let audio_device = match &inner.audio_stats {
            Some(stats) => stats.device_name(),
            None => None,
        };
        let ws_connection =
            if self.upstream_status.is_connected() { "connected" } else { "disconnected" }.to_string();

        StatusResponse {
            state: inner.state,
            audio_device,
            sample_rate: self.config.sample_rate,
            ws_connection,
            queue_depths: self.metrics.snapshot(),
            last_error: inner.last_error.clone(),
            timestamp: Utc::now(),
        }
    }

    pub async fn health(&self) -> HealthResponse {
        let inner = self.inner.read().await;
        if matches!(inner.state, PipelineState::Error | PipelineState::Degraded) {
            return HealthResponse::unhealthy(
                inner.last_error.clone().unwrap_or_else(|| "unknown error".into()),
            );
        }
        HealthResponse::healthy(self.upstream_status.is_connected())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Point-in-time copy of the aggregator's state (§5 "Shared resources").
    /// `None` before the pipeline has ever been started.
    pub async fn aggregator_snapshot(&self) -> Option<AggregatorSnapshot> {
        let inner = self.inner.read().await;
        match &inner.aggregator_handle {
            Some(handle) => Some(handle.snapshot().await),
            None => None,
        }
    }

    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        self.broadcaster.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn file_mode_config(input_file: Option<&str>) -> Arc<Config> {
        let mut args = vec!["mediator".to_string(), "--input-mode".to_string(), "file".to_string()];
        if let Some(path) = input_file {
            args.push("--input-file".to_string());
            args.push(path.to_string());
        }
        Arc::new(Config::parse_from(args))
    }

    fn new_supervisor(config: Arc<Config>) -> Arc<Supervisor> {
        Arc::new(Supervisor::new(config, Arc::new(Metrics::default()), Arc::new(Broadcaster::default())))
    }

    #[tokio::test]
    async fn stop_is_idempotent_before_any_start() {
        let supervisor = new_supervisor(file_mode_config(None));
        assert_eq!(supervisor.state().await, PipelineState::Stopped);
        assert_eq!(supervisor.stop().await, PipelineState::Stopped);
    }

    #[tokio::test]
    async fn missing_input_file_enters_error_state_and_is_still_restartable() {
        // `input_mode=file` with no `input_file` fails synchronously inside
        // `start()`, before any task is spawned (§4.A "file mode with no
        // input_file is a configuration error").
        let supervisor = new_supervisor(file_mode_config(None));
        let result = supervisor.start().await;
        assert!(result.is_err());
        assert_eq!(supervisor.state().await, PipelineState::Error);

        // ERROR is one of the two states `start()` accepts, same as STOPPED.
        let retry = supervisor.start().await;
        assert!(retry.is_err());
    }

    #[tokio::test]
    async fn start_is_rejected_while_already_starting() {
        let supervisor = new_supervisor(file_mode_config(None));
        {
            let mut inner = supervisor.inner.write().await;
            inner.state = PipelineState::Running;
        }
        let result = supervisor.start().await;
        assert!(matches!(result, Err(MediatorError::InvalidState)));
    }

    #[tokio::test]
    async fn health_is_unhealthy_in_error_state() {
        let supervisor = new_supervisor(file_mode_config(None));
        let _ = supervisor.start().await;
        let health = supervisor.health().await;
        assert_eq!(health.status, "unhealthy");
        assert!(!health.whisperlive_ready);
    }
}
