use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::MediatorError;

use super::{push_or_drop, AudioFrame, AudioStats};

/// Live microphone capture via `cpal` (§4.A). The OS-level audio callback
/// cannot be awaited on, so capture happens on a dedicated thread that
/// forwards whole `chunk_size` frames over an unbounded channel into the
/// async world, where they're handed to the (bounded, drop-on-full)
/// `audioQ`.
pub struct MicrophoneSource {
    device_index: i32,
    device_name: Option<String>,
    sample_rate: u32,
    channels: u16,
    chunk_size: usize,
    stats: Arc<AudioStats>,
}

impl MicrophoneSource {
    pub fn new(config: &Config, stats: Arc<AudioStats>) -> Self {
        Self {
            device_index: config.device_index,
            device_name: config.device_name.clone(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            chunk_size: config.chunk_size as usize,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<AudioStats> {
        self.stats.clone()
    }

    fn select_device(&self) -> Result<Device, MediatorError> {
        let host = cpal::default_host();
        let inputs: Vec<Device> = host
            .input_devices()
            .map_err(|e| MediatorError::DeviceUnavailable(e.to_string()))?
            .collect();

        if self.device_index >= 0 {
            if let Some(d) = inputs.get(self.device_index as usize) {
                return d.clone_handle();
            }
        }

        if let Some(name) = &self.device_name {
            let lower = name.to_lowercase();
            if let Some(d) = inputs
                .iter()
                .find(|d| d.name().map(|n| n.to_lowercase().contains(&lower)).unwrap_or(false))
            {
                return d.clone_handle();
            }
        }

        if let Some(d) = host.default_input_device() {
            return Ok(d);
        }

        inputs
            .into_iter()
            .next()
            .ok_or_else(|| MediatorError::DeviceUnavailable("no input device available".into()))
    }

    pub async fn run(
        self,
        tx: mpsc::Sender<AudioFrame>,
        cancel: CancellationToken,
    ) -> Result<(), MediatorError> {
        let device = self.select_device()?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".into());
        *self.stats.device_name.lock().unwrap() = Some(device_name.clone());
        info!(device = %device_name, "starting audio capture");

        let config = StreamConfig {
            channels: self.channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<AudioFrame>();
        let stop = Arc::new(AtomicBool::new(false));
        let chunk_size = self.chunk_size;
        let channels = self.channels as usize;

        let sample_format = device
            .default_input_config()
            .map(|c| c.sample_format())
            .unwrap_or(SampleFormat::I16);

        let stop_for_thread = stop.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();

        let handle = std::thread::spawn(move || {
            let result = run_cpal_stream(
                &device,
                &config,
                sample_format,
                channels,
                chunk_size,
                raw_tx,
                stop_for_thread,
            );
            let _ = ready_tx.send(result.map_err(|e| e.to_string()));
        });

        // The capture thread reports on `ready_tx` as soon as
        // `build_input_stream`/`play` fails (or once it exits normally after
        // `stop`). Fold that into a shared slot and cancel the run loop on
        // failure, instead of polling a std channel from inside `select!`.
        let capture_error: Arc<std::sync::Mutex<Option<String>>> =
            Arc::new(std::sync::Mutex::new(None));
        let capture_error_writer = capture_error.clone();
        let error_cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            if let Ok(Err(msg)) = ready_rx.recv() {
                *capture_error_writer.lock().unwrap() = Some(msg);
                error_cancel.cancel();
            }
        });

        self.stats.running.store(true, Ordering::Relaxed);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe_frame = raw_rx.recv() => {
                    match maybe_frame {
                        Some(frame) => push_or_drop(&tx, frame, &self.stats),
                        None => break,
                    }
                }
            }
        }

        stop.store(true, Ordering::Relaxed);
        self.stats.running.store(false, Ordering::Relaxed);
        if let Err(e) = handle.join() {
            error!(?e, "audio capture thread panicked");
        }

        match capture_error.lock().unwrap().take() {
            Some(msg) => Err(MediatorError::DeviceUnavailable(msg)),
            None => Ok(()),
        }
    }
}

fn run_cpal_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    channels: usize,
    chunk_size: usize,
    raw_tx: mpsc::UnboundedSender<AudioFrame>,
    stop: Arc<AtomicBool>,
) -> Result<(), cpal::BuildStreamError> {
    let buffer = Arc::new(std::sync::Mutex::new(Vec::<i16>::with_capacity(chunk_size * 2)));

    let err_fn = |err| warn!("audio stream error: {err}");

    let stream = match sample_format {
        SampleFormat::I16 => {
            let buffer = buffer.clone();
            let raw_tx = raw_tx.clone();
            device.build_input_stream(
                config,
                move |data: &[i16], _| emit_frames(data, channels, chunk_size, &buffer, &raw_tx),
                err_fn,
                None,
            )
        }
        _ => {
            let buffer = buffer.clone();
            let raw_tx = raw_tx.clone();
            device.build_input_stream(
                config,
                move |data: &[f32], _| {
                    let as_i16: Vec<i16> =
                        data.iter().map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).collect();
                    emit_frames(&as_i16, channels, chunk_size, &buffer, &raw_tx)
                },
                err_fn,
                None,
            )
        }
    }?;

    stream.play()?;
    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
    Ok(())
}

fn emit_frames(
    data: &[i16],
    channels: usize,
    chunk_size: usize,
    buffer: &std::sync::Mutex<Vec<i16>>,
    raw_tx: &mpsc::UnboundedSender<AudioFrame>,
) {
    let mono: Vec<i16> = if channels > 1 {
        data.chunks(channels)
            .map(|frame| (frame.iter().map(|&s| s as i32).sum::<i32>() / channels as i32) as i16)
            .collect()
    } else {
        data.to_vec()
    };

    let mut buf = buffer.lock().unwrap();
    buf.extend_from_slice(&mono);
    while buf.len() >= chunk_size {
        let frame: Vec<i16> = buf.drain(..chunk_size).collect();
        let _ = raw_tx.send(frame);
    }
}

/// `cpal::Device` isn't `Clone`, but selecting it twice (once to read the
/// name, once to hand to `run`) needs an owned copy. Re-querying by name is
/// the simplest correct way to get a second handle.
trait CloneHandle {
    fn clone_handle(&self) -> Result<Device, MediatorError>;
}

impl CloneHandle for Device {
    fn clone_handle(&self) -> Result<Device, MediatorError> {
        let host = cpal::default_host();
        let name = self.name().ok();
        host.input_devices()
            .ok()
            .and_then(|mut it| it.find(|d| d.name().ok() == name))
            .or_else(|| host.default_input_device())
            .ok_or_else(|| MediatorError::DeviceUnavailable("no input device available".into()))
    }
}
