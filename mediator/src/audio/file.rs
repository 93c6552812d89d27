use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::MediatorError;

use super::{push_or_drop, AudioFrame, AudioStats};

/// Replays a WAV file as PCM16 mono frames at wall-clock rate, standing in
/// for a live microphone during development and tests (§4.A, "file" input
/// mode). Multi-channel input is downmixed the same way the live source is.
pub struct FileSource {
    path: String,
    chunk_size: usize,
    stats: Arc<AudioStats>,
}

impl FileSource {
    pub fn new(path: String, chunk_size: usize, stats: Arc<AudioStats>) -> Self {
        Self { path, chunk_size, stats }
    }

    pub fn stats(&self) -> Arc<AudioStats> {
        self.stats.clone()
    }

    pub async fn run(
        self,
        tx: mpsc::Sender<AudioFrame>,
        cancel: CancellationToken,
    ) -> Result<(), MediatorError> {
        let mut reader = hound::WavReader::open(&self.path)
            .map_err(|e| MediatorError::DeviceUnavailable(format!("{}: {e}", self.path)))?;

        let spec = reader.spec();
        let channels = spec.channels as usize;
        let sample_rate = spec.sample_rate.max(1);

        *self.stats.device_name.lock().unwrap() = Some(format!("file:{}", self.path));
        info!(path = %self.path, channels, sample_rate, "replaying audio file");
        self.stats.running.store(true, std::sync::atomic::Ordering::Relaxed);

        let samples: Box<dyn Iterator<Item = i16>> = match spec.sample_format {
            hound::SampleFormat::Int => Box::new(
                reader
                    .samples::<i32>()
                    .filter_map(|s| s.ok())
                    .map(|s| s as i16),
            ),
            hound::SampleFormat::Float => Box::new(
                reader
                    .samples::<f32>()
                    .filter_map(|s| s.ok())
                    .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
            ),
        };

        let frame_duration = Duration::from_secs_f64(self.chunk_size as f64 / sample_rate as f64);
        let mut pending: Vec<i16> = Vec::with_capacity(self.chunk_size * channels);

        for sample in samples {
            if cancel.is_cancelled() {
                break;
            }
            pending.push(sample);
            if pending.len() < self.chunk_size * channels {
                continue;
            }

            let mono: AudioFrame = if channels > 1 {
                pending
                    .chunks(channels)
                    .map(|frame| (frame.iter().map(|&s| s as i32).sum::<i32>() / channels as i32) as i16)
                    .collect()
            } else {
                std::mem::take(&mut pending)
            };
            pending.clear();

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(frame_duration) => {}
            }
            push_or_drop(&tx, mono, &self.stats);
        }

        self.stats.running.store(false, std::sync::atomic::Ordering::Relaxed);
        info!(path = %self.path, "end of audio file reached");
        Ok(())
    }
}
