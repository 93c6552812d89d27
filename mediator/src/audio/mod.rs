mod file;
mod microphone;

pub use file::FileSource;
pub use microphone::MicrophoneSource;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::MediatorError;

/// One fixed-size frame of mono PCM16 samples, as captured before any wire
/// format conversion (§4.A).
pub type AudioFrame = Vec<i16>;

/// Counters shared between the running capture task and whoever reports
/// `status`/`metrics` (§4.A contract: `frames_captured`, `frames_dropped`,
/// `device_name`, `running`).
#[derive(Debug, Default)]
pub struct AudioStats {
    pub frames_captured: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub running: AtomicBool,
    pub device_name: Mutex<Option<String>>,
}

impl AudioStats {
    pub fn device_name(&self) -> Option<String> {
        self.device_name.lock().unwrap().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

/// Pushes a frame onto `audioQ`, dropping it (and counting the drop) if the
/// queue is full rather than blocking the capture loop (§4.A, §5).
pub(crate) fn push_or_drop(
    tx: &mpsc::Sender<AudioFrame>,
    frame: AudioFrame,
    stats: &AudioStats,
) {
    match tx.try_send(frame) {
        Ok(()) => {
            stats.frames_captured.fetch_add(1, Ordering::Relaxed);
        }
        Err(_) => {
            stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// The two concrete audio sources named in §4.A: a live input device, or a
/// file replayed at wall-clock rate. Both produce frames onto the same
/// bounded channel and share the same stats handle.
pub enum AudioSource {
    Microphone(MicrophoneSource),
    File(FileSource),
}

impl AudioSource {
    /// Builds the configured source (§6 `input_mode`). A `file` mode with no
    /// `input_file` set is a configuration error, reported the same way a
    /// missing device would be.
    pub fn from_config(
        config: &crate::config::Config,
        stats: Arc<AudioStats>,
    ) -> Result<Self, MediatorError> {
        match config.input_mode.as_str() {
            "file" => {
                let path = config
                    .input_file
                    .clone()
                    .ok_or_else(|| MediatorError::DeviceUnavailable("input_mode=file requires input_file".into()))?;
                Ok(AudioSource::File(FileSource::new(path, config.chunk_size as usize, stats)))
            }
            _ => Ok(AudioSource::Microphone(MicrophoneSource::new(config, stats))),
        }
    }

    pub fn stats(&self) -> Arc<AudioStats> {
        match self {
            AudioSource::Microphone(m) => m.stats(),
            AudioSource::File(f) => f.stats(),
        }
    }

    /// Runs until `cancel` fires or (for a file source) the file is
    /// exhausted. Releases device/file handles on every exit path.
    pub async fn run(
        self,
        tx: mpsc::Sender<AudioFrame>,
        cancel: CancellationToken,
    ) -> Result<(), MediatorError> {
        match self {
            AudioSource::Microphone(m) => m.run(tx, cancel).await,
            AudioSource::File(f) => f.run(tx, cancel).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_or_drop_counts_drops_when_queue_full() {
        let (tx, mut rx) = mpsc::channel::<AudioFrame>(1);
        let stats = AudioStats::default();

        push_or_drop(&tx, vec![0i16; 4], &stats);
        push_or_drop(&tx, vec![1i16; 4], &stats);

        assert_eq!(stats.frames_captured.load(Ordering::Relaxed), 1);
        assert_eq!(stats.frames_dropped.load(Ordering::Relaxed), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, vec![0i16; 4]);
    }
}
