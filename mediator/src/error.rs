use thiserror::Error;

/// The error taxonomy from §7. Each variant maps to one of the recovery
/// strategies described there: some are fatal (propagate into
/// `Supervisor::last_error` and an `ERROR` transition), others are
/// recovered locally and only ever surface as a counter increment.
#[derive(Debug, Error)]
pub enum MediatorError {
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("transport error (will retry): {0}")]
    TransportTransient(String),

    #[error("upstream server busy (WAIT): {0}")]
    TransportRejected(String),

    #[error("exhausted reconnect attempts")]
    TransportExhausted,

    #[error("malformed upstream message: {0}")]
    ProtocolMalformed(String),

    #[error("queue full, event dropped")]
    BackpressureOverflow,

    #[error("subscriber too slow, event skipped")]
    ConsumerSlow,

    #[error("aggregator logic error: {0}")]
    AggregatorLogic(String),

    #[error("operation not valid in the pipeline's current state")]
    InvalidState,
}

impl MediatorError {
    /// Whether this error kind is fatal to the pipeline (transitions the
    /// supervisor to `ERROR`) versus locally recovered (§7 Propagation).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MediatorError::DeviceUnavailable(_) | MediatorError::TransportExhausted
        )
    }
}
