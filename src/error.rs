//! Error taxonomy for the delta counter
//!
//! Every failure is returned to the immediate caller. The only swallowed
//! condition is an unknown tag during aggregation, which is logged instead.

use crate::queue::QueueError;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, CounterError>;

/// Errors surfaced by emit, collect, commit and purge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterError {
    /// Queue name missing or other unusable configuration
    Configuration(String),
    /// Enqueue, lease, delete or purge failed in the queue collaborator.
    /// Propagated unmodified, never retried internally.
    QueueUnavailable(QueueError),
    /// An identifier could not be decoded into the requested representation
    Decoding {
        /// Raw payload, lossily rendered for diagnostics
        raw: String,
        reason: String,
    },
    /// An identifier could not be canonically serialized
    Encoding(String),
    /// The counter store rejected an aggregate
    Store(String),
}

impl CounterError {
    pub fn empty_queue_name() -> Self {
        CounterError::Configuration("queue name is empty".to_string())
    }

    pub fn decoding(raw: &[u8], reason: impl Into<String>) -> Self {
        CounterError::Decoding {
            raw: String::from_utf8_lossy(raw).into_owned(),
            reason: reason.into(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, CounterError::Configuration(_))
    }

    pub fn is_decoding(&self) -> bool {
        matches!(self, CounterError::Decoding { .. })
    }

    /// Whether retrying the same call later could succeed.
    ///
    /// Configuration and codec failures are deterministic; queue failures
    /// depend on the collaborator.
    pub fn is_retryable(&self) -> bool {
        match self {
            CounterError::QueueUnavailable(e) => e.is_transient(),
            CounterError::Store(_) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for CounterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CounterError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            CounterError::QueueUnavailable(e) => write!(f, "Queue unavailable: {}", e),
            CounterError::Decoding { raw, reason } => {
                write!(f, "Decoding error for {:?}: {}", raw, reason)
            }
            CounterError::Encoding(msg) => write!(f, "Encoding error: {}", msg),
            CounterError::Store(msg) => write!(f, "Counter store error: {}", msg),
        }
    }
}

impl std::error::Error for CounterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CounterError::QueueUnavailable(e) => Some(e),
            _ => None,
        }
    }
}

impl From<QueueError> for CounterError {
    fn from(e: QueueError) -> Self {
        CounterError::QueueUnavailable(e)
    }
}
