//! Event sink trait and implementations.

use async_trait::async_trait;
use tracing::{debug, info, Level};

/// Trait for sinks that receive the core's outbound signals.
///
/// Sinks carry observability traffic only; no correctness decision ever
/// depends on a sink having seen an event.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits a signal asynchronously.
    ///
    /// # Arguments
    ///
    /// * `signal` - The signal name (e.g., "run.finalized")
    /// * `data` - Optional signal payload
    async fn emit(&self, signal: &str, data: Option<serde_json::Value>);

    /// Emits a signal without blocking.
    ///
    /// This method should never raise an exception. Errors are logged
    /// but suppressed.
    fn try_emit(&self, signal: &str, data: Option<serde_json::Value>);
}

/// A no-op sink that discards all signals.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _signal: &str, _data: Option<serde_json::Value>) {
        // Intentionally empty - discards all signals
    }

    fn try_emit(&self, _signal: &str, _data: Option<serde_json::Value>) {
        // Intentionally empty - discards all signals
    }
}

/// A sink that logs signals through the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    /// The log level to use.
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Creates an info-level logging sink.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }

    fn log_signal(&self, signal: &str, data: &Option<serde_json::Value>) {
        match self.level {
            Level::DEBUG => {
                debug!(
                    signal = %signal,
                    payload = ?data,
                    "Signal: {}", signal
                );
            }
            _ => {
                info!(
                    signal = %signal,
                    payload = ?data,
                    "Signal: {}", signal
                );
            }
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, signal: &str, data: Option<serde_json::Value>) {
        self.log_signal(signal, &data);
    }

    fn try_emit(&self, signal: &str, data: Option<serde_json::Value>) {
        self.log_signal(signal, &data);
    }
}

/// A collecting sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    signals: parking_lot::RwLock<Vec<(String, Option<serde_json::Value>)>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected signals.
    #[must_use]
    pub fn signals(&self) -> Vec<(String, Option<serde_json::Value>)> {
        self.signals.read().clone()
    }

    /// Returns the payloads of signals with the given name.
    #[must_use]
    pub fn payloads_of(&self, signal: &str) -> Vec<serde_json::Value> {
        self.signals
            .read()
            .iter()
            .filter(|(name, _)| name == signal)
            .filter_map(|(_, data)| data.clone())
            .collect()
    }

    /// Number of collected signals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.signals.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signals.read().is_empty()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, signal: &str, data: Option<serde_json::Value>) {
        self.signals.write().push((signal.to_string(), data));
    }

    fn try_emit(&self, signal: &str, data: Option<serde_json::Value>) {
        self.signals.write().push((signal.to_string(), data));
    }
}
