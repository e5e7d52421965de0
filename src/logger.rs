//! Leveled logging capability used by the client, the retry loop and the
//! default transport.
//!
//! [`TracingLogger`] forwards to `tracing`; tests and embedders can supply
//! their own [`Logger`].

use std::time::{Duration, Instant};

pub use tracing::Level;

/// One structured log record.
#[derive(Clone, Copy, Default)]
pub struct Event<'a> {
    pub message: Option<&'a str>,
    /// Metric channel, e.g. `"{metric_prefix}/{action}"`.
    pub metric: Option<&'a str>,
    pub duration: Option<Duration>,
    pub payload: Option<&'a serde_json::Value>,
    pub error: Option<&'a (dyn std::error::Error + 'a)>,
}

impl<'a> Event<'a> {
    /// Creates an event carrying `message`.
    pub fn new(message: &'a str) -> Self {
        Self {
            message: Some(message),
            ..Self::default()
        }
    }

    /// Sets the metric channel.
    pub fn metric(mut self, metric: &'a str) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Sets the measured duration.
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Attaches a structured payload.
    pub fn payload(mut self, payload: &'a serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Attaches the error that caused the event.
    pub fn error(mut self, error: &'a (dyn std::error::Error + 'a)) -> Self {
        self.error = Some(error);
        self
    }
}

impl std::fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("message", &self.message)
            .field("metric", &self.metric)
            .field("duration", &self.duration)
            .field("payload", &self.payload)
            .field("error", &self.error.map(ToString::to_string))
            .finish()
    }
}

/// Leveled log sink.
pub trait Logger: Send + Sync {
    /// Whether events at `level` would be recorded.
    fn enabled(&self, level: Level) -> bool;

    fn log(&self, level: Level, event: &Event<'_>);

    fn trace(&self, event: &Event<'_>) {
        self.log(Level::TRACE, event);
    }

    fn debug(&self, event: &Event<'_>) {
        self.log(Level::DEBUG, event);
    }

    fn info(&self, event: &Event<'_>) {
        self.log(Level::INFO, event);
    }

    fn warn(&self, event: &Event<'_>) {
        self.log(Level::WARN, event);
    }

    fn error(&self, event: &Event<'_>) {
        self.log(Level::ERROR, event);
    }

    fn is_trace(&self) -> bool {
        self.enabled(Level::TRACE)
    }

    fn is_debug(&self) -> bool {
        self.enabled(Level::DEBUG)
    }
}

/// Runs `op` and logs one event at `level` carrying its wall-clock duration.
///
/// On failure the error is attached to the event and then returned.
pub fn benchmark<T, E>(
    logger: &dyn Logger,
    level: Level,
    event: Event<'_>,
    op: impl FnOnce() -> Result<T, E>,
) -> Result<T, E>
where
    E: std::error::Error,
{
    let started = Instant::now();
    let result = op();
    let event = event.duration(started.elapsed());
    match &result {
        Ok(_) => logger.log(level, &event),
        Err(err) => logger.log(level, &event.error(err)),
    }
    result
}

/// [`Logger`] that emits through the `tracing` macros.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

macro_rules! emit {
    ($level:expr, $event:expr) => {{
        let event = $event;
        let duration_ms = event.duration.map(|d| d.as_secs_f64() * 1_000.0);
        let payload = event.payload.map(|p| p.to_string());
        let error = event.error.map(|e| e.to_string());
        tracing::event!(
            $level,
            metric = event.metric,
            duration_ms,
            payload = payload.as_deref(),
            error = error.as_deref(),
            "{}",
            event.message.unwrap_or_default()
        );
    }};
}

impl Logger for TracingLogger {
    fn enabled(&self, level: Level) -> bool {
        if level == Level::TRACE {
            tracing::enabled!(Level::TRACE)
        } else if level == Level::DEBUG {
            tracing::enabled!(Level::DEBUG)
        } else if level == Level::INFO {
            tracing::enabled!(Level::INFO)
        } else if level == Level::WARN {
            tracing::enabled!(Level::WARN)
        } else {
            tracing::enabled!(Level::ERROR)
        }
    }

    fn log(&self, level: Level, event: &Event<'_>) {
        if level == Level::TRACE {
            emit!(Level::TRACE, event)
        } else if level == Level::DEBUG {
            emit!(Level::DEBUG, event)
        } else if level == Level::INFO {
            emit!(Level::INFO, event)
        } else if level == Level::WARN {
            emit!(Level::WARN, event)
        } else {
            emit!(Level::ERROR, event)
        }
    }
}
