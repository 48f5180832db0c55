use std::fmt;
use std::sync::Arc;

/// Sink for the client's log lines.
///
/// The client calls it once per transport error and once per retry decision.
/// Implementations must tolerate concurrent calls.
pub trait Logger: Send + Sync {
    fn log(&self, message: fmt::Arguments<'_>);
}

impl<F> Logger for F
where
    F: Fn(fmt::Arguments<'_>) + Send + Sync,
{
    fn log(&self, message: fmt::Arguments<'_>) {
        self(message)
    }
}

/// Forwards log lines to `tracing` at warn level.
#[cfg(feature = "tracing")]
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

#[cfg(feature = "tracing")]
impl Logger for TracingLogger {
    fn log(&self, message: fmt::Arguments<'_>) {
        tracing::warn!(target: "netter", "{}", message);
    }
}

/// Writes log lines to standard error.
#[derive(Clone, Copy, Debug, Default)]
pub struct StderrLogger;

impl Logger for StderrLogger {
    fn log(&self, message: fmt::Arguments<'_>) {
        eprintln!("{message}");
    }
}

pub(crate) fn default_logger() -> Arc<dyn Logger> {
    #[cfg(feature = "tracing")]
    {
        Arc::new(TracingLogger)
    }
    #[cfg(not(feature = "tracing"))]
    {
        Arc::new(StderrLogger)
    }
}

#[cfg(test)]
mod tests {
    use std::fmt;
    use std::sync::{Arc, Mutex};

    use super::Logger;

    #[test]
    fn closures_are_loggers() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let logger = move |message: fmt::Arguments<'_>| {
            sink.lock().unwrap().push(message.to_string());
        };

        logger.log(format_args!("RETRY {} ({} left)", "GET /", 2));
        assert_eq!(*lines.lock().unwrap(), vec!["RETRY GET / (2 left)".to_owned()]);
    }
}
