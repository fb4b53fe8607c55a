/*!
Graceful shutdown of a metrics provider and any log sinks.
*/

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    time::{Duration, Instant},
};

use crate::{export::ExportError, logger::Logger, provider::MeterProvider, sink::Sink, value::Value};

/**
The result of shutting down a [`MeterProvider`].
*/
#[derive(Debug, Clone)]
pub enum ShutdownOutcome {
    /**
    All buffered data was exported.
    */
    Flushed,
    /**
    The deadline passed before the final export completed; remaining data was discarded.
    */
    TimedOut,
    /**
    The final export completed but failed.
    */
    Failed(ExportError),
    /**
    The provider had already been shut down; nothing was done.
    */
    AlreadyShutdown,
}

impl ShutdownOutcome {
    pub fn is_flushed(&self) -> bool {
        matches!(self, ShutdownOutcome::Flushed)
    }

    /**
    Whether the outcome is an expected consequence of shutting down.

    Timeouts and cancellations are expected; they mean the deadline did its job.
    */
    pub fn is_expected(&self) -> bool {
        match self {
            ShutdownOutcome::Flushed
            | ShutdownOutcome::TimedOut
            | ShutdownOutcome::AlreadyShutdown => true,
            ShutdownOutcome::Failed(err) => err.is_cancelled(),
        }
    }
}

impl PartialEq for ShutdownOutcome {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ShutdownOutcome::Flushed, ShutdownOutcome::Flushed)
            | (ShutdownOutcome::TimedOut, ShutdownOutcome::TimedOut)
            | (ShutdownOutcome::AlreadyShutdown, ShutdownOutcome::AlreadyShutdown) => true,
            (ShutdownOutcome::Failed(a), ShutdownOutcome::Failed(b)) => {
                a.to_string() == b.to_string()
            }
            _ => false,
        }
    }
}

impl fmt::Display for ShutdownOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ShutdownOutcome::Flushed => f.write_str("flushed"),
            ShutdownOutcome::TimedOut => f.write_str("timed out"),
            ShutdownOutcome::Failed(err) => write!(f, "failed: {err}"),
            ShutdownOutcome::AlreadyShutdown => f.write_str("already shut down"),
        }
    }
}

/**
Shut down a metrics provider and flush log sinks within a single deadline.

```no_run
# fn run(provider: &tally::MeterProvider, stdout: &dyn tally::sink::Sink, logger: &tally::Logger) {
use std::time::Duration;

let report = tally::Shutdown::new(Duration::from_secs(5))
    .provider(provider)
    .sink(stdout)
    .run(logger);

assert!(report.metrics.is_expected());
# }
```
*/
pub struct Shutdown<'a> {
    deadline: Duration,
    provider: Option<&'a MeterProvider>,
    sinks: Vec<&'a dyn Sink>,
}

impl<'a> Shutdown<'a> {
    pub fn new(deadline: Duration) -> Self {
        Shutdown {
            deadline,
            provider: None,
            sinks: Vec::new(),
        }
    }

    pub fn provider(mut self, provider: &'a MeterProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    /**
    A sink to flush after the provider has shut down.

    Sinks are flushed in the order they're added, each with whatever remains of the deadline.
    */
    pub fn sink(mut self, sink: &'a dyn Sink) -> Self {
        self.sinks.push(sink);
        self
    }

    /**
    Run the shutdown, logging its results through `logger`.

    This method never panics because of a provider or sink.
    */
    pub fn run(self, logger: &Logger) -> ShutdownReport {
        let started = Instant::now();

        let metrics = match self.provider {
            Some(provider) => {
                match panic::catch_unwind(AssertUnwindSafe(|| provider.shutdown(self.deadline))) {
                    Ok(outcome) => outcome,
                    Err(_) => ShutdownOutcome::Failed(ExportError::Panicked),
                }
            }
            None => ShutdownOutcome::AlreadyShutdown,
        };

        if metrics.is_expected() {
            guard(|| {
                crate::debug!(
                    logger,
                    "metrics provider shut down",
                    outcome: Value::from_display(&metrics)
                )
            });
        } else {
            guard(|| {
                crate::error!(
                    logger,
                    "metrics provider failed to shut down",
                    outcome: Value::from_display(&metrics)
                )
            });
        }

        let mut sinks_flushed = true;

        for (index, sink) in self.sinks.iter().enumerate() {
            let remaining = self.deadline.saturating_sub(started.elapsed());

            let flushed = panic::catch_unwind(AssertUnwindSafe(|| sink.blocking_flush(remaining)));

            match flushed {
                Ok(true) => (),
                Ok(false) => {
                    sinks_flushed = false;

                    guard(|| crate::debug!(logger, "log sink didn't flush in time", sink: index));
                }
                Err(_) => {
                    sinks_flushed = false;

                    guard(|| crate::error!(logger, "log sink panicked while flushing", sink: index));
                }
            }
        }

        ShutdownReport {
            metrics,
            sinks_flushed,
            elapsed: started.elapsed(),
        }
    }
}

// The logger may write to one of the sinks that just failed
fn guard(f: impl FnOnce()) {
    let _ = panic::catch_unwind(AssertUnwindSafe(f));
}

/**
The results of a [`Shutdown`].
*/
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub metrics: ShutdownOutcome,
    /**
    Whether every sink flushed within the deadline without panicking.
    */
    pub sinks_flushed: bool,
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.metrics.is_flushed() && self.sinks_flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        sync::{Arc, Mutex},
        thread,
    };

    use crate::{export::InMemoryExporter, record::Record, sink};

    struct PanickingSink;

    impl Sink for PanickingSink {
        fn emit(&self, _: &Record) {}

        fn blocking_flush(&self, _: Duration) -> bool {
            panic!("failed to flush")
        }
    }

    struct SlowSink(Duration);

    impl Sink for SlowSink {
        fn emit(&self, _: &Record) {}

        fn blocking_flush(&self, timeout: Duration) -> bool {
            thread::sleep(self.0.min(timeout));

            self.0 <= timeout
        }
    }

    #[test]
    fn expected_outcomes() {
        assert!(ShutdownOutcome::Flushed.is_expected());
        assert!(ShutdownOutcome::TimedOut.is_expected());
        assert!(ShutdownOutcome::AlreadyShutdown.is_expected());
        assert!(ShutdownOutcome::Failed(ExportError::Cancelled).is_expected());
        assert!(!ShutdownOutcome::Failed(ExportError::Panicked).is_expected());
    }

    #[test]
    fn sink_panics_are_caught() {
        let provider = MeterProvider::builder(InMemoryExporter::new()).build();

        let panicking = PanickingSink;
        let empty = sink::Empty;

        let report = Shutdown::new(Duration::from_secs(1))
            .provider(&provider)
            .sink(&panicking)
            .sink(&empty)
            .run(&Logger::disabled());

        assert_eq!(ShutdownOutcome::Flushed, report.metrics);
        assert!(!report.sinks_flushed);
        assert!(!report.is_clean());
    }

    #[test]
    fn sinks_share_the_deadline() {
        let slow = SlowSink(Duration::from_millis(300));
        let slower = SlowSink(Duration::from_secs(10));

        let report = Shutdown::new(Duration::from_millis(500))
            .sink(&slow)
            .sink(&slower)
            .run(&Logger::disabled());

        assert!(!report.sinks_flushed);
        assert!(report.elapsed < Duration::from_secs(2));
    }

    #[test]
    fn unexpected_failures_are_logged_as_errors() {
        let levels = Arc::new(Mutex::new(Vec::new()));

        let logger = Logger::new("test", {
            let levels = levels.clone();

            sink::from_fn(move |record| levels.lock().unwrap().push(record.level()))
        });

        let panicking = PanickingSink;

        Shutdown::new(Duration::from_secs(1))
            .sink(&panicking)
            .run(&logger);

        assert!(levels.lock().unwrap().contains(&crate::Level::Error));
    }
}
