/*!
The [`MeterProvider`]: a periodic export pipeline for counters and histograms.

Measurements recorded through a provider's instruments are folded into an in-memory [`Aggregation`] behind a short-lived lock. A background worker swaps that aggregation out once per interval and hands it to an [`Exporter`]. The provider moves through the states `Idle`, `Running`, `Draining`, and `Stopped`; once stopped it never restarts.
*/

use std::{
    fmt,
    future::{self, Future},
    io, mem,
    panic::{self, AssertUnwindSafe},
    pin::pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc, Mutex, PoisonError,
    },
    task::Poll,
    time::{Duration, Instant},
};

use tally_batcher::{BatchError, CatchUnwind, Sender};
use tokio::sync::Notify;

use crate::{
    aggregation::{Aggregation, Measurement},
    batch::{MetricsBatch, Temporality},
    error::Error,
    export::{ExportError, Exporter},
    internal_metrics::{InternalMetrics, PipelineMetrics},
    logger::Logger,
    meter::Meter,
    resource::{Resource, Scope},
    shutdown::ShutdownOutcome,
    timestamp::Timestamp,
    value::Value,
};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const DRAINING: u8 = 2;
const STOPPED: u8 = 3;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CARDINALITY_LIMIT: usize = 2000;
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/**
The lifecycle state of a [`MeterProvider`].
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /**
    Measurements are buffered but nothing is exported yet.
    */
    Idle,
    Running,
    /**
    Shutdown has begun and a final export is in progress.
    */
    Draining,
    Stopped,
}

/**
The state shared between a provider and the instruments created from it.
*/
pub(crate) struct Pipeline {
    state: AtomicU8,
    sender: Sender<Aggregation>,
    next_instrument_id: AtomicU64,
    pub(crate) metrics: Arc<InternalMetrics>,
}

impl Pipeline {
    pub(crate) fn record(&self, measurement: Measurement) {
        match self.state.load(Ordering::Acquire) {
            DRAINING | STOPPED => self.metrics.measurement_after_shutdown.increment(),
            _ => self.sender.send(measurement),
        }
    }

    pub(crate) fn next_instrument_id(&self) -> u64 {
        self.next_instrument_id.fetch_add(1, Ordering::Relaxed)
    }
}

type Start = Box<dyn FnOnce() -> io::Result<()> + Send>;

/**
A builder for a [`MeterProvider`].
*/
pub struct MeterProviderBuilder<E> {
    exporter: E,
    resource: Option<Resource>,
    interval: Duration,
    export_timeout: Duration,
    temporality: Temporality,
    cardinality_limit: usize,
    max_retries: u32,
    logger: Logger,
}

impl<E: Exporter> MeterProviderBuilder<E> {
    pub fn resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /**
    How often to export.

    The default is 5 seconds.
    */
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /**
    The maximum time a single export may take before it's abandoned.

    The default is 30 seconds. During shutdown, the drain deadline also applies.
    */
    pub fn export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    pub fn temporality(mut self, temporality: Temporality) -> Self {
        self.temporality = temporality;
        self
    }

    /**
    The maximum number of distinct series held in a single export cycle.

    Measurements that would create a new series beyond this limit are dropped.
    */
    pub fn cardinality_limit(mut self, limit: usize) -> Self {
        self.cardinality_limit = limit;
        self
    }

    /**
    The number of times a failed export is retried within its cycle.
    */
    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /**
    The logger that receives the provider's own diagnostics.

    By default, diagnostics are discarded.
    */
    pub fn diagnostics(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /**
    Build an idle provider.

    Measurements are buffered until [`MeterProvider::start`] is called.
    */
    pub fn build(self) -> MeterProvider {
        let (sender, receiver) = tally_batcher::bounded::<Aggregation>(self.cardinality_limit);

        let metrics = Arc::new(InternalMetrics::default());
        let drain = Arc::new(Drain::default());

        let worker = Arc::new(Worker {
            exporter: self.exporter,
            resource: Arc::new(self.resource.unwrap_or_default()),
            temporality: self.temporality,
            export_timeout: self.export_timeout,
            logger: self.logger.clone(),
            metrics: metrics.clone(),
            drain: drain.clone(),
            last_collect: Mutex::new(Timestamp::now()),
            cumulative: Mutex::new(Aggregation::default()),
            cardinality_limit: self.cardinality_limit,
        });

        let receiver = receiver
            .with_interval(self.interval)
            .with_max_retries(self.max_retries);

        let start: Start = Box::new(move || {
            tally_batcher::tokio::spawn("tally-metrics", receiver, move |batch| {
                let worker = worker.clone();

                async move { worker.on_batch(batch).await }
            })
        });

        MeterProvider {
            pipeline: Arc::new(Pipeline {
                state: AtomicU8::new(IDLE),
                sender,
                next_instrument_id: AtomicU64::new(0),
                metrics,
            }),
            start: Mutex::new(Some(start)),
            spawn_failure: Mutex::new(None),
            drain,
            logger: self.logger,
        }
    }

    /**
    Build a provider and start its export worker.
    */
    pub fn spawn(self) -> Result<MeterProvider, Error> {
        let provider = self.build();
        provider.start()?;

        Ok(provider)
    }
}

/**
A periodic export pipeline for metrics.

Instruments are created through [`Meter`]s returned by [`MeterProvider::meter`]. The provider must be shut down with [`MeterProvider::shutdown`] to export any measurements recorded since the last interval.
*/
pub struct MeterProvider {
    pipeline: Arc<Pipeline>,
    start: Mutex<Option<Start>>,
    spawn_failure: Mutex<Option<ExportError>>,
    drain: Arc<Drain>,
    logger: Logger,
}

impl MeterProvider {
    pub fn builder<E: Exporter>(exporter: E) -> MeterProviderBuilder<E> {
        MeterProviderBuilder {
            exporter,
            resource: None,
            interval: DEFAULT_INTERVAL,
            export_timeout: DEFAULT_EXPORT_TIMEOUT,
            temporality: Temporality::default(),
            cardinality_limit: DEFAULT_CARDINALITY_LIMIT,
            max_retries: DEFAULT_MAX_RETRIES,
            logger: Logger::disabled(),
        }
    }

    /**
    Get a meter for the given instrumentation scope.

    Each meter is an independent registry of instruments.
    */
    pub fn meter(&self, scope: impl Into<Scope>) -> Meter {
        Meter::new(scope.into(), self.pipeline.clone())
    }

    pub fn state(&self) -> State {
        match self.pipeline.state.load(Ordering::Acquire) {
            IDLE => State::Idle,
            RUNNING => State::Running,
            DRAINING => State::Draining,
            _ => State::Stopped,
        }
    }

    /**
    Start the export worker.

    If the current thread is running in a multi-threaded `tokio` runtime then the worker is spawned on it. Otherwise a dedicated thread is started. Calling this method more than once has no effect.

    If the worker can't be started then the provider is stopped, and the next call to [`MeterProvider::shutdown`] reports the failure.
    */
    pub fn start(&self) -> Result<(), Error> {
        let start = self
            .start
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(start) = start else {
            return Ok(());
        };

        if let Err(err) = start() {
            let err = Arc::new(err);

            self.pipeline.state.store(STOPPED, Ordering::Release);
            *self
                .spawn_failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(ExportError::Transport(err.clone()));

            return Err(Error::Spawn(err));
        }

        let _ = self.pipeline.state.compare_exchange(
            IDLE,
            RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        Ok(())
    }

    /**
    Export everything recorded so far without waiting for the next interval.

    Returns `true` if the export completed within `timeout`, whether or not it succeeded.
    */
    pub fn force_flush(&self, timeout: Duration) -> bool {
        if self.pipeline.state.load(Ordering::Acquire) != RUNNING {
            return false;
        }

        tally_batcher::tokio::blocking_flush(&self.pipeline.sender, timeout)
    }

    /**
    Stop accepting measurements and export whatever remains, waiting at most `deadline`.

    If the final export doesn't complete in time it's cancelled and its data is discarded. Only the first call does any work; later calls return [`ShutdownOutcome::AlreadyShutdown`].
    */
    pub fn shutdown(&self, deadline: Duration) -> ShutdownOutcome {
        let started = Instant::now();

        if self.pipeline.state.load(Ordering::Acquire) == IDLE {
            // A failure is recorded in `spawn_failure`
            let _ = self.start();
        }

        let spawn_failure = self
            .spawn_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(err) = spawn_failure {
            return ShutdownOutcome::Failed(err);
        }

        if self
            .pipeline
            .state
            .compare_exchange(RUNNING, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return ShutdownOutcome::AlreadyShutdown;
        }

        self.drain.draining.store(true, Ordering::Release);

        let closed = tally_batcher::tokio::blocking_close(
            &self.pipeline.sender,
            deadline.saturating_sub(started.elapsed()),
        );

        self.pipeline.state.store(STOPPED, Ordering::Release);

        if !closed {
            // Wake any in-flight export so the worker can exit, then discard what's left
            self.drain.cancel();
            self.pipeline.sender.abandon();

            crate::debug!(
                self.logger,
                "metrics drain timed out; remaining data was discarded",
                deadline_ms: duration_ms(deadline)
            );

            return ShutdownOutcome::TimedOut;
        }

        match self.drain.take_failure() {
            Some(err) => ShutdownOutcome::Failed(err),
            None => ShutdownOutcome::Flushed,
        }
    }

    /**
    Sample the provider's own metrics.
    */
    pub fn metrics(&self) -> PipelineMetrics {
        self.pipeline
            .metrics
            .sample(self.pipeline.sender.metrics())
    }
}

impl fmt::Debug for MeterProvider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MeterProvider")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/**
Coordination between a provider that's shutting down and its worker.
*/
#[derive(Default)]
struct Drain {
    draining: AtomicBool,
    cancelled: AtomicBool,
    notify: Notify,
    failure: Mutex<Option<ExportError>>,
}

impl Drain {
    fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    async fn cancelled(&self) {
        loop {
            // Register for a notification before checking the flag so a concurrent cancel isn't missed
            let notified = self.notify.notified();

            if self.cancelled.load(Ordering::Acquire) {
                return;
            }

            notified.await;
        }
    }

    fn set_failure(&self, failure: Option<ExportError>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = failure;
    }

    fn take_failure(&self) -> Option<ExportError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/**
The state owned by the export worker.

This deliberately doesn't reference the [`Pipeline`], so dropping a provider and its instruments closes the channel.
*/
struct Worker<E> {
    exporter: E,
    resource: Arc<Resource>,
    temporality: Temporality,
    export_timeout: Duration,
    logger: Logger,
    metrics: Arc<InternalMetrics>,
    drain: Arc<Drain>,
    last_collect: Mutex<Timestamp>,
    cumulative: Mutex<Aggregation>,
    cardinality_limit: usize,
}

impl<E: Exporter> Worker<E> {
    async fn on_batch(&self, mut batch: Aggregation) -> Result<(), BatchError<Aggregation>> {
        let (start, end) = *batch.window.get_or_insert_with(|| {
            let now = Timestamp::now();
            let start = mem::replace(
                &mut *self
                    .last_collect
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
                now,
            );

            (start, now)
        });

        let export = match self.temporality {
            Temporality::Delta => {
                batch.to_batch(&self.resource, Temporality::Delta, Some(start), end)
            }
            Temporality::Cumulative => {
                let mut running = self
                    .cumulative
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);

                let dropped =
                    mem::take(&mut batch).merge_into(&mut running, self.cardinality_limit);

                if dropped > 0 {
                    self.metrics.measurement_rejected.add(dropped);

                    crate::warn!(
                        self.logger,
                        "cumulative series dropped at the cardinality limit",
                        dropped: dropped
                    );
                }

                running.to_batch(&self.resource, Temporality::Cumulative, None, end)
            }
        };

        let series = export.metrics().count();

        match self.export(export).await {
            Ok(()) => {
                self.metrics.export_succeeded.increment();

                if self.drain.is_draining() {
                    self.drain.set_failure(None);
                }

                crate::debug!(self.logger, "exported metrics", metrics: series);

                Ok(())
            }
            Err(err) => {
                if err.is_cancelled() {
                    self.metrics.export_cancelled.increment();

                    crate::debug!(
                        self.logger,
                        "metrics export cancelled",
                        error: Value::from_display(&err)
                    );
                } else {
                    self.metrics.export_failed.increment();

                    crate::warn!(
                        self.logger,
                        "metrics export failed",
                        error: Value::from_display(&err),
                        retryable: err.is_retryable()
                    );
                }

                if self.drain.is_draining() {
                    self.drain.set_failure(Some(err.clone()));
                }

                // Cumulative data stays in the running state, so it's carried by the next cycle instead
                if err.is_retryable() && self.temporality == Temporality::Delta {
                    Err(BatchError::retry(err, batch))
                } else {
                    Err(BatchError::no_retry(err))
                }
            }
        }
    }

    async fn export(&self, batch: MetricsBatch) -> Result<(), ExportError> {
        let export = match panic::catch_unwind(AssertUnwindSafe(|| self.exporter.export(batch))) {
            Ok(export) => export,
            Err(_) => return Err(ExportError::Panicked),
        };

        let mut export = pin!(tokio::time::timeout(
            self.export_timeout,
            CatchUnwind(AssertUnwindSafe(export)),
        ));
        let mut cancelled = pin!(self.drain.cancelled());

        future::poll_fn(|cx| {
            if cancelled.as_mut().poll(cx).is_ready() {
                return Poll::Ready(Err(ExportError::Cancelled));
            }

            export.as_mut().poll(cx).map(|result| match result {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(ExportError::Panicked),
                Err(_) => Err(ExportError::Timeout(self.export_timeout)),
            })
        })
        .await
    }
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{attributes::Attributes, export::InMemoryExporter};

    #[test]
    fn idle_provider_buffers_until_shutdown() {
        let exporter = InMemoryExporter::new();
        let provider = MeterProvider::builder(exporter.clone()).build();

        let counter = provider.meter("test").counter("requests").build().unwrap();
        counter.add(3, &Attributes::empty());

        assert_eq!(State::Idle, provider.state());
        assert!(exporter.batches().is_empty());

        assert_eq!(
            ShutdownOutcome::Flushed,
            provider.shutdown(Duration::from_secs(5))
        );

        assert_eq!(State::Stopped, provider.state());
        assert_eq!(3, exporter.total("requests"));
    }

    #[test]
    fn recordings_after_shutdown_are_counted() {
        let provider = MeterProvider::builder(InMemoryExporter::new())
            .spawn()
            .unwrap();

        let counter = provider.meter("test").counter("requests").build().unwrap();

        provider.shutdown(Duration::from_secs(5));

        counter.add(1, &Attributes::empty());
        counter.add(1, &Attributes::empty());

        assert_eq!(2, provider.metrics().measurement_after_shutdown);
    }

    #[test]
    fn non_finite_histogram_values_are_rejected() {
        let exporter = InMemoryExporter::new();
        let provider = MeterProvider::builder(exporter.clone()).spawn().unwrap();

        let histogram = provider
            .meter("test")
            .histogram("latency")
            .build()
            .unwrap();

        histogram.record(f64::NAN, &Attributes::empty());
        histogram.record(f64::INFINITY, &Attributes::empty());
        histogram.record(1.0, &Attributes::empty());

        provider.shutdown(Duration::from_secs(5));

        assert_eq!(2, provider.metrics().measurement_rejected);

        let count = exporter
            .batches()
            .iter()
            .filter_map(|batch| batch.metric("latency"))
            .filter_map(|metric| metric.histogram_count())
            .sum::<u64>();

        assert_eq!(1, count);
    }

    #[test]
    fn cardinality_limit_drops_new_series() {
        let exporter = InMemoryExporter::new();
        let provider = MeterProvider::builder(exporter.clone())
            .cardinality_limit(2)
            .build();

        let counter = provider.meter("test").counter("requests").build().unwrap();

        for i in 0..5i64 {
            counter.add(1, &[("id", i)].into_iter().collect());
        }
        // Existing series still accept measurements at the limit
        counter.add(1, &[("id", 0i64)].into_iter().collect());

        provider.shutdown(Duration::from_secs(5));

        assert_eq!(3, exporter.total("requests"));
        assert_eq!(3, provider.metrics().channel.queue_overflow);
    }

    #[test]
    fn force_flush_exports_before_the_interval() {
        let exporter = InMemoryExporter::new();
        let provider = MeterProvider::builder(exporter.clone())
            .interval(Duration::from_secs(60))
            .spawn()
            .unwrap();

        let counter = provider.meter("test").counter("requests").build().unwrap();
        counter.add(5, &Attributes::empty());

        assert!(provider.force_flush(Duration::from_secs(5)));
        assert_eq!(5, exporter.total("requests"));

        provider.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn cumulative_exports_running_totals() {
        let exporter = InMemoryExporter::new();
        let provider = MeterProvider::builder(exporter.clone())
            .interval(Duration::from_secs(60))
            .temporality(Temporality::Cumulative)
            .spawn()
            .unwrap();

        let counter = provider.meter("test").counter("requests").build().unwrap();

        counter.add(2, &Attributes::empty());
        assert!(provider.force_flush(Duration::from_secs(5)));

        counter.add(3, &Attributes::empty());
        provider.shutdown(Duration::from_secs(5));

        let totals = exporter
            .batches()
            .iter()
            .filter_map(|batch| batch.metric("requests"))
            .map(|metric| {
                assert_eq!(Temporality::Cumulative, metric.temporality());
                metric.sum_total()
            })
            .collect::<Vec<_>>();

        assert_eq!(vec![Some(2), Some(5)], totals);
    }

    #[test]
    fn cumulative_state_respects_the_cardinality_limit() {
        let exporter = InMemoryExporter::new();
        let provider = MeterProvider::builder(exporter.clone())
            .interval(Duration::from_secs(60))
            .temporality(Temporality::Cumulative)
            .cardinality_limit(2)
            .spawn()
            .unwrap();

        let counter = provider.meter("test").counter("requests").build().unwrap();

        for i in 0..2i64 {
            counter.add(1, &[("id", i)].into_iter().collect());
        }
        assert!(provider.force_flush(Duration::from_secs(5)));

        // A new window has room for a new series, but the running state doesn't
        counter.add(1, &[("id", 0i64)].into_iter().collect());
        counter.add(1, &[("id", 2i64)].into_iter().collect());
        provider.shutdown(Duration::from_secs(5));

        let last = exporter.batches().pop().unwrap();
        let metric = last.metric("requests").unwrap();

        assert_eq!(Some(3), metric.sum_total());
        assert_eq!(1, provider.metrics().measurement_rejected);
    }

    #[test]
    fn failed_start_is_reported_by_shutdown() {
        let provider = MeterProvider::builder(InMemoryExporter::new()).build();

        *provider.start.lock().unwrap() = Some(Box::new(|| {
            Err(io::Error::new(io::ErrorKind::Other, "no threads available"))
        }));

        assert!(matches!(provider.start(), Err(Error::Spawn(_))));
        assert_eq!(State::Stopped, provider.state());

        assert!(matches!(
            provider.shutdown(Duration::from_secs(1)),
            ShutdownOutcome::Failed(ExportError::Transport(_))
        ));
        assert!(matches!(
            provider.shutdown(Duration::from_secs(1)),
            ShutdownOutcome::AlreadyShutdown
        ));
    }

    #[test]
    fn delta_windows_are_contiguous() {
        let exporter = InMemoryExporter::new();
        let provider = MeterProvider::builder(exporter.clone())
            .interval(Duration::from_secs(60))
            .spawn()
            .unwrap();

        let counter = provider.meter("test").counter("requests").build().unwrap();

        counter.add(1, &Attributes::empty());
        assert!(provider.force_flush(Duration::from_secs(5)));

        counter.add(1, &Attributes::empty());
        provider.shutdown(Duration::from_secs(5));

        let windows = exporter
            .batches()
            .iter()
            .filter_map(|batch| batch.metric("requests"))
            .map(|metric| match metric.data() {
                crate::batch::MetricData::Sum(points) => (points[0].start, points[0].time),
                crate::batch::MetricData::Histogram(_) => unreachable!(),
            })
            .collect::<Vec<_>>();

        assert_eq!(2, windows.len());
        assert_eq!(windows[0].1, windows[1].0);
        assert!(windows[0].0 <= windows[0].1);
    }
}
