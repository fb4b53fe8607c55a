use std::{
    future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tally::{
    Attributes, ExportError, Exporter, InMemoryExporter, MeterProvider, MetricsBatch,
    ShutdownOutcome,
};

fn endpoint() -> Attributes {
    [("endpoint", "/api/test")].into_iter().collect()
}

#[derive(Clone, Default)]
struct Rejecting {
    attempts: Arc<AtomicUsize>,
}

impl Exporter for Rejecting {
    async fn export(&self, _: MetricsBatch) -> Result<(), ExportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        Err(ExportError::Rejected {
            status: "503".into(),
            retryable: true,
        })
    }
}

struct Hanging;

impl Exporter for Hanging {
    async fn export(&self, _: MetricsBatch) -> Result<(), ExportError> {
        future::pending().await
    }
}

struct Panicking;

impl Exporter for Panicking {
    async fn export(&self, _: MetricsBatch) -> Result<(), ExportError> {
        panic!("exporter failed")
    }
}

#[test]
fn exported_counter_equals_deltas_in_each_window() {
    let exporter = InMemoryExporter::new();
    let provider = MeterProvider::builder(exporter.clone())
        .interval(Duration::from_secs(60))
        .spawn()
        .unwrap();

    let counter = provider.meter("test").counter("requests").build().unwrap();

    for _ in 0..10 {
        counter.add(1, &endpoint());
    }
    assert!(provider.force_flush(Duration::from_secs(5)));

    counter.add(4, &endpoint());
    counter.add(3, &endpoint());

    assert_eq!(
        ShutdownOutcome::Flushed,
        provider.shutdown(Duration::from_secs(5))
    );

    let per_window = exporter
        .batches()
        .iter()
        .filter_map(|batch| batch.metric("requests"))
        .filter_map(|metric| metric.sum_total())
        .collect::<Vec<_>>();

    assert_eq!(vec![10, 7], per_window);
}

#[test]
fn recording_is_independent_of_the_transport() {
    let provider = MeterProvider::builder(Hanging)
        .interval(Duration::from_millis(10))
        .spawn()
        .unwrap();

    let meter = provider.meter("test");
    let counter = meter.counter("requests").build().unwrap();
    let histogram = meter.histogram("latency").build().unwrap();

    let started = Instant::now();
    for i in 0..1000 {
        counter.add(1, &endpoint());
        histogram.record(i as f64, &endpoint());
    }
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(1), "{elapsed:?}");

    provider.shutdown(Duration::from_millis(100));
}

#[test]
fn shutdown_exports_buffered_data_exactly_once() {
    let exporter = InMemoryExporter::new();
    let provider = MeterProvider::builder(exporter.clone())
        .interval(Duration::from_secs(60))
        .spawn()
        .unwrap();

    let counter = provider.meter("test").counter("requests").build().unwrap();
    counter.add(42, &endpoint());

    assert_eq!(
        ShutdownOutcome::Flushed,
        provider.shutdown(Duration::from_secs(5))
    );
    assert_eq!(
        ShutdownOutcome::AlreadyShutdown,
        provider.shutdown(Duration::from_secs(5))
    );

    assert_eq!(1, exporter.batches().len());
    assert_eq!(42, exporter.total("requests"));
}

#[test]
fn shutdown_with_a_hanging_transport_respects_the_deadline() {
    let provider = MeterProvider::builder(Hanging)
        .interval(Duration::from_secs(60))
        .spawn()
        .unwrap();

    let counter = provider.meter("test").counter("requests").build().unwrap();
    counter.add(1, &endpoint());

    let deadline = Duration::from_millis(500);

    let started = Instant::now();
    let outcome = provider.shutdown(deadline);
    let elapsed = started.elapsed();

    assert_eq!(ShutdownOutcome::TimedOut, outcome);
    assert!(outcome.is_expected());
    assert!(elapsed < deadline + Duration::from_millis(500), "{elapsed:?}");
}

#[test]
fn duplicate_registration_fails_regardless_of_order() {
    let provider = MeterProvider::builder(InMemoryExporter::new()).build();

    for (first_counter, meter) in [(true, "a"), (false, "b")] {
        let meter = provider.meter(meter);

        let (first, second) = if first_counter {
            (
                meter.counter("app.requests.count").build().map(drop),
                meter.histogram("app.requests.count").build().map(drop),
            )
        } else {
            (
                meter.histogram("app.requests.count").build().map(drop),
                meter.counter("app.requests.count").build().map(drop),
            )
        };

        assert!(first.is_ok());
        assert!(matches!(
            second,
            Err(tally::Error::DuplicateInstrument { .. })
        ));
    }
}

#[test]
fn all_increments_are_exported_across_cycles() {
    let exporter = InMemoryExporter::new();
    let provider = MeterProvider::builder(exporter.clone())
        .interval(Duration::from_millis(20))
        .spawn()
        .unwrap();

    let counter = provider
        .meter("myapp.metrics")
        .counter("app.requests.count")
        .build()
        .unwrap();

    for i in 0..1000 {
        counter.add(1, &endpoint());

        if i % 100 == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    assert!(provider.shutdown(Duration::from_secs(5)).is_flushed());

    assert_eq!(1000, exporter.total("app.requests.count"));
}

#[test]
fn failed_exports_are_retried_then_reported() {
    let exporter = Rejecting::default();
    let provider = MeterProvider::builder(exporter.clone())
        .interval(Duration::from_secs(60))
        .max_retries(2)
        .spawn()
        .unwrap();

    let counter = provider.meter("test").counter("requests").build().unwrap();
    counter.add(1, &endpoint());

    let outcome = provider.shutdown(Duration::from_secs(5));

    assert!(matches!(
        outcome,
        ShutdownOutcome::Failed(ExportError::Rejected { .. })
    ));
    assert!(!outcome.is_expected());
    assert_eq!(3, exporter.attempts.load(Ordering::SeqCst));
    assert_eq!(3, provider.metrics().export_failed);
}

#[test]
fn exporter_panics_are_caught() {
    let provider = MeterProvider::builder(Panicking)
        .interval(Duration::from_secs(60))
        .spawn()
        .unwrap();

    let counter = provider.meter("test").counter("requests").build().unwrap();
    counter.add(1, &endpoint());

    assert_eq!(
        ShutdownOutcome::Failed(ExportError::Panicked),
        provider.shutdown(Duration::from_secs(5))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_on_a_multi_threaded_runtime() {
    let exporter = InMemoryExporter::new();
    let provider = MeterProvider::builder(exporter.clone())
        .interval(Duration::from_secs(60))
        .spawn()
        .unwrap();

    let counter = provider.meter("test").counter("requests").build().unwrap();
    counter.add(5, &endpoint());

    assert!(provider.shutdown(Duration::from_secs(5)).is_flushed());
    assert_eq!(5, exporter.total("requests"));
}

#[tokio::test]
async fn shutdown_on_a_current_thread_runtime() {
    let exporter = InMemoryExporter::new();
    let provider = MeterProvider::builder(exporter.clone())
        .interval(Duration::from_secs(60))
        .spawn()
        .unwrap();

    let counter = provider.meter("test").counter("requests").build().unwrap();
    counter.add(5, &endpoint());

    let started = Instant::now();
    let outcome = provider.shutdown(Duration::from_secs(2));

    assert!(outcome.is_flushed(), "{outcome}");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(5, exporter.total("requests"));
}

#[tokio::test]
async fn force_flush_on_a_current_thread_runtime() {
    let exporter = InMemoryExporter::new();
    let provider = MeterProvider::builder(exporter.clone())
        .interval(Duration::from_secs(60))
        .spawn()
        .unwrap();

    let counter = provider.meter("test").counter("requests").build().unwrap();
    counter.add(3, &endpoint());

    assert!(provider.force_flush(Duration::from_secs(5)));
    assert_eq!(3, exporter.total("requests"));

    assert!(provider.shutdown(Duration::from_secs(5)).is_expected());
}
