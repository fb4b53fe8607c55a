/*!
A sample program that records synthetic requests and ships them to an OpenTelemetry collector.

Each request increments `app.requests.count`, records its processing time in `app.response.time`, and writes two log records. After the last request the program waits long enough for a periodic export, then shuts the pipeline down within a fixed deadline.
*/

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use clap::Parser;
use tally::{
    debug, info, sink::Sink, warn, Attributes, Config, Counter, Histogram, Level, Logger,
    MeterProvider, Protocol, Resource, Scope, Shutdown,
};
use tally_otlp::{OtlpBuilder, OtlpLogs};

const SERVICE_NAME: &str = "my-golang-application";
const SERVICE_VERSION: &str = "1.0.0";

#[derive(Parser, Debug)]
#[command(name = "tally-demo", version, about = "Record synthetic requests and export them over OTLP", long_about = None)]
struct Cli {
    /// Collector endpoint, as `host:port` or a URL (overrides OTEL_EXPORTER_OTLP_ENDPOINT)
    #[arg(long)]
    endpoint: Option<String>,

    /// Wire protocol: grpc, http/protobuf or http/json (overrides OTEL_EXPORTER_OTLP_PROTOCOL)
    #[arg(long)]
    protocol: Option<Protocol>,

    /// Use TLS for endpoints without a scheme
    #[arg(long)]
    secure: bool,

    /// Export interval in milliseconds (overrides OTEL_METRIC_EXPORT_INTERVAL)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Deadline for the final export in milliseconds
    #[arg(long, env = "TALLY_SHUTDOWN_TIMEOUT_MS")]
    shutdown_timeout_ms: Option<u64>,

    /// Number of requests to simulate
    #[arg(long, env = "TALLY_DEMO_REQUESTS", default_value_t = 1000)]
    requests: usize,

    /// Time to spend handling each request, in milliseconds
    #[arg(long, env = "TALLY_DEMO_DELAY_MS", default_value_t = 0)]
    delay_ms: u64,

    /// Time to wait after the last request so a periodic export can happen, in milliseconds
    #[arg(long, env = "TALLY_DEMO_LINGER_MS", default_value_t = 6000)]
    linger_ms: u64,

    /// Also send log records to the collector
    #[arg(long, env = "TALLY_DEMO_OTLP_LOGS")]
    otlp_logs: bool,

    /// Write log records to stdout as JSON lines
    #[arg(long)]
    json: bool,

    /// The minimum level of log records to write
    #[arg(long, env = "TALLY_LOG_LEVEL", default_value = "info")]
    log_level: Level,
}

impl Cli {
    fn config(&self) -> anyhow::Result<Config> {
        let mut config = Config::from_env().context("failed to read configuration")?;

        if let Some(ref endpoint) = self.endpoint {
            config.endpoint = endpoint.clone();
        }

        if let Some(protocol) = self.protocol {
            config.protocol = protocol;
        }

        if self.secure {
            config.insecure = false;
        }

        if let Some(interval) = self.interval_ms {
            config.interval = Duration::from_millis(interval);
        }

        if let Some(timeout) = self.shutdown_timeout_ms {
            config.shutdown_timeout = Duration::from_millis(timeout);
        }

        Ok(config)
    }
}

struct Instruments {
    requests: Counter,
    response_time: Histogram,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let stdout = tally_term::stdout().json(cli.json);

    let config = cli.config()?;
    let warnings = config.validate().context("invalid configuration")?;

    let resource = Resource::builder()
        .service_name(
            config
                .service_name
                .clone()
                .unwrap_or_else(|| SERVICE_NAME.to_owned()),
        )
        .service_version(SERVICE_VERSION)
        .from_env()
        .build()
        .context("invalid resource attributes")?;

    let otlp = OtlpBuilder::from_config(&config);

    let otlp_logs: Option<Arc<OtlpLogs>> = if cli.otlp_logs {
        Some(Arc::new(
            otlp.logs(resource.clone())
                .context("failed to configure the log exporter")?,
        ))
    } else {
        None
    };

    let logger = Logger::new("myapp.logger", stdout.and_to(otlp_logs.clone()))
        .with_min_level(cli.log_level);
    let diagnostics = logger.with_scope("tally");

    for warning in warnings {
        warn!(diagnostics, "configuration warning", warning: warning);
    }

    let exporter = otlp
        .metrics()
        .context("failed to configure the metrics exporter")?;

    let provider = MeterProvider::builder(exporter.clone())
        .resource(resource)
        .interval(config.interval)
        .export_timeout(config.export_timeout)
        .temporality(config.temporality)
        .diagnostics(diagnostics.clone())
        .spawn()?;

    let instruments = instruments(&provider)?;

    println!("Starting application with tally metrics and logs...");

    let endpoint = Attributes::from_iter([("endpoint", "/api/test")]);
    let succeeded = Attributes::from_iter([("endpoint", "/api/test"), ("status", "success")]);

    for i in 0..cli.requests {
        handle_request(
            &logger,
            &instruments,
            &endpoint,
            &succeeded,
            i,
            Duration::from_millis(cli.delay_ms),
        );
    }

    println!("Completed processing {} requests", cli.requests);

    println!("Waiting for telemetry data to be exported...");
    thread::sleep(Duration::from_millis(cli.linger_ms));

    let mut shutdown = Shutdown::new(config.shutdown_timeout).provider(&provider);

    if let Some(ref otlp_logs) = otlp_logs {
        shutdown = shutdown.sink(&**otlp_logs);
    }

    let report = shutdown.run(&diagnostics);

    for (name, value) in provider.metrics().iter().chain(exporter.metrics().iter()) {
        debug!(diagnostics, "internal metric", metric: name, value: value);
    }

    if let Some(ref otlp_logs) = otlp_logs {
        for (name, value) in otlp_logs.metrics().iter() {
            debug!(diagnostics, "internal metric", metric: name, value: value);
        }
    }

    debug!(
        diagnostics,
        "shutdown complete",
        clean: report.is_clean(),
        elapsed_ms: duration_ms(report.elapsed)
    );

    if !logger.sink().blocking_flush(Duration::from_secs(1)) {
        debug!(diagnostics, "log output wasn't flushed within 1s");
    }

    println!("Application finished");

    Ok(())
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

fn instruments(provider: &MeterProvider) -> Result<Instruments, tally::Error> {
    let meter = provider.meter(Scope::new("myapp.metrics").with_version(SERVICE_VERSION));

    let requests = meter
        .counter("app.requests.count")
        .description("Total number of requests received")
        .unit("1")
        .build()?;

    let response_time = meter
        .histogram("app.response.time")
        .description("Response time in milliseconds")
        .unit("ms")
        .build()?;

    Ok(Instruments {
        requests,
        response_time,
    })
}

fn handle_request(
    logger: &Logger,
    instruments: &Instruments,
    endpoint: &Attributes,
    succeeded: &Attributes,
    i: usize,
    delay: Duration,
) {
    info!(logger, "Handling new request", request_id: i);

    instruments.requests.add(1, endpoint);

    let start = Instant::now();

    if !delay.is_zero() {
        thread::sleep(delay);
    }

    let processing_time_ms = start.elapsed().as_secs_f64() * 1000.0;

    instruments
        .response_time
        .record(processing_time_ms, succeeded);

    info!(
        logger,
        "Request processed",
        request_id: i,
        processing_time_ms: processing_time_ms,
        message: format!("hello world {i}")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_ms_saturates() {
        assert_eq!(1500, duration_ms(Duration::from_millis(1500)));
        assert_eq!(u64::MAX, duration_ms(Duration::MAX));
    }
}
