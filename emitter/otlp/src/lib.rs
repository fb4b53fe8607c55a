/*!
Send metrics and logs to an OpenTelemetry collector using OTLP.

This library supports gRPC, HTTP+protobuf and HTTP+JSON. Payloads are encoded directly from `tally`'s own types without an intermediate representation.

# Metrics

Build an [`OtlpExporter`] and hand it to a [`tally::MeterProvider`]. The provider decides when to export; the exporter encodes each batch and sends it:

```no_run
# fn main() -> Result<(), tally::Error> {
let config = tally::Config::from_env()?;

let exporter = tally_otlp::OtlpExporter::from_config(&config)?;

let provider = tally::MeterProvider::builder(exporter)
    .interval(config.interval)
    .spawn()?;
# let _ = provider;
# Ok(())
# }
```

# Logs

Build an [`OtlpLogs`] sink and use it with a [`tally::Logger`]. Records are queued and sent in the background:

```no_run
# fn main() -> Result<(), tally::Error> {
use tally::{info, Logger, Resource};

let logs = tally_otlp::OtlpBuilder::new("http://localhost:4318")
    .protocol(tally::Protocol::HttpProtobuf)
    .logs(Resource::builder().service_name("my-app").build()?)?;

let logger = Logger::new("my-app", logs);

info!(logger, "Request processed", request_id: 1);
# Ok(())
# }
```

# Errors

Failures to reach the collector, and responses indicating the collector is overloaded, are reported as retryable [`tally::ExportError`]s. Any other rejection is final.
*/

#![deny(missing_docs)]

mod client;
mod data;
mod error;
mod exporter;
mod internal_metrics;
mod logs;

pub use self::{
    error::Error,
    exporter::{OtlpBuilder, OtlpExporter},
    internal_metrics::OtlpMetrics,
    logs::OtlpLogs,
};
