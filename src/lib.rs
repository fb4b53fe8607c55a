/*!
Periodic telemetry export with a bounded shutdown drain.

`tally` accumulates counter and histogram measurements in memory and exports them on a fixed interval from a background worker. Recording a measurement never waits on the network. When the program ends, [`MeterProvider::shutdown`] stops accepting new measurements and makes one final attempt to export what's left, giving up once its deadline passes.

```no_run
use std::time::Duration;

use tally::{Attributes, InMemoryExporter, MeterProvider, Resource, Scope};

# fn main() -> Result<(), tally::Error> {
let provider = MeterProvider::builder(InMemoryExporter::new())
    .resource(Resource::builder().service_name("my-app").build()?)
    .spawn()?;

let meter = provider.meter(Scope::new("my-app.metrics").with_version("1.0.0"));

let requests = meter
    .counter("app.requests.count")
    .unit("1")
    .description("Total number of requests received")
    .build()?;

requests.add(1, &[("endpoint", "/api/test")].into_iter().collect::<Attributes>());

let outcome = provider.shutdown(Duration::from_secs(5));
assert!(outcome.is_expected());
# Ok(())
# }
```

Structured logs are written through a [`Logger`] to any [`sink::Sink`], using the [`info!`] family of macros.
*/

mod aggregation;
mod internal_metrics;
mod logger;

pub mod attributes;
pub mod batch;
pub mod config;
pub mod error;
pub mod export;
pub mod instrument;
pub mod level;
pub mod meter;
pub mod provider;
pub mod record;
pub mod resource;
pub mod shutdown;
pub mod sink;
pub mod timestamp;
pub mod value;

#[doc(inline)]
pub use self::{
    attributes::{Attribute, AttributeValue, Attributes},
    batch::{Metric, MetricData, MetricsBatch, Temporality},
    config::{Config, Protocol},
    error::Error,
    export::{ExportError, Exporter, InMemoryExporter},
    instrument::{Counter, Histogram, InstrumentKind},
    internal_metrics::PipelineMetrics,
    level::Level,
    logger::Logger,
    meter::Meter,
    provider::{MeterProvider, MeterProviderBuilder},
    record::Record,
    resource::{Resource, Scope},
    shutdown::{Shutdown, ShutdownOutcome, ShutdownReport},
    timestamp::Timestamp,
};

pub use tally_batcher::ChannelMetrics;
