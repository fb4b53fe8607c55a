use std::{fmt, sync::Arc, time::Duration};

use tally::{Config, ExportError, MetricsBatch, Protocol, Resource};

use crate::{
    client::{OtlpTransport, Signal},
    data,
    internal_metrics::InternalMetrics,
    logs::OtlpLogs,
    Error, OtlpMetrics,
};

/**
Configure an OTLP exporter.

Use [`OtlpBuilder::metrics`] to get an [`OtlpExporter`] for a [`tally::MeterProvider`], and [`OtlpBuilder::logs`] to get an [`OtlpLogs`] sink for a [`tally::Logger`]. Both can be built from the same builder.
*/
#[derive(Debug, Clone)]
pub struct OtlpBuilder {
    endpoint: String,
    insecure: bool,
    protocol: Protocol,
    headers: Vec<(String, String)>,
    export_timeout: Duration,
    gzip: bool,
}

impl OtlpBuilder {
    /**
    Send to the collector at `endpoint` using gRPC.
    */
    pub fn new(endpoint: impl Into<String>) -> Self {
        OtlpBuilder {
            endpoint: endpoint.into(),
            insecure: false,
            protocol: Protocol::Grpc,
            headers: Vec::new(),
            export_timeout: Duration::from_secs(10),
            gzip: cfg!(feature = "gzip"),
        }
    }

    /**
    Take the endpoint, protocol, headers and timeouts from a [`Config`].
    */
    pub fn from_config(config: &Config) -> Self {
        OtlpBuilder {
            endpoint: config.endpoint.clone(),
            insecure: config.insecure,
            protocol: config.protocol,
            headers: config.headers.clone(),
            export_timeout: config.export_timeout,
            gzip: cfg!(feature = "gzip"),
        }
    }

    /**
    The protocol to send with.

    The default port of the endpoint depends on the protocol.
    */
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /**
    Whether to use plaintext when the endpoint doesn't specify a scheme.
    */
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /**
    Add a header to every request.
    */
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /**
    The time allowed for a single batch of logs to be sent.

    Metrics exports are timed by the [`tally::MeterProvider`] instead.
    */
    pub fn export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    /**
    Whether to compress HTTP request bodies with gzip.

    This has no effect on gRPC, or if the `gzip` feature isn't enabled.
    */
    pub fn gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    fn transport(
        &self,
        signal: Signal,
        metrics: Arc<InternalMetrics>,
    ) -> Result<OtlpTransport, Error> {
        let endpoint = tally::config::Endpoint::parse(&self.endpoint, self.insecure)
            .map_err(|err| Error::new("the endpoint is invalid", err))?;

        OtlpTransport::new(
            metrics,
            &endpoint,
            self.protocol,
            signal,
            self.headers.clone(),
            self.gzip,
        )
    }

    /**
    Build an exporter for metrics.

    No connection is made until the first batch is exported.
    */
    pub fn metrics(&self) -> Result<OtlpExporter, Error> {
        let metrics = Arc::new(InternalMetrics::default());
        let transport = self.transport(Signal::Metrics, metrics.clone())?;

        Ok(OtlpExporter {
            inner: Arc::new(ExporterInner { transport, metrics }),
        })
    }

    /**
    Build a sink for logs, spawning the background worker that sends them.
    */
    pub fn logs(&self, resource: Resource) -> Result<OtlpLogs, Error> {
        let metrics = Arc::new(InternalMetrics::default());
        let transport = self.transport(Signal::Logs, metrics.clone())?;

        OtlpLogs::spawn(transport, resource, self.export_timeout, metrics)
    }
}

/**
An exporter that sends metrics to an OpenTelemetry collector.

Clones share the same connection.
*/
#[derive(Clone)]
pub struct OtlpExporter {
    inner: Arc<ExporterInner>,
}

struct ExporterInner {
    transport: OtlpTransport,
    metrics: Arc<InternalMetrics>,
}

impl fmt::Debug for OtlpExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtlpExporter")
            .field("transport", &self.inner.transport)
            .finish()
    }
}

impl OtlpExporter {
    /**
    Build an exporter from a [`Config`].
    */
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        OtlpBuilder::from_config(config).metrics()
    }

    /**
    Sample the exporter's own metrics.
    */
    pub fn metrics(&self) -> OtlpMetrics {
        self.inner.metrics.sample()
    }
}

impl tally::Exporter for OtlpExporter {
    async fn export(&self, batch: MetricsBatch) -> Result<(), ExportError> {
        let transport = &self.inner.transport;

        let payload = data::metrics::encode_request(transport.encoding(), &batch)
            .map_err(ExportError::transport)?;

        transport.send(payload).await
    }
}
