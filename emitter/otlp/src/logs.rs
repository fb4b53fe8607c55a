use std::{fmt, sync::Arc, time::Duration};

use tally::{sink::Sink, ChannelMetrics, ExportError, Record, Resource};
use tally_batcher::BatchError;

use crate::{
    client::OtlpTransport,
    data::{self, logs::LogEntry},
    internal_metrics::InternalMetrics,
    Error, OtlpMetrics,
};

const MAX_QUEUED_RECORDS: usize = 10_000;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const FLUSH_THRESHOLD: usize = 512;

/**
A sink that sends log records to an OpenTelemetry collector.

Records are queued in memory and sent in batches from a background worker, so [`Sink::emit`] never waits on the network. If the queue fills up then new records are discarded.
*/
pub struct OtlpLogs {
    sender: tally_batcher::Sender<Vec<LogEntry>>,
    metrics: Arc<InternalMetrics>,
}

struct LogsWorker {
    transport: OtlpTransport,
    resource: Resource,
    export_timeout: Duration,
}

impl OtlpLogs {
    pub(crate) fn spawn(
        transport: OtlpTransport,
        resource: Resource,
        export_timeout: Duration,
        metrics: Arc<InternalMetrics>,
    ) -> Result<Self, Error> {
        let (sender, receiver) = tally_batcher::bounded(MAX_QUEUED_RECORDS);

        let receiver = receiver
            .with_interval(FLUSH_INTERVAL)
            .with_flush_threshold(FLUSH_THRESHOLD);

        let worker = Arc::new(LogsWorker {
            transport,
            resource,
            export_timeout,
        });

        tally_batcher::tokio::spawn("tally_otlp_logs", receiver, move |batch| {
            let worker = worker.clone();

            async move { worker.send(batch).await }
        })
        .map_err(|err| Error::new("failed to spawn the log worker", err))?;

        Ok(OtlpLogs { sender, metrics })
    }

    /**
    Sample the sink's transport metrics.
    */
    pub fn metrics(&self) -> OtlpMetrics {
        self.metrics.sample()
    }

    /**
    Sample the sink's queue metrics.
    */
    pub fn queue_metrics(&self) -> ChannelMetrics {
        self.sender.metrics()
    }

    /**
    Stop accepting records and wait for the ones already queued to be sent.

    Returns `true` if the worker finished within `timeout`.
    */
    pub fn blocking_close(&self, timeout: Duration) -> bool {
        tally_batcher::tokio::blocking_close(&self.sender, timeout)
    }
}

impl LogsWorker {
    async fn send(&self, batch: Vec<LogEntry>) -> Result<(), BatchError<Vec<LogEntry>>> {
        let payload =
            match data::logs::encode_request(self.transport.encoding(), &self.resource, &batch) {
                Ok(payload) => payload,
                // A batch that can't be encoded won't encode on retry either
                Err(err) => return Err(BatchError::no_retry(err)),
            };

        match tokio::time::timeout(self.export_timeout, self.transport.send(payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) if err.is_retryable() => Err(BatchError::retry(err, batch)),
            Ok(Err(err)) => Err(BatchError::no_retry(err)),
            Err(_) => Err(BatchError::retry(
                ExportError::Timeout(self.export_timeout),
                batch,
            )),
        }
    }
}

impl fmt::Debug for OtlpLogs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtlpLogs")
            .field("queue", &self.sender.metrics())
            .finish_non_exhaustive()
    }
}

impl Sink for OtlpLogs {
    fn emit(&self, record: &Record) {
        if !self.sender.is_open() {
            self.metrics.record_after_close.increment();
            return;
        }

        self.sender.send(LogEntry::from(record));
    }

    fn blocking_flush(&self, timeout: Duration) -> bool {
        tally_batcher::tokio::blocking_flush(&self.sender, timeout)
    }
}

impl Drop for OtlpLogs {
    fn drop(&mut self) {
        self.sender.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::OtlpBuilder;

    #[test]
    fn records_after_close_are_counted() {
        // Nothing listens on port 1, so sends fail without reaching a collector
        let logs = OtlpBuilder::new("http://127.0.0.1:1")
            .protocol(tally::Protocol::HttpProtobuf)
            .logs(Resource::default())
            .unwrap();

        logs.sender.abandon();

        logs.emit(&Record::new(
            tally::Timestamp::now(),
            tally::Level::Info,
            "test",
            "dropped",
            &[],
        ));

        assert_eq!(1, logs.metrics().record_after_close);
    }
}
