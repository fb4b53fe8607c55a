/*!
The [`Exporter`] trait and the errors it can produce.
*/

use std::{
    error,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use crate::batch::MetricsBatch;

/**
A destination for batches of metrics.

Exporters are called from the background worker only, never from threads recording measurements.
*/
pub trait Exporter: Send + Sync + 'static {
    /**
    Export a batch.

    The returned future may be dropped before it completes if the export times out or the provider is shutting down.
    */
    fn export(&self, batch: MetricsBatch) -> impl Future<Output = Result<(), ExportError>> + Send;
}

impl<E: Exporter> Exporter for Arc<E> {
    fn export(&self, batch: MetricsBatch) -> impl Future<Output = Result<(), ExportError>> + Send {
        (**self).export(batch)
    }
}

/**
An error exporting a batch.
*/
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ExportError {
    #[error("failed to reach the collector")]
    Transport(#[source] Arc<dyn error::Error + Send + Sync>),
    #[error("the collector rejected the batch with status `{status}`")]
    Rejected { status: String, retryable: bool },
    #[error("the export didn't complete within {0:?}")]
    Timeout(Duration),
    #[error("the export was cancelled because the shutdown deadline passed")]
    Cancelled,
    #[error("the exporter panicked")]
    Panicked,
}

impl ExportError {
    pub fn transport(err: impl error::Error + Send + Sync + 'static) -> Self {
        ExportError::Transport(Arc::new(err))
    }

    /**
    Whether the error was caused by the provider shutting down rather than a problem with the exporter.
    */
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExportError::Cancelled)
    }

    /**
    Whether the same batch could succeed if it's tried again.
    */
    pub fn is_retryable(&self) -> bool {
        match self {
            ExportError::Transport(_) | ExportError::Timeout(_) => true,
            ExportError::Rejected { retryable, .. } => *retryable,
            ExportError::Cancelled | ExportError::Panicked => false,
        }
    }
}

/**
An exporter that keeps every batch in memory.

Clones share the same set of batches.
*/
#[derive(Debug, Clone, Default)]
pub struct InMemoryExporter {
    batches: Arc<Mutex<Vec<MetricsBatch>>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        InMemoryExporter::default()
    }

    pub fn batches(&self) -> Vec<MetricsBatch> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /**
    The total of a counter across all exported batches.
    */
    pub fn total(&self, name: &str) -> u64 {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|batch| batch.metric(name))
            .filter_map(|metric| metric.sum_total())
            .sum()
    }
}

impl Exporter for InMemoryExporter {
    async fn export(&self, batch: MetricsBatch) -> Result<(), ExportError> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(batch);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io;

    #[test]
    fn retryable_errors() {
        assert!(ExportError::transport(io::Error::from(io::ErrorKind::ConnectionRefused))
            .is_retryable());
        assert!(ExportError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ExportError::Rejected {
            status: "503".into(),
            retryable: true
        }
        .is_retryable());

        assert!(!ExportError::Rejected {
            status: "400".into(),
            retryable: false
        }
        .is_retryable());
        assert!(!ExportError::Cancelled.is_retryable());
        assert!(!ExportError::Panicked.is_retryable());
    }

    #[test]
    fn only_cancellation_is_cancelled() {
        assert!(ExportError::Cancelled.is_cancelled());
        assert!(!ExportError::Timeout(Duration::from_secs(1)).is_cancelled());
    }
}
