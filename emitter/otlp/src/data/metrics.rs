mod export_metrics_service;
mod metric;

use tally::{batch::SumPoint, MetricsBatch};

use crate::Error;

pub use self::{export_metrics_service::*, metric::*};

use super::{key_values, EncodedPayload, Encoding, InstrumentationScope, Resource};

pub(crate) fn encode_request(
    encoding: Encoding,
    batch: &MetricsBatch,
) -> Result<EncodedPayload, Error> {
    let scope_metrics = batch
        .scopes()
        .iter()
        .map(|scope| ScopeMetrics {
            scope: InstrumentationScope::from(scope.scope()),
            metrics: scope.metrics().iter().map(metric).collect(),
        })
        .collect();

    encoding.encode(ExportMetricsServiceRequest {
        resource_metrics: &[ResourceMetrics {
            resource: Resource::from(batch.resource()),
            scope_metrics,
        }],
    })
}

fn metric(metric: &tally::Metric) -> Metric {
    let aggregation_temporality = AggregationTemporality::from(metric.temporality());

    let data = match metric.data() {
        tally::MetricData::Sum(points) => MetricData::Sum(Sum {
            data_points: points.iter().map(number_data_point).collect(),
            aggregation_temporality,
            is_monotonic: true,
        }),
        tally::MetricData::Histogram(points) => MetricData::Histogram(Histogram {
            data_points: points
                .iter()
                .map(|point| HistogramDataPoint {
                    attributes: key_values(&point.attributes),
                    start_time_unix_nano: point.start.to_unix_nanos(),
                    time_unix_nano: point.time.to_unix_nanos(),
                    count: point.count,
                    sum: point.sum,
                    bucket_counts: point.bucket_counts.iter().copied().map(Fixed64).collect(),
                    explicit_bounds: &point.bounds,
                    min: point.min,
                    max: point.max,
                })
                .collect(),
            aggregation_temporality,
        }),
    };

    Metric {
        name: metric.name(),
        description: metric.description().unwrap_or_default(),
        unit: metric.unit().unwrap_or_default(),
        data,
    }
}

fn number_data_point(point: &SumPoint) -> NumberDataPoint {
    NumberDataPoint {
        attributes: key_values(&point.attributes),
        start_time_unix_nano: point.start.to_unix_nanos(),
        time_unix_nano: point.time.to_unix_nanos(),
        as_int: i64::try_from(point.value).unwrap_or(i64::MAX),
    }
}
