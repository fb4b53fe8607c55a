/*!
In-memory accumulation of measurements between export cycles.

An [`Aggregation`] is the channel type carried by the batcher. Recording a measurement folds it into the series for its instrument and attributes under the channel's lock. At the end of a cycle the whole aggregation is swapped out and converted into a [`MetricsBatch`].
*/

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use tally_batcher::Channel;

use crate::{
    attributes::Attributes,
    batch::{
        HistogramPoint, Metric, MetricData, MetricsBatch, ScopeMetrics, SumPoint, Temporality,
    },
    instrument::Descriptor,
    resource::{Resource, Scope},
    timestamp::Timestamp,
};

pub(crate) struct Measurement {
    pub(crate) descriptor: Arc<Descriptor>,
    pub(crate) value: MeasurementValue,
    pub(crate) attributes: Attributes,
    pub(crate) timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum MeasurementValue {
    Sum(u64),
    Histogram(f64),
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    instrument: u64,
    attributes: Attributes,
}

impl SeriesKey {
    fn of(measurement: &Measurement) -> Self {
        SeriesKey {
            instrument: measurement.descriptor.id,
            attributes: measurement.attributes.clone(),
        }
    }
}

struct Series {
    descriptor: Arc<Descriptor>,
    attributes: Attributes,
    first_seen: Timestamp,
    data: SeriesData,
}

enum SeriesData {
    Sum(u64),
    Histogram(HistogramState),
}

struct HistogramState {
    bounds: Arc<[f64]>,
    bucket_counts: Vec<u64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl HistogramState {
    fn new(bounds: Arc<[f64]>) -> Self {
        HistogramState {
            bucket_counts: vec![0; bounds.len() + 1],
            bounds,
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn record(&mut self, value: f64) {
        // Bucket `i` holds values in `(bounds[i - 1], bounds[i]]`
        let bucket = self.bounds.partition_point(|bound| *bound < value);

        self.bucket_counts[bucket] += 1;
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn merge(&mut self, other: &HistogramState) {
        for (count, other) in self.bucket_counts.iter_mut().zip(&other.bucket_counts) {
            *count += other;
        }

        self.count += other.count;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

impl Series {
    fn new(measurement: &Measurement) -> Self {
        let data = match measurement.value {
            MeasurementValue::Sum(_) => SeriesData::Sum(0),
            MeasurementValue::Histogram(_) => SeriesData::Histogram(HistogramState::new(
                measurement
                    .descriptor
                    .boundaries
                    .clone()
                    .unwrap_or_else(|| Arc::from(Vec::new())),
            )),
        };

        Series {
            descriptor: measurement.descriptor.clone(),
            attributes: measurement.attributes.clone(),
            first_seen: measurement.timestamp,
            data,
        }
    }

    fn record(&mut self, value: MeasurementValue) {
        match (&mut self.data, value) {
            (SeriesData::Sum(sum), MeasurementValue::Sum(delta)) => {
                *sum = sum.saturating_add(delta);
            }
            (SeriesData::Histogram(histogram), MeasurementValue::Histogram(value)) => {
                histogram.record(value);
            }
            // The kind of a series is fixed by its instrument
            _ => (),
        }
    }

    fn merge(&mut self, other: Series) {
        self.first_seen = self.first_seen.min(other.first_seen);

        match (&mut self.data, other.data) {
            (SeriesData::Sum(sum), SeriesData::Sum(other)) => {
                *sum = sum.saturating_add(other);
            }
            (SeriesData::Histogram(histogram), SeriesData::Histogram(ref other)) => {
                histogram.merge(other);
            }
            _ => (),
        }
    }
}

/**
The aggregated state of all series recorded in a window.
*/
#[derive(Default)]
pub(crate) struct Aggregation {
    series: HashMap<SeriesKey, Series>,
    /**
    The `[start, end)` window this aggregation was collected over.

    This is assigned the first time the aggregation is exported, so retries report the same window.
    */
    pub(crate) window: Option<(Timestamp, Timestamp)>,
}

impl Channel for Aggregation {
    type Item = Measurement;

    fn new() -> Self {
        Aggregation::default()
    }

    fn with_capacity(capacity: usize) -> Self {
        Aggregation {
            series: HashMap::with_capacity(capacity),
            window: None,
        }
    }

    fn push(&mut self, measurement: Measurement) {
        self.series
            .entry(SeriesKey::of(&measurement))
            .or_insert_with(|| Series::new(&measurement))
            .record(measurement.value);
    }

    fn remaining(&self) -> usize {
        self.series.len()
    }

    fn grows_with(&self, measurement: &Measurement) -> bool {
        !self.series.contains_key(&SeriesKey::of(measurement))
    }

    fn clear(&mut self) {
        self.series.clear();
        self.window = None;
    }
}

impl Aggregation {
    /**
    Fold this aggregation into a longer running one.

    Series the running aggregation hasn't seen are only added while it holds fewer than `limit` series. The number of series dropped is returned.
    */
    pub(crate) fn merge_into(self, running: &mut Aggregation, limit: usize) -> usize {
        let mut dropped = 0;

        for (key, series) in self.series {
            let len = running.series.len();
            match running.series.get_mut(&key) {
                Some(existing) => existing.merge(series),
                None if len < limit => {
                    running.series.insert(key, series);
                }
                None => dropped += 1,
            }
        }

        dropped
    }

    /**
    Convert the aggregated series into a batch for export.

    Points start at `start` if it's given, or at the time their series was first seen otherwise.
    */
    pub(crate) fn to_batch(
        &self,
        resource: &Arc<Resource>,
        temporality: Temporality,
        start: Option<Timestamp>,
        end: Timestamp,
    ) -> MetricsBatch {
        type Metrics<'a> = BTreeMap<(&'a str, u64), (&'a Arc<Descriptor>, MetricData)>;

        let mut scopes = BTreeMap::<&Scope, (&Arc<Scope>, Metrics)>::new();

        for series in self.series.values() {
            let descriptor = &series.descriptor;

            let (_, metrics) = scopes
                .entry(&*descriptor.scope)
                .or_insert_with(|| (&descriptor.scope, BTreeMap::new()));

            let (_, data) = metrics
                .entry((descriptor.name(), descriptor.id))
                .or_insert_with(|| {
                    (
                        descriptor,
                        match series.data {
                            SeriesData::Sum(_) => MetricData::Sum(Vec::new()),
                            SeriesData::Histogram(_) => MetricData::Histogram(Vec::new()),
                        },
                    )
                });

            let start = start.unwrap_or(series.first_seen);

            match (data, &series.data) {
                (MetricData::Sum(points), SeriesData::Sum(value)) => points.push(SumPoint {
                    attributes: series.attributes.clone(),
                    start,
                    time: end,
                    value: *value,
                }),
                (MetricData::Histogram(points), SeriesData::Histogram(histogram)) => {
                    points.push(HistogramPoint {
                        attributes: series.attributes.clone(),
                        start,
                        time: end,
                        count: histogram.count,
                        sum: histogram.sum,
                        min: histogram.min,
                        max: histogram.max,
                        bounds: histogram.bounds.clone(),
                        bucket_counts: histogram.bucket_counts.clone(),
                    })
                }
                _ => (),
            }
        }

        MetricsBatch {
            resource: resource.clone(),
            scopes: scopes
                .into_values()
                .map(|(scope, metrics)| ScopeMetrics {
                    scope: scope.clone(),
                    metrics: metrics
                        .into_values()
                        .map(|(descriptor, data)| Metric {
                            descriptor: descriptor.clone(),
                            temporality,
                            data,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}
