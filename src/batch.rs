/*!
The data handed to an exporter at the end of each export cycle.
*/

use std::{fmt, str::FromStr, sync::Arc};

use crate::{
    attributes::Attributes,
    instrument::{Descriptor, InstrumentKind},
    resource::{Resource, Scope},
    timestamp::Timestamp,
};

/**
Whether exported points cover a single export cycle or everything since the provider started.
*/
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Temporality {
    #[default]
    Delta,
    Cumulative,
}

impl Temporality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Temporality::Delta => "delta",
            Temporality::Cumulative => "cumulative",
        }
    }
}

impl fmt::Display for Temporality {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/**
An error attempting to parse a [`Temporality`] from text.
*/
#[derive(Debug, thiserror::Error)]
#[error("expected `delta` or `cumulative`")]
pub struct ParseTemporalityError {}

impl FromStr for Temporality {
    type Err = ParseTemporalityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("delta") {
            Ok(Temporality::Delta)
        } else if s.eq_ignore_ascii_case("cumulative") {
            Ok(Temporality::Cumulative)
        } else {
            Err(ParseTemporalityError {})
        }
    }
}

/**
The contents of one export cycle.

Metrics are grouped by scope, with scopes and metrics in a stable order.
*/
#[derive(Debug, Clone)]
pub struct MetricsBatch {
    pub(crate) resource: Arc<Resource>,
    pub(crate) scopes: Vec<ScopeMetrics>,
}

impl MetricsBatch {
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn scopes(&self) -> &[ScopeMetrics] {
        &self.scopes
    }

    /**
    Iterate over all metrics across all scopes.
    */
    pub fn metrics(&self) -> impl Iterator<Item = &Metric> {
        self.scopes.iter().flat_map(|scope| scope.metrics.iter())
    }

    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics().find(|metric| metric.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.iter().all(|scope| scope.metrics.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct ScopeMetrics {
    pub(crate) scope: Arc<Scope>,
    pub(crate) metrics: Vec<Metric>,
}

impl ScopeMetrics {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }
}

/**
The points exported for a single instrument.
*/
#[derive(Debug, Clone)]
pub struct Metric {
    pub(crate) descriptor: Arc<Descriptor>,
    pub(crate) temporality: Temporality,
    pub(crate) data: MetricData,
}

impl Metric {
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn unit(&self) -> Option<&str> {
        self.descriptor.unit()
    }

    pub fn description(&self) -> Option<&str> {
        self.descriptor.description()
    }

    pub fn kind(&self) -> InstrumentKind {
        self.descriptor.kind()
    }

    pub fn temporality(&self) -> Temporality {
        self.temporality
    }

    pub fn data(&self) -> &MetricData {
        &self.data
    }

    /**
    The sum of all points of a counter.

    This is `None` for histograms.
    */
    pub fn sum_total(&self) -> Option<u64> {
        match self.data {
            MetricData::Sum(ref points) => Some(
                points
                    .iter()
                    .fold(0u64, |total, point| total.saturating_add(point.value)),
            ),
            MetricData::Histogram(_) => None,
        }
    }

    /**
    The number of values recorded across all points of a histogram.

    This is `None` for counters.
    */
    pub fn histogram_count(&self) -> Option<u64> {
        match self.data {
            MetricData::Histogram(ref points) => {
                Some(points.iter().map(|point| point.count).sum())
            }
            MetricData::Sum(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MetricData {
    Sum(Vec<SumPoint>),
    Histogram(Vec<HistogramPoint>),
}

#[derive(Debug, Clone)]
pub struct SumPoint {
    pub attributes: Attributes,
    pub start: Timestamp,
    pub time: Timestamp,
    pub value: u64,
}

#[derive(Debug, Clone)]
pub struct HistogramPoint {
    pub attributes: Attributes,
    pub start: Timestamp,
    pub time: Timestamp,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub bounds: Arc<[f64]>,
    /**
    One count per bound, plus a final count for values above the last bound.
    */
    pub bucket_counts: Vec<u64>,
}
