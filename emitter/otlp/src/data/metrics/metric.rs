use sval_derive::Value;

use crate::data::KeyValue;

#[derive(Value)]
pub struct Metric<'a> {
    #[sval(label = "name", index = 1)]
    pub name: &'a str,
    #[sval(label = "description", index = 2)]
    pub description: &'a str,
    #[sval(label = "unit", index = 3)]
    pub unit: &'a str,
    #[sval(flatten)]
    pub data: MetricData<'a>,
}

#[derive(Value)]
pub enum MetricData<'a> {
    #[sval(label = "sum", index = 7)]
    Sum(Sum<'a>),
    #[sval(label = "histogram", index = 9)]
    Histogram(Histogram<'a>),
}

#[derive(Value)]
pub struct Sum<'a> {
    #[sval(label = "dataPoints", index = 1)]
    pub data_points: Vec<NumberDataPoint<'a>>,
    #[sval(label = "aggregationTemporality", index = 2)]
    pub aggregation_temporality: AggregationTemporality,
    #[sval(label = "isMonotonic", index = 3)]
    pub is_monotonic: bool,
}

#[derive(Value)]
pub struct Histogram<'a> {
    #[sval(label = "dataPoints", index = 1)]
    pub data_points: Vec<HistogramDataPoint<'a>>,
    #[sval(label = "aggregationTemporality", index = 2)]
    pub aggregation_temporality: AggregationTemporality,
}

#[derive(Value, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
#[sval(unlabeled_variants)]
pub enum AggregationTemporality {
    Unspecified = 0,
    Delta = 1,
    Cumulative = 2,
}

impl From<tally::Temporality> for AggregationTemporality {
    fn from(temporality: tally::Temporality) -> Self {
        match temporality {
            tally::Temporality::Delta => AggregationTemporality::Delta,
            tally::Temporality::Cumulative => AggregationTemporality::Cumulative,
        }
    }
}

#[derive(Value)]
pub struct NumberDataPoint<'a> {
    #[sval(label = "attributes", index = 7)]
    pub attributes: Vec<KeyValue<'a>>,
    #[sval(
        label = "startTimeUnixNano",
        index = 2,
        data_tag = "sval_protobuf::tags::PROTOBUF_I64"
    )]
    pub start_time_unix_nano: u64,
    #[sval(
        label = "timeUnixNano",
        index = 3,
        data_tag = "sval_protobuf::tags::PROTOBUF_I64"
    )]
    pub time_unix_nano: u64,
    #[sval(
        label = "asInt",
        index = 6,
        data_tag = "sval_protobuf::tags::PROTOBUF_I64"
    )]
    pub as_int: i64,
}

#[derive(Value)]
pub struct HistogramDataPoint<'a> {
    #[sval(label = "attributes", index = 9)]
    pub attributes: Vec<KeyValue<'a>>,
    #[sval(
        label = "startTimeUnixNano",
        index = 2,
        data_tag = "sval_protobuf::tags::PROTOBUF_I64"
    )]
    pub start_time_unix_nano: u64,
    #[sval(
        label = "timeUnixNano",
        index = 3,
        data_tag = "sval_protobuf::tags::PROTOBUF_I64"
    )]
    pub time_unix_nano: u64,
    #[sval(
        label = "count",
        index = 4,
        data_tag = "sval_protobuf::tags::PROTOBUF_I64"
    )]
    pub count: u64,
    #[sval(label = "sum", index = 5)]
    pub sum: f64,
    #[sval(label = "bucketCounts", index = 6)]
    pub bucket_counts: Vec<Fixed64>,
    #[sval(label = "explicitBounds", index = 7)]
    pub explicit_bounds: &'a [f64],
    #[sval(label = "min", index = 11)]
    pub min: f64,
    #[sval(label = "max", index = 12)]
    pub max: f64,
}

#[derive(Value)]
#[sval(tag = "sval_protobuf::tags::PROTOBUF_I64")]
pub struct Fixed64(pub u64);
