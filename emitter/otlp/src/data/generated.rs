// The subset of `opentelemetry.proto` needed to check encoded payloads

pub(crate) mod common {
    pub(crate) mod v1 {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct AnyValue {
            #[prost(oneof = "any_value::Value", tags = "1, 2, 3, 4")]
            pub value: Option<any_value::Value>,
        }

        pub mod any_value {
            #[derive(Clone, PartialEq, ::prost::Oneof)]
            pub enum Value {
                #[prost(string, tag = "1")]
                StringValue(String),
                #[prost(bool, tag = "2")]
                BoolValue(bool),
                #[prost(int64, tag = "3")]
                IntValue(i64),
                #[prost(double, tag = "4")]
                DoubleValue(f64),
            }
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct KeyValue {
            #[prost(string, tag = "1")]
            pub key: String,
            #[prost(message, optional, tag = "2")]
            pub value: Option<AnyValue>,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct InstrumentationScope {
            #[prost(string, tag = "1")]
            pub name: String,
            #[prost(string, tag = "2")]
            pub version: String,
        }
    }
}

pub(crate) mod resource {
    pub(crate) mod v1 {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Resource {
            #[prost(message, repeated, tag = "1")]
            pub attributes: Vec<super::super::common::v1::KeyValue>,
        }
    }
}

pub(crate) mod metrics {
    pub(crate) mod v1 {
        use super::super::{
            common::v1::{InstrumentationScope, KeyValue},
            resource::v1::Resource,
        };

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct ResourceMetrics {
            #[prost(message, optional, tag = "1")]
            pub resource: Option<Resource>,
            #[prost(message, repeated, tag = "2")]
            pub scope_metrics: Vec<ScopeMetrics>,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct ScopeMetrics {
            #[prost(message, optional, tag = "1")]
            pub scope: Option<InstrumentationScope>,
            #[prost(message, repeated, tag = "2")]
            pub metrics: Vec<Metric>,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Metric {
            #[prost(string, tag = "1")]
            pub name: String,
            #[prost(string, tag = "2")]
            pub description: String,
            #[prost(string, tag = "3")]
            pub unit: String,
            #[prost(oneof = "metric::Data", tags = "7, 9")]
            pub data: Option<metric::Data>,
        }

        pub mod metric {
            #[derive(Clone, PartialEq, ::prost::Oneof)]
            pub enum Data {
                #[prost(message, tag = "7")]
                Sum(super::Sum),
                #[prost(message, tag = "9")]
                Histogram(super::Histogram),
            }
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Sum {
            #[prost(message, repeated, tag = "1")]
            pub data_points: Vec<NumberDataPoint>,
            #[prost(int32, tag = "2")]
            pub aggregation_temporality: i32,
            #[prost(bool, tag = "3")]
            pub is_monotonic: bool,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Histogram {
            #[prost(message, repeated, tag = "1")]
            pub data_points: Vec<HistogramDataPoint>,
            #[prost(int32, tag = "2")]
            pub aggregation_temporality: i32,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct NumberDataPoint {
            #[prost(message, repeated, tag = "7")]
            pub attributes: Vec<KeyValue>,
            #[prost(fixed64, tag = "2")]
            pub start_time_unix_nano: u64,
            #[prost(fixed64, tag = "3")]
            pub time_unix_nano: u64,
            #[prost(oneof = "number_data_point::Value", tags = "4, 6")]
            pub value: Option<number_data_point::Value>,
        }

        pub mod number_data_point {
            #[derive(Clone, PartialEq, ::prost::Oneof)]
            pub enum Value {
                #[prost(double, tag = "4")]
                AsDouble(f64),
                #[prost(sfixed64, tag = "6")]
                AsInt(i64),
            }
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct HistogramDataPoint {
            #[prost(message, repeated, tag = "9")]
            pub attributes: Vec<KeyValue>,
            #[prost(fixed64, tag = "2")]
            pub start_time_unix_nano: u64,
            #[prost(fixed64, tag = "3")]
            pub time_unix_nano: u64,
            #[prost(fixed64, tag = "4")]
            pub count: u64,
            #[prost(double, optional, tag = "5")]
            pub sum: Option<f64>,
            #[prost(fixed64, repeated, tag = "6")]
            pub bucket_counts: Vec<u64>,
            #[prost(double, repeated, tag = "7")]
            pub explicit_bounds: Vec<f64>,
            #[prost(double, optional, tag = "11")]
            pub min: Option<f64>,
            #[prost(double, optional, tag = "12")]
            pub max: Option<f64>,
        }
    }
}

pub(crate) mod logs {
    pub(crate) mod v1 {
        use super::super::{
            common::v1::{AnyValue, InstrumentationScope, KeyValue},
            resource::v1::Resource,
        };

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct ResourceLogs {
            #[prost(message, optional, tag = "1")]
            pub resource: Option<Resource>,
            #[prost(message, repeated, tag = "2")]
            pub scope_logs: Vec<ScopeLogs>,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct ScopeLogs {
            #[prost(message, optional, tag = "1")]
            pub scope: Option<InstrumentationScope>,
            #[prost(message, repeated, tag = "2")]
            pub log_records: Vec<LogRecord>,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct LogRecord {
            #[prost(fixed64, tag = "1")]
            pub time_unix_nano: u64,
            #[prost(int32, tag = "2")]
            pub severity_number: i32,
            #[prost(string, tag = "3")]
            pub severity_text: String,
            #[prost(message, optional, tag = "5")]
            pub body: Option<AnyValue>,
            #[prost(message, repeated, tag = "6")]
            pub attributes: Vec<KeyValue>,
            #[prost(fixed64, tag = "11")]
            pub observed_time_unix_nano: u64,
        }
    }
}

pub(crate) mod collector {
    pub(crate) mod metrics {
        pub(crate) mod v1 {
            #[derive(Clone, PartialEq, ::prost::Message)]
            pub struct ExportMetricsServiceRequest {
                #[prost(message, repeated, tag = "1")]
                pub resource_metrics: Vec<super::super::super::metrics::v1::ResourceMetrics>,
            }
        }
    }

    pub(crate) mod logs {
        pub(crate) mod v1 {
            #[derive(Clone, PartialEq, ::prost::Message)]
            pub struct ExportLogsServiceRequest {
                #[prost(message, repeated, tag = "1")]
                pub resource_logs: Vec<super::super::super::logs::v1::ResourceLogs>,
            }
        }
    }
}
