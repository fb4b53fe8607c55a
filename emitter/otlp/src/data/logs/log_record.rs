use sval_derive::Value;

use crate::data::{AnyValue, KeyValue};

#[derive(Value, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
#[sval(unlabeled_variants)]
pub enum SeverityNumber {
    Debug = 5,
    Info = 9,
    Warn = 13,
    Error = 17,
}

impl From<tally::Level> for SeverityNumber {
    fn from(level: tally::Level) -> Self {
        match level {
            tally::Level::Debug => SeverityNumber::Debug,
            tally::Level::Info => SeverityNumber::Info,
            tally::Level::Warn => SeverityNumber::Warn,
            tally::Level::Error => SeverityNumber::Error,
        }
    }
}

#[derive(Value)]
pub struct LogRecord<'a> {
    #[sval(
        label = "timeUnixNano",
        index = 1,
        data_tag = "sval_protobuf::tags::PROTOBUF_I64"
    )]
    pub time_unix_nano: u64,
    #[sval(label = "severityNumber", index = 2)]
    pub severity_number: SeverityNumber,
    #[sval(label = "severityText", index = 3)]
    pub severity_text: &'a str,
    #[sval(label = "body", index = 5)]
    pub body: AnyValue<'a>,
    #[sval(label = "attributes", index = 6)]
    pub attributes: Vec<KeyValue<'a>>,
    #[sval(
        label = "observedTimeUnixNano",
        index = 11,
        data_tag = "sval_protobuf::tags::PROTOBUF_I64"
    )]
    pub observed_time_unix_nano: u64,
}
