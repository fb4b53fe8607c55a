mod export_logs_service;
mod log_record;

use std::collections::BTreeMap;

use tally::{AttributeValue, Level, Record};

use crate::Error;

pub use self::{export_logs_service::*, log_record::*};

use super::{
    to_attribute_value, AnyValue, EncodedPayload, Encoding, InstrumentationScope, KeyValue,
    Resource,
};

/**
A log record copied out of its callsite so it can be sent later.
*/
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LogEntry {
    pub time_unix_nano: u64,
    pub level: Level,
    pub scope: String,
    pub body: String,
    pub attributes: Vec<(String, AttributeValue)>,
}

impl<'a, 'b> From<&'a Record<'b>> for LogEntry {
    fn from(record: &'a Record<'b>) -> Self {
        LogEntry {
            time_unix_nano: record.timestamp().to_unix_nanos(),
            level: record.level(),
            scope: record.scope().to_owned(),
            body: record.msg().to_owned(),
            attributes: record
                .props()
                .map(|(key, value)| (key.to_owned(), to_attribute_value(&value)))
                .collect(),
        }
    }
}

pub(crate) fn encode_request(
    encoding: Encoding,
    resource: &tally::Resource,
    entries: &[LogEntry],
) -> Result<EncodedPayload, Error> {
    // Records from the same logger share a scope, in the order they were written
    let mut scopes = BTreeMap::<&str, Vec<LogRecord>>::new();

    for entry in entries {
        scopes.entry(entry.scope.as_str()).or_default().push(LogRecord {
            time_unix_nano: entry.time_unix_nano,
            severity_number: SeverityNumber::from(entry.level),
            severity_text: entry.level.as_str(),
            body: AnyValue::String(entry.body.as_str()),
            attributes: entry
                .attributes
                .iter()
                .map(|(key, value)| KeyValue {
                    key: key.as_str(),
                    value: value.into(),
                })
                .collect(),
            observed_time_unix_nano: entry.time_unix_nano,
        });
    }

    encoding.encode(ExportLogsServiceRequest {
        resource_logs: &[ResourceLogs {
            resource: Resource::from(resource),
            scope_logs: scopes
                .into_iter()
                .map(|(name, log_records)| ScopeLogs {
                    scope: InstrumentationScope { name, version: "" },
                    log_records,
                })
                .collect(),
        }],
    })
}
