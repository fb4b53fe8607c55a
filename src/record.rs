use core::fmt;

use crate::{level::Level, timestamp::Timestamp, value::Value};

/**
A structured log record.

Records are borrowed views over data captured at the callsite. A [`crate::sink::Sink`] that needs to keep any part of a record must copy it.
*/
#[derive(Clone)]
pub struct Record<'a> {
    timestamp: Timestamp,
    level: Level,
    scope: &'a str,
    msg: &'a str,
    props: &'a [(&'a str, Value<'a>)],
}

impl<'a> Record<'a> {
    pub fn new(
        timestamp: Timestamp,
        level: Level,
        scope: &'a str,
        msg: &'a str,
        props: &'a [(&'a str, Value<'a>)],
    ) -> Self {
        Record {
            timestamp,
            level,
            scope,
            msg,
            props,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /**
    The name of the logger that produced this record.
    */
    pub fn scope(&self) -> &'a str {
        self.scope
    }

    pub fn msg(&self) -> &'a str {
        self.msg
    }

    pub fn props(&self) -> impl Iterator<Item = (&'a str, Value<'a>)> + 'a {
        self.props.iter().map(|(k, v)| (*k, v.clone()))
    }

    /**
    Find the first property with the given key.
    */
    pub fn get(&self, key: &str) -> Option<Value<'a>> {
        self.props
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
    }
}

impl<'a> fmt::Debug for Record<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Record")
            .field("timestamp", &self.timestamp)
            .field("level", &self.level)
            .field("scope", &self.scope)
            .field("msg", &self.msg)
            .field("props", &self.props)
            .finish()
    }
}
