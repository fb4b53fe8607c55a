use std::{borrow::Cow, fmt, sync::Arc, time::Duration};

use crate::{
    level::Level,
    record::Record,
    sink::{Empty, Sink},
    timestamp::Timestamp,
    value::Value,
};

/**
A named handle for writing log records to a [`Sink`].

Loggers are cheap to clone. Use the [`crate::debug!`], [`crate::info!`], [`crate::warn!`] and [`crate::error!`] macros to write records with properties:

```
let logger = tally::Logger::new("myapp.logger", tally::sink::Empty);

tally::info!(logger, "Handling new request", request_id: 42);
```
*/
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn Sink + Send + Sync>,
    scope: Cow<'static, str>,
    min_level: Level,
}

impl Logger {
    pub fn new(scope: impl Into<Cow<'static, str>>, sink: impl Sink + Send + Sync + 'static) -> Self {
        Logger {
            sink: Arc::new(sink),
            scope: scope.into(),
            min_level: Level::Debug,
        }
    }

    /**
    A logger that discards everything.
    */
    pub fn disabled() -> Self {
        Logger::new("", Empty).with_min_level(Level::Error)
    }

    /**
    Only write records at `min_level` or above.
    */
    pub fn with_min_level(mut self, min_level: Level) -> Self {
        self.min_level = min_level;
        self
    }

    /**
    Get a logger with the same sink and level under a different name.
    */
    pub fn with_scope(&self, scope: impl Into<Cow<'static, str>>) -> Self {
        Logger {
            sink: self.sink.clone(),
            scope: scope.into(),
            min_level: self.min_level,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn is_enabled(&self, level: Level) -> bool {
        level >= self.min_level
    }

    pub fn log(&self, level: Level, msg: &str, props: &[(&str, Value)]) {
        if !self.is_enabled(level) {
            return;
        }

        self.sink.emit(&Record::new(
            Timestamp::now(),
            level,
            &self.scope,
            msg,
            props,
        ));
    }

    pub fn sink(&self) -> &(dyn Sink + Send + Sync) {
        &*self.sink
    }

    pub fn blocking_flush(&self, timeout: Duration) -> bool {
        self.sink.blocking_flush(timeout)
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Logger")
            .field("scope", &self.scope)
            .field("min_level", &self.min_level)
            .finish()
    }
}

/**
Write a record at a given level.

Properties are written as `key: value` pairs after the message. Any value implementing [`crate::value::ToValue`] can be used.
*/
#[macro_export]
macro_rules! log {
    ($logger:expr, $lvl:expr, $msg:expr $(, $key:ident : $value:expr)* $(,)?) => {
        $logger.log(
            $lvl,
            $msg,
            &[$((stringify!($key), $crate::value::ToValue::to_value(&$value))),*],
        )
    };
}

/**
Write a record at the debug level.
*/
#[macro_export]
macro_rules! debug {
    ($logger:expr, $($rest:tt)*) => {
        $crate::log!($logger, $crate::Level::Debug, $($rest)*)
    };
}

/**
Write a record at the info level.
*/
#[macro_export]
macro_rules! info {
    ($logger:expr, $($rest:tt)*) => {
        $crate::log!($logger, $crate::Level::Info, $($rest)*)
    };
}

/**
Write a record at the warn level.
*/
#[macro_export]
macro_rules! warn {
    ($logger:expr, $($rest:tt)*) => {
        $crate::log!($logger, $crate::Level::Warn, $($rest)*)
    };
}

/**
Write a record at the error level.
*/
#[macro_export]
macro_rules! error {
    ($logger:expr, $($rest:tt)*) => {
        $crate::log!($logger, $crate::Level::Error, $($rest)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    #[derive(Default)]
    struct Captured(Mutex<Vec<String>>);

    impl Sink for Captured {
        fn emit(&self, record: &Record) {
            let mut line = format!("{} {} {}", record.level(), record.scope(), record.msg());

            for (k, v) in record.props() {
                line.push_str(&format!(" {k}={v}"));
            }

            self.0.lock().unwrap().push(line);
        }

        fn blocking_flush(&self, _: Duration) -> bool {
            true
        }
    }

    #[test]
    fn macros_capture_props() {
        let captured = Arc::new(Captured::default());
        let logger = Logger::new("myapp.logger", captured.clone());

        let i = 7;
        crate::info!(logger, "Request processed", request_id: i, message: format!("hello world {i}"));
        crate::debug!(logger, "no props");

        assert_eq!(
            vec![
                "INFO myapp.logger Request processed request_id=7 message=hello world 7".to_owned(),
                "DEBUG myapp.logger no props".to_owned(),
            ],
            *captured.0.lock().unwrap()
        );
    }

    #[test]
    fn min_level_filters() {
        let captured = Arc::new(Captured::default());
        let logger = Logger::new("test", captured.clone()).with_min_level(Level::Warn);

        crate::info!(logger, "filtered");
        crate::warn!(logger, "kept");
        crate::error!(logger, "kept");

        assert_eq!(2, captured.0.lock().unwrap().len());
    }

    #[test]
    fn disabled_logger_is_silent() {
        let logger = Logger::disabled();

        assert!(!logger.is_enabled(Level::Warn));
        assert!(logger.blocking_flush(Duration::ZERO));
    }
}
