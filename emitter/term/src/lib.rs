/*!
Write log records to the console.

Records are written either as colored lines intended for people to read, or as JSON lines intended for machines:

```
use tally::{info, Logger};

let logger = Logger::new("myapp.logger", tally_term::stdout());

info!(logger, "Handling new request", request_id: 1);
```
*/

#![deny(missing_docs)]

use core::{fmt, time::Duration};
use std::{cell::RefCell, io::Write};

use tally::{Level, Record, Timestamp};
use termcolor::{Buffer, BufferWriter, Color, ColorChoice, ColorSpec, WriteColor};
use time::format_description::well_known::Rfc3339 as Rfc3339Format;

/**
Get a sink that writes to `stdout`.

Colors will be used if the terminal supports them.
*/
pub fn stdout() -> Stdout {
    Stdout::new()
}

/**
A sink that writes to `stdout`.
*/
pub struct Stdout {
    writer: BufferWriter,
    json: bool,
}

impl Default for Stdout {
    fn default() -> Self {
        Stdout::new()
    }
}

impl fmt::Debug for Stdout {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Stdout")
            .field("json", &self.json)
            .finish_non_exhaustive()
    }
}

impl Stdout {
    /**
    Get a sink that writes to `stdout`.

    Colors will be used if the terminal supports them.
    */
    pub fn new() -> Self {
        Stdout {
            writer: BufferWriter::stdout(ColorChoice::Auto),
            json: false,
        }
    }

    /**
    Whether to write using colors.

    By default, colors will be used if the terminal supports them. If `colored` is true then colors will always be used. If `colored` is false then colors will never be used. Colors are never used for JSON lines.
    */
    pub fn colored(mut self, colored: bool) -> Self {
        if colored {
            self.writer = BufferWriter::stdout(ColorChoice::Always);
        } else {
            self.writer = BufferWriter::stdout(ColorChoice::Never);
        }

        self
    }

    /**
    Whether to write each record as a single line of JSON.
    */
    pub fn json(mut self, json: bool) -> Self {
        self.json = json;

        if json {
            self.writer = BufferWriter::stdout(ColorChoice::Never);
        }

        self
    }
}

impl tally::sink::Sink for Stdout {
    fn emit(&self, record: &Record) {
        let json = self.json;

        with_shared_buf(&self.writer, |writer, buf| {
            if json {
                write_json(buf, record);
            } else {
                write_text(buf, record);
            }

            let _ = writer.print(buf);
        });
    }

    fn blocking_flush(&self, _: Duration) -> bool {
        true
    }
}

fn write_text(buf: &mut Buffer, record: &Record) {
    write_timestamp(buf, record.timestamp());
    write_plain(buf, " ");

    let lvl = level_color(record.level()).map(Color::Ansi256);

    try_write_fg(buf, record.level(), lvl);
    write_plain(buf, " ");

    write_fg(buf, format_args!("{} ", record.scope()), SCOPE);

    write_plain(buf, record.msg());

    for (key, value) in record.props() {
        write_plain(buf, " ");
        write_fg(buf, key, FIELD);
        write_plain(buf, "=");

        let _ = sval_fmt::stream_to_token_write(&mut Writer { buf: &mut *buf }, value);
    }

    write_plain(buf, "\n");
}

fn write_json(buf: &mut Buffer, record: &Record) {
    if sval_json::stream_to_io_write(&mut *buf, JsonRecord(record)).is_ok() {
        write_plain(buf, "\n");
    } else {
        // Never leave a partial line behind
        buf.clear();
    }
}

struct JsonRecord<'a, 'b>(&'a Record<'b>);

impl<'a, 'b> sval::Value for JsonRecord<'a, 'b> {
    fn stream<'sval, S: sval::Stream<'sval> + ?Sized>(
        &'sval self,
        stream: &mut S,
    ) -> sval::Result {
        let record = self.0;

        stream.map_begin(None)?;

        entry(stream, "timestamp", &Rfc3339(record.timestamp()))?;
        entry(stream, "level", record.level().as_str())?;
        entry(stream, "scope", record.scope())?;
        entry(stream, "msg", record.msg())?;

        for (key, value) in record.props() {
            entry(stream, key, &value)?;
        }

        stream.map_end()
    }
}

fn entry<'sval, S: sval::Stream<'sval> + ?Sized>(
    stream: &mut S,
    key: &str,
    value: &(impl sval::Value + ?Sized),
) -> sval::Result {
    stream.map_key_begin()?;
    stream.value_computed(key)?;
    stream.map_key_end()?;

    stream.map_value_begin()?;
    stream.value_computed(value)?;
    stream.map_value_end()
}

struct Rfc3339(Timestamp);

impl sval::Value for Rfc3339 {
    fn stream<'sval, S: sval::Stream<'sval> + ?Sized>(
        &'sval self,
        stream: &mut S,
    ) -> sval::Result {
        let formatted =
            time::OffsetDateTime::from_unix_timestamp_nanos(self.0.to_unix_nanos().into())
                .ok()
                .and_then(|ts| ts.format(&Rfc3339Format).ok());

        match formatted {
            Some(formatted) => stream.value_computed(&*formatted),
            None => stream.u64(self.0.to_unix_nanos()),
        }
    }
}

fn level_color(level: Level) -> Option<u8> {
    match level {
        Level::Debug => Some(244),
        Level::Info => None,
        Level::Warn => Some(202),
        Level::Error => Some(124),
    }
}

struct LocalTime {
    h: u8,
    m: u8,
    s: u8,
    ms: u16,
}

fn local_ts(ts: Timestamp) -> Option<LocalTime> {
    // Looking up the local offset fails in multi-threaded programs on some platforms,
    // in which case timestamps are written in UTC instead
    let utc = time::OffsetDateTime::from_unix_timestamp_nanos(ts.to_unix_nanos().into()).ok()?;

    let local = time::UtcOffset::local_offset_at(utc)
        .ok()
        .and_then(|offset| utc.checked_to_offset(offset))
        .unwrap_or(utc);

    let (h, m, s, ms) = local.time().as_hms_milli();

    Some(LocalTime { h, m, s, ms })
}

fn write_timestamp(buf: &mut Buffer, ts: Timestamp) {
    if let Some(LocalTime { h, m, s, ms }) = local_ts(ts) {
        write_plain(
            buf,
            format_args!("{:>02}:{:>02}:{:>02}.{:>03}", h, m, s, ms),
        );
    } else {
        write_plain(buf, format_args!("{:?}", ts));
    }
}

struct Writer<'a> {
    buf: &'a mut Buffer,
}

impl<'a> sval_fmt::TokenWrite for Writer<'a> {
    fn write_text_quote(&mut self) -> fmt::Result {
        Ok(())
    }

    fn write_text(&mut self, text: &str) -> fmt::Result {
        self.write(text, TEXT);

        Ok(())
    }

    fn write_number<N: fmt::Display>(&mut self, num: N) -> fmt::Result {
        self.write(num, NUMBER);

        Ok(())
    }

    fn write_atom<A: fmt::Display>(&mut self, atom: A) -> fmt::Result {
        self.write(atom, ATOM);

        Ok(())
    }

    fn write_ident(&mut self, ident: &str) -> fmt::Result {
        self.write(ident, IDENT);

        Ok(())
    }

    fn write_field(&mut self, field: &str) -> fmt::Result {
        self.write(field, FIELD);

        Ok(())
    }
}

impl<'a> fmt::Write for Writer<'a> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        write!(&mut self.buf, "{}", s).map_err(|_| fmt::Error)
    }
}

impl<'a> Writer<'a> {
    fn write(&mut self, v: impl fmt::Display, color: Color) {
        write_fg(&mut *self.buf, v, color);
    }
}

const SCOPE: Color = Color::Ansi256(244);

const TEXT: Color = Color::Ansi256(69);
const NUMBER: Color = Color::Ansi256(135);
const ATOM: Color = Color::Ansi256(168);
const IDENT: Color = Color::Ansi256(170);
const FIELD: Color = Color::Ansi256(174);

fn write_fg(buf: &mut Buffer, v: impl fmt::Display, color: Color) {
    let _ = buf.set_color(ColorSpec::new().set_fg(Some(color)));
    let _ = write!(buf, "{}", v);
    let _ = buf.reset();
}

fn try_write_fg(buf: &mut Buffer, v: impl fmt::Display, color: Option<Color>) {
    if let Some(color) = color {
        write_fg(buf, v, color);
    } else {
        write_plain(buf, v);
    }
}

fn write_plain(buf: &mut Buffer, v: impl fmt::Display) {
    let _ = write!(buf, "{}", v);
}

fn with_shared_buf(writer: &BufferWriter, with_buf: impl FnOnce(&BufferWriter, &mut Buffer)) {
    thread_local! {
        static STDOUT: RefCell<Option<Buffer>> = const { RefCell::new(None) };
    }

    STDOUT.with(|buf| {
        match buf.try_borrow_mut() {
            // Reuse this thread's buffer unless it's already in use further up the stack
            Ok(mut slot) => match &mut *slot {
                Some(buf) => {
                    buf.clear();
                    with_buf(writer, buf);
                }
                None => {
                    let mut buf = writer.buffer();
                    with_buf(writer, &mut buf);

                    *slot = Some(buf);
                }
            },
            Err(_) => {
                with_buf(writer, &mut writer.buffer());
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    use tally::value::Value;

    fn record<'a>(props: &'a [(&'a str, Value<'a>)]) -> Record<'a> {
        Record::new(
            Timestamp::from_unix(Duration::from_secs(1_700_000_000)),
            Level::Info,
            "myapp.logger",
            "Request processed",
            props,
        )
    }

    fn to_string(buf: &Buffer) -> String {
        String::from_utf8(buf.as_slice().to_vec()).unwrap()
    }

    #[test]
    fn text_line() {
        let props = [
            ("request_id", Value::from(7i32)),
            ("message", Value::from("hello world 7")),
        ];

        let mut buf = Buffer::no_color();
        write_text(&mut buf, &record(&props));

        let line = to_string(&buf);

        assert!(
            line.ends_with(" INFO myapp.logger Request processed request_id=7 message=hello world 7\n"),
            "{line}"
        );
    }

    #[test]
    fn json_line() {
        let props = [
            ("request_id", Value::from(7i32)),
            ("processing_time_ms", Value::from(0.5f64)),
        ];

        let mut buf = Buffer::no_color();
        write_json(&mut buf, &record(&props));

        assert_eq!(
            "{\"timestamp\":\"2023-11-14T22:13:20Z\",\"level\":\"INFO\",\"scope\":\"myapp.logger\",\"msg\":\"Request processed\",\"request_id\":7,\"processing_time_ms\":0.5}\n",
            to_string(&buf)
        );
    }
}
