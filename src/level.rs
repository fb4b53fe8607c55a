use core::{fmt, str::FromStr};

use crate::value::{ToValue, Value};

/**
The severity of a log record.
*/
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Level {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Debug for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lvl = s.as_bytes();

        match lvl.first() {
            Some(b'I') | Some(b'i') => parse(lvl, b"INFORMATION", Level::Info),
            Some(b'D') | Some(b'd') => {
                parse(lvl, b"DEBUG", Level::Debug).or_else(|_| parse(lvl, b"DBG", Level::Debug))
            }
            Some(b'E') | Some(b'e') => {
                parse(lvl, b"ERROR", Level::Error).or_else(|_| parse(lvl, b"ERR", Level::Error))
            }
            Some(b'W') | Some(b'w') => {
                parse(lvl, b"WARNING", Level::Warn).or_else(|_| parse(lvl, b"WRN", Level::Warn))
            }
            _ => Err(ParseLevelError {}),
        }
    }
}

// A prefix of `expected_uppercase` matches, so `INF` parses as `INFORMATION`
fn parse(input: &[u8], expected_uppercase: &[u8], ok: Level) -> Result<Level, ParseLevelError> {
    if input.len() > expected_uppercase.len() {
        return Err(ParseLevelError {});
    }

    if input
        .iter()
        .zip(expected_uppercase)
        .all(|(b, e)| b.to_ascii_uppercase() == *e)
    {
        Ok(ok)
    } else {
        Err(ParseLevelError {})
    }
}

/**
An error attempting to parse a [`Level`] from text.
*/
#[derive(Debug, thiserror::Error)]
#[error("the input was not a valid level")]
pub struct ParseLevelError {}

impl ToValue for Level {
    fn to_value(&self) -> Value<'_> {
        Value::capture_display(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_roundtrip() {
        for lvl in [Level::Info, Level::Debug, Level::Warn, Level::Error] {
            let fmt = lvl.to_string();

            let parsed: Level = fmt.parse().unwrap();

            assert_eq!(lvl, parsed, "{}", fmt);
        }
    }

    #[test]
    fn level_parse_is_lenient() {
        for (input, expected) in [
            ("info", Level::Info),
            ("Inf", Level::Info),
            ("information", Level::Info),
            ("dbg", Level::Debug),
            ("warning", Level::Warn),
            ("WRN", Level::Warn),
            ("err", Level::Error),
        ] {
            assert_eq!(expected, input.parse::<Level>().unwrap(), "{input}");
        }

        for input in ["", "trace", "informational", "warnings"] {
            assert!(input.parse::<Level>().is_err(), "{input}");
        }
    }

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
    }
}
