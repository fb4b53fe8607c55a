use std::{error, fmt};

/**
An error encountered configuring or sending to an OTLP collector.
*/
pub struct Error {
    msg: String,
    source: Option<Box<dyn error::Error + Send + Sync>>,
}

impl Error {
    pub(crate) fn new(msg: impl fmt::Display, source: impl error::Error + Send + Sync + 'static) -> Self {
        Error {
            msg: msg.to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn msg(msg: impl fmt::Display) -> Self {
        Error {
            msg: msg.to_string(),
            source: None,
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn error::Error + 'static))
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("msg", &self.msg)
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.msg, source),
            None => f.write_str(&self.msg),
        }
    }
}

impl From<Error> for tally::Error {
    fn from(err: Error) -> Self {
        tally::Error::exporter(err)
    }
}
