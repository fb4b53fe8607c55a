use std::{error, io, sync::Arc};

/**
A fatal configuration error.

These errors are raised while the pipeline is being set up. Recording measurements and exporting them never produce an `Error`.
*/
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("an instrument named `{name}` is already registered in meter `{scope}`")]
    DuplicateInstrument { name: String, scope: String },
    #[error("`{name}` is not a valid instrument name")]
    InvalidInstrumentName { name: String },
    #[error("invalid histogram boundaries for `{name}`: {reason}")]
    InvalidBoundaries { name: String, reason: &'static str },
    #[error("malformed resource attributes `{input}`: {reason}")]
    InvalidResourceAttributes { input: String, reason: &'static str },
    #[error("invalid value for `{option}`: {reason}")]
    InvalidConfig { option: &'static str, reason: String },
    #[error("failed to start the export worker")]
    Spawn(#[source] Arc<io::Error>),
    #[error("failed to configure the exporter")]
    Exporter(#[source] Box<dyn error::Error + Send + Sync>),
}

impl Error {
    pub(crate) fn invalid_config(option: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidConfig {
            option,
            reason: reason.into(),
        }
    }

    /**
    Wrap an error raised while building an exporter.
    */
    pub fn exporter(err: impl error::Error + Send + Sync + 'static) -> Self {
        Error::Exporter(Box::new(err))
    }
}
