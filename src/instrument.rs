/*!
Instrument descriptors and the handles used to record measurements against them.
*/

use std::{borrow::Cow, fmt, sync::Arc};

use crate::{
    aggregation::{Measurement, MeasurementValue},
    attributes::Attributes,
    error::Error,
    provider::Pipeline,
    resource::Scope,
    timestamp::Timestamp,
};

/**
The boundaries used by histograms that don't specify their own.
*/
pub const DEFAULT_BOUNDARIES: [f64; 15] = [
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0, 7500.0,
    10000.0,
];

const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentKind {
    Counter,
    Histogram,
}

impl InstrumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentKind::Counter => "counter",
            InstrumentKind::Histogram => "histogram",
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/**
The static description of a registered instrument.
*/
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub(crate) id: u64,
    pub(crate) name: Cow<'static, str>,
    pub(crate) kind: InstrumentKind,
    pub(crate) unit: Option<Cow<'static, str>>,
    pub(crate) description: Option<Cow<'static, str>>,
    pub(crate) scope: Arc<Scope>,
    pub(crate) boundaries: Option<Arc<[f64]>>,
}

impl Descriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /**
    The explicit bucket boundaries of a histogram.

    This is `None` for counters.
    */
    pub fn boundaries(&self) -> Option<&[f64]> {
        self.boundaries.as_deref()
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), Error> {
    let mut chars = name.chars();

    let valid = name.len() <= MAX_NAME_LEN
        && chars.next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false)
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/'));

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInstrumentName {
            name: name.to_owned(),
        })
    }
}

pub(crate) fn validate_boundaries(name: &str, boundaries: &[f64]) -> Result<(), Error> {
    let invalid = |reason| Error::InvalidBoundaries {
        name: name.to_owned(),
        reason,
    };

    if boundaries.iter().any(|b| !b.is_finite()) {
        return Err(invalid("boundaries must be finite"));
    }

    for pair in boundaries.windows(2) {
        if pair[0] == pair[1] {
            return Err(invalid("boundaries must not contain duplicates"));
        }

        if pair[0] > pair[1] {
            return Err(invalid("boundaries must be sorted in increasing order"));
        }
    }

    Ok(())
}

/**
A monotonic counter.

Counters only go up; each call to [`Counter::add`] contributes a delta to the current export cycle.
*/
#[derive(Clone)]
pub struct Counter {
    descriptor: Arc<Descriptor>,
    pipeline: Arc<Pipeline>,
}

impl Counter {
    pub(crate) fn new(descriptor: Arc<Descriptor>, pipeline: Arc<Pipeline>) -> Self {
        Counter {
            descriptor,
            pipeline,
        }
    }

    /**
    Add `delta` to the counter for the given attributes.

    This never blocks on the transport and never fails.
    */
    pub fn add(&self, delta: u64, attributes: &Attributes) {
        self.pipeline.record(Measurement {
            descriptor: self.descriptor.clone(),
            value: MeasurementValue::Sum(delta),
            attributes: attributes.clone(),
            timestamp: Timestamp::now(),
        });
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Counter").field(&self.descriptor.name).finish()
    }
}

/**
A distribution of values bucketed by explicit boundaries.
*/
#[derive(Clone)]
pub struct Histogram {
    descriptor: Arc<Descriptor>,
    pipeline: Arc<Pipeline>,
}

impl Histogram {
    pub(crate) fn new(descriptor: Arc<Descriptor>, pipeline: Arc<Pipeline>) -> Self {
        Histogram {
            descriptor,
            pipeline,
        }
    }

    /**
    Record a value for the given attributes.

    Non-finite values are discarded.
    */
    pub fn record(&self, value: f64, attributes: &Attributes) {
        if !value.is_finite() {
            self.pipeline.metrics.measurement_rejected.increment();
            return;
        }

        self.pipeline.record(Measurement {
            descriptor: self.descriptor.clone(),
            value: MeasurementValue::Histogram(value),
            attributes: attributes.clone(),
            timestamp: Timestamp::now(),
        });
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }
}

impl fmt::Debug for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Histogram")
            .field(&self.descriptor.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_syntax() {
        for valid in [
            "app.requests.count",
            "app.response.time",
            "a",
            "http/server_duration-ms",
        ] {
            assert!(validate_name(valid).is_ok(), "{valid}");
        }

        let too_long = "a".repeat(256);

        for invalid in ["", "1abc", ".abc", "has space", "émoji", too_long.as_str()] {
            assert!(validate_name(invalid).is_err(), "{invalid}");
        }

        assert!(validate_name(&"a".repeat(255)).is_ok());
    }

    #[test]
    fn boundary_validation() {
        assert!(validate_boundaries("h", &DEFAULT_BOUNDARIES).is_ok());
        assert!(validate_boundaries("h", &[]).is_ok());

        for invalid in [
            &[1.0, 1.0][..],
            &[2.0, 1.0][..],
            &[0.0, f64::NAN][..],
            &[f64::NEG_INFINITY, 0.0][..],
        ] {
            assert!(matches!(
                validate_boundaries("h", invalid),
                Err(Error::InvalidBoundaries { .. })
            ));
        }
    }
}
