/*!
The [`Meter`] type: a registry of instruments within one instrumentation scope.
*/

use std::{
    borrow::Cow,
    collections::{hash_map::Entry, HashMap},
    fmt,
    marker::PhantomData,
    sync::{Arc, Mutex, PoisonError},
};

use crate::{
    error::Error,
    instrument::{
        validate_boundaries, validate_name, Counter, Descriptor, Histogram, InstrumentKind,
        DEFAULT_BOUNDARIES,
    },
    provider::Pipeline,
    resource::Scope,
};

/**
A registry of instruments.

Instrument names are unique within a meter regardless of their kind, and compared case-insensitively.
*/
pub struct Meter {
    scope: Arc<Scope>,
    pipeline: Arc<Pipeline>,
    registered: Mutex<HashMap<String, InstrumentKind>>,
}

impl Meter {
    pub(crate) fn new(scope: Scope, pipeline: Arc<Pipeline>) -> Self {
        Meter {
            scope: Arc::new(scope),
            pipeline,
            registered: Mutex::new(HashMap::new()),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /**
    Start building a monotonic counter.
    */
    pub fn counter(&self, name: impl Into<Cow<'static, str>>) -> InstrumentBuilder<Counter> {
        InstrumentBuilder::new(self, name.into(), InstrumentKind::Counter)
    }

    /**
    Start building a histogram.
    */
    pub fn histogram(&self, name: impl Into<Cow<'static, str>>) -> InstrumentBuilder<Histogram> {
        InstrumentBuilder::new(self, name.into(), InstrumentKind::Histogram)
    }

    fn register(
        &self,
        name: Cow<'static, str>,
        kind: InstrumentKind,
        unit: Option<Cow<'static, str>>,
        description: Option<Cow<'static, str>>,
        boundaries: Option<Vec<f64>>,
    ) -> Result<Arc<Descriptor>, Error> {
        validate_name(&name)?;

        let boundaries = match kind {
            InstrumentKind::Histogram => {
                let boundaries = boundaries.unwrap_or_else(|| DEFAULT_BOUNDARIES.to_vec());
                validate_boundaries(&name, &boundaries)?;

                Some(Arc::from(boundaries))
            }
            InstrumentKind::Counter => None,
        };

        let mut registered = self
            .registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match registered.entry(name.to_ascii_lowercase()) {
            Entry::Occupied(_) => {
                return Err(Error::DuplicateInstrument {
                    name: name.into_owned(),
                    scope: self.scope.name().to_owned(),
                })
            }
            Entry::Vacant(entry) => {
                entry.insert(kind);
            }
        }

        Ok(Arc::new(Descriptor {
            id: self.pipeline.next_instrument_id(),
            name,
            kind,
            unit,
            description,
            scope: self.scope.clone(),
            boundaries,
        }))
    }
}

impl fmt::Debug for Meter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Meter")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/**
A builder for an instrument, returned by [`Meter::counter`] and [`Meter::histogram`].
*/
pub struct InstrumentBuilder<'a, I> {
    meter: &'a Meter,
    name: Cow<'static, str>,
    kind: InstrumentKind,
    unit: Option<Cow<'static, str>>,
    description: Option<Cow<'static, str>>,
    boundaries: Option<Vec<f64>>,
    _instrument: PhantomData<fn() -> I>,
}

impl<'a, I> InstrumentBuilder<'a, I> {
    fn new(meter: &'a Meter, name: Cow<'static, str>, kind: InstrumentKind) -> Self {
        InstrumentBuilder {
            meter,
            name,
            kind,
            unit: None,
            description: None,
            boundaries: None,
            _instrument: PhantomData,
        }
    }

    pub fn unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn register(self) -> Result<Arc<Descriptor>, Error> {
        self.meter.register(
            self.name,
            self.kind,
            self.unit,
            self.description,
            self.boundaries,
        )
    }
}

impl<'a> InstrumentBuilder<'a, Counter> {
    pub fn build(self) -> Result<Counter, Error> {
        let pipeline = self.meter.pipeline.clone();

        Ok(Counter::new(self.register()?, pipeline))
    }
}

impl<'a> InstrumentBuilder<'a, Histogram> {
    /**
    Use explicit bucket boundaries instead of the defaults.

    Boundaries must be finite, unique, and sorted in increasing order.
    */
    pub fn boundaries(mut self, boundaries: impl Into<Vec<f64>>) -> Self {
        self.boundaries = Some(boundaries.into());
        self
    }

    pub fn build(self) -> Result<Histogram, Error> {
        let pipeline = self.meter.pipeline.clone();

        Ok(Histogram::new(self.register()?, pipeline))
    }
}
