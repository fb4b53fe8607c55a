use sval_derive::Value;

#[derive(Value)]
pub struct InstrumentationScope<'a> {
    #[sval(label = "name", index = 1)]
    pub name: &'a str,
    #[sval(label = "version", index = 2)]
    pub version: &'a str,
}

impl<'a> From<&'a tally::Scope> for InstrumentationScope<'a> {
    fn from(scope: &'a tally::Scope) -> Self {
        InstrumentationScope {
            name: scope.name(),
            version: scope.version().unwrap_or_default(),
        }
    }
}
