/*!
Static attributes identifying the process that produces telemetry.
*/

use std::{borrow::Cow, env, fmt};

use crate::{
    attributes::{Attribute, AttributeValue, Attributes},
    error::Error,
};

pub const SERVICE_NAME: &str = "service.name";
pub const SERVICE_VERSION: &str = "service.version";
pub const SERVICE_INSTANCE_ID: &str = "service.instance.id";
pub const TELEMETRY_SDK_NAME: &str = "telemetry.sdk.name";
pub const TELEMETRY_SDK_LANGUAGE: &str = "telemetry.sdk.language";
pub const TELEMETRY_SDK_VERSION: &str = "telemetry.sdk.version";

const DEFAULT_SERVICE_NAME: &str = "unknown_service";

/**
The resource attached to all telemetry emitted by a process.

A resource always has a `service.name`, along with attributes describing this library.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    attributes: Attributes,
}

impl Resource {
    pub fn builder() -> ResourceBuilder {
        ResourceBuilder::new()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn service_name(&self) -> &str {
        self.get(SERVICE_NAME)
            .and_then(|name| name.as_str())
            .unwrap_or(DEFAULT_SERVICE_NAME)
    }
}

impl Default for Resource {
    fn default() -> Self {
        ResourceBuilder::new().build_without_env()
    }
}

/**
A builder for a [`Resource`].
*/
#[derive(Debug, Default)]
pub struct ResourceBuilder {
    service_name: Option<String>,
    service_version: Option<String>,
    instance_id: bool,
    attributes: Vec<Attribute>,
    raw_attributes: Option<String>,
    env_service_name: Option<String>,
}

impl ResourceBuilder {
    pub fn new() -> Self {
        ResourceBuilder::default()
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = Some(version.into());
        self
    }

    /**
    Generate a random `service.instance.id` for this process.
    */
    pub fn with_instance_id(mut self) -> Self {
        self.instance_id = true;
        self
    }

    pub fn attribute(
        mut self,
        key: impl Into<Cow<'static, str>>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.push(Attribute {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /**
    Add attributes in the `OTEL_RESOURCE_ATTRIBUTES` format: `key1=value1,key2=value2`.

    Values may be percent-encoded. These attributes are overridden by any set directly on the builder.
    */
    pub fn raw_attributes(mut self, raw: impl Into<String>) -> Self {
        self.raw_attributes = Some(raw.into());
        self
    }

    /**
    Read `OTEL_RESOURCE_ATTRIBUTES` and `OTEL_SERVICE_NAME` from the environment.

    `OTEL_SERVICE_NAME` takes precedence over any other source of `service.name`.
    */
    pub fn from_env(mut self) -> Self {
        if let Ok(raw) = env::var("OTEL_RESOURCE_ATTRIBUTES") {
            self.raw_attributes = Some(raw);
        }

        self.env_service_name = env::var("OTEL_SERVICE_NAME")
            .ok()
            .filter(|name| !name.is_empty());

        self
    }

    pub fn build(self) -> Result<Resource, Error> {
        let raw = match self.raw_attributes {
            Some(ref raw) => parse_raw_attributes(raw)?,
            None => Vec::new(),
        };

        Ok(self.build_with(raw))
    }

    fn build_without_env(self) -> Resource {
        self.build_with(Vec::new())
    }

    fn build_with(self, raw: Vec<Attribute>) -> Resource {
        let ResourceBuilder {
            service_name,
            service_version,
            instance_id,
            attributes,
            raw_attributes: _,
            env_service_name,
        } = self;

        let mut all = Vec::with_capacity(raw.len() + attributes.len() + 6);

        // Later entries win when keys collide
        all.push(attr(SERVICE_NAME, DEFAULT_SERVICE_NAME));
        all.push(attr(TELEMETRY_SDK_NAME, env!("CARGO_PKG_NAME")));
        all.push(attr(TELEMETRY_SDK_LANGUAGE, "rust"));
        all.push(attr(TELEMETRY_SDK_VERSION, env!("CARGO_PKG_VERSION")));

        if instance_id {
            all.push(attr(
                SERVICE_INSTANCE_ID,
                format!("{:032x}", rand::random::<u128>()),
            ));
        }

        all.extend(raw);
        all.extend(attributes);

        if let Some(version) = service_version {
            all.push(attr(SERVICE_VERSION, version));
        }

        if let Some(name) = env_service_name.or(service_name) {
            all.push(attr(SERVICE_NAME, name));
        }

        Resource {
            attributes: all.into_iter().collect(),
        }
    }
}

fn attr(key: &'static str, value: impl Into<AttributeValue>) -> Attribute {
    Attribute {
        key: Cow::Borrowed(key),
        value: value.into(),
    }
}

fn parse_raw_attributes(raw: &str) -> Result<Vec<Attribute>, Error> {
    let invalid = |reason| Error::InvalidResourceAttributes {
        input: raw.to_owned(),
        reason,
    };

    let mut attributes = Vec::new();

    for pair in raw.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| invalid("expected a `key=value` pair"))?;

        let key = key.trim();
        if key.is_empty() {
            return Err(invalid("attribute keys must not be empty"));
        }

        let value = percent_decode(value.trim()).ok_or_else(|| invalid("invalid percent-encoding"))?;

        attributes.push(Attribute {
            key: Cow::Owned(key.to_owned()),
            value: AttributeValue::String(value),
        });
    }

    Ok(attributes)
}

fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());

    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes.get(i + 1..i + 3)?;
                let hex = std::str::from_utf8(hex).ok()?;

                decoded.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b => {
                decoded.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8(decoded).ok()
}

/**
The instrumentation scope that produced a set of metrics, such as a library or a module of an application.
*/
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope {
    name: Cow<'static, str>,
    version: Option<Cow<'static, str>>,
}

impl Scope {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Scope {
            name: name.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<Cow<'static, str>>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)?;

        if let Some(ref version) = self.version {
            write!(f, "@{version}")?;
        }

        Ok(())
    }
}

impl From<&'static str> for Scope {
    fn from(name: &'static str) -> Self {
        Scope::new(name)
    }
}

impl From<String> for Scope {
    fn from(name: String) -> Self {
        Scope::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_resource_has_service_name() {
        let resource = Resource::default();

        assert_eq!("unknown_service", resource.service_name());
        assert_eq!(
            Some("rust"),
            resource
                .get(TELEMETRY_SDK_LANGUAGE)
                .and_then(|v| v.as_str())
        );
    }

    #[test]
    fn builder_attributes_override_raw_attributes() {
        let resource = Resource::builder()
            .service_name("my-golang-application")
            .service_version("1.0.0")
            .raw_attributes("deployment.environment=dev, service.version=0.0.1,team=a%20b")
            .build()
            .unwrap();

        assert_eq!("my-golang-application", resource.service_name());
        assert_eq!(
            Some("1.0.0"),
            resource.get(SERVICE_VERSION).and_then(|v| v.as_str())
        );
        assert_eq!(
            Some("dev"),
            resource
                .get("deployment.environment")
                .and_then(|v| v.as_str())
        );
        assert_eq!(Some("a b"), resource.get("team").and_then(|v| v.as_str()));
    }

    #[test]
    fn raw_service_name_is_used_without_explicit_name() {
        let resource = Resource::builder()
            .raw_attributes("service.name=from-raw")
            .build()
            .unwrap();

        assert_eq!("from-raw", resource.service_name());
    }

    #[test]
    fn malformed_raw_attributes_are_rejected() {
        for raw in ["novalue", "=value", "key=%zz", "key=%4"] {
            assert!(
                matches!(
                    Resource::builder().raw_attributes(raw).build(),
                    Err(Error::InvalidResourceAttributes { .. })
                ),
                "{raw}"
            );
        }
    }

    #[test]
    fn instance_id_is_random() {
        let a = Resource::builder().with_instance_id().build().unwrap();
        let b = Resource::builder().with_instance_id().build().unwrap();

        assert_ne!(a.get(SERVICE_INSTANCE_ID), b.get(SERVICE_INSTANCE_ID));
    }

    #[test]
    fn scope_display() {
        assert_eq!(
            "myapp.metrics@1.0.0",
            Scope::new("myapp.metrics").with_version("1.0.0").to_string()
        );
    }
}
