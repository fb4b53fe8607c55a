/*!
Configuration for a telemetry pipeline, with defaults that can be overridden by the standard `OTEL_*` environment variables.
*/

use std::{env, fmt, str::FromStr, time::Duration};

use crate::{
    batch::{ParseTemporalityError, Temporality},
    error::Error,
    provider::{DEFAULT_EXPORT_TIMEOUT, DEFAULT_INTERVAL},
};

pub const DEFAULT_ENDPOINT: &str = "localhost:4317";
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/**
The wire protocol used to reach a collector.
*/
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Protocol {
    #[default]
    Grpc,
    HttpProtobuf,
    HttpJson,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Grpc => "grpc",
            Protocol::HttpProtobuf => "http/protobuf",
            Protocol::HttpJson => "http/json",
        }
    }

    /**
    The port collectors conventionally listen on for this protocol.
    */
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Grpc => 4317,
            Protocol::HttpProtobuf | Protocol::HttpJson => 4318,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("expected one of `grpc`, `http/protobuf`, or `http/json`")]
pub struct ParseProtocolError {}

impl FromStr for Protocol {
    type Err = ParseProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grpc" => Ok(Protocol::Grpc),
            "http/protobuf" | "http" => Ok(Protocol::HttpProtobuf),
            "http/json" => Ok(Protocol::HttpJson),
            _ => Err(ParseProtocolError {}),
        }
    }
}

/**
A parsed collector endpoint.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub secure: bool,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
}

impl Endpoint {
    /**
    Parse an endpoint given either as `host:port` or as an `http://` or `https://` URL.

    When no scheme is given, `insecure` decides between plain HTTP and TLS.
    */
    pub fn parse(endpoint: &str, insecure: bool) -> Result<Self, Error> {
        let invalid =
            |reason: &str| Error::invalid_config("endpoint", format!("`{endpoint}`: {reason}"));

        let endpoint = endpoint.trim();

        let (secure, rest) = if let Some(rest) = endpoint.strip_prefix("https://") {
            (true, rest)
        } else if let Some(rest) = endpoint.strip_prefix("http://") {
            (false, rest)
        } else if endpoint.contains("://") {
            return Err(invalid("only `http` and `https` are supported"));
        } else {
            (!insecure, endpoint)
        };

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], rest[i..].trim_end_matches('/')),
            None => (rest, ""),
        };

        let (host, port) = match authority.rsplit_once(':') {
            // Bracketed IPv6 addresses contain colons of their own
            Some((host, port)) if !port.contains(']') => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| invalid("the port is not a number between 0 and 65535"))?;

                (host, Some(port))
            }
            _ => (authority, None),
        };

        if host.is_empty() {
            return Err(invalid("the host is empty"));
        }

        if host
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '@' | '?' | '#'))
        {
            return Err(invalid("the host contains invalid characters"));
        }

        Ok(Endpoint {
            secure,
            host: host.to_owned(),
            port,
            path: path.to_owned(),
        })
    }

    /**
    The base URL of the endpoint, using `default_port` if none was given.
    */
    pub fn to_url(&self, default_port: u16) -> String {
        format!(
            "{}://{}:{}{}",
            if self.secure { "https" } else { "http" },
            self.host,
            self.port.unwrap_or(default_port),
            self.path
        )
    }
}

/**
Configuration for a telemetry pipeline.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /**
    The collector endpoint, as `host:port` or a full URL.
    */
    pub endpoint: String,
    /**
    Use plain HTTP for endpoints without a scheme.
    */
    pub insecure: bool,
    pub interval: Duration,
    /**
    The deadline for the final export when the pipeline shuts down.
    */
    pub shutdown_timeout: Duration,
    pub export_timeout: Duration,
    pub protocol: Protocol,
    pub temporality: Temporality,
    pub headers: Vec<(String, String)>,
    pub service_name: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            insecure: true,
            interval: DEFAULT_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            export_timeout: DEFAULT_EXPORT_TIMEOUT,
            protocol: Protocol::default(),
            temporality: Temporality::default(),
            headers: Vec::new(),
            service_name: None,
        }
    }
}

impl Config {
    /**
    Read configuration from the environment, using defaults for any variable that isn't set.

    The following variables are recognized:

    - `OTEL_EXPORTER_OTLP_ENDPOINT`
    - `OTEL_EXPORTER_OTLP_INSECURE`
    - `OTEL_METRIC_EXPORT_INTERVAL` (milliseconds)
    - `OTEL_METRIC_EXPORT_TIMEOUT` (milliseconds)
    - `OTEL_EXPORTER_OTLP_PROTOCOL`
    - `OTEL_EXPORTER_OTLP_METRICS_TEMPORALITY_PREFERENCE`
    - `OTEL_EXPORTER_OTLP_HEADERS`
    - `OTEL_SERVICE_NAME`
    */
    pub fn from_env() -> Result<Self, Error> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Config::default();

        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(endpoint) = var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            config.endpoint = endpoint;
        }

        if let Some(insecure) = var("OTEL_EXPORTER_OTLP_INSECURE") {
            config.insecure = parse_bool(&insecure).ok_or_else(|| {
                Error::invalid_config("OTEL_EXPORTER_OTLP_INSECURE", "expected `true` or `false`")
            })?;
        }

        if let Some(interval) = var("OTEL_METRIC_EXPORT_INTERVAL") {
            config.interval = parse_millis("OTEL_METRIC_EXPORT_INTERVAL", &interval)?;
        }

        if let Some(timeout) = var("OTEL_METRIC_EXPORT_TIMEOUT") {
            config.export_timeout = parse_millis("OTEL_METRIC_EXPORT_TIMEOUT", &timeout)?;
        }

        if let Some(protocol) = var("OTEL_EXPORTER_OTLP_PROTOCOL") {
            config.protocol = protocol.parse().map_err(|err: ParseProtocolError| {
                Error::invalid_config("OTEL_EXPORTER_OTLP_PROTOCOL", err.to_string())
            })?;
        }

        if let Some(temporality) = var("OTEL_EXPORTER_OTLP_METRICS_TEMPORALITY_PREFERENCE") {
            config.temporality =
                temporality
                    .trim()
                    .parse()
                    .map_err(|err: ParseTemporalityError| {
                        Error::invalid_config(
                            "OTEL_EXPORTER_OTLP_METRICS_TEMPORALITY_PREFERENCE",
                            err.to_string(),
                        )
                    })?;
        }

        if let Some(headers) = var("OTEL_EXPORTER_OTLP_HEADERS") {
            config.headers = parse_headers(&headers)?;
        }

        config.service_name = var("OTEL_SERVICE_NAME");

        Ok(config)
    }

    /**
    Parse the configured endpoint.
    */
    pub fn endpoint(&self) -> Result<Endpoint, Error> {
        Endpoint::parse(&self.endpoint, self.insecure)
    }

    /**
    Check the configuration for errors.

    Returns a list of warnings about settings that are valid but probably unintended.
    */
    pub fn validate(&self) -> Result<Vec<String>, Error> {
        if self.interval.is_zero() {
            return Err(Error::invalid_config("interval", "must be greater than zero"));
        }

        if self.export_timeout.is_zero() {
            return Err(Error::invalid_config("export_timeout", "must be greater than zero"));
        }

        self.endpoint()?;

        let mut warnings = Vec::new();

        if self.shutdown_timeout <= self.interval {
            warnings.push(format!(
                "the shutdown timeout ({:?}) is not longer than the export interval ({:?}); data recorded late in the final interval may be lost",
                self.shutdown_timeout, self.interval
            ));
        }

        Ok(warnings)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn parse_millis(option: &'static str, value: &str) -> Result<Duration, Error> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| {
            Error::invalid_config(option, format!("`{value}` is not a number of milliseconds"))
        })
}

/**
Parse headers in the `key1=value1,key2=value2` format.
*/
pub fn parse_headers(raw: &str) -> Result<Vec<(String, String)>, Error> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_owned(), value.trim().to_owned()))
            }
            _ => Err(Error::invalid_config(
                "headers",
                format!("`{pair}` is not a `key=value` pair"),
            )),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> Result<Config, Error> {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();

        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = from_vars(&[]).unwrap();

        assert_eq!(Config::default(), config);
        assert_eq!(Duration::from_secs(5), config.interval);
        assert_eq!(Temporality::Delta, config.temporality);
        assert_eq!(
            "http://localhost:4317",
            config.endpoint().unwrap().to_url(config.protocol.default_port())
        );
    }

    #[test]
    fn env_overrides() {
        let config = from_vars(&[
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "https://collector:4318/base/"),
            ("OTEL_EXPORTER_OTLP_INSECURE", "false"),
            ("OTEL_METRIC_EXPORT_INTERVAL", "1000"),
            ("OTEL_METRIC_EXPORT_TIMEOUT", "250"),
            ("OTEL_EXPORTER_OTLP_PROTOCOL", "http/protobuf"),
            ("OTEL_EXPORTER_OTLP_METRICS_TEMPORALITY_PREFERENCE", "Cumulative"),
            ("OTEL_EXPORTER_OTLP_HEADERS", "authorization=Bearer x, x-tenant=a"),
            ("OTEL_SERVICE_NAME", "svc"),
        ])
        .unwrap();

        assert!(!config.insecure);
        assert_eq!(Duration::from_secs(1), config.interval);
        assert_eq!(Duration::from_millis(250), config.export_timeout);
        assert_eq!(Protocol::HttpProtobuf, config.protocol);
        assert_eq!(Temporality::Cumulative, config.temporality);
        assert_eq!(
            vec![
                ("authorization".to_owned(), "Bearer x".to_owned()),
                ("x-tenant".to_owned(), "a".to_owned())
            ],
            config.headers
        );
        assert_eq!(Some("svc".to_owned()), config.service_name);
        assert_eq!(
            "https://collector:4318/base",
            config.endpoint().unwrap().to_url(4318)
        );
    }

    #[test]
    fn invalid_env_values_are_errors() {
        for (key, value) in [
            ("OTEL_METRIC_EXPORT_INTERVAL", "5s"),
            ("OTEL_EXPORTER_OTLP_PROTOCOL", "thrift"),
            ("OTEL_EXPORTER_OTLP_INSECURE", "maybe"),
            ("OTEL_EXPORTER_OTLP_HEADERS", "novalue"),
        ] {
            assert!(
                matches!(from_vars(&[(key, value)]), Err(Error::InvalidConfig { .. })),
                "{key}={value}"
            );
        }
    }

    #[test]
    fn endpoint_parsing() {
        let endpoint = Endpoint::parse("localhost:4317", false).unwrap();
        assert!(endpoint.secure);
        assert_eq!(Some(4317), endpoint.port);

        let endpoint = Endpoint::parse("http://[::1]", false).unwrap();
        assert!(!endpoint.secure);
        assert_eq!("[::1]", endpoint.host);
        assert_eq!(None, endpoint.port);
        assert_eq!("http://[::1]:4318", endpoint.to_url(4318));

        for invalid in ["", "ftp://host", "host:port", "http://:4317", "host:99999"] {
            assert!(Endpoint::parse(invalid, true).is_err(), "{invalid}");
        }
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let config = Config {
            interval: Duration::ZERO,
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_warns_on_short_shutdown_timeout() {
        let config = Config::default();

        // The default 5s deadline equals the default 5s interval
        assert_eq!(1, config.validate().unwrap().len());

        let config = Config {
            shutdown_timeout: Duration::from_secs(10),
            ..Default::default()
        };

        assert!(config.validate().unwrap().is_empty());
    }
}
