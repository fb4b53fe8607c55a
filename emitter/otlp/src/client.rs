use std::{fmt, sync::Arc};

use tally::{config::Endpoint, ExportError, Protocol};

use crate::{
    data::{EncodedPayload, Encoding},
    internal_metrics::InternalMetrics,
    Error,
};

use self::http::{HttpConnection, HttpContent, HttpResponse};

mod http;

/**
The kind of data sent to a collector.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    Metrics,
    Logs,
}

impl Signal {
    fn grpc_path(self) -> &'static str {
        match self {
            Signal::Metrics => "/opentelemetry.proto.collector.metrics.v1.MetricsService/Export",
            Signal::Logs => "/opentelemetry.proto.collector.logs.v1.LogsService/Export",
        }
    }

    fn http_path(self) -> &'static str {
        match self {
            Signal::Metrics => "/v1/metrics",
            Signal::Logs => "/v1/logs",
        }
    }
}

/**
Sends encoded requests for one signal to a collector.
*/
pub(crate) struct OtlpTransport {
    protocol: Protocol,
    http: HttpConnection,
    metrics: Arc<InternalMetrics>,
}

impl fmt::Debug for OtlpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtlpTransport")
            .field("protocol", &self.protocol)
            .field("uri", &self.http.uri().to_string())
            .finish()
    }
}

impl OtlpTransport {
    pub fn new(
        metrics: Arc<InternalMetrics>,
        endpoint: &Endpoint,
        protocol: Protocol,
        signal: Signal,
        headers: Vec<(String, String)>,
        allow_compression: bool,
    ) -> Result<Self, Error> {
        let url = format!(
            "{}{}",
            endpoint.to_url(protocol.default_port()),
            match protocol {
                Protocol::Grpc => signal.grpc_path(),
                Protocol::HttpProtobuf | Protocol::HttpJson => signal.http_path(),
            }
        );

        let http = match protocol {
            // gRPC compression is negotiated separately from HTTP content encoding
            Protocol::Grpc => HttpConnection::http2(metrics.clone(), url, false, headers)?,
            Protocol::HttpProtobuf | Protocol::HttpJson => {
                HttpConnection::http1(metrics.clone(), url, allow_compression, headers)?
            }
        };

        Ok(OtlpTransport {
            protocol,
            http,
            metrics,
        })
    }

    pub fn encoding(&self) -> Encoding {
        match self.protocol {
            Protocol::Grpc | Protocol::HttpProtobuf => Encoding::Proto,
            Protocol::HttpJson => Encoding::Json,
        }
    }

    pub fn uri(&self) -> String {
        self.http.uri().to_string()
    }

    /**
    Send a request and check its response.

    Failures to connect or send are always worth retrying. Failures reported by the collector are retryable only if it's overloaded or temporarily unavailable.
    */
    pub async fn send(&self, payload: EncodedPayload) -> Result<(), ExportError> {
        match self.protocol {
            Protocol::Grpc => {
                let res = self
                    .http
                    .send(HttpContent::grpc(payload))
                    .await
                    .map_err(ExportError::transport)?;

                let r = check_grpc(res).await;

                match r {
                    Ok(()) => self.metrics.grpc_batch_sent.increment(),
                    Err(_) => self.metrics.grpc_batch_failed.increment(),
                }

                r
            }
            Protocol::HttpProtobuf | Protocol::HttpJson => {
                let res = self
                    .http
                    .send(HttpContent::raw(payload))
                    .await
                    .map_err(ExportError::transport)?;

                let r = check_http(res).await;

                match r {
                    Ok(()) => self.metrics.http_batch_sent.increment(),
                    Err(_) => self.metrics.http_batch_failed.increment(),
                }

                r
            }
        }
    }
}

async fn check_http(res: HttpResponse) -> Result<(), ExportError> {
    let status = res.http_status();

    // Read the body so the connection can be reused
    res.stream_payload(|_| {}, |_, _| {})
        .await
        .map_err(ExportError::transport)?;

    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(ExportError::Rejected {
            status: format!("HTTP {status}"),
            retryable: is_retryable_http_status(status),
        })
    }
}

async fn check_grpc(res: HttpResponse) -> Result<(), ExportError> {
    let http_status = res.http_status();

    if !(200..300).contains(&http_status) {
        return Err(ExportError::Rejected {
            status: format!("HTTP {http_status}"),
            retryable: is_retryable_http_status(http_status),
        });
    }

    // Errors returned before any message may only be in the headers
    let mut status = res
        .headers()
        .get("grpc-status")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let mut message = res
        .headers()
        .get("grpc-message")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    res.stream_payload(
        |_| {},
        |k, v| match k {
            "grpc-status" => status = Some(v.to_owned()),
            "grpc-message" => message = Some(v.to_owned()),
            _ => {}
        },
    )
    .await
    .map_err(ExportError::transport)?;

    match status.as_deref().map(|status| status.trim().parse::<u32>()) {
        Some(Ok(GRPC_OK)) => Ok(()),
        Some(Ok(code)) => Err(ExportError::Rejected {
            status: match message {
                Some(message) => format!("gRPC {code}: {message}"),
                None => format!("gRPC {code}"),
            },
            retryable: is_retryable_grpc_status(code),
        }),
        Some(Err(_)) | None => Err(ExportError::transport(Error::msg(
            "the response is missing a valid `grpc-status`",
        ))),
    }
}

const GRPC_OK: u32 = 0;
const GRPC_RESOURCE_EXHAUSTED: u32 = 8;
const GRPC_UNAVAILABLE: u32 = 14;

fn is_retryable_http_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

fn is_retryable_grpc_status(code: u32) -> bool {
    matches!(code, GRPC_RESOURCE_EXHAUSTED | GRPC_UNAVAILABLE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for status in [429, 502, 503, 504] {
            assert!(is_retryable_http_status(status), "{status}");
        }

        for status in [400, 401, 404, 413, 500] {
            assert!(!is_retryable_http_status(status), "{status}");
        }

        assert!(is_retryable_grpc_status(GRPC_UNAVAILABLE));
        assert!(is_retryable_grpc_status(GRPC_RESOURCE_EXHAUSTED));
        assert!(!is_retryable_grpc_status(3));
    }

    #[test]
    fn urls_per_protocol() {
        let metrics = Arc::new(InternalMetrics::default());
        let endpoint = Endpoint::parse("localhost", true).unwrap();

        let grpc = OtlpTransport::new(
            metrics.clone(),
            &endpoint,
            Protocol::Grpc,
            Signal::Metrics,
            Vec::new(),
            true,
        )
        .unwrap();
        assert_eq!(
            "http://localhost:4317/opentelemetry.proto.collector.metrics.v1.MetricsService/Export",
            grpc.uri()
        );
        assert_eq!(Encoding::Proto, grpc.encoding());

        let http = OtlpTransport::new(
            metrics,
            &endpoint,
            Protocol::HttpJson,
            Signal::Logs,
            Vec::new(),
            true,
        )
        .unwrap();
        assert_eq!("http://localhost:4318/v1/logs", http.uri());
        assert_eq!(Encoding::Json, http.encoding());
    }
}
