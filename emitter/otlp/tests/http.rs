use std::time::Duration;

use tally::{
    Attributes, ExportError, Exporter, InMemoryExporter, MeterProvider, MetricsBatch, Protocol,
    Scope,
};
use tally_otlp::OtlpBuilder;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    sync::oneshot,
};

struct Received {
    request_line: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Received {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn exported_batch() -> MetricsBatch {
    let exporter = InMemoryExporter::new();
    let provider = MeterProvider::builder(exporter.clone()).build();

    let requests = provider
        .meter(Scope::new("myapp.metrics"))
        .counter("app.requests.count")
        .build()
        .unwrap();

    requests.add(5, &Attributes::from_iter([("endpoint", "/api/test")]));

    assert!(provider.shutdown(Duration::from_secs(5)).is_flushed());

    exporter.batches().remove(0)
}

// Accept a single HTTP/1.1 request and answer it with `status`
async fn collector(status: &'static str) -> (String, oneshot::Receiver<Received>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut buf = Vec::new();
        let mut chunk = [0; 1024];

        let header_end = loop {
            let read = stream.read(&mut chunk).await.unwrap();
            assert_ne!(0, read, "the connection closed before the request was complete");
            buf.extend_from_slice(&chunk[..read]);

            if let Some(i) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break i + 4;
            }
        };

        let head = String::from_utf8(buf[..header_end].to_vec()).unwrap();
        let mut lines = head.split("\r\n").filter(|line| !line.is_empty());

        let request_line = lines.next().unwrap().to_owned();
        let headers = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
            .collect::<Vec<_>>();

        let content_len = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .map(|(_, v)| v.parse::<usize>().unwrap())
            .unwrap_or(0);

        let mut body = buf[header_end..].to_vec();
        while body.len() < content_len {
            let read = stream.read(&mut chunk).await.unwrap();
            assert_ne!(0, read, "the connection closed before the body was complete");
            body.extend_from_slice(&chunk[..read]);
        }

        stream
            .write_all(format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\n\r\n").as_bytes())
            .await
            .unwrap();
        stream.flush().await.unwrap();

        let _ = tx.send(Received {
            request_line,
            headers,
            body,
        });
    });

    (format!("http://{addr}"), rx)
}

#[test]
fn http_protobuf_export_is_accepted() {
    let batch = exported_batch();

    let runtime = tokio::runtime::Runtime::new().unwrap();

    runtime.block_on(async {
        let (endpoint, received) = collector("200 OK").await;

        let exporter = OtlpBuilder::new(endpoint)
            .protocol(Protocol::HttpProtobuf)
            .header("x-api-key", "secret")
            .gzip(false)
            .metrics()
            .unwrap();

        exporter.export(batch).await.unwrap();

        let received = received.await.unwrap();

        assert!(received.request_line.starts_with("POST "));
        assert!(received.request_line.contains("/v1/metrics"));
        assert_eq!(
            Some("application/x-protobuf"),
            received.header("content-type")
        );
        assert_eq!(Some("secret"), received.header("x-api-key"));
        assert!(!received.body.is_empty());

        let metrics = exporter.metrics();
        assert_eq!(1, metrics.http_batch_sent);
        assert_eq!(0, metrics.http_batch_failed);
    });
}

#[test]
fn unavailable_collector_is_retryable() {
    let batch = exported_batch();

    let runtime = tokio::runtime::Runtime::new().unwrap();

    runtime.block_on(async {
        let (endpoint, _received) = collector("503 Service Unavailable").await;

        let exporter = OtlpBuilder::new(endpoint)
            .protocol(Protocol::HttpJson)
            .gzip(false)
            .metrics()
            .unwrap();

        let err = exporter.export(batch).await.unwrap_err();

        assert!(
            matches!(err, ExportError::Rejected { retryable: true, .. }),
            "{err:?}"
        );
        assert_eq!(1, exporter.metrics().http_batch_failed);
    });
}

#[test]
fn bad_request_is_not_retryable() {
    let batch = exported_batch();

    let runtime = tokio::runtime::Runtime::new().unwrap();

    runtime.block_on(async {
        let (endpoint, _received) = collector("400 Bad Request").await;

        let exporter = OtlpBuilder::new(endpoint)
            .protocol(Protocol::HttpProtobuf)
            .gzip(false)
            .metrics()
            .unwrap();

        let err = exporter.export(batch).await.unwrap_err();

        assert!(!err.is_retryable(), "{err:?}");
    });
}

#[test]
fn unreachable_collector_is_a_retryable_transport_error() {
    let batch = exported_batch();

    let runtime = tokio::runtime::Runtime::new().unwrap();

    runtime.block_on(async {
        // Bind then drop a listener to find a port nothing is listening on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let exporter = OtlpBuilder::new(format!("http://{addr}"))
            .protocol(Protocol::HttpProtobuf)
            .metrics()
            .unwrap();

        let err = exporter.export(batch).await.unwrap_err();

        assert!(matches!(err, ExportError::Transport(_)), "{err:?}");
        assert!(err.is_retryable());
        assert_eq!(1, exporter.metrics().transport_conn_failed);
    });
}
