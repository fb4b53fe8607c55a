use std::{
    fmt,
    future::Future,
    io::Cursor,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{self, Context, Poll},
};

use bytes::Buf;
use hyper::{
    body::{self, Body, Frame, SizeHint},
    client::conn::{http1, http2},
    header::HeaderMap,
    Method, Request, Uri,
};

use crate::{
    data::{EncodedPayload, Encoding, PreEncodedCursor},
    internal_metrics::InternalMetrics,
    Error,
};

async fn connect(
    metrics: &InternalMetrics,
    version: HttpVersion,
    uri: &HttpUri,
) -> Result<HttpSender, Error> {
    let io = tokio::net::TcpStream::connect((uri.host(), uri.port()))
        .await
        .map_err(|e| {
            metrics.transport_conn_failed.increment();

            Error::new(format_args!("failed to connect to {uri}"), e)
        })?;

    metrics.transport_conn_established.increment();

    if uri.is_https() {
        #[cfg(feature = "tls")]
        {
            let io = tls_handshake(metrics, io, uri).await?;

            http_handshake(metrics, version, io).await
        }
        #[cfg(not(feature = "tls"))]
        {
            return Err(Error::msg("https support requires the `tls` Cargo feature"));
        }
    } else {
        http_handshake(metrics, version, io).await
    }
}

#[cfg(feature = "tls")]
async fn tls_handshake(
    metrics: &InternalMetrics,
    io: tokio::net::TcpStream,
    uri: &HttpUri,
) -> Result<tokio_rustls::client::TlsStream<tokio::net::TcpStream>, Error> {
    use tokio_rustls::{rustls, TlsConnector};

    let domain = uri.host().to_owned().try_into().map_err(|e| {
        metrics.transport_conn_tls_failed.increment();

        Error::new(format_args!("could not extract a DNS name from {uri}"), e)
    })?;

    let tls = {
        let mut root_store = rustls::RootCertStore::empty();

        for cert in rustls_native_certs::load_native_certs().map_err(|e| {
            metrics.transport_conn_tls_failed.increment();

            Error::new("failed to load native certificates", e)
        })? {
            let _ = root_store.add(cert);
        }

        Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        )
    };

    let conn = TlsConnector::from(tls);

    let io = conn.connect(domain, io).await.map_err(|e| {
        metrics.transport_conn_tls_failed.increment();

        Error::new("failed to connect TLS stream", e)
    })?;

    metrics.transport_conn_tls_handshake.increment();

    Ok(io)
}

async fn http_handshake(
    metrics: &InternalMetrics,
    version: HttpVersion,
    io: impl tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
) -> Result<HttpSender, Error> {
    match version {
        HttpVersion::Http1 => http1_handshake(metrics, io).await,
        HttpVersion::Http2 => http2_handshake(metrics, io).await,
    }
}

async fn http1_handshake(
    metrics: &InternalMetrics,
    io: impl tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
) -> Result<HttpSender, Error> {
    let (sender, conn) = http1::handshake(HttpIo(io)).await.map_err(|e| {
        metrics.transport_conn_failed.increment();

        Error::new("failed to perform HTTP1 handshake", e)
    })?;

    tokio::task::spawn(async move {
        let _ = conn.await;
    });

    Ok(HttpSender::Http1(sender))
}

async fn http2_handshake(
    metrics: &InternalMetrics,
    io: impl tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
) -> Result<HttpSender, Error> {
    let (sender, conn) = http2::handshake(TokioAmbientExecutor, HttpIo(io))
        .await
        .map_err(|e| {
            metrics.transport_conn_failed.increment();

            Error::new("failed to perform HTTP2 handshake", e)
        })?;

    tokio::task::spawn(async move {
        let _ = conn.await;
    });

    Ok(HttpSender::Http2(sender))
}

async fn send_request(
    metrics: &InternalMetrics,
    sender: &mut HttpSender,
    uri: &HttpUri,
    headers: impl Iterator<Item = (&str, &str)>,
    content: HttpContent,
) -> Result<HttpResponse, Error> {
    let mut req = Request::builder().uri(&uri.uri).method(Method::POST);

    for (k, v) in content.custom_headers {
        req = req.header(*k, *v);
    }

    req = req
        .header("host", uri.authority())
        .header("content-length", content.content_len())
        .header("content-type", content.content_type_header);

    if let Some(content_encoding) = content.content_encoding_header {
        req = req.header("content-encoding", content_encoding);
    }

    for (k, v) in headers {
        req = req.header(k, v);
    }

    let req = req.body(content).map_err(|e| {
        metrics.transport_request_failed.increment();

        Error::new("failed to build HTTP request", e)
    })?;

    sender.send_request(metrics, req).await
}

/**
A reusable connection to an HTTP endpoint.

The underlying connection is established lazily and replaced whenever a request fails.
*/
pub(crate) struct HttpConnection {
    metrics: Arc<InternalMetrics>,
    version: HttpVersion,
    allow_compression: bool,
    uri: HttpUri,
    headers: Vec<(String, String)>,
    sender: Mutex<Option<HttpSender>>,
}

impl HttpConnection {
    pub fn http1(
        metrics: Arc<InternalMetrics>,
        url: impl AsRef<str>,
        allow_compression: bool,
        headers: impl Into<Vec<(String, String)>>,
    ) -> Result<Self, Error> {
        Self::new(HttpVersion::Http1, metrics, url, allow_compression, headers)
    }

    pub fn http2(
        metrics: Arc<InternalMetrics>,
        url: impl AsRef<str>,
        allow_compression: bool,
        headers: impl Into<Vec<(String, String)>>,
    ) -> Result<Self, Error> {
        Self::new(HttpVersion::Http2, metrics, url, allow_compression, headers)
    }

    fn new(
        version: HttpVersion,
        metrics: Arc<InternalMetrics>,
        url: impl AsRef<str>,
        allow_compression: bool,
        headers: impl Into<Vec<(String, String)>>,
    ) -> Result<Self, Error> {
        Ok(HttpConnection {
            uri: HttpUri::parse(url.as_ref())?,
            version,
            allow_compression,
            headers: headers.into(),
            sender: Mutex::new(None),
            metrics,
        })
    }

    fn poison(&self) -> Option<HttpSender> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn unpoison(&self, sender: HttpSender) {
        *self.sender.lock().unwrap_or_else(PoisonError::into_inner) = Some(sender);
    }

    pub fn uri(&self) -> &HttpUri {
        &self.uri
    }

    /**
    Send a request, compressing its body if allowed.

    If the request can't be sent then the connection is dropped and a new one is made on the next attempt.
    */
    pub async fn send(&self, content: HttpContent) -> Result<HttpResponse, Error> {
        let mut sender = match self.poison() {
            Some(sender) => sender,
            None => connect(&self.metrics, self.version, &self.uri).await?,
        };

        let content = {
            #[cfg(feature = "gzip")]
            {
                if self.allow_compression {
                    self.metrics.transport_request_compress_gzip.increment();

                    content.gzip()?
                } else {
                    content
                }
            }
            #[cfg(not(feature = "gzip"))]
            {
                let _ = self.allow_compression;

                content
            }
        };

        let res = send_request(
            &self.metrics,
            &mut sender,
            &self.uri,
            self.headers.iter().map(|(k, v)| (&**k, &**v)),
            content,
        )
        .await?;

        self.unpoison(sender);

        Ok(res)
    }
}

#[derive(Debug, Clone, Copy)]
enum HttpVersion {
    Http1,
    Http2,
}

enum HttpSender {
    Http1(http1::SendRequest<HttpContent>),
    Http2(http2::SendRequest<HttpContent>),
}

impl HttpSender {
    async fn send_request(
        &mut self,
        metrics: &InternalMetrics,
        req: Request<HttpContent>,
    ) -> Result<HttpResponse, Error> {
        let res = match self {
            HttpSender::Http1(sender) => sender.send_request(req).await,
            HttpSender::Http2(sender) => sender.send_request(req).await,
        }
        .map_err(|e| {
            metrics.transport_request_failed.increment();

            Error::new("failed to send HTTP request", e)
        })?;

        metrics.transport_request_sent.increment();

        Ok(HttpResponse { res })
    }
}

/**
An absolute `http` or `https` URI with a host.
*/
pub(crate) struct HttpUri {
    uri: Uri,
    https: bool,
    host: String,
    port: u16,
    authority: String,
}

impl fmt::Display for HttpUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.uri, f)
    }
}

impl HttpUri {
    fn parse(url: &str) -> Result<Self, Error> {
        let uri: Uri = url
            .parse()
            .map_err(|e| Error::new(format_args!("failed to parse {url}"), e))?;

        let https = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            _ => return Err(Error::msg(format_args!("{url} is not an http or https URL"))),
        };

        let (Some(host), Some(authority)) = (uri.host(), uri.authority()) else {
            return Err(Error::msg(format_args!("{url} is missing a host")));
        };

        // IPv6 hosts are bracketed in URLs but not when connecting
        let host = host.trim_start_matches('[').trim_end_matches(']').to_owned();
        let authority = authority.as_str().to_owned();
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });

        Ok(HttpUri {
            uri,
            https,
            host,
            port,
            authority,
        })
    }

    pub fn is_https(&self) -> bool {
        self.https
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

pub(crate) struct HttpContent {
    custom_headers: &'static [(&'static str, &'static str)],
    content_frame: Option<HttpContentHeader>,
    content_payload: Option<HttpContentPayload>,
    content_type_header: &'static str,
    content_encoding_header: Option<&'static str>,
}

fn content_type_of(payload: &EncodedPayload) -> &'static str {
    match Encoding::of(payload) {
        Encoding::Proto => "application/x-protobuf",
        Encoding::Json => "application/json",
    }
}

impl HttpContent {
    pub fn raw(payload: EncodedPayload) -> Self {
        HttpContent {
            content_frame: None,
            content_type_header: content_type_of(&payload),
            content_encoding_header: None,
            custom_headers: &[],
            content_payload: Some(HttpContentPayload::PreEncoded(payload)),
        }
    }

    /**
    Frame a payload as a single uncompressed gRPC message.
    */
    pub fn grpc(payload: EncodedPayload) -> Self {
        let compressed = 0u8;
        let len = (payload.len() as u32).to_be_bytes();

        HttpContent {
            content_frame: Some(HttpContentHeader::SmallBytes([
                compressed, len[0], len[1], len[2], len[3],
            ])),
            content_type_header: match Encoding::of(&payload) {
                Encoding::Proto => "application/grpc+proto",
                Encoding::Json => "application/grpc+json",
            },
            content_encoding_header: None,
            custom_headers: &[("te", "trailers")],
            content_payload: Some(HttpContentPayload::PreEncoded(payload)),
        }
    }

    #[cfg(feature = "gzip")]
    fn gzip(mut self) -> Result<Self, Error> {
        use std::io::Write as _;

        let Some(payload) = self.content_payload.take() else {
            return Ok(self);
        };

        let mut enc = flate2::write::GzEncoder::new(
            Vec::with_capacity(payload.len()),
            flate2::Compression::fast(),
        );

        let mut payload = payload.into_cursor();
        loop {
            let chunk = payload.chunk();
            if chunk.is_empty() {
                break;
            }

            enc.write_all(chunk)
                .map_err(|e| Error::new("failed to compress a chunk of bytes", e))?;

            let read = chunk.len();
            payload.advance(read);
        }

        let buf = enc
            .finish()
            .map_err(|e| Error::new("failed to finalize compression", e))?;

        Ok(HttpContent {
            content_encoding_header: Some("gzip"),
            content_payload: Some(HttpContentPayload::Bytes(buf.into_boxed_slice())),
            ..self
        })
    }

    pub fn content_len(&self) -> usize {
        self.content_frame_len() + self.content_payload_len()
    }

    fn content_frame_len(&self) -> usize {
        self.content_frame
            .as_ref()
            .map(|header| header.len())
            .unwrap_or(0)
    }

    fn content_payload_len(&self) -> usize {
        self.content_payload
            .as_ref()
            .map(|payload| payload.len())
            .unwrap_or(0)
    }
}

impl Body for HttpContent {
    type Data = HttpContentCursor;

    type Error = std::convert::Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        _: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let unpinned = self.get_mut();

        if let Some(header) = unpinned.content_frame.take() {
            return Poll::Ready(Some(Ok(Frame::data(header.into_cursor()))));
        }

        let Some(payload) = unpinned.content_payload.take() else {
            return Poll::Ready(None);
        };

        Poll::Ready(Some(Ok(Frame::data(payload.into_cursor()))))
    }

    fn is_end_stream(&self) -> bool {
        self.content_frame.is_none() && self.content_payload.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.content_len() as u64)
    }
}

enum HttpContentHeader {
    SmallBytes([u8; 5]),
}

enum HttpContentPayload {
    PreEncoded(EncodedPayload),
    #[cfg_attr(not(feature = "gzip"), allow(dead_code))]
    Bytes(Box<[u8]>),
}

impl HttpContentHeader {
    fn len(&self) -> usize {
        match self {
            HttpContentHeader::SmallBytes(header) => header.len(),
        }
    }

    fn into_cursor(self) -> HttpContentCursor {
        match self {
            HttpContentHeader::SmallBytes(header) => {
                HttpContentCursor::SmallBytes(Cursor::new(header))
            }
        }
    }
}

impl HttpContentPayload {
    fn len(&self) -> usize {
        match self {
            HttpContentPayload::PreEncoded(payload) => payload.len(),
            HttpContentPayload::Bytes(payload) => payload.len(),
        }
    }

    fn into_cursor(self) -> HttpContentCursor {
        match self {
            HttpContentPayload::PreEncoded(payload) => {
                HttpContentCursor::PreEncoded(payload.into_cursor())
            }
            HttpContentPayload::Bytes(payload) => HttpContentCursor::Bytes(Cursor::new(payload)),
        }
    }
}

pub(crate) enum HttpContentCursor {
    PreEncoded(PreEncodedCursor),
    Bytes(Cursor<Box<[u8]>>),
    SmallBytes(Cursor<[u8; 5]>),
}

impl Buf for HttpContentCursor {
    fn remaining(&self) -> usize {
        match self {
            HttpContentCursor::PreEncoded(buf) => buf.remaining(),
            HttpContentCursor::Bytes(buf) => buf.remaining(),
            HttpContentCursor::SmallBytes(buf) => buf.remaining(),
        }
    }

    fn chunk(&self) -> &[u8] {
        match self {
            HttpContentCursor::PreEncoded(buf) => buf.chunk(),
            HttpContentCursor::Bytes(buf) => buf.chunk(),
            HttpContentCursor::SmallBytes(buf) => buf.chunk(),
        }
    }

    fn advance(&mut self, cnt: usize) {
        match self {
            HttpContentCursor::PreEncoded(buf) => buf.advance(cnt),
            HttpContentCursor::Bytes(buf) => buf.advance(cnt),
            HttpContentCursor::SmallBytes(buf) => buf.advance(cnt),
        }
    }
}

pub(crate) struct HttpResponse {
    res: hyper::Response<body::Incoming>,
}

impl HttpResponse {
    pub fn http_status(&self) -> u16 {
        self.res.status().as_u16()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.res.headers()
    }

    /**
    Read the body to the end, passing each chunk and trailer to the given functions.
    */
    pub async fn stream_payload(
        mut self,
        mut body: impl FnMut(&[u8]),
        mut trailer: impl FnMut(&str, &str),
    ) -> Result<(), Error> {
        struct BufNext<'a, B, T>(&'a mut body::Incoming, &'a mut B, &'a mut T);

        impl<'a, B: FnMut(&[u8]), T: FnMut(&str, &str)> Future for BufNext<'a, B, T> {
            type Output = Result<bool, Error>;

            fn poll(self: Pin<&mut Self>, ctx: &mut task::Context<'_>) -> task::Poll<Self::Output> {
                // SAFETY: `self` does not use interior pinning
                let BufNext(incoming, body, trailer) = unsafe { Pin::get_unchecked_mut(self) };

                match Pin::new(incoming).poll_frame(ctx) {
                    Poll::Ready(Some(Ok(frame))) => {
                        if let Some(frame) = frame.data_ref() {
                            (body)(frame);
                        }

                        if let Some(trailers) = frame.trailers_ref() {
                            for (k, v) in trailers {
                                let k = k.as_str();

                                if let Ok(v) = v.to_str() {
                                    (trailer)(k, v)
                                }
                            }
                        }

                        Poll::Ready(Ok(true))
                    }
                    Poll::Ready(None) => Poll::Ready(Ok(false)),
                    Poll::Ready(Some(Err(e))) => {
                        Poll::Ready(Err(Error::new("failed to read HTTP response body", e)))
                    }
                    Poll::Pending => Poll::Pending,
                }
            }
        }

        let frame = self.res.body_mut();

        while BufNext(frame, &mut body, &mut trailer).await? {}

        Ok(())
    }
}

struct HttpIo<T>(T);

impl<T: tokio::io::AsyncRead> hyper::rt::Read for HttpIo<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        mut buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        // SAFETY: `io` inherits the pinning requirements of `self`
        let io = unsafe { self.map_unchecked_mut(|io| &mut io.0) };

        // SAFETY: `io` does not uninitialize any bytes
        let mut read_buf = tokio::io::ReadBuf::uninit(unsafe { buf.as_mut() });

        match tokio::io::AsyncRead::poll_read(io, cx, &mut read_buf) {
            Poll::Ready(Ok(())) => {
                let read = read_buf.filled().len();

                // SAFETY: The bytes being advanced have been initialized by `read_buf`
                unsafe { buf.advance(read) };

                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T: tokio::io::AsyncWrite> hyper::rt::Write for HttpIo<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        // SAFETY: `io` inherits the pinning requirements of `self`
        let io = unsafe { self.map_unchecked_mut(|io| &mut io.0) };

        tokio::io::AsyncWrite::poll_write(io, cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        // SAFETY: `io` inherits the pinning requirements of `self`
        let io = unsafe { self.map_unchecked_mut(|io| &mut io.0) };

        tokio::io::AsyncWrite::poll_flush(io, cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        // SAFETY: `io` inherits the pinning requirements of `self`
        let io = unsafe { self.map_unchecked_mut(|io| &mut io.0) };

        tokio::io::AsyncWrite::poll_shutdown(io, cx)
    }
}

#[derive(Clone, Copy)]
struct TokioAmbientExecutor;

impl<F: Future + Send + 'static> hyper::rt::Executor<F> for TokioAmbientExecutor
where
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        tokio::spawn(fut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_uri() {
        let uri = HttpUri::parse("http://localhost:4318/v1/metrics").unwrap();

        assert!(!uri.is_https());
        assert_eq!("localhost", uri.host());
        assert_eq!(4318, uri.port());
        assert_eq!("localhost:4318", uri.authority());

        let uri = HttpUri::parse("https://[::1]/v1/metrics").unwrap();

        assert!(uri.is_https());
        assert_eq!("::1", uri.host());
        assert_eq!(443, uri.port());
    }

    #[test]
    fn parse_uri_invalid() {
        assert!(HttpUri::parse("localhost:4318").is_err());
        assert!(HttpUri::parse("ftp://localhost/v1/metrics").is_err());
        assert!(HttpUri::parse("/v1/metrics").is_err());
    }

    #[test]
    fn grpc_frame_prefixes_the_payload_length() {
        let payload = crate::data::Encoding::Proto
            .encode(crate::data::InstrumentationScope {
                name: "myapp.metrics",
                version: "1.0.0",
            })
            .unwrap();

        let len = payload.len();
        let content = HttpContent::grpc(payload);

        assert_eq!(len + 5, content.content_len());

        let Some(HttpContentHeader::SmallBytes(header)) = &content.content_frame else {
            panic!("missing gRPC frame");
        };

        assert_eq!(0, header[0]);
        assert_eq!(
            len as u32,
            u32::from_be_bytes([header[1], header[2], header[3], header[4]])
        );
    }
}
