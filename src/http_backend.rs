//! HTTP Backend Module
//!
//! [`RemoteBackend`] over plain HTTP with path-style addressing:
//! `HEAD`/`GET {endpoint}/{bucket}/{object}`. Response headers map to object
//! attributes (`Content-Length` → size, `ETag` → MD5 checksum for single-part
//! objects, `x-amz-version-id` → version). GET bodies are streamed, not buffered.

use crate::backend::{Backends, RemoteBackend, RemoteObject};
use crate::bucket::{Bucket, Provider};
use crate::config::BackendsConfig;
use crate::error::BackendError;
use crate::object_attrs::{Checksum, ChecksumType, ObjectAttrs};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::{Body, Incoming};
use hyper::header::{HeaderMap, CONTENT_LENGTH, ETAG};
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, info};

const VERSION_HEADER: &str = "x-amz-version-id";

/// Characters escaped within one path segment of an object name
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'\\')
    .add(b'^')
    .add(b'|');

pub struct HttpBackend {
    provider: Provider,
    endpoint: String,
    client: Client<HttpConnector, Full<Bytes>>,
    request_timeout: Duration,
}

impl HttpBackend {
    pub fn new(provider: Provider, endpoint: &str, request_timeout: Duration) -> Self {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        info!(
            "Creating HTTP backend: provider={}, endpoint={}, request_timeout={}s",
            provider,
            endpoint,
            request_timeout.as_secs_f64()
        );
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            provider,
            endpoint,
            client,
            request_timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Path-style URI of an object
    pub fn object_uri(&self, bck: &Bucket, name: &str) -> Result<Uri, BackendError> {
        let encoded = name
            .split('/')
            .map(|seg| utf8_percent_encode(seg, SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        let uri = format!(
            "{}/{}/{}",
            self.endpoint,
            utf8_percent_encode(&bck.name, SEGMENT),
            encoded
        );
        uri.parse()
            .map_err(|e| BackendError::transport(format!("invalid object uri {}: {}", uri, e)))
    }

    async fn send(&self, method: Method, bck: &Bucket, name: &str) -> Result<Response<Incoming>, BackendError> {
        let uri = self.object_uri(bck, name)?;
        debug!("Sending {} request to {}", method, uri);

        let request = Request::builder()
            .method(method)
            .uri(uri.clone())
            .body(Full::new(Bytes::new()))
            .map_err(|e| BackendError::transport(format!("failed to build request: {}", e)))?;

        let response = tokio::time::timeout(self.request_timeout, self.client.request(request))
            .await
            .map_err(|_| BackendError::transport(format!("request to {} timed out", uri)))?
            .map_err(|e| BackendError::transport(format!("request to {} failed: {}", uri, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::not_found(format!("{}/{} not found", bck, name)));
        }
        Err(BackendError::new(status, format!("{} {}/{}", status, bck, name)))
    }
}

/// One HTTP backend per remote provider with a configured endpoint
pub fn backends_from_config(config: &BackendsConfig) -> Backends {
    config
        .endpoints()
        .into_iter()
        .fold(Backends::new(), |backends, (provider, endpoint)| {
            backends.with(Arc::new(HttpBackend::new(
                provider,
                endpoint,
                config.request_timeout,
            )))
        })
}

/// Object attributes described by response headers
pub fn attrs_from_headers(headers: &HeaderMap) -> ObjectAttrs {
    let size = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    let mut attrs = ObjectAttrs::new(size).with_atime(SystemTime::now());
    if let Some(checksum) = checksum_from_etag(headers) {
        attrs = attrs.with_checksum(checksum);
    }
    if let Some(version) = headers.get(VERSION_HEADER).and_then(|v| v.to_str().ok()) {
        attrs = attrs.with_version(version);
    }
    attrs
}

/// MD5 from the ETag; multipart ETags (`<hash>-<parts>`) are not content hashes
fn checksum_from_etag(headers: &HeaderMap) -> Option<Checksum> {
    let etag = headers.get(ETAG)?.to_str().ok()?;
    let etag = etag.trim_start_matches("W/").trim_matches('"');
    if etag.is_empty() || etag.contains('-') {
        return None;
    }
    Some(Checksum::new(ChecksumType::Md5, etag))
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn head_object(&self, bck: &Bucket, name: &str) -> Result<ObjectAttrs, BackendError> {
        let response = self.send(Method::HEAD, bck, name).await?;
        let attrs = attrs_from_headers(response.headers());
        debug!(
            "HEAD {}/{}: size={}, version={:?}",
            bck, name, attrs.size, attrs.version
        );
        Ok(attrs)
    }

    async fn get_object_reader(&self, bck: &Bucket, name: &str) -> Result<RemoteObject, BackendError> {
        let response = self.send(Method::GET, bck, name).await?;
        let (parts, body) = response.into_parts();
        let attrs = attrs_from_headers(&parts.headers);
        debug!("GET {}/{}: streaming {} bytes", bck, name, attrs.size);
        Ok(RemoteObject {
            reader: Box::new(BodyReader::new(body)),
            expected_checksum: attrs.checksum,
            size: attrs.size,
        })
    }
}

/// [`AsyncRead`] over a streaming response body
pub struct BodyReader<B> {
    body: B,
    chunk: Bytes,
    done: bool,
}

impl<B> BodyReader<B> {
    pub fn new(body: B) -> Self {
        Self {
            body,
            chunk: Bytes::new(),
            done: false,
        }
    }
}

impl<B> AsyncRead for BodyReader<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.chunk.is_empty() {
                let n = this.chunk.len().min(buf.remaining());
                buf.put_slice(&this.chunk.split_to(n));
                return Poll::Ready(Ok(()));
            }
            if this.done {
                return Poll::Ready(Ok(()));
            }
            match ready!(Pin::new(&mut this.body).poll_frame(cx)) {
                Some(Ok(frame)) => {
                    // trailers carry no bytes
                    if let Ok(data) = frame.into_data() {
                        this.chunk = data;
                    }
                }
                Some(Err(e)) => return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e))),
                None => this.done = true,
            }
        }
    }
}
