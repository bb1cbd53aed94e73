//! The HTTP seam between the client and the network.
//!
//! A [`CallDescriptor`] records one outgoing call, including whether it has
//! already been replayed after a refresh.  A [`Transport`] executes a
//! descriptor and hands back a [`TransportResponse`] whose body is a byte
//! stream, so the same seam serves JSON endpoints and the streaming chat
//! endpoint.  [`ReqwestTransport`] is the production implementation.

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use futures::stream::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::error::{Error, Result};

/// A boxed stream of body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// One attempted HTTP call.
///
/// The `retried` flag starts false and flips to true at most once, when the
/// call is replayed after a credential refresh.  A descriptor whose flag is
/// already set is never refreshed again.
#[derive(Debug, Clone)]
pub struct CallDescriptor {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    streaming: bool,
    authorization: Option<String>,
    retried: bool,
}

impl CallDescriptor {
    /// Creates a call with the given method and API-relative path.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            streaming: false,
            authorization: None,
            retried: false,
        }
    }

    /// Creates a GET call.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Creates a POST call.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Creates a DELETE call.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attaches a JSON body.
    pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Appends a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Marks the call as expecting a long-lived streamed body.
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// Sets (or removes) the bearer credential attached to this call.
    pub fn authorize(&mut self, access: Option<&str>) {
        self.authorization = access.map(str::to_string);
    }

    /// Flags the call as replayed.  Returns false if it was already replayed.
    pub fn mark_retried(&mut self) -> bool {
        if self.retried {
            return false;
        }
        self.retried = true;
        true
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// API-relative path, e.g. `/chat/send`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query parameters.
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// JSON body, if any.
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Whether the body is expected as a stream.
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// The access credential attached to this call, if any.
    pub fn access_token(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    /// Whether this call has already been replayed.
    pub fn is_retried(&self) -> bool {
        self.retried
    }
}

/// A response whose body has not been read yet.
pub struct TransportResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: ByteStream,
}

impl TransportResponse {
    /// Creates a response from its parts.
    pub fn new(status: StatusCode, headers: HeaderMap, body: ByteStream) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Creates a response with an in-memory body delivered as the given chunks.
    pub fn from_chunks(status: StatusCode, chunks: Vec<Bytes>) -> Self {
        let body = futures::stream::iter(chunks.into_iter().map(Ok::<Bytes, Error>));
        Self::new(status, HeaderMap::new(), Box::pin(body))
    }

    /// The HTTP status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Takes the body as a stream of chunks.
    pub fn into_byte_stream(self) -> ByteStream {
        self.body
    }

    /// Reads the entire body.
    pub async fn bytes(self) -> Result<Vec<u8>> {
        let mut body = self.body;
        let mut buf = Vec::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf)
    }

    /// Reads the entire body as text, replacing invalid UTF-8.
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Reads the entire body as JSON.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            Error::serialization(
                format!("Failed to parse response: {e}"),
                Some(Box::new(e)),
            )
        })
    }

    /// Converts a non-success response into an error, reading the body for detail.
    pub async fn into_error(self) -> Error {
        let status_code = self.status.as_u16();

        let retry_after = self
            .headers
            .get(header::RETRY_AFTER)
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.trim().parse::<u64>().ok());

        let error_body = match self.text().await {
            Ok(body) => body,
            Err(e) => return e,
        };
        let message = error_detail(&error_body).unwrap_or(error_body);

        match status_code {
            400 => Error::bad_request(message),
            401 => Error::authentication(message),
            403 => Error::permission(message),
            404 => Error::not_found(message, None, None),
            408 => Error::timeout(message, None),
            422 => Error::validation(message, None),
            429 => Error::rate_limit(message, retry_after),
            500 => Error::internal_server(message),
            502..=504 => Error::service_unavailable(message, retry_after),
            _ => Error::api(status_code, message),
        }
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Extracts the `detail` of an error body.  Structured detail (e.g. a list of
/// validation failures) is returned as compact JSON.
fn error_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::String(detail) => Some(detail.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Executes call descriptors.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Sends `call` and returns the response head with an unread body.
    ///
    /// Non-success statuses are returned as responses, not errors; only
    /// failures to obtain a response at all are errors.
    async fn execute(&self, call: &CallDescriptor) -> Result<TransportResponse>;
}

/// The production transport, backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: ReqwestClient,
    base_url: Url,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Creates a transport for the API rooted at `base_url`.
    ///
    /// `timeout` bounds connection setup for every call and the whole exchange
    /// for non-streaming calls.  Streaming calls have no total deadline.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{base_url}/"))?
        };
        let client = ReqwestClient::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// The API root all call paths are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn url_for(&self, call: &CallDescriptor) -> Result<Url> {
        let mut url = self.base_url.join(call.path().trim_start_matches('/'))?;
        if !call.query().is_empty() {
            url.query_pairs_mut().extend_pairs(call.query().iter());
        }
        Ok(url)
    }

    fn headers_for(call: &CallDescriptor) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let accept = if call.is_streaming() {
            "text/event-stream"
        } else {
            "application/json"
        };
        headers.insert(header::ACCEPT, HeaderValue::from_static(accept));
        if call.body().is_some() {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }
        if let Some(access) = call.access_token() {
            let value = HeaderValue::from_str(&format!("Bearer {access}")).map_err(|_| {
                Error::validation(
                    "access credential is not a valid header value",
                    Some("authorization".to_string()),
                )
            })?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, call: &CallDescriptor) -> Result<TransportResponse> {
        let url = self.url_for(call)?;
        let mut request = self
            .client
            .request(call.method().clone(), url)
            .headers(Self::headers_for(call)?);
        if let Some(body) = call.body() {
            request = request.json(body);
        }
        if !call.is_streaming() {
            request = request.timeout(self.timeout);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(
                    format!("Request timed out: {e}"),
                    Some(self.timeout.as_secs_f64()),
                )
            } else if e.is_connect() {
                Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
            } else {
                Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes_stream().map(|result| {
            result
                .map_err(|e| Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e))))
        });
        Ok(TransportResponse::new(status, headers, Box::pin(body)))
    }
}
