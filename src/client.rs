use std::env;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use futures::stream::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response, header};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::observability::{CLIENT_REQUEST_ERRORS, CLIENT_REQUEST_REJECTED, CLIENT_REQUESTS};
use crate::types::ChatRequest;

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000/api/chat";

/// Environment variable consulted for the endpoint when none is given.
pub const ENDPOINT_ENV_VAR: &str = "CHATSTREAM_URL";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The body of a streamed response, as raw byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Something that can carry a chat request to an inference endpoint.
///
/// Implementations return the response body as a byte stream once the
/// endpoint has accepted the request, or [`Error::RequestRejected`] when the
/// endpoint answered with a failure status.  Dropping the returned stream must
/// abort the underlying request.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the streamed response body.
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream>;
}

/// HTTP client for a streaming chat endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: ReqwestClient,
    endpoint: Url,
    timeout: Option<Duration>,
}

impl ChatClient {
    /// Create a new chat client.
    ///
    /// The endpoint can be provided directly or read from the `CHATSTREAM_URL`
    /// environment variable, falling back to [`DEFAULT_ENDPOINT`].
    pub fn new(endpoint: Option<String>) -> Result<Self> {
        Self::with_options(endpoint, None)
    }

    /// Create a new client with custom settings.
    ///
    /// `timeout` bounds the whole request including the streamed body; by
    /// default only connecting is bounded, since replies can stream for a long time.
    pub fn with_options(endpoint: Option<String>, timeout: Option<Duration>) -> Result<Self> {
        let endpoint = match endpoint {
            Some(endpoint) => endpoint,
            None => env::var(ENDPOINT_ENV_VAR).unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
        };
        let endpoint = Url::parse(&endpoint)?;

        let mut builder = ReqwestClient::builder().connect_timeout(DEFAULT_CONNECT_TIMEOUT);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            Error::http_client(
                format!("Failed to build HTTP client: {e}"),
                Some(Box::new(e)),
            )
        })?;

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    /// The endpoint requests are posted to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Create and return default headers for chat requests.
    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );
        headers
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(
                format!("Request timed out: {e}"),
                self.timeout.map(|t| t.as_secs_f64()),
            )
        } else if e.is_connect() {
            Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
        } else {
            Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
        }
    }

    /// Turn a non-2xx response into the error surfaced to the user.
    ///
    /// The body is read once and parsed for a `detail` field; when that is
    /// absent or unparseable the generic status message is used.
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => Some(body),
            Err(e) => {
                debug!(error = %e, "failed to read error response body");
                None
            }
        };
        rejection(status_code, body.as_deref())
    }
}

/// Builds the rejection for a non-success status, preferring the body's `detail`.
fn rejection(status_code: u16, body: Option<&str>) -> Error {
    let message = body
        .and_then(error_detail)
        .unwrap_or_else(|| format!("HTTP error! status: {status_code}"));
    Error::request_rejected(status_code, message)
}

#[async_trait::async_trait]
impl Transport for ChatClient {
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream> {
        CLIENT_REQUESTS.click();
        debug!(endpoint = %self.endpoint, model = %request.model, "sending chat request");

        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(Self::default_headers())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                CLIENT_REQUEST_ERRORS.click();
                self.transport_error(e)
            })?;

        if !response.status().is_success() {
            CLIENT_REQUEST_REJECTED.click();
            return Err(Self::process_error_response(response).await);
        }

        let this = self.clone();
        let stream = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| this.transport_error(e)));
        Ok(Box::pin(stream))
    }
}

/// Extract the `detail` of a structured error body.
fn error_detail(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        detail: Option<serde_json::Value>,
    }

    let parsed = serde_json::from_str::<ErrorBody>(body).ok()?;
    match parsed.detail? {
        serde_json::Value::String(detail) if detail.is_empty() => None,
        serde_json::Value::String(detail) => Some(detail),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}
