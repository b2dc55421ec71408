//! The HTTP layer every other component calls through.
//!
//! A [`Transport`] takes one [`Outgoing`] request (the request itself, the credential
//! the session manager wants attached, and which [`Attempt`] this is) and resolves it
//! to an [`ApiResponse`] or a [`TransportError`]. It never retries and never looks at
//! the session; that is the session manager's job.

use crate::config::ClientConfig;
use crate::error::{ApiError, ErrorBody, TransportError};
use crate::session::AccessToken;
use bytes::Bytes;
use eyre::Context;
use http::Method;
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;
use tracing::instrument;

pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ApiResponse, TransportError>> + Send + 'a>>;

/// Sends requests to the remote API.
pub trait Transport: Send + Sync + fmt::Debug {
    fn send(&self, outgoing: Outgoing) -> TransportFuture<'_>;
}

/// Whether a request is being sent for the first time or replayed after credential renewal.
///
/// The marker travels next to the request instead of being stored on it, so that a
/// replay can never be confused with the original when several callers share one renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    First,
    Retried,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestTimeout {
    /// The transport's configured timeout (15 seconds unless configured otherwise).
    #[default]
    Default,
    /// No timeout. Used for binary uploads whose size is not known up front.
    Unbounded,
}

/// A file handed to a multipart upload.
#[derive(Clone, PartialEq)]
pub struct FileUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl fmt::Debug for FileUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileUpload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl FileUpload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Reads a file from disk into memory.
    pub async fn read(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("read upload file {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::new(file_name, bytes))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    File(FileUpload),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultipartForm {
    pub parts: Vec<(String, FormValue)>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push((name.into(), FormValue::Text(value.into())));
        self
    }

    pub fn file(mut self, name: impl Into<String>, file: FileUpload) -> Self {
        self.parts.push((name.into(), FormValue::File(file)));
        self
    }

    pub fn text_value(&self, name: &str) -> Option<&str> {
        self.parts.iter().find_map(|(n, v)| match v {
            FormValue::Text(t) if n == name => Some(t.as_str()),
            _ => None,
        })
    }

    fn into_reqwest(self) -> Result<reqwest::multipart::Form, TransportError> {
        let mut form = reqwest::multipart::Form::new();
        for (name, value) in self.parts {
            form = match value {
                FormValue::Text(text) => form.text(name, text),
                FormValue::File(file) => {
                    let mut part =
                        reqwest::multipart::Part::bytes(file.bytes.to_vec()).file_name(file.file_name);
                    if let Some(content_type) = file.content_type {
                        part = part.mime_str(&content_type).map_err(|e| {
                            TransportError::invalid_request(format!(
                                "content type {content_type:?} for part {name}: {e}"
                            ))
                        })?;
                    }
                    form.part(name, part)
                }
            };
        }
        Ok(form)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Multipart(MultipartForm),
}

/// One call against the remote API, independent of credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path below the configured base URL, starting with `/`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    pub timeout: RequestTimeout,
    /// Whether an unauthorized response should trigger credential renewal and a replay.
    ///
    /// Disabled for the authentication endpoints themselves.
    pub renew_on_unauthorized: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            timeout: RequestTimeout::Default,
            renew_on_unauthorized: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn multipart(mut self, form: MultipartForm) -> Self {
        self.body = RequestBody::Multipart(form);
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.timeout = RequestTimeout::Unbounded;
        self
    }

    pub fn without_renewal(mut self) -> Self {
        self.renew_on_unauthorized = false;
        self
    }
}

/// A request as handed to the transport.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub request: ApiRequest,
    pub credential: Option<AccessToken>,
    pub attempt: Attempt,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseMeta {
    pub status: u16,
    pub message: Option<String>,
}

/// A successful API response, unwrapped from the `{ statusCode, data, message, success }` envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub data: serde_json::Value,
    pub meta: ResponseMeta,
}

impl ApiResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            data,
            meta: ResponseMeta {
                status: 200,
                message: None,
            },
        }
    }

    /// Parses a raw response body, unwrapping the envelope if there is one.
    pub fn from_body(status: u16, text: &str) -> Self {
        if text.trim().is_empty() {
            return Self {
                data: serde_json::Value::Null,
                meta: ResponseMeta {
                    status,
                    message: None,
                },
            };
        }
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(serde_json::Value::Object(mut envelope))
                if envelope.contains_key("data") || envelope.contains_key("statusCode") =>
            {
                let message = envelope
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string);
                Self {
                    data: envelope.remove("data").unwrap_or(serde_json::Value::Null),
                    meta: ResponseMeta { status, message },
                }
            }
            Ok(data) => Self {
                data,
                meta: ResponseMeta {
                    status,
                    message: None,
                },
            },
            Err(_) => Self {
                data: serde_json::Value::String(text.to_string()),
                meta: ResponseMeta {
                    status,
                    message: None,
                },
            },
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, what: &str) -> Result<T, ApiError> {
        serde_json::from_value(self.data.clone()).map_err(|e| ApiError::decode(what, e))
    }
}

/// [`Transport`] over a shared `reqwest` client with a cookie jar.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> eyre::Result<Self> {
        let client = reqwest::ClientBuilder::new()
            // The server keeps its refresh credential in an http-only cookie.
            .cookie_store(true)
            // SSRF no thank you.
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(config.user_agent.clone())
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    #[instrument(
        skip(self, outgoing),
        fields(method = %outgoing.request.method, path = %outgoing.request.path, attempt = ?outgoing.attempt),
        level = tracing::Level::TRACE
    )]
    async fn execute(&self, outgoing: Outgoing) -> Result<ApiResponse, TransportError> {
        let Outgoing {
            request,
            credential,
            ..
        } = outgoing;

        let mut builder = self.client.request(request.method.clone(), self.url(&request.path));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &credential {
            builder = builder.bearer_auth(token.secret());
        }
        if request.timeout == RequestTimeout::Default {
            builder = builder.timeout(self.timeout);
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(&body),
            RequestBody::Multipart(form) => builder.multipart(form.into_reqwest()?),
        };

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        let text = response.text().await.map_err(classify)?;
        tracing::trace!(status = status.as_u16(), len = text.len(), "received response");

        if !status.is_success() {
            return Err(TransportError {
                kind: crate::error::TransportErrorKind::Status(status.as_u16()),
                body: ErrorBody::from_text(&text),
            });
        }
        Ok(ApiResponse::from_body(status.as_u16(), &text))
    }
}

impl Transport for HttpTransport {
    fn send(&self, outgoing: Outgoing) -> TransportFuture<'_> {
        Box::pin(self.execute(outgoing))
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::timeout()
    } else if error.is_builder() {
        TransportError::invalid_request(error.to_string())
    } else {
        TransportError::network(error.to_string())
    }
}
