//! Response produced by the engine (or built directly).

use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use super::body::BodyLimits;
use super::{Blob, Body, BodyInit, ByteStream, FetchError, HeaderMap, HeadersInit};

/// Options for [`Response::new`].
#[derive(Debug)]
pub struct ResponseInit {
    /// Status code, default 200.
    pub status: u16,
    /// Reason phrase; the canonical phrase for `status` when empty.
    pub status_text: String,
    /// Headers.
    pub headers: Option<HeadersInit>,
    /// URL the response is attributed to.
    pub url: String,
}

impl Default for ResponseInit {
    fn default() -> Self {
        Self {
            status: 200,
            status_text: String::new(),
            headers: None,
            url: String::new(),
        }
    }
}

/// Final response of an exchange.
#[derive(Debug)]
pub struct Response {
    url: String,
    status: u16,
    status_text: String,
    headers: HeaderMap,
    body: Body,
    counter: u32,
}

/// Parts the engine assembles a response from.
pub(crate) struct ResponseParts {
    pub url: String,
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: ByteStream,
    pub counter: u32,
    pub size: u64,
    pub timeout: Option<Duration>,
}

fn canonical_reason(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or_default()
        .to_string()
}

impl Response {
    /// Builds a response around an optional body.
    ///
    /// # Errors
    ///
    /// Returns a type error when the header initializer is invalid.
    pub fn new(body: Option<BodyInit>, init: ResponseInit) -> Result<Self, FetchError> {
        let body = body.map_or_else(Body::empty, Body::new);
        let mut headers = init
            .headers
            .map(HeaderMap::from_init)
            .transpose()?
            .unwrap_or_default();
        if !headers.has("content-type")
            && let Some(content_type) = body.default_content_type()
        {
            headers.set("Content-Type", &content_type)?;
        }
        let status_text = if init.status_text.is_empty() {
            canonical_reason(init.status)
        } else {
            init.status_text
        };
        let body = body
            .with_limits(BodyLimits {
                url: init.url.clone(),
                ..BodyLimits::default()
            })
            .with_content_type(headers.get("content-type"));
        Ok(Self {
            url: init.url,
            status: init.status,
            status_text,
            headers,
            body,
            counter: 0,
        })
    }

    pub(crate) fn from_parts(parts: ResponseParts) -> Self {
        let body = Body::new(BodyInit::Stream(parts.body))
            .with_limits(BodyLimits {
                url: parts.url.clone(),
                size: parts.size,
                timeout: parts.timeout,
            })
            .with_content_type(parts.headers.get("content-type"));
        Self {
            url: parts.url,
            status: parts.status,
            status_text: parts.status_text,
            headers: parts.headers,
            body,
            counter: parts.counter,
        }
    }

    /// URL of the hop that produced this response.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Reason phrase.
    #[must_use]
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// True for 2xx statuses.
    #[must_use]
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True when at least one redirect was followed.
    #[must_use]
    pub fn redirected(&self) -> bool {
        self.counter > 0
    }

    /// Number of redirects followed.
    #[must_use]
    pub fn redirect_count(&self) -> u32 {
        self.counter
    }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Response body.
    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Returns true once the body was consumed.
    #[must_use]
    pub fn body_used(&self) -> bool {
        self.body.is_used()
    }

    /// Drains the body as text.
    ///
    /// # Errors
    ///
    /// See [`Body::text`].
    pub async fn text(&self) -> Result<String, FetchError> {
        self.body.text().await
    }

    /// Drains the body and parses it as JSON.
    ///
    /// # Errors
    ///
    /// See [`Body::json`].
    pub async fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        self.body.json().await
    }

    /// Drains the body into one buffer.
    ///
    /// # Errors
    ///
    /// See [`Body::bytes`].
    pub async fn bytes(&self) -> Result<Bytes, FetchError> {
        self.body.bytes().await
    }

    /// Drains the body into a byte vector.
    ///
    /// # Errors
    ///
    /// See [`Body::bytes`].
    pub async fn array_buffer(&self) -> Result<Vec<u8>, FetchError> {
        self.body.array_buffer().await
    }

    /// Drains the body into a blob typed by `Content-Type`.
    ///
    /// # Errors
    ///
    /// See [`Body::bytes`].
    pub async fn blob(&self) -> Result<Blob, FetchError> {
        self.body.blob().await
    }

    /// Hands out the raw (decoded) body stream.
    ///
    /// # Errors
    ///
    /// Returns a type error when the body was already used.
    pub fn stream(&self) -> Result<ByteStream, FetchError> {
        self.body.stream()
    }

    /// Copies the response; headers by value, body through a tee.
    ///
    /// # Errors
    ///
    /// Returns a type error when the body was already used.
    pub fn try_clone(&self) -> Result<Self, FetchError> {
        Ok(Self {
            url: self.url.clone(),
            status: self.status,
            status_text: self.status_text.clone(),
            headers: self.headers.clone(),
            body: self.body.try_clone()?,
            counter: self.counter,
        })
    }
}
