//! Lazy, use-once body shared by requests and responses.
//!
//! The first consumption call takes ownership of the payload; every later
//! call (or a clone attempt after consumption) fails. Streams are drained
//! with the owner's size limit and body timeout applied.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt, stream};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::constants::{TEXT_CONTENT_TYPE, URL_ENCODED_CONTENT_TYPE};
use super::signal::AbortSignal;
use super::tee::tee;
use super::{Blob, ByteStream, FetchError, FormData};
use crate::transport::TransportBody;

/// Accepted body shapes.
pub enum BodyInit {
    /// UTF-8 text.
    Text(String),
    /// Already serialized `application/x-www-form-urlencoded` text.
    UrlEncoded(String),
    /// Raw bytes.
    Bytes(Bytes),
    /// Bytes with a declared type.
    Blob(Blob),
    /// One-shot byte stream of unknown length.
    Stream(ByteStream),
    /// Multipart form.
    Form(FormData),
}

impl BodyInit {
    /// Serializes name/value pairs as a URL-encoded form.
    pub fn url_encoded<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator,
        I::Item: std::borrow::Borrow<(K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::UrlEncoded(
            url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs)
                .finish(),
        )
    }

    /// Wraps any byte stream.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, FetchError>> + Send + 'static,
    {
        Self::Stream(stream.boxed())
    }
}

impl std::fmt::Debug for BodyInit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            Self::UrlEncoded(text) => f.debug_tuple("UrlEncoded").field(text).finish(),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Blob(blob) => f.debug_tuple("Blob").field(blob).finish(),
            Self::Stream(_) => f.write_str("Stream"),
            Self::Form(form) => f.debug_tuple("Form").field(form).finish(),
        }
    }
}

impl From<String> for BodyInit {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for BodyInit {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Bytes> for BodyInit {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for BodyInit {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for BodyInit {
    fn from(bytes: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(bytes))
    }
}

impl From<Blob> for BodyInit {
    fn from(blob: Blob) -> Self {
        Self::Blob(blob)
    }
}

impl From<FormData> for BodyInit {
    fn from(form: FormData) -> Self {
        Self::Form(form)
    }
}

impl From<ByteStream> for BodyInit {
    fn from(stream: ByteStream) -> Self {
        Self::Stream(stream)
    }
}

enum Payload {
    Text(String),
    UrlEncoded(String),
    Bytes(Bytes),
    Blob(Blob),
    Stream(ByteStream),
    Form(FormData),
}

impl Payload {
    fn is_replayable(&self) -> bool {
        match self {
            Self::Stream(_) => false,
            Self::Form(form) => !form.has_streams(),
            _ => true,
        }
    }

    fn into_stream(self) -> ByteStream {
        match self {
            Self::Stream(stream) => stream,
            Self::Form(form) => form.into_stream(),
            Self::Text(text) | Self::UrlEncoded(text) => once(Bytes::from(text)),
            Self::Bytes(bytes) => once(bytes),
            Self::Blob(blob) => once(blob.bytes()),
        }
    }
}

impl From<BodyInit> for Payload {
    fn from(init: BodyInit) -> Self {
        match init {
            BodyInit::Text(text) => Self::Text(text),
            BodyInit::UrlEncoded(text) => Self::UrlEncoded(text),
            BodyInit::Bytes(bytes) => Self::Bytes(bytes),
            BodyInit::Blob(blob) => Self::Blob(blob),
            BodyInit::Stream(stream) => Self::Stream(stream),
            BodyInit::Form(form) => Self::Form(form),
        }
    }
}

fn once(bytes: Bytes) -> ByteStream {
    stream::once(async move { Ok(bytes) }).boxed()
}

/// Limits applied while draining, inherited from the owning request.
#[derive(Debug, Clone, Default)]
pub(crate) struct BodyLimits {
    /// URL used in error messages.
    pub url: String,
    /// Maximum drained bytes, 0 = unlimited.
    pub size: u64,
    /// Maximum drain duration.
    pub timeout: Option<Duration>,
}

struct BodyState {
    payload: Option<Payload>,
    used: bool,
}

/// Use-once body.
pub struct Body {
    state: Mutex<BodyState>,
    limits: BodyLimits,
    content_type: Option<String>,
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Body")
            .field("null", &state.payload.is_none())
            .field("used", &state.used)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<BodyInit> for Body {
    fn from(init: BodyInit) -> Self {
        Self::new(init)
    }
}

impl Body {
    fn from_payload(payload: Option<Payload>) -> Self {
        Self {
            state: Mutex::new(BodyState {
                payload,
                used: false,
            }),
            limits: BodyLimits::default(),
            content_type: None,
        }
    }

    /// Creates a body from an initializer.
    #[must_use]
    pub fn new(init: BodyInit) -> Self {
        Self::from_payload(Some(init.into()))
    }

    /// Creates a null body.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_payload(None)
    }

    pub(crate) fn with_limits(mut self, limits: BodyLimits) -> Self {
        self.limits = limits;
        self
    }

    pub(crate) fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BodyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true once a consumption call has been made.
    #[must_use]
    pub fn is_used(&self) -> bool {
        self.lock().used
    }

    /// Returns true for a null body.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.lock().payload.is_none()
    }

    /// Byte length when statically known. A null body has length 0.
    #[must_use]
    pub fn known_length(&self) -> Option<u64> {
        match &self.lock().payload {
            None => Some(0),
            Some(Payload::Text(text) | Payload::UrlEncoded(text)) => Some(text.len() as u64),
            Some(Payload::Bytes(bytes)) => Some(bytes.len() as u64),
            Some(Payload::Blob(blob)) => Some(blob.size() as u64),
            Some(Payload::Form(form)) => form.known_length(),
            Some(Payload::Stream(_)) => None,
        }
    }

    /// `Content-Type` implied by the payload shape, if any.
    #[must_use]
    pub fn default_content_type(&self) -> Option<String> {
        match &self.lock().payload {
            Some(Payload::Text(_)) => Some(TEXT_CONTENT_TYPE.to_string()),
            Some(Payload::UrlEncoded(_)) => Some(URL_ENCODED_CONTENT_TYPE.to_string()),
            Some(Payload::Blob(blob)) if !blob.content_type().is_empty() => {
                Some(blob.content_type().to_string())
            }
            Some(Payload::Form(form)) => Some(form.content_type()),
            _ => None,
        }
    }

    fn take_payload(&self) -> Result<Option<Payload>, FetchError> {
        let mut state = self.lock();
        if state.used {
            return Err(FetchError::body_used(&self.limits.url));
        }
        state.used = true;
        Ok(state.payload.take())
    }

    /// Takes the payload for sending. Static payloads are copied and stay
    /// available for later hops; streams are handed over once.
    pub(crate) fn to_transport(&self) -> Result<TransportBody, FetchError> {
        let mut state = self.lock();
        if state.used {
            return Err(FetchError::body_used(&self.limits.url));
        }
        let replayable = state.payload.as_ref().is_none_or(Payload::is_replayable);
        if !replayable {
            state.used = true;
            return Ok(state
                .payload
                .take()
                .map_or(TransportBody::Empty, |payload| {
                    TransportBody::Stream(payload.into_stream())
                }));
        }
        Ok(match &state.payload {
            None => TransportBody::Empty,
            Some(Payload::Text(text) | Payload::UrlEncoded(text)) => {
                TransportBody::Full(Bytes::from(text.clone()))
            }
            Some(Payload::Bytes(bytes)) => TransportBody::Full(bytes.clone()),
            Some(Payload::Blob(blob)) => TransportBody::Full(blob.bytes()),
            Some(Payload::Form(form)) => form
                .to_bytes()
                .map_or(TransportBody::Empty, TransportBody::Full),
            Some(Payload::Stream(_)) => TransportBody::Empty,
        })
    }

    /// Hands out the raw byte stream. Counts as consumption; no size limit
    /// or body timeout is applied.
    ///
    /// # Errors
    ///
    /// Returns a type error when the body was already used.
    pub fn stream(&self) -> Result<ByteStream, FetchError> {
        Ok(self
            .take_payload()?
            .map_or_else(|| stream::empty().boxed(), Payload::into_stream))
    }

    /// Drains the body into one buffer.
    ///
    /// # Errors
    ///
    /// Fails when the body was already used, when the size limit or body
    /// timeout is exceeded, on abort, or when the stream breaks.
    pub async fn bytes(&self) -> Result<Bytes, FetchError> {
        let stream = match self.take_payload()? {
            None => return Ok(Bytes::new()),
            Some(Payload::Text(text) | Payload::UrlEncoded(text)) => return Ok(Bytes::from(text)),
            Some(Payload::Bytes(bytes)) => return Ok(bytes),
            Some(Payload::Blob(blob)) => return Ok(blob.bytes()),
            Some(payload) => payload.into_stream(),
        };
        match self.limits.timeout {
            Some(limit) if !limit.is_zero() => tokio::time::timeout(limit, self.drain(stream))
                .await
                .map_err(|_| FetchError::body_timeout(&self.limits.url, limit))?,
            _ => self.drain(stream).await,
        }
    }

    async fn drain(&self, mut stream: ByteStream) -> Result<Bytes, FetchError> {
        let limit = self.limits.size;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|error| error.into_body_error(&self.limits.url))?;
            if limit > 0 && (buffer.len() + chunk.len()) as u64 > limit {
                debug!(url = %self.limits.url, limit, "response body over size limit");
                return Err(FetchError::max_size(&self.limits.url, limit));
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }

    /// Drains the body into a byte vector.
    ///
    /// # Errors
    ///
    /// Same as [`Self::bytes`].
    pub async fn array_buffer(&self) -> Result<Vec<u8>, FetchError> {
        Ok(self.bytes().await?.to_vec())
    }

    /// Drains the body as UTF-8 text, replacing invalid sequences.
    ///
    /// # Errors
    ///
    /// Same as [`Self::bytes`].
    pub async fn text(&self) -> Result<String, FetchError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Drains the body and parses it as JSON.
    ///
    /// # Errors
    ///
    /// Same as [`Self::bytes`], plus `invalid-json` when parsing fails.
    pub async fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|error| FetchError::invalid_json(&self.limits.url, &error))
    }

    /// Drains the body into a blob typed by the owner's `Content-Type`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::bytes`].
    pub async fn blob(&self) -> Result<Blob, FetchError> {
        let content_type = self
            .content_type
            .clone()
            .or_else(|| self.default_content_type())
            .unwrap_or_default();
        let bytes = self.bytes().await?;
        Ok(Blob::new(bytes, &content_type))
    }

    /// Returns a second body observing the same bytes. Streams are split
    /// with a tee; this body keeps one branch.
    ///
    /// # Errors
    ///
    /// Returns a type error when the body was already used.
    pub fn try_clone(&self) -> Result<Self, FetchError> {
        let mut state = self.lock();
        if state.used {
            return Err(FetchError::invalid_input("cannot clone body after it is used"));
        }
        let cloned = match state.payload.take() {
            None => None,
            Some(Payload::Text(text)) => {
                state.payload = Some(Payload::Text(text.clone()));
                Some(Payload::Text(text))
            }
            Some(Payload::UrlEncoded(text)) => {
                state.payload = Some(Payload::UrlEncoded(text.clone()));
                Some(Payload::UrlEncoded(text))
            }
            Some(Payload::Bytes(bytes)) => {
                state.payload = Some(Payload::Bytes(bytes.clone()));
                Some(Payload::Bytes(bytes))
            }
            Some(Payload::Blob(blob)) => {
                state.payload = Some(Payload::Blob(blob.clone()));
                Some(Payload::Blob(blob))
            }
            Some(Payload::Form(form)) => match form.try_clone() {
                Some(copy) => {
                    state.payload = Some(Payload::Form(form));
                    Some(Payload::Form(copy))
                }
                None => {
                    let (kept, handed) = tee(form.into_stream());
                    state.payload = Some(Payload::Stream(kept));
                    Some(Payload::Stream(handed))
                }
            },
            Some(Payload::Stream(upstream)) => {
                let (kept, handed) = tee(upstream);
                state.payload = Some(Payload::Stream(kept));
                Some(Payload::Stream(handed))
            }
        };
        drop(state);
        Ok(Self::from_payload(cloned)
            .with_limits(self.limits.clone())
            .with_content_type(self.content_type.clone()))
    }
}

/// Fails `stream` with an abort error as soon as `signal` fires.
pub(crate) fn abortable(stream: ByteStream, signal: AbortSignal) -> ByteStream {
    stream::unfold(Some((stream, signal)), |state| async move {
        let (mut stream, signal) = state?;
        tokio::select! {
            biased;
            () = signal.cancelled() => Some((Err(FetchError::Abort), None)),
            next = stream.next() => next.map(|item| (item, Some((stream, signal)))),
        }
    })
    .boxed()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fetch::{AbortController, FetchErrorKind};
    use crate::transport::{TransportError, TransportErrorKind};
    use serde::Deserialize;

    fn chunked(parts: &[&'static str]) -> BodyInit {
        BodyInit::stream(stream::iter(
            parts
                .iter()
                .map(|part| Ok(Bytes::from_static(part.as_bytes())))
                .collect::<Vec<_>>(),
        ))
    }

    fn limited(body: Body, size: u64) -> Body {
        body.with_limits(BodyLimits {
            url: "http://test/".to_string(),
            size,
            timeout: None,
        })
    }

    #[tokio::test]
    async fn test_text_consumes_once() {
        let body = Body::new("hello".into());
        assert!(!body.is_used());
        assert_eq!(body.text().await.unwrap(), "hello");
        assert!(body.is_used());
        let error = body.text().await.unwrap_err();
        assert_eq!(error.kind(), FetchErrorKind::Type);
    }

    #[tokio::test]
    async fn test_null_body_resolves_empty() {
        let body = Body::empty();
        assert!(body.is_null());
        assert_eq!(body.text().await.unwrap(), "");
        assert!(body.is_used());
        assert!(Body::empty().bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stream_is_collected() {
        let body = Body::new(chunked(&["a", "b", "c"]));
        assert_eq!(body.known_length(), None);
        assert_eq!(body.array_buffer().await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_json_parses_and_reports_invalid() {
        #[derive(Deserialize)]
        struct Payload {
            name: String,
        }
        let body = Body::new(r#"{"name":"value"}"#.into());
        let parsed: Payload = body.json().await.unwrap();
        assert_eq!(parsed.name, "value");

        let error = Body::new("not json".into())
            .json::<serde_json::Value>()
            .await
            .unwrap_err();
        assert_eq!(error.kind(), FetchErrorKind::InvalidJson);
    }

    #[tokio::test]
    async fn test_size_limit_is_enforced_before_exceeding() {
        let body = limited(Body::new(chunked(&["12345", "67890", "x"])), 10);
        let error = body.bytes().await.unwrap_err();
        assert_eq!(error.kind(), FetchErrorKind::MaxSize);

        let exact = limited(Body::new(chunked(&["12345", "67890"])), 10);
        assert_eq!(exact.bytes().await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_body_timeout() {
        let slow = stream::once(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Bytes::from_static(b"late"))
        });
        let body = Body::new(BodyInit::stream(slow)).with_limits(BodyLimits {
            url: "http://test/".to_string(),
            size: 0,
            timeout: Some(Duration::from_millis(20)),
        });
        let error = body.text().await.unwrap_err();
        assert_eq!(error.kind(), FetchErrorKind::BodyTimeout);
    }

    #[tokio::test]
    async fn test_stream_errors_are_wrapped() {
        let transport = TransportError::new(TransportErrorKind::ConnectionReset, "socket hang up");
        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(FetchError::system("http://test/", &transport)),
        ]);
        let body = limited(Body::new(BodyInit::stream(broken)), 0);
        let error = body.text().await.unwrap_err();
        assert_eq!(error.kind(), FetchErrorKind::System);
        assert_eq!(error.code(), Some("ECONNRESET"));
        assert!(error.to_string().contains("invalid response body"));
    }

    #[tokio::test]
    async fn test_clone_tees_stream() {
        let body = Body::new(chunked(&["x", "y"]));
        let copy = body.try_clone().unwrap();
        assert_eq!(body.text().await.unwrap(), "xy");
        assert_eq!(copy.text().await.unwrap(), "xy");
    }

    #[tokio::test]
    async fn test_clone_after_use_fails() {
        let body = Body::new("abc".into());
        body.text().await.unwrap();
        assert_eq!(body.try_clone().unwrap_err().kind(), FetchErrorKind::Type);
    }

    #[tokio::test]
    async fn test_clones_have_independent_used_flags() {
        let body = Body::new(Bytes::from_static(b"data").into());
        let copy = body.try_clone().unwrap();
        body.bytes().await.unwrap();
        assert!(!copy.is_used());
        assert_eq!(copy.bytes().await.unwrap(), Bytes::from_static(b"data"));
    }

    #[test]
    fn test_known_lengths_and_default_types() {
        assert_eq!(Body::new("héllo".into()).known_length(), Some(6));
        assert_eq!(Body::empty().known_length(), Some(0));
        assert_eq!(
            Body::new("a".into()).default_content_type().as_deref(),
            Some(TEXT_CONTENT_TYPE)
        );
        assert_eq!(
            Body::new(BodyInit::url_encoded([("a", "1"), ("b", "x y")])).default_content_type().as_deref(),
            Some(URL_ENCODED_CONTENT_TYPE)
        );
        assert_eq!(Body::new(Bytes::new().into()).default_content_type(), None);
        assert_eq!(
            Body::new(Blob::new("x", "Image/PNG").into()).default_content_type().as_deref(),
            Some("image/png")
        );
        assert_eq!(Body::new(Blob::new("x", "").into()).default_content_type(), None);
    }

    #[tokio::test]
    async fn test_url_encoded_serialization() {
        let body = Body::new(BodyInit::url_encoded([("a", "1"), ("b", "x y&z")]));
        assert_eq!(body.text().await.unwrap(), "a=1&b=x+y%26z");
    }

    #[tokio::test]
    async fn test_to_transport_replays_static_payloads() {
        let body = Body::new("again".into());
        for _ in 0..2 {
            match body.to_transport().unwrap() {
                TransportBody::Full(bytes) => assert_eq!(bytes, Bytes::from_static(b"again")),
                other => panic!("unexpected body {other:?}"),
            }
        }
        assert!(!body.is_used());
    }

    #[tokio::test]
    async fn test_to_transport_hands_over_stream_once() {
        let body = Body::new(chunked(&["s"]));
        assert!(matches!(body.to_transport().unwrap(), TransportBody::Stream(_)));
        assert!(body.is_used());
        assert!(body.to_transport().is_err());
    }

    #[tokio::test]
    async fn test_blob_uses_owner_content_type() {
        let body = Body::new("{}".into()).with_content_type(Some("application/json".to_string()));
        let blob = body.blob().await.unwrap();
        assert_eq!(blob.content_type(), "application/json");
        assert_eq!(blob.text(), "{}");
    }

    #[tokio::test]
    async fn test_abortable_stream_fails_on_abort() {
        let controller = AbortController::new();
        let pending = stream::pending::<Result<Bytes, FetchError>>().boxed();
        let body = limited(
            Body::new(BodyInit::Stream(abortable(pending, controller.signal()))),
            0,
        );
        let handle = tokio::spawn(async move { body.text().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.abort();
        let error = handle.await.unwrap().unwrap_err();
        assert!(error.is_abort());
    }
}
