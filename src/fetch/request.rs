//! Request descriptor.
//!
//! A [`Request`] is validated once at construction and is immutable
//! afterwards: the engine keeps its own per-hop copy of method, URL, headers
//! and redirect counter while following a chain.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use url::Url;

use super::body::BodyLimits;
use super::constants::DEFAULT_FOLLOW;
use super::headers::is_valid_header_name;
use super::{
    AbortSignal, Blob, Body, BodyInit, ByteStream, Credentials, FetchError, HeaderMap, HeadersInit,
    LoginHandler,
};
use crate::transport::Transport;

/// How redirect responses are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RedirectPolicy {
    /// Follow up to the follow limit.
    #[default]
    Follow,
    /// Return the redirect response with an absolute `Location`.
    Manual,
    /// Fail on any redirect.
    Error,
}

impl RedirectPolicy {
    /// Returns the policy name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Follow => "follow",
            Self::Manual => "manual",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for RedirectPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RedirectPolicy {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "follow" => Ok(Self::Follow),
            "manual" => Ok(Self::Manual),
            "error" => Ok(Self::Error),
            other => Err(FetchError::invalid_input(format!(
                "invalid redirect mode: {other}"
            ))),
        }
    }
}

/// What a request is built from.
#[derive(Debug)]
pub enum RequestInput {
    /// URL text, parsed and validated.
    Url(String),
    /// Already parsed URL, validated.
    Parsed(Url),
    /// A prior request whose settings are inherited.
    Request(Request),
}

impl From<&str> for RequestInput {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<String> for RequestInput {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

impl From<&String> for RequestInput {
    fn from(url: &String) -> Self {
        Self::Url(url.clone())
    }
}

impl From<Url> for RequestInput {
    fn from(url: Url) -> Self {
        Self::Parsed(url)
    }
}

impl From<Request> for RequestInput {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

/// Options applied on top of the input. Unset fields are inherited from a
/// prior request, or take their defaults.
#[derive(Default)]
pub struct RequestInit {
    method: Option<String>,
    headers: Option<HeadersInit>,
    body: Option<BodyInit>,
    redirect: Option<RedirectPolicy>,
    follow: Option<u32>,
    timeout: Option<Duration>,
    size: Option<u64>,
    compress: Option<bool>,
    signal: Option<AbortSignal>,
    transport: Option<Arc<dyn Transport>>,
    user: Option<String>,
    password: Option<String>,
    on_login: Option<Arc<dyn LoginHandler>>,
}

impl std::fmt::Debug for RequestInit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestInit")
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("redirect", &self.redirect)
            .field("follow", &self.follow)
            .field("timeout", &self.timeout)
            .field("size", &self.size)
            .field("compress", &self.compress)
            .field("signal", &self.signal)
            .field("transport", &self.transport)
            .field("user", &self.user)
            .field("on_login", &self.on_login.is_some())
            .finish_non_exhaustive()
    }
}

impl RequestInit {
    /// Empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the method (validated and upper-cased at construction).
    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Sets the headers.
    #[must_use]
    pub fn headers(mut self, headers: impl Into<HeadersInit>) -> Self {
        self.headers = Some(headers.into());
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<BodyInit>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the redirect policy.
    #[must_use]
    pub fn redirect(mut self, redirect: RedirectPolicy) -> Self {
        self.redirect = Some(redirect);
        self
    }

    /// Sets the maximum number of redirects followed.
    #[must_use]
    pub fn follow(mut self, follow: u32) -> Self {
        self.follow = Some(follow);
        self
    }

    /// Sets the per-hop header timeout, also applied to body draining.
    /// A zero duration disables it.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the maximum response body size in bytes, 0 = unlimited.
    #[must_use]
    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Enables or disables content-encoding negotiation.
    #[must_use]
    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = Some(compress);
        self
    }

    /// Sets the cancellation signal.
    #[must_use]
    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Selects the transport for this request.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the proxy user name.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the proxy password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Installs a proxy login handler.
    #[must_use]
    pub fn on_login(mut self, handler: impl LoginHandler + 'static) -> Self {
        self.on_login = Some(Arc::new(handler));
        self
    }
}

/// One validated HTTP exchange description.
pub struct Request {
    url: Url,
    method: String,
    headers: HeaderMap,
    body: Body,
    redirect: RedirectPolicy,
    follow: u32,
    counter: u32,
    timeout: Option<Duration>,
    size: u64,
    compress: bool,
    signal: Option<AbortSignal>,
    transport: Option<Arc<dyn Transport>>,
    user: Option<String>,
    password: Option<String>,
    on_login: Option<Arc<dyn LoginHandler>>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("url", &self.url.as_str())
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("redirect", &self.redirect)
            .field("follow", &self.follow)
            .field("counter", &self.counter)
            .field("timeout", &self.timeout)
            .field("size", &self.size)
            .field("compress", &self.compress)
            .finish_non_exhaustive()
    }
}

/// Parses `input` and checks it is an absolute http(s) URL.
pub(crate) fn parse_fetch_url(input: &str) -> Result<Url, FetchError> {
    let url = Url::parse(input).map_err(|_| {
        FetchError::invalid_input(format!("Only absolute URLs are supported: {input}"))
    })?;
    check_fetch_url(url)
}

fn check_fetch_url(url: Url) -> Result<Url, FetchError> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FetchError::invalid_input(format!(
            "Only HTTP(S) protocols are supported: {url}"
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(FetchError::invalid_input(format!(
            "Only absolute URLs are supported: {url}"
        )));
    }
    Ok(url)
}

fn normalize_method(method: &str) -> Result<String, FetchError> {
    if !is_valid_header_name(method) {
        return Err(FetchError::invalid_input(format!(
            "{method} is not a valid HTTP method"
        )));
    }
    Ok(method.to_ascii_uppercase())
}

impl Request {
    /// Builds a request from a URL or a prior request plus options.
    ///
    /// # Errors
    ///
    /// Returns a type error for a relative or non-http(s) URL, an illegal
    /// method or header, a body on GET/HEAD, or a prior request whose body
    /// was already used when no replacement body is given.
    pub fn new(input: impl Into<RequestInput>, init: RequestInit) -> Result<Self, FetchError> {
        let (url, parent) = match input.into() {
            RequestInput::Url(text) => (parse_fetch_url(&text)?, None),
            RequestInput::Parsed(url) => (check_fetch_url(url)?, None),
            RequestInput::Request(request) => (request.url.clone(), Some(request)),
        };

        let method = match (&init.method, &parent) {
            (Some(method), _) => normalize_method(method)?,
            (None, Some(parent)) => parent.method.clone(),
            (None, None) => "GET".to_string(),
        };

        let body = match (init.body, &parent) {
            (Some(body), _) => Body::new(body),
            (None, Some(parent)) if parent.body.is_used() => {
                return Err(FetchError::invalid_input(
                    "Cannot construct a Request with a Request object that has already been used",
                ));
            }
            (None, Some(parent)) => parent.body.try_clone()?,
            (None, None) => Body::empty(),
        };
        if !body.is_null() && matches!(method.as_str(), "GET" | "HEAD") {
            return Err(FetchError::invalid_input(
                "Request with GET/HEAD method cannot have body",
            ));
        }

        let mut headers = match (init.headers, &parent) {
            (Some(headers), _) => HeaderMap::from_init(headers)?,
            (None, Some(parent)) => parent.headers.clone(),
            (None, None) => HeaderMap::new(),
        };
        if !headers.has("content-type")
            && let Some(content_type) = body.default_content_type()
        {
            headers.set("Content-Type", &content_type)?;
        }

        let timeout = init
            .timeout
            .or_else(|| parent.as_ref().and_then(|parent| parent.timeout))
            .filter(|timeout| !timeout.is_zero());
        let size = init
            .size
            .or_else(|| parent.as_ref().map(|parent| parent.size))
            .unwrap_or(0);
        let body = body
            .with_limits(BodyLimits {
                url: url.to_string(),
                size,
                timeout,
            })
            .with_content_type(headers.get("content-type"));

        Ok(Self {
            redirect: init
                .redirect
                .or_else(|| parent.as_ref().map(|parent| parent.redirect))
                .unwrap_or_default(),
            follow: init
                .follow
                .or_else(|| parent.as_ref().map(|parent| parent.follow))
                .unwrap_or(DEFAULT_FOLLOW),
            counter: parent.as_ref().map_or(0, |parent| parent.counter),
            compress: init
                .compress
                .or_else(|| parent.as_ref().map(|parent| parent.compress))
                .unwrap_or(true),
            signal: init
                .signal
                .or_else(|| parent.as_ref().and_then(|parent| parent.signal.clone())),
            transport: init
                .transport
                .or_else(|| parent.as_ref().and_then(|parent| parent.transport.clone())),
            user: init
                .user
                .or_else(|| parent.as_ref().and_then(|parent| parent.user.clone())),
            password: init
                .password
                .or_else(|| parent.as_ref().and_then(|parent| parent.password.clone())),
            on_login: init
                .on_login
                .or_else(|| parent.as_ref().and_then(|parent| parent.on_login.clone())),
            url,
            method,
            headers,
            body,
            timeout,
            size,
        })
    }

    /// Absolute URL.
    #[must_use]
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub(crate) fn parsed_url(&self) -> &Url {
        &self.url
    }

    /// Upper-cased method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Request body (null when absent).
    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Returns true once the body was consumed.
    #[must_use]
    pub fn body_used(&self) -> bool {
        self.body.is_used()
    }

    /// Redirect policy.
    #[must_use]
    pub fn redirect(&self) -> RedirectPolicy {
        self.redirect
    }

    /// Maximum number of redirects followed.
    #[must_use]
    pub fn follow(&self) -> u32 {
        self.follow
    }

    /// Redirects already followed when this request was built.
    #[must_use]
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Per-hop timeout, `None` when disabled.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Maximum response body size, 0 = unlimited.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether content-encoding negotiation is on.
    #[must_use]
    pub fn compress(&self) -> bool {
        self.compress
    }

    /// Cancellation signal.
    #[must_use]
    pub fn signal(&self) -> Option<&AbortSignal> {
        self.signal.as_ref()
    }

    pub(crate) fn transport(&self) -> Option<&Arc<dyn Transport>> {
        self.transport.as_ref()
    }

    /// Proxy credentials when both user and password are set.
    pub(crate) fn credentials(&self) -> Option<Credentials> {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => Some(Credentials::new(user, password)),
            _ => None,
        }
    }

    pub(crate) fn login_handler(&self) -> Option<&Arc<dyn LoginHandler>> {
        self.on_login.as_ref()
    }

    /// Copies the request; the body is split with a tee when it is a stream.
    ///
    /// # Errors
    ///
    /// Returns a type error when the body was already used.
    pub fn try_clone(&self) -> Result<Self, FetchError> {
        Ok(Self {
            url: self.url.clone(),
            method: self.method.clone(),
            headers: self.headers.clone(),
            body: self.body.try_clone()?,
            redirect: self.redirect,
            follow: self.follow,
            counter: self.counter,
            timeout: self.timeout,
            size: self.size,
            compress: self.compress,
            signal: self.signal.clone(),
            transport: self.transport.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            on_login: self.on_login.clone(),
        })
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

    /// Drains the body into a blob.
    ///
    /// # Errors
    ///
    /// See [`Body::bytes`].
    pub async fn blob(&self) -> Result<Blob, FetchError> {
        self.body.blob().await
    }

    /// Hands out the raw body stream.
    ///
    /// # Errors
    ///
    /// Returns a type error when the body was already used.
    pub fn stream(&self) -> Result<ByteStream, FetchError> {
        self.body.stream()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fetch::{FetchErrorKind, FormData};

    fn type_error(result: Result<Request, FetchError>) -> String {
        let error = result.unwrap_err();
        assert_eq!(error.kind(), FetchErrorKind::Type);
        error.to_string()
    }

    #[test]
    fn test_defaults() {
        let request = Request::new("http://example.com/a", RequestInit::new()).unwrap();
        assert_eq!(request.method(), "GET");
        assert_eq!(request.url(), "http://example.com/a");
        assert_eq!(request.redirect(), RedirectPolicy::Follow);
        assert_eq!(request.follow(), DEFAULT_FOLLOW);
        assert_eq!(request.counter(), 0);
        assert_eq!(request.timeout(), None);
        assert_eq!(request.size(), 0);
        assert!(request.compress());
        assert!(request.body().is_null());
        assert!(request.headers().is_empty());
    }

    #[test]
    fn test_relative_url_is_rejected() {
        let message = type_error(Request::new("/relative", RequestInit::new()));
        assert!(message.contains("Only absolute URLs are supported"));
    }

    #[test]
    fn test_non_http_scheme_is_rejected() {
        let message = type_error(Request::new("ftp://example.com/", RequestInit::new()));
        assert!(message.contains("Only HTTP(S) protocols are supported"));
        let parsed = Url::parse("file:///etc/hosts").unwrap();
        type_error(Request::new(parsed, RequestInit::new()));
    }

    #[test]
    fn test_body_on_get_or_head_is_rejected() {
        for method in ["GET", "head"] {
            let message = type_error(Request::new(
                "http://a/",
                RequestInit::new().method(method).body("x"),
            ));
            assert!(message.contains("cannot have body"));
        }
    }

    #[test]
    fn test_method_is_uppercased_and_validated() {
        let request = Request::new("http://a/", RequestInit::new().method("patch")).unwrap();
        assert_eq!(request.method(), "PATCH");
        type_error(Request::new("http://a/", RequestInit::new().method("BAD METHOD")));
    }

    #[test]
    fn test_text_body_sets_default_content_type() {
        let request = Request::new("http://a/", RequestInit::new().method("POST").body("hi")).unwrap();
        assert_eq!(
            request.headers().get("content-type").as_deref(),
            Some("text/plain;charset=UTF-8")
        );
        assert_eq!(request.body().known_length(), Some(2));
    }

    #[test]
    fn test_explicit_content_type_wins() {
        let request = Request::new(
            "http://a/",
            RequestInit::new()
                .method("POST")
                .headers([("Content-Type", "application/json")])
                .body("{}"),
        )
        .unwrap();
        assert_eq!(
            request.headers().get("content-type").as_deref(),
            Some("application/json")
        );
    }

    #[test]
    fn test_bytes_body_has_no_default_content_type() {
        let request = Request::new(
            "http://a/",
            RequestInit::new().method("POST").body(vec![1u8, 2, 3]),
        )
        .unwrap();
        assert!(!request.headers().has("content-type"));
    }

    #[test]
    fn test_form_body_sets_boundary_content_type() {
        let mut form = FormData::with_boundary("abc");
        form.append("k", "v");
        let request = Request::new("http://a/", RequestInit::new().method("POST").body(form)).unwrap();
        assert_eq!(
            request.headers().get("content-type").as_deref(),
            Some("multipart/form-data; boundary=abc")
        );
    }

    #[tokio::test]
    async fn test_inherits_from_prior_request() {
        let original = Request::new(
            "https://example.com/upload",
            RequestInit::new()
                .method("PUT")
                .headers([("X-Trace", "1")])
                .body("payload")
                .redirect(RedirectPolicy::Manual)
                .follow(3)
                .timeout(Duration::from_millis(500))
                .size(1024)
                .compress(false),
        )
        .unwrap();

        let derived = Request::new(original, RequestInit::new()).unwrap();
        assert_eq!(derived.url(), "https://example.com/upload");
        assert_eq!(derived.method(), "PUT");
        assert_eq!(derived.headers().get("x-trace").as_deref(), Some("1"));
        assert_eq!(derived.redirect(), RedirectPolicy::Manual);
        assert_eq!(derived.follow(), 3);
        assert_eq!(derived.timeout(), Some(Duration::from_millis(500)));
        assert_eq!(derived.size(), 1024);
        assert!(!derived.compress());
        assert_eq!(derived.text().await.unwrap(), "payload");
    }

    #[tokio::test]
    async fn test_overrides_replace_inherited_fields() {
        let original = Request::new(
            "http://a/",
            RequestInit::new().method("POST").body("one"),
        )
        .unwrap();
        let derived = Request::new(
            original,
            RequestInit::new().body("two").headers([("X-New", "y")]),
        )
        .unwrap();
        assert_eq!(derived.method(), "POST");
        assert_eq!(
            derived.headers().get("content-type").as_deref(),
            Some("text/plain;charset=UTF-8")
        );
        assert!(!derived.headers().has("x-trace"));
        assert_eq!(derived.headers().get("x-new").as_deref(), Some("y"));
        assert_eq!(derived.text().await.unwrap(), "two");
    }

    #[tokio::test]
    async fn test_prior_request_with_used_body_is_rejected() {
        let original = Request::new("http://a/", RequestInit::new().method("POST").body("x")).unwrap();
        original.text().await.unwrap();
        type_error(Request::new(original, RequestInit::new()));
    }

    #[tokio::test]
    async fn test_try_clone_keeps_both_bodies_readable() {
        let request = Request::new("http://a/", RequestInit::new().method("POST").body("same")).unwrap();
        let copy = request.try_clone().unwrap();
        assert_eq!(request.text().await.unwrap(), "same");
        assert_eq!(copy.text().await.unwrap(), "same");
        assert!(request.try_clone().is_err());
    }

    #[test]
    fn test_credentials_need_user_and_password() {
        let partial = Request::new("http://a/", RequestInit::new().user("u")).unwrap();
        assert!(partial.credentials().is_none());
        let full = Request::new("http://a/", RequestInit::new().user("u").password("p")).unwrap();
        assert_eq!(full.credentials(), Some(Credentials::new("u", "p")));
    }

    #[test]
    fn test_redirect_policy_parsing() {
        assert_eq!("MANUAL".parse::<RedirectPolicy>().unwrap(), RedirectPolicy::Manual);
        assert_eq!("follow".parse::<RedirectPolicy>().unwrap(), RedirectPolicy::Follow);
        assert!("sometimes".parse::<RedirectPolicy>().is_err());
        assert_eq!(RedirectPolicy::Error.to_string(), "error");
    }
}
