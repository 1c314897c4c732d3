//! Fetch orchestration: turns a [`Request`] into a [`Response`].
//!
//! Each hop races abort, then the timeout, then the transport. Redirects are
//! followed in a loop carrying the hop state (method, URL, headers, body
//! presence, counter); the request itself is never mutated. Once a final
//! response arrives its body is wrapped for decoding and abort, and handed
//! back unconsumed.

mod decode;

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};
use url::Url;

use self::decode::{DecodeContext, negotiate};
use super::body::abortable;
use super::constants::{
    DEFAULT_ACCEPT, DEFAULT_ACCEPT_ENCODING, DEFAULT_CONNECTION, REDIRECT_STATUSES,
};
use super::response::ResponseParts;
use super::{
    AbortSignal, AuthInfo, Credentials, FetchError, HeaderMap, LoginCallback, LoginEvent,
    RedirectPolicy, Request, Response,
};
use crate::transport::{Transport, TransportBody, TransportRequest, TransportResponse};
use crate::user_agent::default_user_agent;

const PROXY_AUTH_REQUIRED: u16 = 407;

/// Mutable per-hop view of the exchange.
struct Hop {
    method: String,
    url: Url,
    headers: HeaderMap,
    /// The request body was dropped by a method rewrite.
    body_dropped: bool,
    /// A one-shot body stream was already handed to the transport.
    body_streamed: bool,
    counter: u32,
}

/// Races that bound a single wait: abort first, then the timeout.
#[derive(Clone, Copy)]
struct Races<'a> {
    signal: Option<&'a AbortSignal>,
    timeout: Option<Duration>,
}

impl Races<'_> {
    async fn aborted(&self) {
        match self.signal {
            Some(signal) => signal.cancelled().await,
            None => pending().await,
        }
    }

    async fn expired(&self) {
        match self.timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => pending().await,
        }
    }
}

/// Runs one exchange to its final response.
#[instrument(skip(request, default_transport), fields(url = %request.url(), method = %request.method()))]
pub(crate) async fn execute(
    request: Request,
    default_transport: Arc<dyn Transport>,
) -> Result<Response, FetchError> {
    let transport = request.transport().cloned().unwrap_or(default_transport);
    let capabilities = transport.capabilities();
    let races = Races {
        signal: request.signal(),
        timeout: request.timeout(),
    };
    if request.signal().is_some_and(AbortSignal::aborted) {
        debug!("signal aborted before send");
        return Err(FetchError::Abort);
    }
    if request.body_used() {
        return Err(FetchError::body_used(request.url()));
    }

    let mut hop = Hop {
        method: request.method().to_string(),
        url: request.parsed_url().clone(),
        headers: request.headers().clone(),
        body_dropped: false,
        body_streamed: false,
        counter: request.counter(),
    };
    let mut credentials: Option<Credentials> = None;

    loop {
        let outgoing = prepare_hop(&request, &mut hop, transport.kind(), credentials.clone())?;
        debug!(method = %hop.method, url = %hop.url, counter = hop.counter, "sending hop");
        let response = send_hop(transport.as_ref(), outgoing, races, hop.url.as_str()).await?;

        if response.status == PROXY_AUTH_REQUIRED && capabilities.login_events {
            let origin = transport.proxy().unwrap_or(&hop.url);
            if credentials.is_some() || hop.body_streamed {
                return Err(FetchError::proxy(origin.host_str().unwrap_or_default()));
            }
            let challenge = response
                .headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case("proxy-authenticate"))
                .map(|(_, value)| value.as_str());
            let auth = AuthInfo::from_challenge(origin, challenge);
            drop(response);
            credentials = Some(answer_login(&request, &auth, races).await?);
            debug!(host = %auth.host, "retrying hop with proxy credentials");
            continue;
        }

        let mut headers = HeaderMap::from_wire(response.headers);
        let status = response.status;

        if REDIRECT_STATUSES.contains(&status) && request.redirect() != RedirectPolicy::Manual {
            if request.redirect() == RedirectPolicy::Error {
                return Err(FetchError::no_redirect(hop.url.as_str()));
            }
            if hop.counter >= request.follow() {
                return Err(FetchError::max_redirect(hop.url.as_str()));
            }
            let Some(location) = headers.get("location") else {
                return Err(FetchError::missing_location(hop.url.as_str()));
            };
            let next = hop
                .url
                .join(&location)
                .map_err(|_| FetchError::bad_location(hop.url.as_str(), &location))?;

            let rewrite = status == 303 || (matches!(status, 301 | 302) && hop.method == "POST");
            if rewrite {
                hop.method = "GET".to_string();
                hop.body_dropped = true;
                hop.headers.delete("content-length")?;
            } else if hop.body_streamed && !hop.body_dropped {
                return Err(FetchError::unsupported_redirect(hop.url.as_str()));
            }

            hop.counter += 1;
            debug!(status, from = %hop.url, to = %next, counter = hop.counter, "following redirect");
            drop(response.body);
            hop.url = next;
            continue;
        }

        if request.redirect() == RedirectPolicy::Manual
            && let Some(location) = headers.get("location")
        {
            match hop.url.join(&location) {
                Ok(absolute) => headers.set("Location", absolute.as_str())?,
                Err(error) => {
                    warn!(location = %location, error = %error, "leaving unresolvable Location as received");
                }
            }
        }

        let context = DecodeContext {
            enabled: request.compress() && !capabilities.decodes_content,
            method: &hop.method,
            status,
        };
        let mut body = negotiate(response.body, &headers, context, hop.url.as_str());
        if let Some(signal) = request.signal() {
            body = abortable(body, signal.clone());
        }

        debug!(status, url = %hop.url, "response resolved");
        return Ok(Response::from_parts(ResponseParts {
            url: hop.url.to_string(),
            status,
            status_text: response.status_text,
            headers,
            body,
            counter: hop.counter,
            size: request.size(),
            timeout: request.timeout(),
        }));
    }
}

/// Builds the wire request for the current hop.
fn prepare_hop(
    request: &Request,
    hop: &mut Hop,
    transport_kind: &str,
    proxy_credentials: Option<Credentials>,
) -> Result<TransportRequest, FetchError> {
    let has_body = !hop.body_dropped && !request.body().is_null();
    let known_length = if has_body {
        request.body().known_length()
    } else {
        Some(0)
    };
    let body = if has_body {
        request.body().to_transport()?
    } else {
        TransportBody::Empty
    };
    if matches!(body, TransportBody::Stream(_)) {
        hop.body_streamed = true;
    }
    let headers = wire_headers(
        &hop.headers,
        &hop.method,
        has_body,
        known_length,
        request.compress(),
        transport_kind,
    )?;
    Ok(TransportRequest {
        method: hop.method.clone(),
        url: hop.url.clone(),
        headers,
        body,
        proxy_credentials,
    })
}

/// Applies framing and default headers, returning the raw header list.
fn wire_headers(
    headers: &HeaderMap,
    method: &str,
    has_body: bool,
    known_length: Option<u64>,
    compress: bool,
    transport_kind: &str,
) -> Result<Vec<(String, String)>, FetchError> {
    let mut headers = headers.clone();

    if has_body {
        match known_length {
            Some(length) => headers.set("Content-Length", &length.to_string())?,
            None => {
                headers.delete("Content-Length")?;
                headers.set("Transfer-Encoding", "chunked")?;
            }
        }
    } else if matches!(method, "POST" | "PUT") {
        headers.set("Content-Length", "0")?;
    }

    if !headers.has("accept") {
        headers.set("Accept", DEFAULT_ACCEPT)?;
    }
    if !headers.has("user-agent") {
        headers.set("User-Agent", &default_user_agent(transport_kind))?;
    }
    if compress && !headers.has("accept-encoding") {
        headers.set("Accept-Encoding", DEFAULT_ACCEPT_ENCODING)?;
    }
    if !headers.has("connection") {
        headers.set("Connection", DEFAULT_CONNECTION)?;
    }
    Ok(headers.raw())
}

/// Sends one hop, racing abort and the timeout against the transport.
async fn send_hop(
    transport: &dyn Transport,
    outgoing: TransportRequest,
    races: Races<'_>,
    url: &str,
) -> Result<TransportResponse, FetchError> {
    tokio::select! {
        biased;
        () = races.aborted() => {
            debug!(url, "aborted while awaiting response headers");
            Err(FetchError::Abort)
        }
        () = races.expired() => {
            debug!(url, "timed out while awaiting response headers");
            Err(FetchError::request_timeout(url))
        }
        result = transport.send(outgoing) => result.map_err(|error| FetchError::system(url, &error)),
    }
}

/// Obtains credentials for a proxy challenge.
async fn answer_login(
    request: &Request,
    auth: &AuthInfo,
    races: Races<'_>,
) -> Result<Credentials, FetchError> {
    if let Some(credentials) = request.credentials() {
        return Ok(credentials);
    }
    let Some(handler) = request.login_handler() else {
        debug!(host = %auth.host, "login challenge without credentials or handler");
        return Err(FetchError::proxy(&auth.host));
    };

    let (callback, answer) = LoginCallback::channel();
    let mut event = LoginEvent::default();
    handler.on_login(&mut event, auth, callback);
    if !event.is_default_prevented() {
        return Err(FetchError::proxy(&auth.host));
    }

    tokio::select! {
        biased;
        () = races.aborted() => Err(FetchError::Abort),
        () = races.expired() => Err(FetchError::request_timeout(request.url())),
        answer = answer => match answer {
            Ok(Some(credentials)) => Ok(credentials),
            Ok(None) | Err(_) => Err(FetchError::proxy(&auth.host)),
        },
    }
}
