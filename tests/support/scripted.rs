//! In-memory transport that answers hops from a script.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fetcher_core::fetch::{ByteStream, Credentials};
use fetcher_core::{
    Transport, TransportBody, TransportCapabilities, TransportError, TransportRequest,
    TransportResponse,
};
use futures_util::{StreamExt, stream};
use url::Url;

/// One scripted answer.
pub enum Step {
    Respond {
        status: u16,
        headers: Vec<(String, String)>,
        chunks: Vec<Bytes>,
        delay: Duration,
    },
    /// Respond with a caller-provided body stream.
    RespondStream {
        status: u16,
        headers: Vec<(String, String)>,
        body: ByteStream,
    },
    Fail(TransportError),
    /// Never resolves.
    Hang,
}

impl Step {
    pub fn ok(body: &'static str) -> Self {
        Self::status(200, &[], body)
    }

    pub fn status(status: u16, headers: &[(&str, &str)], body: &'static str) -> Self {
        Self::Respond {
            status,
            headers: headers
                .iter()
                .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
                .collect(),
            chunks: if body.is_empty() {
                Vec::new()
            } else {
                vec![Bytes::from_static(body.as_bytes())]
            },
            delay: Duration::ZERO,
        }
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self::Respond {
            status,
            headers: vec![("Location".to_string(), location.to_string())],
            chunks: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, by: Duration) -> Self {
        if let Self::Respond { delay, .. } = &mut self {
            *delay = by;
        }
        self
    }
}

/// A hop as the transport received it, with the body drained.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub streamed: bool,
    pub credentials: Option<(String, String)>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Default)]
struct Inner {
    script: VecDeque<StepSlot>,
    recorded: Vec<Recorded>,
}

struct StepSlot(Step);

impl std::fmt::Debug for StepSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Step")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Inner>>,
    capabilities: TransportCapabilities,
    proxy: Option<Url>,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        let transport = Self::default();
        transport
            .lock()
            .script
            .extend(steps.into_iter().map(StepSlot));
        transport
    }

    pub fn with_capabilities(mut self, capabilities: TransportCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_proxy(mut self, proxy: &str) -> Self {
        self.proxy = Some(Url::parse(proxy).unwrap());
        self
    }

    pub fn into_arc(self) -> Arc<dyn Transport> {
        Arc::new(self)
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.lock().recorded.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn drain(body: TransportBody) -> (Option<Bytes>, bool) {
    match body {
        TransportBody::Empty => (None, false),
        TransportBody::Full(bytes) => (Some(bytes), false),
        TransportBody::Stream(mut stream) => {
            let mut collected = Vec::new();
            while let Some(Ok(chunk)) = stream.next().await {
                collected.extend_from_slice(&chunk);
            }
            (Some(Bytes::from(collected)), true)
        }
    }
}

fn credentials(credentials: Option<&Credentials>) -> Option<(String, String)> {
    credentials.map(|c| (c.username.clone(), c.password.clone()))
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    fn capabilities(&self) -> TransportCapabilities {
        self.capabilities
    }

    fn proxy(&self) -> Option<&Url> {
        self.proxy.as_ref()
    }

    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let TransportRequest {
            method,
            url,
            headers,
            body,
            proxy_credentials,
        } = request;
        let credentials = credentials(proxy_credentials.as_ref());
        let (body, streamed) = drain(body).await;
        let step = {
            let mut inner = self.lock();
            inner.recorded.push(Recorded {
                method,
                url,
                headers,
                body,
                streamed,
                credentials,
            });
            inner.script.pop_front()
        };
        let Some(StepSlot(step)) = step else {
            return Err(TransportError::from_native(
                "ERR_CONNECTION_REFUSED",
                "script exhausted",
            ));
        };
        match step {
            Step::Respond {
                status,
                headers,
                chunks,
                delay,
            } => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(TransportResponse {
                    status,
                    status_text: String::new(),
                    headers,
                    body: stream::iter(chunks.into_iter().map(Ok)).boxed(),
                })
            }
            Step::RespondStream {
                status,
                headers,
                body,
            } => Ok(TransportResponse {
                status,
                status_text: String::new(),
                headers,
                body,
            }),
            Step::Fail(error) => Err(error),
            Step::Hang => std::future::pending().await,
        }
    }
}
