//! Proxy authentication hooks.
//!
//! When a hop is answered with `407` and the transport reports login events,
//! the engine either answers with the request's own `user`/`password` or asks
//! a [`LoginHandler`]. A handler that wants to answer asynchronously calls
//! [`LoginEvent::prevent_default`] and later completes the [`LoginCallback`].

use std::sync::LazyLock;

use regex::Regex;
use tokio::sync::oneshot;
use url::Url;

#[allow(clippy::expect_used)]
static REALM_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\brealm\s*=\s*(?:"([^"]*)"|([^\s,]+))"#).expect("realm regex is valid") // Static pattern, safe to panic
});

/// Username and password pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl Credentials {
    /// Creates a credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Describes the authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthInfo {
    /// Always true: only proxy challenges are surfaced.
    pub is_proxy: bool,
    /// Lower-cased auth scheme (`basic`, `digest`, ...), empty when unknown.
    pub scheme: String,
    /// Host of the challenged hop.
    pub host: String,
    /// Port of the challenged hop.
    pub port: u16,
    /// Realm from the challenge, empty when absent.
    pub realm: String,
}

impl AuthInfo {
    /// Builds auth info from the challenging origin (the configured proxy,
    /// else the hop URL) and its `Proxy-Authenticate` value.
    pub(crate) fn from_challenge(url: &Url, challenge: Option<&str>) -> Self {
        let challenge = challenge.unwrap_or_default();
        let scheme = challenge
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        let realm = REALM_PATTERN
            .captures(challenge)
            .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        Self {
            is_proxy: true,
            scheme,
            host: url.host_str().unwrap_or_default().to_string(),
            port: url.port_or_known_default().unwrap_or_default(),
            realm,
        }
    }
}

/// Preventable login event handed to a [`LoginHandler`].
#[derive(Debug, Default)]
pub struct LoginEvent {
    default_prevented: bool,
}

impl LoginEvent {
    /// Tells the engine to wait for the callback instead of failing.
    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    /// Returns true when [`Self::prevent_default`] was called.
    #[must_use]
    pub fn is_default_prevented(&self) -> bool {
        self.default_prevented
    }
}

/// Completion handle for a login event. Dropping it without answering
/// counts as a refusal.
#[derive(Debug)]
pub struct LoginCallback {
    sender: oneshot::Sender<Option<Credentials>>,
}

impl LoginCallback {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Option<Credentials>>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, receiver)
    }

    /// Answers the challenge with credentials.
    pub fn provide(self, username: impl Into<String>, password: impl Into<String>) {
        // The exchange may already have settled.
        let _ = self.sender.send(Some(Credentials::new(username, password)));
    }

    /// Refuses the challenge.
    pub fn refuse(self) {
        let _ = self.sender.send(None);
    }
}

/// Receives proxy login challenges.
pub trait LoginHandler: Send + Sync {
    /// Called once per challenge. Call `event.prevent_default()` to answer
    /// through `callback`, possibly later from another task.
    fn on_login(&self, event: &mut LoginEvent, auth: &AuthInfo, callback: LoginCallback);
}

impl<F> LoginHandler for F
where
    F: Fn(&mut LoginEvent, &AuthInfo, LoginCallback) + Send + Sync,
{
    fn on_login(&self, event: &mut LoginEvent, auth: &AuthInfo, callback: LoginCallback) {
        self(event, auth, callback);
    }
}
