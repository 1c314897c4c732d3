//! Fetcher Core Library
//!
//! A fetch-style HTTP engine: callers describe a request, the engine drives
//! it through redirects, timeouts, cancellation, proxy login and content
//! decoding over a pluggable transport, and returns a response whose body is
//! consumed exactly once.
//!
//! # Architecture
//!
//! - [`fetch`] - Request/Response/Body/HeaderMap types, error taxonomy and the orchestrator
//! - [`transport`] - Transport trait (one HTTP hop) and the default reqwest implementation

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod fetch;
pub mod transport;
pub(crate) mod user_agent;

#[cfg(test)]
pub mod test_support;

// Re-export commonly used types
pub use fetch::{
    AbortController, AbortSignal, Body, BodyInit, FetchError, FetchErrorKind, Fetcher,
    FetcherConfig, HeaderMap, RedirectPolicy, Request, RequestInit, Response, fetch,
};
pub use transport::{
    ReqwestTransport, ReqwestTransportConfig, Transport, TransportBody, TransportCapabilities,
    TransportError, TransportErrorKind, TransportRequest, TransportResponse,
};
