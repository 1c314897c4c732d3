//! Default User-Agent string for outgoing requests.
//!
//! Single source for the product token so every transport identifies the
//! tool the same way.

/// Project URL from the package manifest; empty when none is declared.
const PROJECT_UA_URL: &str = env!("CARGO_PKG_REPOSITORY");

/// Default User-Agent: `<product>/<version> <transport kind>`, followed by
/// `(+<repository>)` when the manifest declares one.
#[must_use]
pub(crate) fn default_user_agent(transport_kind: &str) -> String {
    let version = env!("CARGO_PKG_VERSION");
    if PROJECT_UA_URL.is_empty() {
        format!("fetcher/{version} {transport_kind}")
    } else {
        format!("fetcher/{version} {transport_kind} (+{PROJECT_UA_URL})")
    }
}
