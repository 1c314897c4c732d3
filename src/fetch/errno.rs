//! Fixed translation tables for system errors.
//!
//! Transports report failures as [`TransportErrorKind`]. Host-embedded network
//! stacks report string identifiers (`ERR_CONNECTION_REFUSED`, ...) which are
//! first folded onto a kind. Each kind then maps to a POSIX-like code and a
//! libuv-style (negative) errno.

use crate::transport::TransportErrorKind;

/// Host network stack identifiers and the kind they fold onto.
const NATIVE_ERRORS: &[(&str, TransportErrorKind)] = &[
    ("ERR_CONNECTION_REFUSED", TransportErrorKind::ConnectionRefused),
    ("ERR_CONNECTION_RESET", TransportErrorKind::ConnectionReset),
    ("ERR_CONNECTION_CLOSED", TransportErrorKind::ConnectionReset),
    ("ERR_EMPTY_RESPONSE", TransportErrorKind::ConnectionReset),
    ("ERR_CONNECTION_ABORTED", TransportErrorKind::ConnectionAborted),
    ("ERR_CONNECTION_FAILED", TransportErrorKind::ConnectionRefused),
    ("ERR_NAME_NOT_RESOLVED", TransportErrorKind::NameNotResolved),
    ("ERR_NAME_RESOLUTION_FAILED", TransportErrorKind::NameNotResolved),
    ("ERR_CONNECTION_TIMED_OUT", TransportErrorKind::TimedOut),
    ("ERR_TIMED_OUT", TransportErrorKind::TimedOut),
    ("ERR_ADDRESS_UNREACHABLE", TransportErrorKind::HostUnreachable),
    ("ERR_INTERNET_DISCONNECTED", TransportErrorKind::NetworkUnreachable),
    ("ERR_NETWORK_CHANGED", TransportErrorKind::NetworkUnreachable),
    ("ERR_SSL_PROTOCOL_ERROR", TransportErrorKind::Tls),
    ("ERR_CERT_AUTHORITY_INVALID", TransportErrorKind::Tls),
    ("ERR_CERT_COMMON_NAME_INVALID", TransportErrorKind::Tls),
    ("ERR_CERT_DATE_INVALID", TransportErrorKind::Tls),
    ("ERR_INVALID_HTTP_RESPONSE", TransportErrorKind::Protocol),
    ("ERR_RESPONSE_HEADERS_TOO_BIG", TransportErrorKind::Protocol),
    ("ERR_CONTENT_DECODING_FAILED", TransportErrorKind::DecodingFailed),
    ("ERR_UPLOAD_FILE_CHANGED", TransportErrorKind::BrokenPipe),
    ("ERR_ABORTED", TransportErrorKind::Canceled),
    ("ERR_INVALID_ARGUMENT", TransportErrorKind::InvalidRequest),
    ("ERR_INVALID_URL", TransportErrorKind::InvalidRequest),
    ("ERR_FAILED", TransportErrorKind::Other),
];

/// Folds a host network stack identifier onto a transport error kind.
///
/// Unknown identifiers map to [`TransportErrorKind::Other`]. A leading `net::`
/// prefix is tolerated.
#[must_use]
pub fn kind_from_native(native: &str) -> TransportErrorKind {
    let native = native.trim().trim_start_matches("net::");
    NATIVE_ERRORS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(native))
        .map_or(TransportErrorKind::Other, |(_, kind)| *kind)
}

/// Returns the POSIX-like code and errno for a transport error kind.
#[must_use]
pub fn lookup(kind: TransportErrorKind) -> (&'static str, i32) {
    match kind {
        TransportErrorKind::ConnectionRefused => ("ECONNREFUSED", -111),
        TransportErrorKind::ConnectionReset => ("ECONNRESET", -104),
        TransportErrorKind::ConnectionAborted => ("ECONNABORTED", -103),
        TransportErrorKind::NameNotResolved => ("ENOTFOUND", -3008),
        TransportErrorKind::TimedOut => ("ETIMEDOUT", -110),
        TransportErrorKind::HostUnreachable => ("EHOSTUNREACH", -113),
        TransportErrorKind::NetworkUnreachable => ("ENETUNREACH", -101),
        TransportErrorKind::Tls | TransportErrorKind::Protocol => ("EPROTO", -71),
        TransportErrorKind::DecodingFailed => ("Z_DATA_ERROR", -3),
        TransportErrorKind::BrokenPipe => ("EPIPE", -32),
        TransportErrorKind::Canceled => ("ECANCELED", -125),
        TransportErrorKind::InvalidRequest => ("EINVAL", -22),
        TransportErrorKind::Other => ("EIO", -5),
    }
}
