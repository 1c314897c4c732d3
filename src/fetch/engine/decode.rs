//! Content-encoding negotiation and streaming inflate.
//!
//! `gzip`/`x-gzip` are gunzipped; `deflate`/`x-deflate` are inflated as zlib
//! when the first byte carries the deflate method nibble and as raw deflate
//! otherwise. Unknown codings pass through untouched. Truncated input yields
//! what was decoded so far; corrupt input fails the stream during consumption.

use std::io::Write;

use bytes::Bytes;
use flate2::write::{DeflateDecoder, GzDecoder, ZlibDecoder};
use futures_util::{StreamExt, stream};
use tracing::debug;

use crate::fetch::{ByteStream, FetchError, HeaderMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coding {
    Gzip,
    Deflate,
}

/// Whether decoding applies to a response at all.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DecodeContext<'a> {
    /// Content-encoding negotiation requested and not done by the transport.
    pub enabled: bool,
    /// Method of the hop.
    pub method: &'a str,
    /// Response status.
    pub status: u16,
}

/// Wraps `body` in the decoder selected by `Content-Encoding`.
pub(crate) fn negotiate(
    body: ByteStream,
    headers: &HeaderMap,
    context: DecodeContext<'_>,
    url: &str,
) -> ByteStream {
    if !context.enabled || context.method == "HEAD" || matches!(context.status, 204 | 304) {
        return body;
    }
    let Some(encoding) = headers.get("content-encoding") else {
        return body;
    };
    let coding = match encoding.trim().to_ascii_lowercase().as_str() {
        "gzip" | "x-gzip" => Coding::Gzip,
        "deflate" | "x-deflate" => Coding::Deflate,
        other => {
            debug!(url, encoding = other, "passing through unsupported content encoding");
            return body;
        }
    };
    debug!(url, ?coding, "decoding response body");
    inflate(body, coding, url.to_string())
}

enum Decoder {
    Gzip(GzDecoder<Vec<u8>>),
    Zlib(ZlibDecoder<Vec<u8>>),
    Raw(DeflateDecoder<Vec<u8>>),
}

impl Decoder {
    fn for_first_byte(coding: Coding, first: u8) -> Self {
        match coding {
            Coding::Gzip => Self::Gzip(GzDecoder::new(Vec::new())),
            Coding::Deflate if first & 0x0F == 0x08 => Self::Zlib(ZlibDecoder::new(Vec::new())),
            Coding::Deflate => Self::Raw(DeflateDecoder::new(Vec::new())),
        }
    }

    fn write_chunk(&mut self, mut input: &[u8]) -> std::io::Result<Bytes> {
        while !input.is_empty() {
            let written = match self {
                Self::Gzip(decoder) => decoder.write(input)?,
                Self::Zlib(decoder) => decoder.write(input)?,
                Self::Raw(decoder) => decoder.write(input)?,
            };
            // end of the compressed stream, trailing bytes are ignored
            if written == 0 {
                break;
            }
            input = &input[written..];
        }
        Ok(self.take_output())
    }

    fn take_output(&mut self) -> Bytes {
        let output = match self {
            Self::Gzip(decoder) => decoder.get_mut(),
            Self::Zlib(decoder) => decoder.get_mut(),
            Self::Raw(decoder) => decoder.get_mut(),
        };
        Bytes::from(std::mem::take(output))
    }

    fn finish(mut self) -> Bytes {
        let result = match &mut self {
            Self::Gzip(decoder) => decoder.try_finish(),
            Self::Zlib(decoder) => decoder.try_finish(),
            Self::Raw(decoder) => decoder.try_finish(),
        };
        if let Err(error) = result {
            debug!(%error, "tolerating truncated compressed stream");
        }
        self.take_output()
    }
}

struct InflateState {
    upstream: ByteStream,
    coding: Coding,
    decoder: Option<Decoder>,
    url: String,
}

fn inflate(upstream: ByteStream, coding: Coding, url: String) -> ByteStream {
    let state = InflateState {
        upstream,
        coding,
        decoder: None,
        url,
    };
    stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        loop {
            match state.upstream.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => {}
                Some(Ok(chunk)) => {
                    let coding = state.coding;
                    let decoder = state
                        .decoder
                        .get_or_insert_with(|| Decoder::for_first_byte(coding, chunk[0]));
                    match decoder.write_chunk(&chunk) {
                        Ok(output) if output.is_empty() => {}
                        Ok(output) => return Some((Ok(output), Some(state))),
                        Err(error) => {
                            return Some((Err(FetchError::decode(&state.url, error)), None));
                        }
                    }
                }
                Some(Err(error)) => return Some((Err(error), None)),
                None => {
                    let tail = state.decoder.take().map(Decoder::finish).unwrap_or_default();
                    return if tail.is_empty() {
                        None
                    } else {
                        Some((Ok(tail), None))
                    };
                }
            }
        }
    })
    .boxed()
}
