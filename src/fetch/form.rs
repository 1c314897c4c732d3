//! `multipart/form-data` encoder.
//!
//! Parts are text fields, in-memory files, or streamed files. The encoded
//! length is known unless a streamed part was added without a declared length.

use bytes::Bytes;
use futures_util::{StreamExt, future, stream};
use rand::Rng;

use super::{Blob, ByteStream};

const BOUNDARY_PREFIX: &str = "--------------------------";
const BOUNDARY_DIGITS: usize = 24;
const DEFAULT_FILE_TYPE: &str = "application/octet-stream";
const LINE_BREAK: &str = "\r\n";

fn generate_boundary() -> String {
    let mut rng = rand::thread_rng();
    let digits: String = (0..BOUNDARY_DIGITS)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect();
    format!("{BOUNDARY_PREFIX}{digits}")
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('\r', "%0D")
        .replace('\n', "%0A")
        .replace('"', "%22")
}

enum PartData {
    Text(String),
    File(Bytes),
    Stream {
        stream: ByteStream,
        length: Option<u64>,
    },
}

struct Part {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    data: PartData,
}

impl Part {
    fn header(&self, boundary: &str) -> String {
        let mut header = format!(
            "--{boundary}{LINE_BREAK}Content-Disposition: form-data; name=\"{}\"",
            escape_quoted(&self.name)
        );
        if let Some(filename) = &self.filename {
            header.push_str(&format!("; filename=\"{}\"", escape_quoted(filename)));
        }
        header.push_str(LINE_BREAK);
        if let Some(content_type) = &self.content_type {
            header.push_str(&format!("Content-Type: {content_type}{LINE_BREAK}"));
        }
        header.push_str(LINE_BREAK);
        header
    }

    fn data_length(&self) -> Option<u64> {
        match &self.data {
            PartData::Text(text) => Some(text.len() as u64),
            PartData::File(bytes) => Some(bytes.len() as u64),
            PartData::Stream { length, .. } => *length,
        }
    }
}

/// Multipart form body.
pub struct FormData {
    boundary: String,
    parts: Vec<Part>,
}

impl std::fmt::Debug for FormData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormData")
            .field("boundary", &self.boundary)
            .field("parts", &self.parts.len())
            .finish()
    }
}

impl Default for FormData {
    fn default() -> Self {
        Self::new()
    }
}

impl FormData {
    /// Creates an empty form with a random boundary.
    #[must_use]
    pub fn new() -> Self {
        Self::with_boundary(generate_boundary())
    }

    /// Creates an empty form with a fixed boundary.
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    /// Adds a text field.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.parts.push(Part {
            name: name.into(),
            filename: None,
            content_type: None,
            data: PartData::Text(value.into()),
        });
        self
    }

    /// Adds an in-memory file. An empty blob type falls back to
    /// `application/octet-stream`.
    pub fn append_blob(
        &mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        blob: &Blob,
    ) -> &mut Self {
        let content_type = if blob.content_type().is_empty() {
            DEFAULT_FILE_TYPE.to_string()
        } else {
            blob.content_type().to_string()
        };
        self.parts.push(Part {
            name: name.into(),
            filename: Some(filename.into()),
            content_type: Some(content_type),
            data: PartData::File(blob.bytes()),
        });
        self
    }

    /// Adds a streamed file, with its length when known up front.
    pub fn append_stream(
        &mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: Option<&str>,
        stream: ByteStream,
        length: Option<u64>,
    ) -> &mut Self {
        self.parts.push(Part {
            name: name.into(),
            filename: Some(filename.into()),
            content_type: Some(content_type.unwrap_or(DEFAULT_FILE_TYPE).to_string()),
            data: PartData::Stream { stream, length },
        });
        self
    }

    /// Boundary separating parts.
    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Boundary-bearing `Content-Type` header value.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    fn footer(&self) -> String {
        format!("--{}--{LINE_BREAK}", self.boundary)
    }

    /// Total encoded length, or `None` when a streamed part has no declared length.
    #[must_use]
    pub fn known_length(&self) -> Option<u64> {
        let mut total = self.footer().len() as u64;
        for part in &self.parts {
            total += part.header(&self.boundary).len() as u64;
            total += part.data_length()?;
            total += LINE_BREAK.len() as u64;
        }
        Some(total)
    }

    /// Returns true when at least one part is streamed.
    #[must_use]
    pub fn has_streams(&self) -> bool {
        self.parts
            .iter()
            .any(|part| matches!(part.data, PartData::Stream { .. }))
    }

    /// Copies the form. Returns `None` when a streamed part cannot be replayed.
    #[must_use]
    pub fn try_clone(&self) -> Option<Self> {
        let mut parts = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            let data = match &part.data {
                PartData::Text(text) => PartData::Text(text.clone()),
                PartData::File(bytes) => PartData::File(bytes.clone()),
                PartData::Stream { .. } => return None,
            };
            parts.push(Part {
                name: part.name.clone(),
                filename: part.filename.clone(),
                content_type: part.content_type.clone(),
                data,
            });
        }
        Some(Self {
            boundary: self.boundary.clone(),
            parts,
        })
    }

    /// Encodes the whole form into one buffer when no part is streamed.
    #[must_use]
    pub fn to_bytes(&self) -> Option<Bytes> {
        let mut encoded = Vec::with_capacity(
            usize::try_from(self.known_length()?).unwrap_or_default(),
        );
        for part in &self.parts {
            encoded.extend_from_slice(part.header(&self.boundary).as_bytes());
            match &part.data {
                PartData::Text(text) => encoded.extend_from_slice(text.as_bytes()),
                PartData::File(bytes) => encoded.extend_from_slice(bytes),
                PartData::Stream { .. } => return None,
            }
            encoded.extend_from_slice(LINE_BREAK.as_bytes());
        }
        encoded.extend_from_slice(self.footer().as_bytes());
        Some(Bytes::from(encoded))
    }

    /// Encodes the form as a byte stream, piping streamed parts through.
    #[must_use]
    pub fn into_stream(self) -> ByteStream {
        let footer = self.footer();
        let mut pieces: Vec<ByteStream> = Vec::with_capacity(self.parts.len() * 3 + 1);
        for part in self.parts {
            pieces.push(ready_chunk(Bytes::from(part.header(&self.boundary))));
            pieces.push(match part.data {
                PartData::Text(text) => ready_chunk(Bytes::from(text)),
                PartData::File(bytes) => ready_chunk(bytes),
                PartData::Stream { stream, .. } => stream,
            });
            pieces.push(ready_chunk(Bytes::from_static(LINE_BREAK.as_bytes())));
        }
        pieces.push(ready_chunk(Bytes::from(footer)));
        stream::iter(pieces).flatten().boxed()
    }
}

fn ready_chunk(bytes: Bytes) -> ByteStream {
    stream::once(future::ready(Ok(bytes))).boxed()
}
