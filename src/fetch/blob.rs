//! Immutable byte buffer with a declared MIME type.

use bytes::Bytes;

/// Bytes plus a declared content type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blob {
    bytes: Bytes,
    content_type: String,
}

/// Lower-cases a MIME type, or drops it when it holds non-printable ASCII.
fn normalize_type(content_type: &str) -> String {
    if content_type.chars().all(|c| matches!(c, '\u{20}'..='\u{7e}')) {
        content_type.to_ascii_lowercase()
    } else {
        String::new()
    }
}

/// Resolves a possibly negative offset against `size`, clamped to `0..=size`.
fn relative_offset(offset: i64, size: usize) -> usize {
    let size_signed = i64::try_from(size).unwrap_or(i64::MAX);
    let resolved = if offset < 0 {
        (size_signed + offset).max(0)
    } else {
        offset.min(size_signed)
    };
    usize::try_from(resolved).unwrap_or(0)
}

impl Blob {
    /// Creates a blob. The type is lower-cased, or emptied if it is not printable ASCII.
    pub fn new(bytes: impl Into<Bytes>, content_type: &str) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: normalize_type(content_type),
        }
    }

    /// Size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Declared MIME type (may be empty).
    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Contents (cheap reference-counted copy).
    #[must_use]
    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    /// Contents decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Returns the sub-range `[start, end)` as a new blob.
    ///
    /// Negative offsets count back from the end; `None` means the respective
    /// edge of the blob. An inverted range yields an empty blob.
    #[must_use]
    pub fn slice(&self, start: Option<i64>, end: Option<i64>, content_type: &str) -> Self {
        let size = self.size();
        let from = start.map_or(0, |offset| relative_offset(offset, size));
        let to = end.map_or(size, |offset| relative_offset(offset, size));
        let bytes = if to > from {
            self.bytes.slice(from..to)
        } else {
            Bytes::new()
        };
        Self::new(bytes, content_type)
    }
}
