//! Case-insensitive, ordered, multi-value header container.
//!
//! Names are validated against the HTTP token grammar and folded to lower case
//! for lookup; the first-seen spelling is kept for the wire. Values are accepted
//! permissively (embedded spaces are fine) but must not contain control
//! characters other than tab, nor characters outside Latin-1.
//!
//! Iteration is lexicographic by normalized name; a name with several values
//! yields one entry per value, in insertion order.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::FetchError;

#[allow(clippy::expect_used)]
static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[!#$%&'*+\-.^_`|~0-9A-Za-z]+$").expect("token regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static INVALID_VALUE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^\t\x20-\x7e\x80-\xff]").expect("header value regex is valid") // Static pattern, safe to panic
});

/// Returns true when `name` satisfies the HTTP token grammar.
#[must_use]
pub fn is_valid_header_name(name: &str) -> bool {
    TOKEN_PATTERN.is_match(name)
}

/// Returns true when `value` contains only tab, printable ASCII or Latin-1.
#[must_use]
pub fn is_valid_header_value(value: &str) -> bool {
    !INVALID_VALUE_PATTERN.is_match(value)
}

fn validate_name(name: &str) -> Result<(), FetchError> {
    if is_valid_header_name(name) {
        Ok(())
    } else {
        Err(FetchError::invalid_input(format!(
            "{name} is not a legal HTTP header name"
        )))
    }
}

fn validate_value(value: &str) -> Result<(), FetchError> {
    if is_valid_header_value(value) {
        Ok(())
    } else {
        Err(FetchError::invalid_input(format!(
            "{value} is not a legal HTTP header value"
        )))
    }
}

/// Accepted shapes for initializing a [`HeaderMap`].
#[derive(Debug, Clone)]
pub enum HeadersInit {
    /// Name/value tuples.
    Pairs(Vec<(String, String)>),
    /// Variable-length sequences; each must hold exactly a name and a value.
    Sequence(Vec<Vec<String>>),
    /// A name to value mapping.
    Mapping(BTreeMap<String, String>),
    /// Another header map, copied by value.
    Headers(HeaderMap),
    /// A generic record. Object properties are coerced to strings (arrays are
    /// joined with `,`); an array is treated as a sequence of pairs.
    Record(serde_json::Value),
}

impl From<HeaderMap> for HeadersInit {
    fn from(headers: HeaderMap) -> Self {
        Self::Headers(headers)
    }
}

impl From<&HeaderMap> for HeadersInit {
    fn from(headers: &HeaderMap) -> Self {
        Self::Headers(headers.clone())
    }
}

impl<K: Into<String>, V: Into<String>> From<Vec<(K, V)>> for HeadersInit {
    fn from(pairs: Vec<(K, V)>) -> Self {
        Self::Pairs(
            pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for HeadersInit {
    fn from(pairs: [(K, V); N]) -> Self {
        Self::Pairs(
            pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

impl From<Vec<Vec<String>>> for HeadersInit {
    fn from(sequence: Vec<Vec<String>>) -> Self {
        Self::Sequence(sequence)
    }
}

impl From<BTreeMap<String, String>> for HeadersInit {
    fn from(mapping: BTreeMap<String, String>) -> Self {
        Self::Mapping(mapping)
    }
}

impl From<HashMap<String, String>> for HeadersInit {
    fn from(mapping: HashMap<String, String>) -> Self {
        Self::Mapping(mapping.into_iter().collect())
    }
}

impl From<serde_json::Value> for HeadersInit {
    fn from(record: serde_json::Value) -> Self {
        Self::Record(record)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderEntry {
    name: String,
    values: Vec<String>,
}

/// Ordered multi-value header map with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: BTreeMap<String, HeaderEntry>,
}

impl HeaderMap {
    /// Creates an empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a header map from any accepted initializer shape.
    ///
    /// # Errors
    ///
    /// Returns a type error when a name or value is illegal, when a sequence
    /// entry does not hold exactly two elements, or when a record is neither
    /// an object nor an array of pairs.
    pub fn from_init(init: impl Into<HeadersInit>) -> Result<Self, FetchError> {
        let mut headers = Self::new();
        match init.into() {
            HeadersInit::Headers(other) => return Ok(other),
            HeadersInit::Pairs(pairs) => {
                for (name, value) in pairs {
                    headers.append(&name, &value)?;
                }
            }
            HeadersInit::Mapping(mapping) => {
                for (name, value) in mapping {
                    headers.append(&name, &value)?;
                }
            }
            HeadersInit::Sequence(sequence) => headers.extend_sequence(sequence)?,
            HeadersInit::Record(record) => headers.extend_record(record)?,
        }
        Ok(headers)
    }

    fn extend_sequence(&mut self, sequence: Vec<Vec<String>>) -> Result<(), FetchError> {
        for pair in sequence {
            let [name, value]: [String; 2] = pair.try_into().map_err(|_| {
                FetchError::invalid_input("Each header pair must be a name/value tuple")
            })?;
            self.append(&name, &value)?;
        }
        Ok(())
    }

    fn extend_record(&mut self, record: serde_json::Value) -> Result<(), FetchError> {
        match record {
            serde_json::Value::Object(properties) => {
                for (name, value) in properties {
                    self.append(&name, &coerce_record_value(&value))?;
                }
                Ok(())
            }
            serde_json::Value::Array(items) => {
                let mut sequence = Vec::with_capacity(items.len());
                for item in items {
                    let serde_json::Value::Array(pair) = item else {
                        return Err(FetchError::invalid_input(
                            "Each header pair must be iterable",
                        ));
                    };
                    sequence.push(pair.iter().map(coerce_record_value).collect());
                }
                self.extend_sequence(sequence)
            }
            _ => Err(FetchError::invalid_input(
                "Provided initializer must be an object",
            )),
        }
    }

    /// Appends a value, keeping existing values for the same name.
    ///
    /// # Errors
    ///
    /// Returns a type error when the name or value is illegal.
    pub fn append(&mut self, name: &str, value: &str) -> Result<(), FetchError> {
        validate_name(name)?;
        validate_value(value)?;
        self.entries
            .entry(name.to_ascii_lowercase())
            .or_insert_with(|| HeaderEntry {
                name: name.to_string(),
                values: Vec::new(),
            })
            .values
            .push(value.to_string());
        Ok(())
    }

    /// Replaces all values for `name` with `value`.
    ///
    /// # Errors
    ///
    /// Returns a type error when the name or value is illegal.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), FetchError> {
        validate_name(name)?;
        validate_value(value)?;
        let entry = self
            .entries
            .entry(name.to_ascii_lowercase())
            .or_insert_with(|| HeaderEntry {
                name: name.to_string(),
                values: Vec::new(),
            });
        entry.values.clear();
        entry.values.push(value.to_string());
        Ok(())
    }

    /// Returns all values for `name` joined with `,`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|entry| entry.values.join(","))
    }

    /// Returns every value for `name` in insertion order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map_or(&[], |entry| entry.values.as_slice())
    }

    /// Returns true when `name` has at least one value.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Removes all values for `name`.
    ///
    /// # Errors
    ///
    /// Returns a type error when the name is illegal.
    pub fn delete(&mut self, name: &str) -> Result<(), FetchError> {
        validate_name(name)?;
        self.entries.remove(&name.to_ascii_lowercase());
        Ok(())
    }

    /// Iterates `(normalized name, value)` pairs in sorted order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries.iter().flat_map(|(key, entry)| {
            entry
                .values
                .iter()
                .map(move |value| (key.as_str(), value.as_str()))
        })
    }

    /// Iterates normalized names, once per value.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries().map(|(name, _)| name)
    }

    /// Iterates values in entry order.
    pub fn values(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries().map(|(_, value)| value)
    }

    /// Number of distinct header names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no headers are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the header list in first-seen display case, one pair per value.
    #[must_use]
    pub fn raw(&self) -> Vec<(String, String)> {
        self.entries
            .values()
            .flat_map(|entry| {
                entry
                    .values
                    .iter()
                    .map(|value| (entry.name.clone(), value.clone()))
            })
            .collect()
    }

    /// Builds a header map from a wire header list, skipping illegal entries.
    pub(crate) fn from_wire(list: Vec<(String, String)>) -> Self {
        let mut headers = Self::new();
        for (name, value) in list {
            if let Err(error) = headers.append(&name, &value) {
                debug!(header = %name, error = %error, "dropping illegal response header");
            }
        }
        headers
    }
}

impl<'a> IntoIterator for &'a HeaderMap {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.entries())
    }
}

fn coerce_record_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(coerce_record_value)
            .collect::<Vec<_>>()
            .join(","),
        serde_json::Value::Object(_) => "[object Object]".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fetch::FetchErrorKind;
    use serde_json::json;

    #[test]
    fn test_append_joins_values_with_comma() {
        let mut headers = HeaderMap::new();
        headers.append("Accept", "text/html").unwrap();
        headers.append("accept", "application/json").unwrap();
        assert_eq!(
            headers.get("ACCEPT").as_deref(),
            Some("text/html,application/json")
        );
        assert_eq!(headers.get_all("accept").len(), 2);
    }

    #[test]
    fn test_set_replaces_all_values() {
        let mut headers = HeaderMap::new();
        headers.append("X-Test", "a").unwrap();
        headers.append("X-Test", "b").unwrap();
        headers.set("x-test", "c").unwrap();
        assert_eq!(headers.get("x-test").as_deref(), Some("c"));
    }

    #[test]
    fn test_get_missing_returns_none() {
        let headers = HeaderMap::new();
        assert_eq!(headers.get("missing"), None);
        assert!(!headers.has("missing"));
    }

    #[test]
    fn test_delete_removes_name() {
        let mut headers = HeaderMap::from_init([("A", "1"), ("B", "2")]).unwrap();
        headers.delete("a").unwrap();
        assert!(!headers.has("A"));
        assert!(headers.has("b"));
    }

    #[test]
    fn test_iteration_is_sorted_and_keeps_duplicates_in_order() {
        let mut headers = HeaderMap::new();
        headers.append("b", "1").unwrap();
        headers.append("a", "1").unwrap();
        headers.append("c", "1").unwrap();
        headers.append("b", "2").unwrap();
        headers.append("b", "3").unwrap();

        let entries: Vec<_> = headers.entries().collect();
        assert_eq!(
            entries,
            vec![("a", "1"), ("b", "1"), ("b", "2"), ("b", "3"), ("c", "1")]
        );
        assert_eq!(headers.keys().collect::<Vec<_>>(), vec!["a", "b", "b", "b", "c"]);
        assert_eq!(headers.values().collect::<Vec<_>>(), vec!["1", "1", "2", "3", "1"]);

        // restartable
        assert_eq!(headers.entries().count(), 5);
        assert_eq!((&headers).into_iter().count(), 5);
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        let mut headers = HeaderMap::new();
        for name in ["", "Hé", "bad name", "a\u{1}b", "x:y", "(comment)"] {
            let error = headers.append(name, "ok").unwrap_err();
            assert_eq!(error.kind(), FetchErrorKind::Type, "name {name:?}");
        }
        assert!(headers.set("bad name", "v").is_err());
        assert!(headers.delete("bad name").is_err());
    }

    #[test]
    fn test_values_allow_spaces_but_not_controls() {
        let mut headers = HeaderMap::new();
        headers.append("X-Spaced", "a value with spaces").unwrap();
        headers.append("X-Tab", "tab\tinside").unwrap();
        headers.append("X-Latin", "caf\u{e9}").unwrap();
        assert!(headers.append("X-Bad", "line\nbreak").is_err());
        assert!(headers.append("X-Bad", "\u{263a}").is_err());
    }

    #[test]
    fn test_raw_keeps_first_seen_display_case() {
        let mut headers = HeaderMap::new();
        headers.append("X-Custom-Header", "1").unwrap();
        headers.append("x-custom-header", "2").unwrap();
        assert_eq!(
            headers.raw(),
            vec![
                ("X-Custom-Header".to_string(), "1".to_string()),
                ("X-Custom-Header".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_init_from_headers_copies_by_value() {
        let mut original = HeaderMap::from_init([("a", "1")]).unwrap();
        let copy = HeaderMap::from_init(&original).unwrap();
        original.append("a", "2").unwrap();
        assert_eq!(copy.get("a").as_deref(), Some("1"));
        assert_eq!(original.get("a").as_deref(), Some("1,2"));
    }

    #[test]
    fn test_init_from_sequence_rejects_wrong_arity() {
        let ok = HeaderMap::from_init(vec![vec!["a".to_string(), "1".to_string()]]).unwrap();
        assert_eq!(ok.get("a").as_deref(), Some("1"));

        let error = HeaderMap::from_init(vec![vec![
            "a".to_string(),
            "1".to_string(),
            "2".to_string(),
        ]])
        .unwrap_err();
        assert_eq!(error.kind(), FetchErrorKind::Type);

        assert!(HeaderMap::from_init(vec![vec!["a".to_string()]]).is_err());
    }

    #[test]
    fn test_init_from_mapping() {
        let mut mapping = HashMap::new();
        mapping.insert("Content-Type".to_string(), "text/plain".to_string());
        let headers = HeaderMap::from_init(mapping).unwrap();
        assert_eq!(headers.get("content-type").as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_init_from_record_coerces_values() {
        let headers = HeaderMap::from_init(json!({
            "a": "1",
            "b": ["2", 3],
            "c": 4,
            "d": true,
        }))
        .unwrap();
        assert_eq!(headers.get("a").as_deref(), Some("1"));
        assert_eq!(headers.get("b").as_deref(), Some("2,3"));
        assert_eq!(headers.get("c").as_deref(), Some("4"));
        assert_eq!(headers.get("d").as_deref(), Some("true"));
    }

    #[test]
    fn test_init_from_record_array_is_a_sequence() {
        let headers = HeaderMap::from_init(json!([["a", "1"], ["a", "2"]])).unwrap();
        assert_eq!(headers.get("a").as_deref(), Some("1,2"));
        assert!(HeaderMap::from_init(json!([["a", "1", "2"]])).is_err());
        assert!(HeaderMap::from_init(json!(["a"])).is_err());
    }

    #[test]
    fn test_init_from_scalar_record_fails() {
        for record in [json!("a"), json!(1), json!(null)] {
            let error = HeaderMap::from_init(record).unwrap_err();
            assert_eq!(error.kind(), FetchErrorKind::Type);
        }
    }

    #[test]
    fn test_from_wire_skips_illegal_entries() {
        let headers = HeaderMap::from_wire(vec![
            ("Set-Cookie".to_string(), "a=1".to_string()),
            ("bad name".to_string(), "x".to_string()),
            ("Set-Cookie".to_string(), "b=2".to_string()),
        ]);
        assert_eq!(headers.get_all("set-cookie"), ["a=1", "b=2"]);
        assert_eq!(headers.len(), 1);
    }
}
