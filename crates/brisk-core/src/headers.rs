//! Header representation and the ordered header table.
//!
//! Header names are normalised to lowercase at construction time so
//! lookups are case-insensitive without allocating per query. Values
//! keep their raw form; the part before the first `;` is the primary
//! value and anything after it is parsed lazily into parameters
//! (`charset=utf-8`, `boundary=...` and friends).

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

/// A single header line.
#[derive(Debug)]
pub struct Header {
    name: String,
    value: String,
    parameters: OnceLock<HashMap<String, String>>,
}

impl Header {
    pub fn new(name: impl AsRef<str>, value: impl Into<String>) -> Self {
        Self {
            name: name.as_ref().to_ascii_lowercase(),
            value: value.into(),
            parameters: OnceLock::new(),
        }
    }

    /// Lowercased header name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw value, parameters included.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// The value up to the first `;`, trimmed.
    pub fn primary_value(&self) -> &str {
        match self.value.split_once(';') {
            Some((primary, _)) => primary.trim(),
            None => self.value.trim(),
        }
    }

    /// `key=value` parameters trailing the primary value. Parsed once,
    /// on first access.
    pub fn parameters(&self) -> &HashMap<String, String> {
        self.parameters.get_or_init(|| {
            let mut params = HashMap::new();
            for part in self.value.split(';').skip(1) {
                if let Some((key, value)) = part.split_once('=') {
                    params.insert(
                        key.trim().to_ascii_lowercase(),
                        value.trim().trim_matches('"').to_string(),
                    );
                }
            }
            params
        })
    }
}

impl Clone for Header {
    fn clone(&self) -> Self {
        Self::new(&self.name, self.value.clone())
    }
}

impl PartialEq for Header {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.primary_value() == other.primary_value()
    }
}

impl Eq for Header {}

impl Hash for Header {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.primary_value().hash(state);
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// An insertion-ordered header table with case-insensitive,
/// last-write-wins semantics.
#[derive(Debug, Clone, Default)]
pub struct HeaderTable {
    entries: Vec<Header>,
}

impl HeaderTable {
    /// An empty table. Used on the request side, where every header
    /// comes off the wire.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The response-side default table, pre-seeded with
    /// `content-type: text/plain`.
    pub fn new() -> Self {
        let mut table = Self::default();
        table.append("content-type", "text/plain");
        table
    }

    /// Insert or replace a header. A replaced header keeps its
    /// original position in the table.
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let header = Header::new(name, value);
        match self.entries.iter_mut().find(|h| h.name() == header.name()) {
            Some(existing) => *existing = header,
            None => self.entries.push(header),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Header> {
        let name = name.to_ascii_lowercase();
        self.entries.iter().find(|h| h.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Merge a batch of headers. With `as_defaults` set, a pair is
    /// only applied when its name is not yet present.
    pub fn merge<I, N, V>(&mut self, pairs: I, as_defaults: bool)
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: Into<String>,
    {
        for (name, value) in pairs {
            if as_defaults && self.contains(name.as_ref()) {
                continue;
            }
            self.append(name, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialise the table as CRLF-joined `name: value` lines, with no
    /// trailing CRLF.
    pub fn render(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, header) in self.entries.iter().enumerate() {
            if i > 0 {
                out.extend_from_slice(b"\r\n");
            }
            out.extend_from_slice(header.name().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(header.value().as_bytes());
        }
        out
    }

    /// Parse one wire header line into the table. The line is split on
    /// the first colon; both sides are trimmed.
    pub fn parse_line(&mut self, line: &str) -> bool {
        match line.split_once(':') {
            Some((name, value)) => {
                self.append(name.trim(), value.trim().to_string());
                true
            }
            None => false,
        }
    }
}

impl<'a> IntoIterator for &'a HeaderTable {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
