//! The request model: methods, versions, bodies and the lazy
//! body/query accessors.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use crate::error::Error;
use crate::headers::HeaderTable;

/// Fallback media type per RFC 2616 section 7.2.1.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// The verbs the engine routes on. `Channel` is the logical method
/// assigned to websocket routes; it never appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Joint,
    Channel,
}

impl Method {
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "JOINT" => Some(Method::Joint),
            "CHANNEL" => Some(Method::Channel),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Post => "post",
            Method::Put => "put",
            Method::Joint => "joint",
            Method::Channel => "channel",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "HTTP/1.0" => Some(HttpVersion::Http10),
            "HTTP/1.1" => Some(HttpVersion::Http11),
            _ => None,
        }
    }

    /// The bare version number used in the status line.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "1.0",
            HttpVersion::Http11 => "1.1",
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A body accumulated as the chunks in which it arrived. Nothing is
/// joined until someone asks.
#[derive(Debug, Default)]
pub struct Body {
    parts: Vec<Vec<u8>>,
}

impl Body {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, part: Vec<u8>) {
        self.parts.push(part);
    }

    pub fn extract(&self) -> Vec<u8> {
        self.parts.concat()
    }

    pub fn len(&self) -> usize {
        self.parts.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A multi-valued parameter map. `get` returns the first value,
/// `get_all` the whole list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestParameters {
    params: HashMap<String, Vec<String>>,
}

impl RequestParameters {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut params: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in pairs {
            params.entry(name).or_default().push(value);
        }
        Self { params }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> Option<&[String]> {
        self.params.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// One file part of a multipart/form-data body.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub parameters: HashMap<String, String>,
}

/// A decoded form body.
#[derive(Debug, Clone, PartialEq)]
pub enum FormBody {
    UrlEncoded(RequestParameters),
    Multipart(Vec<FilePart>),
}

/// A parsed request. The body accumulates while the connection reads;
/// the `json`, `form` and `query` accessors decode lazily and cache
/// their result.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query_string: Option<String>,
    pub version: HttpVersion,
    pub headers: HeaderTable,
    pub body: Body,
    parsed_json: OnceLock<serde_json::Value>,
    parsed_form: OnceLock<FormBody>,
    parsed_query: OnceLock<RequestParameters>,
}

impl Request {
    /// Build a request from the parsed request line and header block.
    /// The target is split on `?`; only the path component is
    /// percent-decoded.
    pub fn new(method: Method, target: &str, version: HttpVersion, headers: HeaderTable) -> Self {
        let (raw_path, query_string) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };
        Self {
            method,
            path: percent_decode(raw_path),
            query_string,
            version,
            headers,
            body: Body::new(),
            parsed_json: OnceLock::new(),
            parsed_form: OnceLock::new(),
            parsed_query: OnceLock::new(),
        }
    }

    fn content_type(&self) -> &str {
        self.headers
            .get("content-type")
            .map(|h| h.primary_value())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    /// The body decoded as JSON. Requires `application/json`.
    pub fn json(&self) -> Result<&serde_json::Value, Error> {
        let content_type = self.content_type();
        if content_type != "application/json" {
            return Err(Error::ServerError(format!(
                "Content-Type[{content_type}] not supported"
            )));
        }
        if let Some(value) = self.parsed_json.get() {
            return Ok(value);
        }
        let value: serde_json::Value =
            serde_json::from_slice(&self.body.extract()).map_err(|_| {
                Error::BadRequest(format!(
                    "Unable to decode request-body of Content-Type[{content_type}]"
                ))
            })?;
        Ok(self.parsed_json.get_or_init(|| value))
    }

    /// The body decoded as a form. Urlencoded bodies become a
    /// multi-valued parameter map; multipart bodies become file parts.
    pub fn form(&self) -> Result<&FormBody, Error> {
        if let Some(form) = self.parsed_form.get() {
            return Ok(form);
        }
        let content_type = self.content_type().to_string();
        let form = match content_type.as_str() {
            "application/x-www-form-urlencoded" => {
                let text = String::from_utf8_lossy(&self.body.extract()).into_owned();
                FormBody::UrlEncoded(RequestParameters::from_pairs(parse_query_pairs(&text)))
            }
            "multipart/form-data" => FormBody::Multipart(self.parse_multipart()?),
            DEFAULT_CONTENT_TYPE => {
                return Err(Error::ServerError(format!(
                    "form decoding for Content-Type[{content_type}] is not implemented"
                )))
            }
            _ => {
                return Err(Error::ServerError(format!(
                    "Content-Type[{content_type}] not supported"
                )))
            }
        };
        Ok(self.parsed_form.get_or_init(|| form))
    }

    fn parse_multipart(&self) -> Result<Vec<FilePart>, Error> {
        let boundary = self
            .headers
            .get("content-type")
            .and_then(|h| h.parameters().get("boundary").cloned())
            .ok_or_else(|| Error::BadRequest("multipart body without a boundary".into()))?;

        let body = self.body.extract();
        let segments = split_on(&body, boundary.as_bytes());
        if segments.len() < 3 {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        // The first and last segments are the preamble and epilogue.
        for part in &segments[1..segments.len() - 1] {
            let Some(split_at) = find(part, b"\r\n\r\n") else {
                continue;
            };
            let (head, tail) = part.split_at(split_at);
            let mut headers = HeaderTable::empty();
            for line in String::from_utf8_lossy(head).split("\r\n") {
                if !line.is_empty() {
                    headers.parse_line(line);
                }
            }
            let body = trim_bytes(&tail[4..], b"\r\n-");
            files.push(FilePart {
                content_type: headers.get("content-type").map(|h| h.value().to_string()),
                parameters: headers
                    .get("content-disposition")
                    .map(|h| h.parameters().clone())
                    .unwrap_or_default(),
                body: body.to_vec(),
            });
        }
        Ok(files)
    }

    /// The query string decoded as a multi-valued parameter map.
    pub fn query(&self) -> &RequestParameters {
        self.parsed_query.get_or_init(|| {
            match &self.query_string {
                Some(qs) => RequestParameters::from_pairs(parse_query_pairs(qs)),
                None => RequestParameters::default(),
            }
        })
    }

    /// Cookie parsing is not implemented.
    pub fn cookies(&self) -> Result<(), Error> {
        Err(Error::ServerError("cookie parsing is not implemented".into()))
    }
}

/// Decode `%XX` escapes. Invalid escapes pass through untouched.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Split a query or urlencoded body into decoded name/value pairs.
/// `+` decodes to a space, as in form encoding.
pub fn parse_query_pairs(input: &str) -> Vec<(String, String)> {
    input
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (
                percent_decode(&name.replace('+', " ")),
                percent_decode(&value.replace('+', " ")),
            )
        })
        .collect()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn split_on<'a>(haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
    let mut segments = Vec::new();
    let mut rest = haystack;
    while let Some(at) = find(rest, needle) {
        segments.push(&rest[..at]);
        rest = &rest[at + needle.len()..];
    }
    segments.push(rest);
    segments
}

fn trim_bytes<'a>(mut slice: &'a [u8], set: &[u8]) -> &'a [u8] {
    while let Some(first) = slice.first() {
        if set.contains(first) {
            slice = &slice[1..];
        } else {
            break;
        }
    }
    while let Some(last) = slice.last() {
        if set.contains(last) {
            slice = &slice[..slice.len() - 1];
        } else {
            break;
        }
    }
    slice
}
