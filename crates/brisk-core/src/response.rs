//! Response construction and wire serialisation.
//!
//! Every response is guaranteed a `content-type` header at
//! construction time and gets `content-length` injected from the body.
//! Responses without an explicit `keep-alive` header receive the
//! default keep-alive pair.

use crate::error::Error;
use crate::headers::HeaderTable;
use crate::request::HttpVersion;

/// Advertised keep-alive timeout, in seconds.
pub const KEEP_ALIVE_TIMEOUT_SECS: u64 = 5;

/// An HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const CONTINUE: StatusCode = StatusCode(100);
    pub const SWITCHING_PROTOCOLS: StatusCode = StatusCode(101);
    pub const OK: StatusCode = StatusCode(200);
    pub const CREATED: StatusCode = StatusCode(201);
    pub const ACCEPTED: StatusCode = StatusCode(202);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const MOVED_PERMANENTLY: StatusCode = StatusCode(301);
    pub const FOUND: StatusCode = StatusCode(302);
    pub const NOT_MODIFIED: StatusCode = StatusCode(304);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const CONFLICT: StatusCode = StatusCode(409);
    pub const PAYLOAD_TOO_LARGE: StatusCode = StatusCode(413);
    pub const UPGRADE_REQUIRED: StatusCode = StatusCode(426);
    pub const TOO_MANY_REQUESTS: StatusCode = StatusCode(429);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const NOT_IMPLEMENTED: StatusCode = StatusCode(501);
    pub const BAD_GATEWAY: StatusCode = StatusCode(502);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);

    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub body: Vec<u8>,
    pub status: StatusCode,
    pub headers: HeaderTable,
    /// Outgoing cookies, in set order. Carried on the model but not
    /// serialised; `Set-Cookie` rendering is not implemented.
    pub cookies: Vec<(String, String)>,
}

impl Response {
    /// Build a response over the default header table merged with
    /// `headers`. Fails when the merge result lacks a content-type.
    pub fn new<I, N, V>(body: Vec<u8>, status: StatusCode, headers: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: Into<String>,
    {
        let mut table = HeaderTable::new();
        table.merge(headers, false);
        if !table.contains("content-type") {
            return Err(Error::MissingRequiredHeader("Content-Type".into()));
        }
        Ok(Self::assemble(body, status, table))
    }

    fn assemble(body: Vec<u8>, status: StatusCode, mut headers: HeaderTable) -> Self {
        if !headers.contains("keep-alive") {
            headers.append("connection", "keep-alive");
            headers.append("keep-alive", format!("timeout={KEEP_ALIVE_TIMEOUT_SECS}"));
        }
        headers.append("content-length", body.len().to_string());
        Self { body, status, headers, cookies: Vec::new() }
    }

    /// A plain-text response.
    pub fn text(body: impl Into<String>, status: StatusCode) -> Self {
        let mut headers = HeaderTable::new();
        headers.append("content-type", "text/plain");
        Self::assemble(body.into().into_bytes(), status, headers)
    }

    /// A JSON response serialised from `body`.
    pub fn json(body: &serde_json::Value, status: StatusCode) -> Self {
        let mut headers = HeaderTable::new();
        headers.append("content-type", "application/json");
        Self::assemble(body.to_string().into_bytes(), status, headers)
    }

    /// Insert or replace a header after construction.
    pub fn append_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers.append(name, value);
    }

    /// Record an outgoing cookie.
    pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.push((name.into(), value.into()));
    }

    /// Serialise the full response. The status line carries the bare
    /// status code, no reason phrase.
    pub fn output(&self, version: HttpVersion) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 128);
        out.extend_from_slice(format!("HTTP/{} {}", version, self.status).as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.headers.render());
        out.extend_from_slice(b"\r\n\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    /// Serialise a `101 Switching Protocols` head. No body; the frame
    /// stream follows on the raw connection.
    pub fn channel(&self, version: HttpVersion) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(format!("HTTP/{version} 101 Switching Protocols").as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.headers.render());
        out.extend_from_slice(b"\r\n\r\n");
        out
    }
}
